// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM transport layer
//!
//! The [`Tcti`] trait is the byte-stream boundary of the crate: one
//! complete command per `write`, one complete response per `read`. The
//! stock implementation talks to the Linux character devices `/dev/tpmrm0`
//! and `/dev/tpm0`.

use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::Path;

use super::errors::{Error, Result};

/// Maximum TPM command/response size in bytes.
pub const MAX_COMMAND_SIZE: usize = 4096;

/// A byte-stream transport below the TPM command protocol.
pub trait Tcti {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<()>;
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize>;
    fn close(&mut self) -> std::io::Result<()>;
}

/// A TPM character device.
pub struct TpmDevice {
    file: File,
    path: String,
}

impl TpmDevice {
    /// Opens a TPM device. A `device:` prefix on the path is accepted and
    /// stripped.
    pub fn open(path: &str) -> Result<Self> {
        let device_path = path.strip_prefix("device:").unwrap_or(path);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device_path)
            .map_err(|source| Error::Transport { op: "open", source })?;

        Ok(Self {
            file,
            path: device_path.to_string(),
        })
    }

    /// Opens the in-kernel resource manager if present, else the raw
    /// device.
    pub fn detect() -> Result<Self> {
        if Path::new("/dev/tpmrm0").exists() {
            Self::open("/dev/tpmrm0")
        } else if Path::new("/dev/tpm0").exists() {
            Self::open("/dev/tpm0")
        } else {
            Err(Error::Transport {
                op: "open",
                source: std::io::Error::new(std::io::ErrorKind::NotFound, "TPM device not found"),
            })
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }
}

impl Tcti for TpmDevice {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<()> {
        self.file.write_all(buf)
    }

    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
        self.file.read(buf)
    }

    fn close(&mut self) -> std::io::Result<()> {
        // Dropping the File closes the descriptor; flush for symmetry.
        self.file.flush()
    }
}
