// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Per-command facade over the pipeline
//!
//! One function per TPM 2.0 command, grouped the way the TCG part-3
//! specification groups them. Each function validates its handle contexts,
//! marshals the parameter area, runs the pipeline and applies the
//! command-specific registry effect.

mod capability;
mod contexts;
mod hierarchy;
mod nv;
mod objects;
mod pcr;
mod sessions;

pub use objects::CreationInfo;

use super::constants::{TpmCc, TpmSu};
use super::errors::Result;
use super::marshal::CommandBuffer;
use super::resources::Session;
use super::tpm::{CommandArgs, TpmContext};

impl TpmContext {
    /// TPM2_Startup.
    pub fn startup(&mut self, startup_type: TpmSu) -> Result<()> {
        let mut cp = CommandBuffer::new();
        cp.put_u16(startup_type as u16);
        self.run_command(TpmCc::Startup, CommandArgs::new(&[], cp.into_vec()))?
            .no_params()
    }

    /// TPM2_Shutdown.
    pub fn shutdown(&mut self, shutdown_type: TpmSu) -> Result<()> {
        let mut cp = CommandBuffer::new();
        cp.put_u16(shutdown_type as u16);
        self.run_command(TpmCc::Shutdown, CommandArgs::new(&[], cp.into_vec()))?
            .no_params()
    }

    /// TPM2_SelfTest.
    pub fn self_test(&mut self, full_test: bool) -> Result<()> {
        let mut cp = CommandBuffer::new();
        cp.put_bool(full_test);
        self.run_command(TpmCc::SelfTest, CommandArgs::new(&[], cp.into_vec()))?
            .no_params()
    }

    /// TPM2_GetRandom. The TPM may return fewer bytes per command than
    /// requested, so this loops until `num_bytes` have been collected.
    pub fn get_random(&mut self, num_bytes: usize, sessions: &[&Session]) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(num_bytes);
        while out.len() < num_bytes {
            let request = (num_bytes - out.len()).min(48) as u16;
            let mut cp = CommandBuffer::new();
            cp.put_u16(request);
            let mut args = CommandArgs::new(&[], cp.into_vec());
            args.extra_sessions = sessions;
            args.first_response_param_sized = true;
            let bytes = self
                .run_command(TpmCc::GetRandom, args)?
                .parse(|buf| buf.get_sized_buffer())?;
            if bytes.is_empty() {
                // A TPM that returns nothing would loop us forever.
                return Err(super::errors::Error::InvalidResponse {
                    command: TpmCc::GetRandom,
                    reason: "empty random buffer".to_string(),
                });
            }
            out.extend_from_slice(&bytes);
        }
        out.truncate(num_bytes);
        Ok(out)
    }
}
