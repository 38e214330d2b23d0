// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Pure Rust TPM 2.0 client
//!
//! This crate speaks the TPM 2.0 command protocol over a byte-stream
//! transport, communicating directly with the device without C library
//! dependencies. It marshals typed commands into the TCG wire format,
//! attaches authorization sessions (password, HMAC or policy) with
//! optional parameter encryption, verifies response authorizations, and
//! tracks the host-side state of every TPM entity the application holds.
//!
//! ## Layers
//!
//! - **Wire codec** ([`marshal`], [`types`]): the TCG structure algebra
//!   over big-endian byte buffers.
//! - **Resource contexts** ([`ResourceContext`], [`SessionContext`]):
//!   names, public areas, auth values and session state, serializable for
//!   cross-process use.
//! - **Command pipeline** ([`TpmContext`]): authorization areas, cpHash /
//!   rpHash HMACs, nonce rotation, parameter encryption, response
//!   verification and registry upkeep.
//!
//! ## Example
//!
//! ```no_run
//! use tpm2_client::TpmContext;
//!
//! let mut tpm = TpmContext::open(None)?; // auto-detect the TPM device
//! let random = tpm.get_random(32, &[])?;
//! # Ok::<(), tpm2_client::Error>(())
//! ```
//!
//! A TPM executes one command at a time; a [`TpmContext`] owns its
//! transport exclusively and is single-threaded by design. Use one
//! instance per TPM connection and serialize access externally if it must
//! be shared.

mod commands;
mod constants;
mod crypto;
mod device;
mod errors;
mod marshal;
mod resources;
mod session;
mod tpm;
mod types;

pub use commands::CreationInfo;
pub use constants::*;
pub use device::{Tcti, TpmDevice, MAX_COMMAND_SIZE};
pub use errors::{
    decode_response_code, is_tpm_error, is_tpm_handle_error, is_tpm_parameter_error,
    is_tpm_session_error, is_tpm_warning, Error, ErrorCode, Result, WarningCode, RC_SUCCESS,
};
pub use marshal::{
    CommandBuffer, Marshal, MarshalError, ResponseBuffer, Unmarshal, UnmarshalError,
};
pub use resources::{HandleContext, ResourceContext, Session, SessionContext};
pub use tpm::TpmContext;
pub use types::*;
