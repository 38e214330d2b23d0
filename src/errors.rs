// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Error taxonomy and TPM response-code decoding
//!
//! A 32-bit response code is either format-0 (bit 7 clear: legacy, vendor,
//! warning or plain error) or format-1 (bit 7 set: an error bound to a
//! handle, parameter or session index). Format-1 error codes are biased by
//! 0x80 so they never collide with format-0 codes.

use thiserror::Error;

use super::constants::{Handle, TpmCc};
use super::marshal::{MarshalError, UnmarshalError};

pub type Result<T> = std::result::Result<T, Error>;

/// An error code from the TPM. Format-0 codes occupy 0x00..=0x7f; format-1
/// codes carry the 0x80 bias.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    // Format 0
    pub const INITIALIZE: ErrorCode = ErrorCode(0x00);
    pub const FAILURE: ErrorCode = ErrorCode(0x01);
    pub const SEQUENCE: ErrorCode = ErrorCode(0x03);
    pub const DISABLED: ErrorCode = ErrorCode(0x20);
    pub const EXCLUSIVE: ErrorCode = ErrorCode(0x21);
    pub const AUTH_TYPE: ErrorCode = ErrorCode(0x24);
    pub const AUTH_MISSING: ErrorCode = ErrorCode(0x25);
    pub const POLICY: ErrorCode = ErrorCode(0x26);
    pub const PCR: ErrorCode = ErrorCode(0x27);
    pub const PCR_CHANGED: ErrorCode = ErrorCode(0x28);
    pub const COMMAND_SIZE: ErrorCode = ErrorCode(0x42);
    pub const COMMAND_CODE: ErrorCode = ErrorCode(0x43);
    pub const AUTHSIZE: ErrorCode = ErrorCode(0x44);
    pub const AUTH_CONTEXT: ErrorCode = ErrorCode(0x45);
    pub const NV_RANGE: ErrorCode = ErrorCode(0x46);
    pub const NV_SIZE: ErrorCode = ErrorCode(0x47);
    pub const NV_LOCKED: ErrorCode = ErrorCode(0x48);
    pub const NV_AUTHORIZATION: ErrorCode = ErrorCode(0x49);
    pub const NV_UNINITIALIZED: ErrorCode = ErrorCode(0x4A);
    pub const NV_SPACE: ErrorCode = ErrorCode(0x4B);
    pub const NV_DEFINED: ErrorCode = ErrorCode(0x4C);
    pub const BAD_CONTEXT: ErrorCode = ErrorCode(0x50);
    pub const CPHASH: ErrorCode = ErrorCode(0x51);
    pub const PARENT: ErrorCode = ErrorCode(0x52);
    pub const NEEDS_TEST: ErrorCode = ErrorCode(0x53);
    pub const NO_RESULT: ErrorCode = ErrorCode(0x54);
    pub const SENSITIVE: ErrorCode = ErrorCode(0x55);

    // Format 1 (biased by 0x80)
    pub const ASYMMETRIC: ErrorCode = ErrorCode(0x81);
    pub const ATTRIBUTES: ErrorCode = ErrorCode(0x82);
    pub const HASH: ErrorCode = ErrorCode(0x83);
    pub const VALUE: ErrorCode = ErrorCode(0x84);
    pub const HIERARCHY: ErrorCode = ErrorCode(0x85);
    pub const KEY_SIZE: ErrorCode = ErrorCode(0x87);
    pub const MGF: ErrorCode = ErrorCode(0x88);
    pub const MODE: ErrorCode = ErrorCode(0x89);
    pub const TYPE: ErrorCode = ErrorCode(0x8A);
    pub const HANDLE: ErrorCode = ErrorCode(0x8B);
    pub const KDF: ErrorCode = ErrorCode(0x8C);
    pub const RANGE: ErrorCode = ErrorCode(0x8D);
    pub const AUTH_FAIL: ErrorCode = ErrorCode(0x8E);
    pub const NONCE: ErrorCode = ErrorCode(0x8F);
    pub const PP: ErrorCode = ErrorCode(0x90);
    pub const SCHEME: ErrorCode = ErrorCode(0x92);
    pub const SIZE: ErrorCode = ErrorCode(0x95);
    pub const SYMMETRIC: ErrorCode = ErrorCode(0x96);
    pub const TAG: ErrorCode = ErrorCode(0x97);
    pub const SELECTOR: ErrorCode = ErrorCode(0x98);
    pub const INSUFFICIENT: ErrorCode = ErrorCode(0x9A);
    pub const SIGNATURE: ErrorCode = ErrorCode(0x9B);
    pub const KEY: ErrorCode = ErrorCode(0x9C);
    pub const POLICY_FAIL: ErrorCode = ErrorCode(0x9D);
    pub const INTEGRITY: ErrorCode = ErrorCode(0x9F);
    pub const TICKET: ErrorCode = ErrorCode(0xA0);
    pub const RESERVED_BITS: ErrorCode = ErrorCode(0xA1);
    pub const BAD_AUTH: ErrorCode = ErrorCode(0xA2);
    pub const EXPIRED: ErrorCode = ErrorCode(0xA3);
    pub const POLICY_CC: ErrorCode = ErrorCode(0xA4);
    pub const BINDING: ErrorCode = ErrorCode(0xA5);
    pub const CURVE: ErrorCode = ErrorCode(0xA6);
    pub const ECC_POINT: ErrorCode = ErrorCode(0xA7);

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::INITIALIZE => "TPM not initialized",
            Self::FAILURE => "commands not accepted because of a TPM failure",
            Self::DISABLED => "the command is disabled",
            Self::AUTH_MISSING => "a required authorization is not provided",
            Self::NV_LOCKED => "NV access locked",
            Self::NV_DEFINED => "NV index or persistent object already defined",
            Self::NV_SPACE => "insufficient space for NV allocation",
            Self::SENSITIVE => "the sensitive area did not unmarshal correctly after decryption",
            Self::VALUE => "value is out of range or is not correct for the context",
            Self::HANDLE => "the handle is not correct for the use",
            Self::AUTH_FAIL => "the authorization HMAC check failed and DA counter incremented",
            Self::BAD_AUTH => "authorization failure without DA implications",
            Self::POLICY_FAIL => "a policy check failed",
            Self::SYMMETRIC => "unsupported symmetric algorithm or values",
            Self::KEY => "key fields are not compatible with the selected use",
            Self::ECC_POINT => "point is not on the required curve",
            Self::SIZE => "structure is the wrong size",
            _ => return None,
        })
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(desc) => write!(f, "0x{:02x} ({})", self.0, desc),
            None => write!(f, "0x{:02x}", self.0),
        }
    }
}

/// A warning code from the TPM: a non-fatal format-0 condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WarningCode(pub u32);

impl WarningCode {
    pub const CONTEXT_GAP: WarningCode = WarningCode(0x01);
    pub const OBJECT_MEMORY: WarningCode = WarningCode(0x02);
    pub const SESSION_MEMORY: WarningCode = WarningCode(0x03);
    pub const MEMORY: WarningCode = WarningCode(0x04);
    pub const SESSION_HANDLES: WarningCode = WarningCode(0x05);
    pub const OBJECT_HANDLES: WarningCode = WarningCode(0x06);
    pub const LOCALITY: WarningCode = WarningCode(0x07);
    pub const YIELDED: WarningCode = WarningCode(0x08);
    pub const CANCELED: WarningCode = WarningCode(0x09);
    pub const TESTING: WarningCode = WarningCode(0x0A);
    pub const REFERENCE_H0: WarningCode = WarningCode(0x10);
    pub const REFERENCE_H1: WarningCode = WarningCode(0x11);
    pub const REFERENCE_H2: WarningCode = WarningCode(0x12);
    pub const REFERENCE_S0: WarningCode = WarningCode(0x18);
    pub const NV_RATE: WarningCode = WarningCode(0x20);
    pub const LOCKOUT: WarningCode = WarningCode(0x21);
    pub const RETRY: WarningCode = WarningCode(0x22);
    pub const NV_UNAVAILABLE: WarningCode = WarningCode(0x23);

    fn name(self) -> Option<&'static str> {
        Some(match self {
            Self::OBJECT_MEMORY => "out of memory for object contexts",
            Self::SESSION_MEMORY => "out of memory for session contexts",
            Self::LOCALITY => "command could not be executed at the current locality",
            Self::YIELDED => "the TPM has suspended operation on the command",
            Self::CANCELED => "the command was canceled",
            Self::TESTING => "TPM is performing self-tests",
            Self::REFERENCE_H0 => "the first handle references an unloaded transient object",
            Self::LOCKOUT => "authorizations are temporarily disabled by DA lockout",
            Self::RETRY => "the TPM was not able to start the command",
            Self::NV_UNAVAILABLE => "the command may require writing of NV and NV is not available",
            _ => return None,
        })
    }
}

impl std::fmt::Display for WarningCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.name() {
            Some(desc) => write!(f, "0x{:02x} ({})", self.0, desc),
            None => write!(f, "0x{:02x}", self.0),
        }
    }
}

/// Every non-panicking failure surfaced by this crate.
#[derive(Debug, Error)]
pub enum Error {
    /// I/O failure in the transport. Distinct from protocol errors; any
    /// sessions attached to the failed command must be considered invalid
    /// if the failure happened during the read.
    #[error("cannot complete {op} operation on the TPM transport: {source}")]
    Transport {
        op: &'static str,
        #[source]
        source: std::io::Error,
    },

    /// A value could not be encoded to the wire format.
    #[error("cannot marshal command: {0}")]
    Marshal(#[from] MarshalError),

    /// A value outside a TPM response could not be decoded (e.g. a
    /// serialized context blob).
    #[error("cannot unmarshal: {0}")]
    Unmarshal(#[from] UnmarshalError),

    /// The TPM's response violates the protocol: short response, bad length
    /// prefix, invalid union selector, unused trailing bytes, or a failed
    /// response authorization. Sessions used in the command are invalid and
    /// the registry state for mutating commands is undefined.
    #[error("TPM returned an invalid response for command {command:?}: {reason}")]
    InvalidResponse { command: TpmCc, reason: String },

    /// Context data is not internally consistent: a serialized blob with a
    /// bad checksum or unknown checksum algorithm, a permanent-context
    /// restore, or a mismatch between handle, name and payload.
    #[error("invalid context data: {0}")]
    InvalidContextData(String),

    /// The handle does not correspond to an available resource on the TPM.
    #[error("a resource at handle {handle} is not available on the TPM")]
    ResourceUnavailable { handle: Handle },

    /// The response code came from a TPM 1.2 device.
    #[error("TPM returned a 1.2 error whilst executing command {command:?}: 0x{code:08x}")]
    Tpm12Error { command: TpmCc, code: u32 },

    /// Vendor-defined response code, returned in full.
    #[error("TPM returned a vendor defined error whilst executing command {command:?}: 0x{code:08x}")]
    VendorError { command: TpmCc, code: u32 },

    /// A non-fatal condition. Warnings of `RETRY` are not retried
    /// automatically.
    #[error("TPM returned a warning whilst executing command {command:?}: {code}")]
    TpmWarning { command: TpmCc, code: WarningCode },

    /// An error not associated with a handle, parameter or session.
    #[error("TPM returned an error whilst executing command {command:?}: {code}")]
    TpmError { command: TpmCc, code: ErrorCode },

    /// An error associated with a command handle. Indices start at 1; index
    /// 0 means the TPM did not specify the handle.
    #[error("TPM returned an error for handle {index} whilst executing command {command:?}: {code}")]
    TpmHandleError {
        command: TpmCc,
        code: ErrorCode,
        index: usize,
    },

    /// An error associated with a command parameter, counted from 1.
    #[error(
        "TPM returned an error for parameter {index} whilst executing command {command:?}: {code}"
    )]
    TpmParameterError {
        command: TpmCc,
        code: ErrorCode,
        index: usize,
    },

    /// An error associated with an authorization session, counted from 1.
    #[error(
        "TPM returned an error for session {index} whilst executing command {command:?}: {code}"
    )]
    TpmSessionError {
        command: TpmCc,
        code: ErrorCode,
        index: usize,
    },
}

pub const RC_SUCCESS: u32 = 0x0000_0000;

const RC_FORMAT_1: u32 = 1 << 7;

const FMT0_ERROR_MASK: u32 = 0x7f;
const FMT0_VERSION_BIT: u32 = 1 << 8;
const FMT0_VENDOR_BIT: u32 = 1 << 10;
const FMT0_SEVERITY_BIT: u32 = 1 << 11;

const FMT1_ERROR_MASK: u32 = 0x3f;
const FMT1_ERROR_BIAS: u32 = 0x80;
const FMT1_INDEX_SHIFT: u32 = 8;
const FMT1_PARAMETER_INDEX_MASK: u32 = 0xf << FMT1_INDEX_SHIFT;
const FMT1_HANDLE_OR_SESSION_INDEX_MASK: u32 = 0x7 << FMT1_INDEX_SHIFT;
const FMT1_PARAMETER_BIT: u32 = 1 << 6;
const FMT1_SESSION_BIT: u32 = 1 << 11;

/// Decodes a TPM response code. `Ok(())` for success, else the structured
/// error for the code; `command` adds context to the returned error.
pub fn decode_response_code(command: TpmCc, rc: u32) -> Result<()> {
    if rc == RC_SUCCESS {
        return Ok(());
    }

    if rc & RC_FORMAT_1 == 0 {
        // Format 0
        if rc & FMT0_VERSION_BIT == 0 {
            return Err(Error::Tpm12Error { command, code: rc });
        }
        if rc & FMT0_VENDOR_BIT != 0 {
            return Err(Error::VendorError { command, code: rc });
        }
        if rc & FMT0_SEVERITY_BIT != 0 {
            return Err(Error::TpmWarning {
                command,
                code: WarningCode(rc & FMT0_ERROR_MASK),
            });
        }
        return Err(Error::TpmError {
            command,
            code: ErrorCode(rc & FMT0_ERROR_MASK),
        });
    }

    // Format 1
    let code = ErrorCode((rc & FMT1_ERROR_MASK) + FMT1_ERROR_BIAS);
    if rc & FMT1_PARAMETER_BIT != 0 {
        return Err(Error::TpmParameterError {
            command,
            code,
            index: ((rc & FMT1_PARAMETER_INDEX_MASK) >> FMT1_INDEX_SHIFT) as usize,
        });
    }
    if rc & FMT1_SESSION_BIT != 0 {
        return Err(Error::TpmSessionError {
            command,
            code,
            index: ((rc & FMT1_HANDLE_OR_SESSION_INDEX_MASK) >> FMT1_INDEX_SHIFT) as usize,
        });
    }
    let handle_index = ((rc & FMT1_HANDLE_OR_SESSION_INDEX_MASK) >> FMT1_INDEX_SHIFT) as usize;
    if handle_index != 0 {
        return Err(Error::TpmHandleError {
            command,
            code,
            index: handle_index,
        });
    }
    Err(Error::TpmError { command, code })
}

fn matches<T: PartialEq>(wanted: Option<T>, got: T) -> bool {
    match wanted {
        None => true,
        Some(w) => w == got,
    }
}

/// Whether `err` is a plain TPM error with the given code and command.
/// `None` matches any value on that axis.
pub fn is_tpm_error(err: &Error, code: Option<ErrorCode>, command: Option<TpmCc>) -> bool {
    match err {
        Error::TpmError { command: c, code: e } => matches(code, *e) && matches(command, *c),
        _ => false,
    }
}

/// Whether `err` is a TPM warning with the given code and command.
pub fn is_tpm_warning(err: &Error, code: Option<WarningCode>, command: Option<TpmCc>) -> bool {
    match err {
        Error::TpmWarning { command: c, code: w } => matches(code, *w) && matches(command, *c),
        _ => false,
    }
}

/// Whether `err` is a handle-indexed TPM error matching every given axis.
pub fn is_tpm_handle_error(
    err: &Error,
    code: Option<ErrorCode>,
    command: Option<TpmCc>,
    index: Option<usize>,
) -> bool {
    match err {
        Error::TpmHandleError {
            command: c,
            code: e,
            index: i,
        } => matches(code, *e) && matches(command, *c) && matches(index, *i),
        _ => false,
    }
}

/// Whether `err` is a parameter-indexed TPM error matching every given axis.
pub fn is_tpm_parameter_error(
    err: &Error,
    code: Option<ErrorCode>,
    command: Option<TpmCc>,
    index: Option<usize>,
) -> bool {
    match err {
        Error::TpmParameterError {
            command: c,
            code: e,
            index: i,
        } => matches(code, *e) && matches(command, *c) && matches(index, *i),
        _ => false,
    }
}

/// Whether `err` is a session-indexed TPM error matching every given axis.
pub fn is_tpm_session_error(
    err: &Error,
    code: Option<ErrorCode>,
    command: Option<TpmCc>,
    index: Option<usize>,
) -> bool {
    match err {
        Error::TpmSessionError {
            command: c,
            code: e,
            index: i,
        } => matches(code, *e) && matches(command, *c) && matches(index, *i),
        _ => false,
    }
}
