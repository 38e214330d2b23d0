// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 constants: command codes, algorithms, tags, handles, attributes

/// TPM 2.0 Command Codes (TPM_CC)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum TpmCc {
    NvUndefineSpaceSpecial = 0x0000011F,
    EvictControl = 0x00000120,
    NvUndefineSpace = 0x00000122,
    Clear = 0x00000126,
    ClearControl = 0x00000127,
    HierarchyChangeAuth = 0x00000129,
    NvDefineSpace = 0x0000012A,
    CreatePrimary = 0x00000131,
    NvGlobalWriteLock = 0x00000132,
    NvIncrement = 0x00000134,
    NvSetBits = 0x00000135,
    NvExtend = 0x00000136,
    NvWrite = 0x00000137,
    NvWriteLock = 0x00000138,
    NvChangeAuth = 0x0000013B,
    PcrEvent = 0x0000013C,
    SelfTest = 0x00000143,
    Startup = 0x00000144,
    Shutdown = 0x00000145,
    NvRead = 0x0000014E,
    NvReadLock = 0x0000014F,
    Create = 0x00000153,
    Load = 0x00000157,
    Unseal = 0x0000015E,
    FlushContext = 0x00000165,
    NvReadPublic = 0x00000169,
    PolicyAuthValue = 0x0000016B,
    ReadPublic = 0x00000173,
    StartAuthSession = 0x00000176,
    GetCapability = 0x0000017A,
    GetRandom = 0x0000017B,
    PcrRead = 0x0000017E,
    PolicyPcr = 0x0000017F,
    PcrExtend = 0x00000182,
    PolicyGetDigest = 0x00000189,
    PolicyPassword = 0x0000018C,
}

impl TpmCc {
    pub fn to_u32(self) -> u32 {
        self as u32
    }
}

/// TPM 2.0 Algorithm IDs (TPM_ALG_ID)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmAlgId {
    Error = 0x0000,
    Rsa = 0x0001,
    Sha1 = 0x0004,
    Hmac = 0x0005,
    Aes = 0x0006,
    KeyedHash = 0x0008,
    Xor = 0x000A,
    Sha256 = 0x000B,
    Sha384 = 0x000C,
    Sha512 = 0x000D,
    Null = 0x0010,
    Sm4 = 0x0013,
    RsaSsa = 0x0014,
    RsaEs = 0x0015,
    RsaPss = 0x0016,
    Oaep = 0x0017,
    EcDsa = 0x0018,
    EcDh = 0x0019,
    Kdf1Sp800_56a = 0x0020,
    Kdf1Sp800_108 = 0x0022,
    Ecc = 0x0023,
    SymCipher = 0x0025,
    Camellia = 0x0026,
    Cfb = 0x0043,
}

impl TpmAlgId {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0000 => Some(TpmAlgId::Error),
            0x0001 => Some(TpmAlgId::Rsa),
            0x0004 => Some(TpmAlgId::Sha1),
            0x0005 => Some(TpmAlgId::Hmac),
            0x0006 => Some(TpmAlgId::Aes),
            0x0008 => Some(TpmAlgId::KeyedHash),
            0x000A => Some(TpmAlgId::Xor),
            0x000B => Some(TpmAlgId::Sha256),
            0x000C => Some(TpmAlgId::Sha384),
            0x000D => Some(TpmAlgId::Sha512),
            0x0010 => Some(TpmAlgId::Null),
            0x0013 => Some(TpmAlgId::Sm4),
            0x0014 => Some(TpmAlgId::RsaSsa),
            0x0015 => Some(TpmAlgId::RsaEs),
            0x0016 => Some(TpmAlgId::RsaPss),
            0x0017 => Some(TpmAlgId::Oaep),
            0x0018 => Some(TpmAlgId::EcDsa),
            0x0019 => Some(TpmAlgId::EcDh),
            0x0020 => Some(TpmAlgId::Kdf1Sp800_56a),
            0x0022 => Some(TpmAlgId::Kdf1Sp800_108),
            0x0023 => Some(TpmAlgId::Ecc),
            0x0025 => Some(TpmAlgId::SymCipher),
            0x0026 => Some(TpmAlgId::Camellia),
            0x0043 => Some(TpmAlgId::Cfb),
            _ => None,
        }
    }

    /// Digest size in bytes, or 0 for non-digest algorithms.
    pub fn digest_size(self) -> usize {
        match self {
            TpmAlgId::Sha1 => 20,
            TpmAlgId::Sha256 => 32,
            TpmAlgId::Sha384 => 48,
            TpmAlgId::Sha512 => 64,
            _ => 0,
        }
    }

    /// Whether this is a digest algorithm the crate can compute.
    pub fn is_supported_digest(self) -> bool {
        self.digest_size() != 0
    }
}

/// TPM 2.0 Handle Types (TPM_HT)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TpmHt {
    Pcr = 0x00,
    NvIndex = 0x01,
    HmacSession = 0x02,
    PolicySession = 0x03,
    Permanent = 0x40,
    Transient = 0x80,
    Persistent = 0x81,
}

/// TPM 2.0 handle, with the entity type in the top byte.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Handle(pub u32);

impl Handle {
    pub const OWNER: Handle = Handle(0x4000_0001);
    pub const NULL: Handle = Handle(0x4000_0007);
    /// Password authorization pseudo-session (TPM_RS_PW).
    pub const PW: Handle = Handle(0x4000_0009);
    pub const LOCKOUT: Handle = Handle(0x4000_000A);
    pub const ENDORSEMENT: Handle = Handle(0x4000_000B);
    pub const PLATFORM: Handle = Handle(0x4000_000C);
    pub const PLATFORM_NV: Handle = Handle(0x4000_000D);
    /// The reserved value carried by invalidated contexts.
    pub const UNASSIGNED: Handle = Handle(0xFFFF_FFFF);

    pub fn handle_type(self) -> Option<TpmHt> {
        match (self.0 >> 24) as u8 {
            0x00 => Some(TpmHt::Pcr),
            0x01 => Some(TpmHt::NvIndex),
            0x02 => Some(TpmHt::HmacSession),
            0x03 => Some(TpmHt::PolicySession),
            0x40 => Some(TpmHt::Permanent),
            0x80 => Some(TpmHt::Transient),
            0x81 => Some(TpmHt::Persistent),
            _ => None,
        }
    }

    /// The first handle of the given type, as used in capability queries.
    pub fn base_of(ht: TpmHt) -> Handle {
        Handle((ht as u32) << 24)
    }
}

impl std::fmt::Display for Handle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "0x{:08x}", self.0)
    }
}

/// TPM 2.0 Session Types (TPM_SE)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum TpmSe {
    Hmac = 0x00,
    Policy = 0x01,
    Trial = 0x03,
}

impl TpmSe {
    pub fn from_u8(v: u8) -> Option<Self> {
        match v {
            0x00 => Some(TpmSe::Hmac),
            0x01 => Some(TpmSe::Policy),
            0x03 => Some(TpmSe::Trial),
            _ => None,
        }
    }
}

/// TPM 2.0 Startup Types (TPM_SU)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmSu {
    Clear = 0x0000,
    State = 0x0001,
}

/// TPM 2.0 Capability Types (TPM_CAP)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum TpmCap {
    Algs = 0x00000000,
    Handles = 0x00000001,
    Commands = 0x00000002,
    Pcrs = 0x00000005,
    TpmProperties = 0x00000006,
}

impl TpmCap {
    pub fn from_u32(v: u32) -> Option<Self> {
        match v {
            0x00000000 => Some(TpmCap::Algs),
            0x00000001 => Some(TpmCap::Handles),
            0x00000002 => Some(TpmCap::Commands),
            0x00000005 => Some(TpmCap::Pcrs),
            0x00000006 => Some(TpmCap::TpmProperties),
            _ => None,
        }
    }
}

/// Largest propertyCount for capability queries; the TPM truncates to what
/// fits in one response and reports moreData.
pub const CAPABILITY_MAX_PROPERTIES: u32 = 0xFFFF_FFFF;

/// TPM command/response header tag (TPM_ST)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmSt {
    RspCommand = 0x00C4,
    NoSessions = 0x8001,
    Sessions = 0x8002,
}

impl TpmSt {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x00C4 => Some(TpmSt::RspCommand),
            0x8001 => Some(TpmSt::NoSessions),
            0x8002 => Some(TpmSt::Sessions),
            _ => None,
        }
    }
}

/// TPM 2.0 Object Attributes (TPMA_OBJECT)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TpmaObject(pub u32);

impl TpmaObject {
    pub const FIXED_TPM: u32 = 1 << 1;
    pub const ST_CLEAR: u32 = 1 << 2;
    pub const FIXED_PARENT: u32 = 1 << 4;
    pub const SENSITIVE_DATA_ORIGIN: u32 = 1 << 5;
    pub const USER_WITH_AUTH: u32 = 1 << 6;
    pub const ADMIN_WITH_POLICY: u32 = 1 << 7;
    pub const NO_DA: u32 = 1 << 10;
    pub const ENCRYPTED_DUPLICATION: u32 = 1 << 11;
    pub const RESTRICTED: u32 = 1 << 16;
    pub const DECRYPT: u32 = 1 << 17;
    pub const SIGN_ENCRYPT: u32 = 1 << 18;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with(mut self, bits: u32) -> Self {
        self.0 |= bits;
        self
    }

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }
}

/// TPM 2.0 NV Index Attributes (TPMA_NV)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TpmaNv(pub u32);

impl TpmaNv {
    pub const PP_WRITE: u32 = 1 << 0;
    pub const OWNER_WRITE: u32 = 1 << 1;
    pub const AUTH_WRITE: u32 = 1 << 2;
    pub const POLICY_WRITE: u32 = 1 << 3;
    pub const POLICY_DELETE: u32 = 1 << 10;
    pub const WRITE_LOCKED: u32 = 1 << 11;
    pub const WRITE_ALL: u32 = 1 << 12;
    pub const WRITE_DEFINE: u32 = 1 << 13;
    pub const WRITE_STCLEAR: u32 = 1 << 14;
    pub const GLOBAL_LOCK: u32 = 1 << 15;
    pub const PP_READ: u32 = 1 << 16;
    pub const OWNER_READ: u32 = 1 << 17;
    pub const AUTH_READ: u32 = 1 << 18;
    pub const POLICY_READ: u32 = 1 << 19;
    pub const NO_DA: u32 = 1 << 25;
    pub const ORDERLY: u32 = 1 << 26;
    pub const CLEAR_STCLEAR: u32 = 1 << 27;
    pub const READ_LOCKED: u32 = 1 << 28;
    pub const WRITTEN: u32 = 1 << 29;
    pub const PLATFORM_CREATE: u32 = 1 << 30;
    pub const READ_STCLEAR: u32 = 1u32 << 31;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with(mut self, bits: u32) -> Self {
        self.0 |= bits;
        self
    }

    pub fn contains(self, bits: u32) -> bool {
        self.0 & bits == bits
    }
}

/// Host-side session usage flags, projected onto the wire attribute byte
/// when a session is attached to a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SessionAttributes(pub u8);

impl SessionAttributes {
    /// Keep the session loaded on the TPM after this command. A session
    /// used without this flag is flushed by the TPM and its context is
    /// invalidated once the response has been processed.
    pub const CONTINUE_SESSION: u8 = 1 << 0;
    pub const AUDIT_EXCLUSIVE: u8 = 1 << 1;
    pub const AUDIT_RESET: u8 = 1 << 2;
    /// Encrypt the first command parameter before transmission.
    pub const COMMAND_ENCRYPT: u8 = 1 << 3;
    /// Ask the TPM to encrypt the first response parameter; the crate
    /// decrypts it transparently.
    pub const RESPONSE_ENCRYPT: u8 = 1 << 4;
    pub const AUDIT: u8 = 1 << 5;

    pub fn new() -> Self {
        Self(0)
    }

    pub fn with(mut self, bits: u8) -> Self {
        self.0 |= bits;
        self
    }

    pub fn contains(self, bits: u8) -> bool {
        self.0 & bits == bits
    }

    /// Project onto the TPMA_SESSION wire byte. Audit-exclusive and
    /// audit-reset imply audit.
    pub fn to_wire(self) -> u8 {
        let mut attrs = 0u8;
        if self.contains(Self::CONTINUE_SESSION) {
            attrs |= wire_session_attrs::CONTINUE_SESSION;
        }
        if self.contains(Self::AUDIT_EXCLUSIVE) {
            attrs |= wire_session_attrs::AUDIT_EXCLUSIVE | wire_session_attrs::AUDIT;
        }
        if self.contains(Self::AUDIT_RESET) {
            attrs |= wire_session_attrs::AUDIT_RESET | wire_session_attrs::AUDIT;
        }
        if self.contains(Self::COMMAND_ENCRYPT) {
            attrs |= wire_session_attrs::DECRYPT;
        }
        if self.contains(Self::RESPONSE_ENCRYPT) {
            attrs |= wire_session_attrs::ENCRYPT;
        }
        if self.contains(Self::AUDIT) {
            attrs |= wire_session_attrs::AUDIT;
        }
        attrs
    }
}

/// TPMA_SESSION bits as they appear on the wire.
pub mod wire_session_attrs {
    pub const CONTINUE_SESSION: u8 = 1 << 0;
    pub const AUDIT_EXCLUSIVE: u8 = 1 << 1;
    pub const AUDIT_RESET: u8 = 1 << 2;
    pub const DECRYPT: u8 = 1 << 5;
    pub const ENCRYPT: u8 = 1 << 6;
    pub const AUDIT: u8 = 1 << 7;
}

/// ECC Curve IDs (TPM_ECC_CURVE)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u16)]
pub enum TpmEccCurve {
    None = 0x0000,
    NistP256 = 0x0003,
    NistP384 = 0x0004,
    NistP521 = 0x0005,
}

impl TpmEccCurve {
    pub fn to_u16(self) -> u16 {
        self as u16
    }

    pub fn from_u16(v: u16) -> Option<Self> {
        match v {
            0x0000 => Some(TpmEccCurve::None),
            0x0003 => Some(TpmEccCurve::NistP256),
            0x0004 => Some(TpmEccCurve::NistP384),
            0x0005 => Some(TpmEccCurve::NistP521),
            _ => None,
        }
    }
}
