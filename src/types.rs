// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 structure types
//!
//! The TCG "TPM 2.0 Structures" algebra expressed as plain Rust types with
//! hand-written codecs over [`crate::marshal`]. Discriminated unions are
//! tagged enums whose codec takes the enclosing structure's selector field,
//! so an encoding that disagrees with its selector is rejected rather than
//! silently produced.

use super::constants::{Handle, TpmAlgId, TpmCap, TpmEccCurve, TpmaNv, TpmaObject};
use super::crypto;
use super::errors::{Error, Result};
use super::marshal::{
    CommandBuffer, Marshal, MarshalError, ResponseBuffer, Unmarshal, UnmarshalError,
};

impl Marshal for Handle {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_u32(self.0);
        Ok(())
    }
}

impl Unmarshal for Handle {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Handle(buf.get_u32()?))
    }
}

impl Marshal for TpmAlgId {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_u16(self.to_u16());
        Ok(())
    }
}

impl Unmarshal for TpmAlgId {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let raw = buf.get_u16()?;
        TpmAlgId::from_u16(raw).ok_or(UnmarshalError::InvalidValue("algorithm identifier"))
    }
}

/// The canonical identity of a TPM entity: either the 4-byte big-endian
/// handle (permanent entities, PCRs, sessions) or `algId || digest` of the
/// public area (objects, NV indices). On the wire it is a TPM2B_NAME.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Name(Vec<u8>);

impl Name {
    pub fn new(bytes: Vec<u8>) -> Self {
        Self(bytes)
    }

    pub fn from_handle(handle: Handle) -> Self {
        Self(handle.0.to_be_bytes().to_vec())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Whether this name is a raw handle rather than a digest.
    pub fn is_handle(&self) -> bool {
        self.0.len() == 4
    }

    pub fn handle(&self) -> Option<Handle> {
        if !self.is_handle() {
            return None;
        }
        Some(Handle(u32::from_be_bytes([
            self.0[0], self.0[1], self.0[2], self.0[3],
        ])))
    }
}

impl Marshal for Name {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_sized_buffer(&self.0)
    }
}

impl Unmarshal for Name {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Self(buf.get_sized_buffer()?))
    }
}

/// TPMT_SYM_DEF: the symmetric algorithm attached to a session (and, as
/// TPMT_SYM_DEF_OBJECT, to a storage key). XOR carries only a hash
/// algorithm; block ciphers carry key size and mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmtSymDef {
    Null,
    Xor(TpmAlgId),
    Cipher {
        algorithm: TpmAlgId,
        key_bits: u16,
        mode: TpmAlgId,
    },
}

pub type TpmtSymDefObject = TpmtSymDef;

impl TpmtSymDef {
    pub fn aes_128_cfb() -> Self {
        TpmtSymDef::Cipher {
            algorithm: TpmAlgId::Aes,
            key_bits: 128,
            mode: TpmAlgId::Cfb,
        }
    }

    pub fn xor(hash: TpmAlgId) -> Self {
        TpmtSymDef::Xor(hash)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, TpmtSymDef::Null)
    }
}

impl Marshal for TpmtSymDef {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        match self {
            TpmtSymDef::Null => buf.put_u16(TpmAlgId::Null.to_u16()),
            TpmtSymDef::Xor(hash) => {
                buf.put_u16(TpmAlgId::Xor.to_u16());
                buf.put_u16(hash.to_u16());
            }
            TpmtSymDef::Cipher {
                algorithm,
                key_bits,
                mode,
            } => {
                buf.put_u16(algorithm.to_u16());
                buf.put_u16(*key_bits);
                buf.put_u16(mode.to_u16());
            }
        }
        Ok(())
    }
}

impl Unmarshal for TpmtSymDef {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let algorithm = TpmAlgId::unmarshal(buf)?;
        match algorithm {
            TpmAlgId::Null => Ok(TpmtSymDef::Null),
            TpmAlgId::Xor => Ok(TpmtSymDef::Xor(TpmAlgId::unmarshal(buf)?)),
            TpmAlgId::Aes | TpmAlgId::Sm4 | TpmAlgId::Camellia => Ok(TpmtSymDef::Cipher {
                algorithm,
                key_bits: buf.get_u16()?,
                mode: TpmAlgId::unmarshal(buf)?,
            }),
            other => Err(UnmarshalError::InvalidSelector(other.to_u16() as u32)),
        }
    }
}

/// TPMS_PCR_SELECTION: a hash bank and a bitmap of selected PCR indices.
/// The bitmap is a custom-encoded type: a u8 octet count, not a TPM2B.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsPcrSelection {
    pub hash: TpmAlgId,
    pub pcr_select: Vec<u8>,
}

impl TpmsPcrSelection {
    pub fn new(hash: TpmAlgId, pcrs: &[u32]) -> Self {
        let max_pcr = pcrs.iter().max().copied().unwrap_or(0);
        let size = ((max_pcr / 8) + 1).max(3) as usize;
        let mut pcr_select = vec![0u8; size];
        for &pcr in pcrs {
            pcr_select[(pcr / 8) as usize] |= 1 << (pcr % 8);
        }
        Self { hash, pcr_select }
    }

    pub fn sha256(pcrs: &[u32]) -> Self {
        Self::new(TpmAlgId::Sha256, pcrs)
    }

    /// The selected PCR indices, in ascending order.
    pub fn selected(&self) -> Vec<u32> {
        let mut out = Vec::new();
        for (byte_idx, &byte) in self.pcr_select.iter().enumerate() {
            for bit in 0..8 {
                if byte & (1 << bit) != 0 {
                    out.push((byte_idx * 8 + bit) as u32);
                }
            }
        }
        out
    }
}

impl Marshal for TpmsPcrSelection {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_u16(self.hash.to_u16());
        let octets = u8::try_from(self.pcr_select.len())
            .map_err(|_| MarshalError::LengthOverflow(self.pcr_select.len(), 8))?;
        buf.put_u8(octets);
        buf.put_bytes(&self.pcr_select);
        Ok(())
    }
}

impl Unmarshal for TpmsPcrSelection {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let hash = TpmAlgId::unmarshal(buf)?;
        let octets = buf.get_u8()? as usize;
        Ok(Self {
            hash,
            pcr_select: buf.get_bytes(octets)?,
        })
    }
}

/// TPML_PCR_SELECTION
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TpmlPcrSelection {
    pub selections: Vec<TpmsPcrSelection>,
}

impl TpmlPcrSelection {
    pub fn single(hash: TpmAlgId, pcrs: &[u32]) -> Self {
        Self {
            selections: vec![TpmsPcrSelection::new(hash, pcrs)],
        }
    }
}

impl Marshal for TpmlPcrSelection {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_list(&self.selections)
    }
}

impl Unmarshal for TpmlPcrSelection {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Self {
            selections: buf.get_list()?,
        })
    }
}

/// TPMT_HA: an algorithm id followed by a raw digest of that algorithm's
/// size. The digest length is implied, not prefixed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmtHa {
    pub hash_alg: TpmAlgId,
    pub digest: Vec<u8>,
}

impl TpmtHa {
    pub fn sha256(digest: Vec<u8>) -> Self {
        Self {
            hash_alg: TpmAlgId::Sha256,
            digest,
        }
    }
}

impl Marshal for TpmtHa {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_u16(self.hash_alg.to_u16());
        buf.put_bytes(&self.digest);
        Ok(())
    }
}

impl Unmarshal for TpmtHa {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let hash_alg = TpmAlgId::unmarshal(buf)?;
        if !hash_alg.is_supported_digest() {
            return Err(UnmarshalError::InvalidSelector(hash_alg.to_u16() as u32));
        }
        Ok(Self {
            digest: buf.get_bytes(hash_alg.digest_size())?,
            hash_alg,
        })
    }
}

/// TPML_DIGEST_VALUES: digests for PCR extension, one per bank.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TpmlDigestValues {
    pub digests: Vec<TpmtHa>,
}

impl TpmlDigestValues {
    pub fn single(digest: TpmtHa) -> Self {
        Self {
            digests: vec![digest],
        }
    }
}

impl Marshal for TpmlDigestValues {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_list(&self.digests)
    }
}

impl Unmarshal for TpmlDigestValues {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Self {
            digests: buf.get_list()?,
        })
    }
}

/// TPML_DIGEST: a list of TPM2B digests, as returned by PCR_Read.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TpmlDigest {
    pub digests: Vec<Vec<u8>>,
}

impl Unmarshal for TpmlDigest {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let count = buf.get_u32()? as usize;
        if count > buf.remaining() {
            return Err(UnmarshalError::LengthOverflow {
                declared: count,
                remaining: buf.remaining(),
            });
        }
        let mut digests = Vec::with_capacity(count);
        for _ in 0..count {
            digests.push(buf.get_sized_buffer()?);
        }
        Ok(Self { digests })
    }
}

/// TPMT_RSA_SCHEME / TPMT_SIG_SCHEME shape: a scheme algorithm and, when
/// the scheme is not null, its hash algorithm.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmtRsaScheme {
    pub scheme: TpmAlgId,
    pub hash: Option<TpmAlgId>,
}

impl TpmtRsaScheme {
    pub fn null() -> Self {
        Self {
            scheme: TpmAlgId::Null,
            hash: None,
        }
    }

    pub fn rsassa(hash: TpmAlgId) -> Self {
        Self {
            scheme: TpmAlgId::RsaSsa,
            hash: Some(hash),
        }
    }
}

impl Marshal for TpmtRsaScheme {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_u16(self.scheme.to_u16());
        if self.scheme != TpmAlgId::Null {
            let hash = self
                .hash
                .ok_or(MarshalError::InvalidSelector(self.scheme.to_u16() as u32))?;
            buf.put_u16(hash.to_u16());
        }
        Ok(())
    }
}

impl Unmarshal for TpmtRsaScheme {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let scheme = TpmAlgId::unmarshal(buf)?;
        let hash = if scheme == TpmAlgId::Null {
            None
        } else {
            Some(TpmAlgId::unmarshal(buf)?)
        };
        Ok(Self { scheme, hash })
    }
}

pub type TpmtEccScheme = TpmtRsaScheme;

/// TPMT_KDF_SCHEME
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmtKdfScheme {
    pub scheme: TpmAlgId,
    pub hash: Option<TpmAlgId>,
}

impl TpmtKdfScheme {
    pub fn null() -> Self {
        Self {
            scheme: TpmAlgId::Null,
            hash: None,
        }
    }
}

impl Marshal for TpmtKdfScheme {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_u16(self.scheme.to_u16());
        if self.scheme != TpmAlgId::Null {
            let hash = self
                .hash
                .ok_or(MarshalError::InvalidSelector(self.scheme.to_u16() as u32))?;
            buf.put_u16(hash.to_u16());
        }
        Ok(())
    }
}

impl Unmarshal for TpmtKdfScheme {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let scheme = TpmAlgId::unmarshal(buf)?;
        let hash = if scheme == TpmAlgId::Null {
            None
        } else {
            Some(TpmAlgId::unmarshal(buf)?)
        };
        Ok(Self { scheme, hash })
    }
}

/// TPMT_KEYEDHASH_SCHEME: null for sealed data objects, HMAC or XOR for
/// keyed-hash keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TpmtKeyedHashScheme {
    Null,
    Hmac(TpmAlgId),
    Xor { hash: TpmAlgId, kdf: TpmAlgId },
}

impl Marshal for TpmtKeyedHashScheme {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        match self {
            TpmtKeyedHashScheme::Null => buf.put_u16(TpmAlgId::Null.to_u16()),
            TpmtKeyedHashScheme::Hmac(hash) => {
                buf.put_u16(TpmAlgId::Hmac.to_u16());
                buf.put_u16(hash.to_u16());
            }
            TpmtKeyedHashScheme::Xor { hash, kdf } => {
                buf.put_u16(TpmAlgId::Xor.to_u16());
                buf.put_u16(hash.to_u16());
                buf.put_u16(kdf.to_u16());
            }
        }
        Ok(())
    }
}

impl Unmarshal for TpmtKeyedHashScheme {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let scheme = TpmAlgId::unmarshal(buf)?;
        match scheme {
            TpmAlgId::Null => Ok(TpmtKeyedHashScheme::Null),
            TpmAlgId::Hmac => Ok(TpmtKeyedHashScheme::Hmac(TpmAlgId::unmarshal(buf)?)),
            TpmAlgId::Xor => Ok(TpmtKeyedHashScheme::Xor {
                hash: TpmAlgId::unmarshal(buf)?,
                kdf: TpmAlgId::unmarshal(buf)?,
            }),
            other => Err(UnmarshalError::InvalidSelector(other.to_u16() as u32)),
        }
    }
}

/// TPMS_RSA_PARMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsRsaParms {
    pub symmetric: TpmtSymDefObject,
    pub scheme: TpmtRsaScheme,
    pub key_bits: u16,
    pub exponent: u32,
}

impl TpmsRsaParms {
    /// The usual 2048-bit storage parent parameters.
    pub fn storage_key() -> Self {
        Self {
            symmetric: TpmtSymDef::aes_128_cfb(),
            scheme: TpmtRsaScheme::null(),
            key_bits: 2048,
            exponent: 0,
        }
    }
}

impl Marshal for TpmsRsaParms {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        self.symmetric.marshal(buf)?;
        self.scheme.marshal(buf)?;
        buf.put_u16(self.key_bits);
        buf.put_u32(self.exponent);
        Ok(())
    }
}

impl Unmarshal for TpmsRsaParms {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Self {
            symmetric: TpmtSymDef::unmarshal(buf)?,
            scheme: TpmtRsaScheme::unmarshal(buf)?,
            key_bits: buf.get_u16()?,
            exponent: buf.get_u32()?,
        })
    }
}

/// TPMS_ECC_PARMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsEccParms {
    pub symmetric: TpmtSymDefObject,
    pub scheme: TpmtEccScheme,
    pub curve_id: TpmEccCurve,
    pub kdf: TpmtKdfScheme,
}

impl Marshal for TpmsEccParms {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        self.symmetric.marshal(buf)?;
        self.scheme.marshal(buf)?;
        buf.put_u16(self.curve_id.to_u16());
        self.kdf.marshal(buf)
    }
}

impl Unmarshal for TpmsEccParms {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let symmetric = TpmtSymDef::unmarshal(buf)?;
        let scheme = TpmtEccScheme::unmarshal(buf)?;
        let raw_curve = buf.get_u16()?;
        let curve_id =
            TpmEccCurve::from_u16(raw_curve).ok_or(UnmarshalError::InvalidValue("ECC curve id"))?;
        Ok(Self {
            symmetric,
            scheme,
            curve_id,
            kdf: TpmtKdfScheme::unmarshal(buf)?,
        })
    }
}

/// TPMS_KEYEDHASH_PARMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsKeyedHashParms {
    pub scheme: TpmtKeyedHashScheme,
}

impl TpmsKeyedHashParms {
    pub fn null() -> Self {
        Self {
            scheme: TpmtKeyedHashScheme::Null,
        }
    }
}

impl Marshal for TpmsKeyedHashParms {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        self.scheme.marshal(buf)
    }
}

impl Unmarshal for TpmsKeyedHashParms {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Self {
            scheme: TpmtKeyedHashScheme::unmarshal(buf)?,
        })
    }
}

/// TPMS_SYMCIPHER_PARMS
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsSymCipherParms {
    pub sym: TpmtSymDefObject,
}

impl Marshal for TpmsSymCipherParms {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        self.sym.marshal(buf)
    }
}

impl Unmarshal for TpmsSymCipherParms {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Self {
            sym: TpmtSymDef::unmarshal(buf)?,
        })
    }
}

/// TPMU_PUBLIC_PARMS: selected by the object type field of the enclosing
/// TPMT_PUBLIC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmuPublicParms {
    Rsa(TpmsRsaParms),
    Ecc(TpmsEccParms),
    KeyedHash(TpmsKeyedHashParms),
    SymCipher(TpmsSymCipherParms),
}

impl TpmuPublicParms {
    pub fn marshal_with_selector(
        &self,
        selector: TpmAlgId,
        buf: &mut CommandBuffer,
    ) -> std::result::Result<(), MarshalError> {
        match (selector, self) {
            (TpmAlgId::Rsa, TpmuPublicParms::Rsa(p)) => p.marshal(buf),
            (TpmAlgId::Ecc, TpmuPublicParms::Ecc(p)) => p.marshal(buf),
            (TpmAlgId::KeyedHash, TpmuPublicParms::KeyedHash(p)) => p.marshal(buf),
            (TpmAlgId::SymCipher, TpmuPublicParms::SymCipher(p)) => p.marshal(buf),
            _ => Err(MarshalError::InvalidSelector(selector.to_u16() as u32)),
        }
    }

    pub fn unmarshal_with_selector(
        selector: TpmAlgId,
        buf: &mut ResponseBuffer<'_>,
    ) -> std::result::Result<Self, UnmarshalError> {
        match selector {
            TpmAlgId::Rsa => Ok(TpmuPublicParms::Rsa(TpmsRsaParms::unmarshal(buf)?)),
            TpmAlgId::Ecc => Ok(TpmuPublicParms::Ecc(TpmsEccParms::unmarshal(buf)?)),
            TpmAlgId::KeyedHash => Ok(TpmuPublicParms::KeyedHash(TpmsKeyedHashParms::unmarshal(
                buf,
            )?)),
            TpmAlgId::SymCipher => Ok(TpmuPublicParms::SymCipher(TpmsSymCipherParms::unmarshal(
                buf,
            )?)),
            other => Err(UnmarshalError::InvalidSelector(other.to_u16() as u32)),
        }
    }
}

/// TPMU_PUBLIC_ID: the unique field of a public area.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmuPublicId {
    Rsa(Vec<u8>),
    Ecc { x: Vec<u8>, y: Vec<u8> },
    KeyedHash(Vec<u8>),
    SymCipher(Vec<u8>),
}

impl TpmuPublicId {
    pub fn marshal_with_selector(
        &self,
        selector: TpmAlgId,
        buf: &mut CommandBuffer,
    ) -> std::result::Result<(), MarshalError> {
        match (selector, self) {
            (TpmAlgId::Rsa, TpmuPublicId::Rsa(n)) => buf.put_sized_buffer(n),
            (TpmAlgId::Ecc, TpmuPublicId::Ecc { x, y }) => {
                buf.put_sized_buffer(x)?;
                buf.put_sized_buffer(y)
            }
            (TpmAlgId::KeyedHash, TpmuPublicId::KeyedHash(d)) => buf.put_sized_buffer(d),
            (TpmAlgId::SymCipher, TpmuPublicId::SymCipher(d)) => buf.put_sized_buffer(d),
            _ => Err(MarshalError::InvalidSelector(selector.to_u16() as u32)),
        }
    }

    pub fn unmarshal_with_selector(
        selector: TpmAlgId,
        buf: &mut ResponseBuffer<'_>,
    ) -> std::result::Result<Self, UnmarshalError> {
        match selector {
            TpmAlgId::Rsa => Ok(TpmuPublicId::Rsa(buf.get_sized_buffer()?)),
            TpmAlgId::Ecc => Ok(TpmuPublicId::Ecc {
                x: buf.get_sized_buffer()?,
                y: buf.get_sized_buffer()?,
            }),
            TpmAlgId::KeyedHash => Ok(TpmuPublicId::KeyedHash(buf.get_sized_buffer()?)),
            TpmAlgId::SymCipher => Ok(TpmuPublicId::SymCipher(buf.get_sized_buffer()?)),
            other => Err(UnmarshalError::InvalidSelector(other.to_u16() as u32)),
        }
    }
}

/// TPMT_PUBLIC: the public area of an object. The object type drives both
/// the parameter and unique unions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmtPublic {
    pub object_type: TpmAlgId,
    pub name_alg: TpmAlgId,
    pub attributes: TpmaObject,
    pub auth_policy: Vec<u8>,
    pub parameters: TpmuPublicParms,
    pub unique: TpmuPublicId,
}

impl TpmtPublic {
    /// An RSA storage-parent template (SRK-style).
    pub fn rsa_storage_key() -> Self {
        Self {
            object_type: TpmAlgId::Rsa,
            name_alg: TpmAlgId::Sha256,
            attributes: TpmaObject::new()
                .with(TpmaObject::FIXED_TPM)
                .with(TpmaObject::FIXED_PARENT)
                .with(TpmaObject::SENSITIVE_DATA_ORIGIN)
                .with(TpmaObject::USER_WITH_AUTH)
                .with(TpmaObject::RESTRICTED)
                .with(TpmaObject::DECRYPT),
            auth_policy: Vec::new(),
            parameters: TpmuPublicParms::Rsa(TpmsRsaParms::storage_key()),
            unique: TpmuPublicId::Rsa(Vec::new()),
        }
    }

    /// A sealed-data-object template. With an empty policy the object is
    /// authorized with its auth value, otherwise with the policy.
    pub fn sealed_object(policy_digest: Vec<u8>) -> Self {
        let attributes = if policy_digest.is_empty() {
            TpmaObject::new()
                .with(TpmaObject::FIXED_TPM)
                .with(TpmaObject::FIXED_PARENT)
                .with(TpmaObject::USER_WITH_AUTH)
        } else {
            TpmaObject::new()
                .with(TpmaObject::FIXED_TPM)
                .with(TpmaObject::FIXED_PARENT)
                .with(TpmaObject::ADMIN_WITH_POLICY)
        };
        Self {
            object_type: TpmAlgId::KeyedHash,
            name_alg: TpmAlgId::Sha256,
            attributes,
            auth_policy: policy_digest,
            parameters: TpmuPublicParms::KeyedHash(TpmsKeyedHashParms::null()),
            unique: TpmuPublicId::KeyedHash(Vec::new()),
        }
    }

    /// The name of an object with this public area.
    pub fn name(&self) -> Result<Name> {
        if !self.name_alg.is_supported_digest() {
            return Err(Error::Unmarshal(UnmarshalError::InvalidValue(
                "name algorithm",
            )));
        }
        let encoded = self.to_bytes().map_err(Error::Marshal)?;
        Ok(Name::new(crypto::make_name(self.name_alg, &encoded)))
    }
}

impl Marshal for TpmtPublic {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_u16(self.object_type.to_u16());
        buf.put_u16(self.name_alg.to_u16());
        buf.put_u32(self.attributes.0);
        buf.put_sized_buffer(&self.auth_policy)?;
        self.parameters.marshal_with_selector(self.object_type, buf)?;
        self.unique.marshal_with_selector(self.object_type, buf)
    }
}

impl Unmarshal for TpmtPublic {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let object_type = TpmAlgId::unmarshal(buf)?;
        let name_alg = TpmAlgId::unmarshal(buf)?;
        let attributes = TpmaObject(buf.get_u32()?);
        let auth_policy = buf.get_sized_buffer()?;
        let parameters = TpmuPublicParms::unmarshal_with_selector(object_type, buf)?;
        let unique = TpmuPublicId::unmarshal_with_selector(object_type, buf)?;
        Ok(Self {
            object_type,
            name_alg,
            attributes,
            auth_policy,
            parameters,
            unique,
        })
    }
}

/// TPMS_NV_PUBLIC: the public area of an NV index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsNvPublic {
    pub index: Handle,
    pub name_alg: TpmAlgId,
    pub attributes: TpmaNv,
    pub auth_policy: Vec<u8>,
    pub data_size: u16,
}

impl TpmsNvPublic {
    pub fn new(index: Handle, data_size: u16, attributes: TpmaNv) -> Self {
        Self {
            index,
            name_alg: TpmAlgId::Sha256,
            attributes,
            auth_policy: Vec::new(),
            data_size,
        }
    }

    /// The name of an NV index with this public area.
    pub fn name(&self) -> Result<Name> {
        if !self.name_alg.is_supported_digest() {
            return Err(Error::Unmarshal(UnmarshalError::InvalidValue(
                "name algorithm",
            )));
        }
        let encoded = self.to_bytes().map_err(Error::Marshal)?;
        Ok(Name::new(crypto::make_name(self.name_alg, &encoded)))
    }
}

impl Marshal for TpmsNvPublic {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_u32(self.index.0);
        buf.put_u16(self.name_alg.to_u16());
        buf.put_u32(self.attributes.0);
        buf.put_sized_buffer(&self.auth_policy)?;
        buf.put_u16(self.data_size);
        Ok(())
    }
}

impl Unmarshal for TpmsNvPublic {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Self {
            index: Handle::unmarshal(buf)?,
            name_alg: TpmAlgId::unmarshal(buf)?,
            attributes: TpmaNv(buf.get_u32()?),
            auth_policy: buf.get_sized_buffer()?,
            data_size: buf.get_u16()?,
        })
    }
}

/// TPMS_SENSITIVE_CREATE: caller-supplied secrets for object creation. On
/// the wire it always travels inside a sized structure.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct TpmsSensitiveCreate {
    pub user_auth: Vec<u8>,
    pub data: Vec<u8>,
}

impl TpmsSensitiveCreate {
    pub fn with_data(data: Vec<u8>) -> Self {
        Self {
            user_auth: Vec::new(),
            data,
        }
    }
}

impl Marshal for TpmsSensitiveCreate {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_sized_buffer(&self.user_auth)?;
        buf.put_sized_buffer(&self.data)
    }
}

/// TPMT_TK_CREATION: the ticket proving a creation-data association.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmtTkCreation {
    pub tag: u16,
    pub hierarchy: Handle,
    pub digest: Vec<u8>,
}

impl Unmarshal for TpmtTkCreation {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Self {
            tag: buf.get_u16()?,
            hierarchy: Handle::unmarshal(buf)?,
            digest: buf.get_sized_buffer()?,
        })
    }
}

/// TPMS_ALG_PROPERTY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmsAlgProperty {
    pub alg: TpmAlgId,
    pub attributes: u32,
}

impl Unmarshal for TpmsAlgProperty {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Self {
            alg: TpmAlgId::unmarshal(buf)?,
            attributes: buf.get_u32()?,
        })
    }
}

/// TPMS_TAGGED_PROPERTY
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TpmsTaggedProperty {
    pub property: u32,
    pub value: u32,
}

impl Unmarshal for TpmsTaggedProperty {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Self {
            property: buf.get_u32()?,
            value: buf.get_u32()?,
        })
    }
}

/// TPMU_CAPABILITIES: selected by the capability field of the enclosing
/// TPMS_CAPABILITY_DATA.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TpmuCapabilities {
    Algs(Vec<TpmsAlgProperty>),
    Handles(Vec<Handle>),
    Commands(Vec<u32>),
    Pcrs(TpmlPcrSelection),
    TpmProperties(Vec<TpmsTaggedProperty>),
}

/// TPMS_CAPABILITY_DATA
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsCapabilityData {
    pub capability: TpmCap,
    pub data: TpmuCapabilities,
}

impl Unmarshal for TpmsCapabilityData {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let raw = buf.get_u32()?;
        let capability =
            TpmCap::from_u32(raw).ok_or(UnmarshalError::InvalidSelector(raw))?;
        let data = match capability {
            TpmCap::Algs => TpmuCapabilities::Algs(buf.get_list()?),
            TpmCap::Handles => TpmuCapabilities::Handles(buf.get_list()?),
            TpmCap::Commands => TpmuCapabilities::Commands(buf.get_list()?),
            TpmCap::Pcrs => TpmuCapabilities::Pcrs(TpmlPcrSelection::unmarshal(buf)?),
            TpmCap::TpmProperties => TpmuCapabilities::TpmProperties(buf.get_list()?),
        };
        Ok(Self { capability, data })
    }
}

/// A command authorization-area entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsAuthCommand {
    pub session_handle: Handle,
    pub nonce: Vec<u8>,
    pub attrs: u8,
    pub hmac: Vec<u8>,
}

impl Marshal for TpmsAuthCommand {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_u32(self.session_handle.0);
        buf.put_sized_buffer(&self.nonce)?;
        buf.put_u8(self.attrs);
        buf.put_sized_buffer(&self.hmac)
    }
}

/// A response authorization-area entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TpmsAuthResponse {
    pub nonce: Vec<u8>,
    pub attrs: u8,
    pub hmac: Vec<u8>,
}

impl Unmarshal for TpmsAuthResponse {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        Ok(Self {
            nonce: buf.get_sized_buffer()?,
            attrs: buf.get_u8()?,
            hmac: buf.get_sized_buffer()?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pcr_selection_bitmap() {
        let sel = TpmsPcrSelection::sha256(&[0, 1, 2, 7]);
        assert_eq!(sel.pcr_select[0], 0x87);
        assert_eq!(sel.selected(), vec![0, 1, 2, 7]);

        let encoded = sel.to_bytes().unwrap();
        assert_eq!(encoded, vec![0x00, 0x0B, 0x03, 0x87, 0x00, 0x00]);
        assert_eq!(TpmsPcrSelection::from_bytes_exact(&encoded).unwrap(), sel);
    }

    #[test]
    fn sym_def_codec() {
        let aes = TpmtSymDef::aes_128_cfb();
        let encoded = aes.to_bytes().unwrap();
        assert_eq!(encoded, vec![0x00, 0x06, 0x00, 0x80, 0x00, 0x43]);
        assert_eq!(TpmtSymDef::from_bytes_exact(&encoded).unwrap(), aes);

        let null = TpmtSymDef::Null.to_bytes().unwrap();
        assert_eq!(null, vec![0x00, 0x10]);

        let xor = TpmtSymDef::xor(TpmAlgId::Sha256);
        let encoded = xor.to_bytes().unwrap();
        assert_eq!(encoded, vec![0x00, 0x0A, 0x00, 0x0B]);
        assert_eq!(TpmtSymDef::from_bytes_exact(&encoded).unwrap(), xor);
    }

    #[test]
    fn public_area_roundtrip() {
        let public = TpmtPublic::rsa_storage_key();
        let encoded = public.to_bytes().unwrap();
        let decoded = TpmtPublic::from_bytes_exact(&encoded).unwrap();
        assert_eq!(decoded, public);
    }

    #[test]
    fn sealed_object_roundtrip() {
        let public = TpmtPublic::sealed_object(vec![0xaa; 32]);
        let decoded = TpmtPublic::from_bytes_exact(&public.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, public);
    }

    #[test]
    fn public_area_rejects_unknown_type_selector() {
        // A TPMT_PUBLIC claiming type SHA-256, which selects no union body.
        let mut buf = CommandBuffer::new();
        buf.put_u16(TpmAlgId::Sha256.to_u16());
        buf.put_u16(TpmAlgId::Sha256.to_u16());
        buf.put_u32(0);
        buf.put_sized_buffer(&[]).unwrap();
        let err = TpmtPublic::from_bytes_exact(buf.as_bytes()).unwrap_err();
        assert_eq!(err, UnmarshalError::InvalidSelector(0x0B));
    }

    #[test]
    fn union_marshal_checks_selector_agreement() {
        let parms = TpmuPublicParms::Rsa(TpmsRsaParms::storage_key());
        let mut buf = CommandBuffer::new();
        let err = parms
            .marshal_with_selector(TpmAlgId::Ecc, &mut buf)
            .unwrap_err();
        assert_eq!(err, MarshalError::InvalidSelector(0x23));
    }

    #[test]
    fn object_name_is_alg_prefixed_digest_of_public_area() {
        let public = TpmtPublic::rsa_storage_key();
        let name = public.name().unwrap();
        assert!(!name.is_handle());
        assert_eq!(&name.as_bytes()[..2], &[0x00, 0x0B]);
        assert_eq!(name.as_bytes().len(), 2 + 32);
    }

    #[test]
    fn nv_public_roundtrip_and_name_changes_with_attrs() {
        let public = TpmsNvPublic::new(
            Handle(0x0150_0000),
            8,
            TpmaNv::new().with(TpmaNv::OWNER_READ).with(TpmaNv::OWNER_WRITE),
        );
        let decoded = TpmsNvPublic::from_bytes_exact(&public.to_bytes().unwrap()).unwrap();
        assert_eq!(decoded, public);

        let name_before = public.name().unwrap();
        let mut written = public.clone();
        written.attributes = written.attributes.with(TpmaNv::WRITTEN);
        assert_ne!(written.name().unwrap(), name_before);
    }

    #[test]
    fn name_from_handle() {
        let name = Name::from_handle(Handle::OWNER);
        assert!(name.is_handle());
        assert_eq!(name.handle(), Some(Handle::OWNER));
        assert_eq!(name.as_bytes(), &[0x40, 0x00, 0x00, 0x01]);
    }

    #[test]
    fn auth_command_entry_layout() {
        let entry = TpmsAuthCommand {
            session_handle: Handle::PW,
            nonce: Vec::new(),
            attrs: 0x01,
            hmac: b"pw".to_vec(),
        };
        assert_eq!(
            entry.to_bytes().unwrap(),
            vec![0x40, 0x00, 0x00, 0x09, 0x00, 0x00, 0x01, 0x00, 0x02, b'p', b'w']
        );
    }

    #[test]
    fn capability_data_handles() {
        let mut buf = CommandBuffer::new();
        buf.put_u32(0x0000_0001); // TPM_CAP_HANDLES
        buf.put_list(&[Handle(0x8000_0000), Handle(0x8000_0001)]).unwrap();
        let decoded = TpmsCapabilityData::from_bytes_exact(buf.as_bytes()).unwrap();
        assert_eq!(
            decoded.data,
            TpmuCapabilities::Handles(vec![Handle(0x8000_0000), Handle(0x8000_0001)])
        );
    }
}
