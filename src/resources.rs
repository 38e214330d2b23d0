// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Host-side resource contexts
//!
//! Every entity the application holds on the TPM is shadowed by a context:
//! permanent hierarchies and PCRs, transient and persistent objects, NV
//! indices, and sessions. Contexts carry the entity's name, its public
//! area or session state, and (for objects and NV indices) a host-side
//! authorization value that is used when the context authorizes a command
//! but is never part of the serialized form.
//!
//! Object, NV and session contexts can be serialized for cross-process use
//! as `algId || digest || body`; restoring verifies the digest and the
//! internal consistency of the body, and always yields a context with an
//! empty authorization value.

use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

use super::constants::{Handle, SessionAttributes, TpmAlgId, TpmHt, TpmSe};
use super::crypto;
use super::errors::{Error, Result};
use super::marshal::{
    CommandBuffer, Marshal, MarshalError, ResponseBuffer, Unmarshal, UnmarshalError,
};
use super::types::{Name, TpmsNvPublic, TpmtPublic, TpmtSymDef};

/// How a policy session authorizes: with no HMAC key material, with the
/// entity's auth value in the HMAC key (after PolicyAuthValue), or with the
/// cleartext auth value (after PolicyPassword).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum PolicyHmacType {
    None = 0,
    Auth = 1,
    Password = 2,
}

impl PolicyHmacType {
    fn from_u8(v: u8) -> Option<Self> {
        match v {
            0 => Some(PolicyHmacType::None),
            1 => Some(PolicyHmacType::Auth),
            2 => Some(PolicyHmacType::Password),
            _ => None,
        }
    }
}

/// The shadow state of a session held on the TPM.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct SessionData {
    pub hash_alg: TpmAlgId,
    pub session_type: TpmSe,
    pub policy_hmac_type: PolicyHmacType,
    pub is_bound: bool,
    pub bound_entity: Name,
    pub session_key: Vec<u8>,
    pub nonce_caller: Vec<u8>,
    pub nonce_tpm: Vec<u8>,
    pub symmetric: TpmtSymDef,
    pub is_audit: bool,
    pub is_exclusive: bool,
}

impl Marshal for SessionData {
    fn marshal(&self, buf: &mut CommandBuffer) -> std::result::Result<(), MarshalError> {
        buf.put_bool(self.is_audit);
        buf.put_bool(self.is_exclusive);
        buf.put_u16(self.hash_alg.to_u16());
        buf.put_u8(self.session_type as u8);
        buf.put_u8(self.policy_hmac_type as u8);
        buf.put_bool(self.is_bound);
        self.bound_entity.marshal(buf)?;
        buf.put_sized_buffer(&self.session_key)?;
        buf.put_sized_buffer(&self.nonce_caller)?;
        buf.put_sized_buffer(&self.nonce_tpm)?;
        self.symmetric.marshal(buf)
    }
}

impl Unmarshal for SessionData {
    fn unmarshal(buf: &mut ResponseBuffer<'_>) -> std::result::Result<Self, UnmarshalError> {
        let is_audit = buf.get_bool()?;
        let is_exclusive = buf.get_bool()?;
        let hash_alg = TpmAlgId::unmarshal(buf)?;
        let session_type = TpmSe::from_u8(buf.get_u8()?)
            .ok_or(UnmarshalError::InvalidValue("session type"))?;
        let policy_hmac_type = PolicyHmacType::from_u8(buf.get_u8()?)
            .ok_or(UnmarshalError::InvalidValue("policy HMAC type"))?;
        Ok(Self {
            is_audit,
            is_exclusive,
            hash_alg,
            session_type,
            policy_hmac_type,
            is_bound: buf.get_bool()?,
            bound_entity: Name::unmarshal(buf)?,
            session_key: buf.get_sized_buffer()?,
            nonce_caller: buf.get_sized_buffer()?,
            nonce_tpm: buf.get_sized_buffer()?,
            symmetric: TpmtSymDef::unmarshal(buf)?,
        })
    }
}

const CONTEXT_TYPE_DUMMY: u8 = 0;
const CONTEXT_TYPE_PERMANENT: u8 = 1;
const CONTEXT_TYPE_OBJECT: u8 = 2;
const CONTEXT_TYPE_NV_INDEX: u8 = 3;
const CONTEXT_TYPE_SESSION: u8 = 4;

/// The variant payload of a context.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum ContextPayload {
    /// Placeholder used while reading a public area from the TPM; never
    /// escapes `create_resource_context_from_tpm`.
    Dummy,
    Permanent,
    Object(TpmtPublic),
    Nv(TpmsNvPublic),
    /// `None` for an incomplete session that can only be flushed.
    Session(Option<SessionData>),
}

#[derive(Debug, Clone)]
pub(crate) struct ContextData {
    pub handle: Handle,
    pub name: Name,
    pub payload: ContextPayload,
    /// Host-side secret; excluded from serialization.
    pub auth_value: Vec<u8>,
}

impl ContextData {
    pub fn permanent(handle: Handle) -> Self {
        Self {
            handle,
            name: Name::from_handle(handle),
            payload: ContextPayload::Permanent,
            auth_value: Vec::new(),
        }
    }

    pub fn dummy(handle: Handle) -> Self {
        Self {
            handle,
            name: Name::from_handle(handle),
            payload: ContextPayload::Dummy,
            auth_value: Vec::new(),
        }
    }

    pub fn object(handle: Handle, name: Name, public: TpmtPublic) -> Self {
        Self {
            handle,
            name,
            payload: ContextPayload::Object(public),
            auth_value: Vec::new(),
        }
    }

    pub fn nv(name: Name, public: TpmsNvPublic) -> Self {
        Self {
            handle: public.index,
            name,
            payload: ContextPayload::Nv(public),
            auth_value: Vec::new(),
        }
    }

    pub fn session(handle: Handle, data: Option<SessionData>) -> Self {
        Self {
            handle,
            name: Name::from_handle(handle),
            payload: ContextPayload::Session(data),
            auth_value: Vec::new(),
        }
    }

    fn type_tag(&self) -> u8 {
        match self.payload {
            ContextPayload::Dummy => CONTEXT_TYPE_DUMMY,
            ContextPayload::Permanent => CONTEXT_TYPE_PERMANENT,
            ContextPayload::Object(_) => CONTEXT_TYPE_OBJECT,
            ContextPayload::Nv(_) => CONTEXT_TYPE_NV_INDEX,
            ContextPayload::Session(_) => CONTEXT_TYPE_SESSION,
        }
    }

    fn invalidate(&mut self) {
        if matches!(
            self.payload,
            ContextPayload::Permanent | ContextPayload::Dummy
        ) {
            return;
        }
        self.handle = Handle::UNASSIGNED;
        self.name = Name::from_handle(Handle::UNASSIGNED);
    }

    fn marshal_body(&self) -> std::result::Result<Vec<u8>, MarshalError> {
        let mut buf = CommandBuffer::new();
        buf.put_u8(self.type_tag());
        buf.put_u32(self.handle.0);
        self.name.marshal(&mut buf)?;
        match &self.payload {
            ContextPayload::Dummy | ContextPayload::Permanent => {}
            ContextPayload::Object(public) => public.marshal(&mut buf)?,
            ContextPayload::Nv(public) => public.marshal(&mut buf)?,
            ContextPayload::Session(data) => {
                match data {
                    None => buf.put_bool(false),
                    Some(d) => {
                        buf.put_bool(true);
                        d.marshal(&mut buf)?;
                    }
                }
            }
        }
        Ok(buf.into_vec())
    }

    fn unmarshal_body(body: &[u8]) -> std::result::Result<Self, UnmarshalError> {
        let mut buf = ResponseBuffer::new(body);
        let tag = buf.get_u8()?;
        let handle = Handle(buf.get_u32()?);
        let name = Name::unmarshal(&mut buf)?;
        let payload = match tag {
            CONTEXT_TYPE_DUMMY => ContextPayload::Dummy,
            CONTEXT_TYPE_PERMANENT => ContextPayload::Permanent,
            CONTEXT_TYPE_OBJECT => ContextPayload::Object(TpmtPublic::unmarshal(&mut buf)?),
            CONTEXT_TYPE_NV_INDEX => ContextPayload::Nv(TpmsNvPublic::unmarshal(&mut buf)?),
            CONTEXT_TYPE_SESSION => {
                if buf.get_bool()? {
                    ContextPayload::Session(Some(SessionData::unmarshal(&mut buf)?))
                } else {
                    ContextPayload::Session(None)
                }
            }
            _ => return Err(UnmarshalError::InvalidValue("context type tag")),
        };
        buf.finish()?;
        Ok(Self {
            handle,
            name,
            payload,
            auth_value: Vec::new(),
        })
    }

    /// Validates the invariants between handle, name and payload.
    pub fn check_consistency(&self) -> std::result::Result<(), String> {
        let handle_name_matches =
            self.name.is_handle() && self.name.handle() == Some(self.handle);
        match &self.payload {
            ContextPayload::Dummy => Err("unrecognized context type".into()),
            ContextPayload::Permanent => {
                match self.handle.handle_type() {
                    Some(TpmHt::Permanent) | Some(TpmHt::Pcr) => {}
                    _ => return Err("inconsistent handle type for permanent context".into()),
                }
                if !handle_name_matches {
                    return Err("name inconsistent with handle for permanent context".into());
                }
                Ok(())
            }
            ContextPayload::Object(public) => {
                match self.handle.handle_type() {
                    Some(TpmHt::Transient) | Some(TpmHt::Persistent) => {}
                    _ => return Err("inconsistent handle type for object context".into()),
                }
                let name = public
                    .name()
                    .map_err(|e| format!("cannot compute object name: {e}"))?;
                if name != self.name {
                    return Err("name inconsistent with public area for object context".into());
                }
                Ok(())
            }
            ContextPayload::Nv(public) => {
                if self.handle.handle_type() != Some(TpmHt::NvIndex) {
                    return Err("inconsistent handle type for NV context".into());
                }
                if public.index != self.handle {
                    return Err("handle inconsistent with public area for NV context".into());
                }
                let name = public
                    .name()
                    .map_err(|e| format!("cannot compute NV index name: {e}"))?;
                if name != self.name {
                    return Err("name inconsistent with public area for NV context".into());
                }
                Ok(())
            }
            ContextPayload::Session(data) => {
                match self.handle.handle_type() {
                    Some(TpmHt::HmacSession) | Some(TpmHt::PolicySession) => {}
                    _ => return Err("inconsistent handle type for session context".into()),
                }
                if !handle_name_matches {
                    return Err("name inconsistent with handle for session context".into());
                }
                if let Some(d) = data {
                    if d.is_exclusive && !d.is_audit {
                        return Err("inconsistent audit attributes for session context".into());
                    }
                    if !d.hash_alg.is_supported_digest() {
                        return Err("invalid digest algorithm for session context".into());
                    }
                    if d.is_bound != !d.bound_entity.is_empty() {
                        return Err("invalid bind properties for session context".into());
                    }
                    let digest_size = d.hash_alg.digest_size();
                    if !d.session_key.is_empty() && d.session_key.len() != digest_size {
                        return Err("unexpected session key size for session context".into());
                    }
                    if d.nonce_caller.len() != digest_size || d.nonce_tpm.len() != digest_size {
                        return Err("unexpected nonce size for session context".into());
                    }
                    match d.symmetric {
                        TpmtSymDef::Null | TpmtSymDef::Xor(_) => {}
                        TpmtSymDef::Cipher {
                            algorithm,
                            key_bits,
                            mode,
                        } => {
                            let bits_ok = match algorithm {
                                TpmAlgId::Aes | TpmAlgId::Camellia => {
                                    matches!(key_bits, 128 | 192 | 256)
                                }
                                TpmAlgId::Sm4 => key_bits == 128,
                                _ => {
                                    return Err(
                                        "invalid symmetric algorithm for session context".into()
                                    )
                                }
                            };
                            if !bits_ok {
                                return Err("invalid symmetric key size for session context".into());
                            }
                            if mode != TpmAlgId::Cfb {
                                return Err("invalid symmetric mode for session context".into());
                            }
                        }
                    }
                }
                Ok(())
            }
        }
    }
}

pub(crate) type SharedContext = Rc<RefCell<ContextData>>;

fn serialize_context(data: &ContextData) -> Result<Vec<u8>> {
    let body = data.marshal_body().map_err(Error::Marshal)?;
    let checksum = crypto::digest(TpmAlgId::Sha256, &[&body]);
    let mut buf = CommandBuffer::new();
    buf.put_u16(TpmAlgId::Sha256.to_u16());
    buf.put_sized_buffer(&checksum).map_err(Error::Marshal)?;
    buf.put_sized_buffer(&body).map_err(Error::Marshal)?;
    Ok(buf.into_vec())
}

/// A context for a non-session entity: a permanent hierarchy or PCR, an
/// object, or an NV index. Cheap to clone; clones refer to the same
/// underlying state.
#[derive(Debug, Clone)]
pub struct ResourceContext {
    pub(crate) inner: SharedContext,
}

/// A context for a session created by StartAuthSession.
#[derive(Debug, Clone)]
pub struct SessionContext {
    pub(crate) inner: SharedContext,
}

impl ResourceContext {
    pub(crate) fn new(data: ContextData) -> Self {
        Self {
            inner: Rc::new(RefCell::new(data)),
        }
    }

    /// The entity's handle, or [`Handle::UNASSIGNED`] once invalidated.
    pub fn handle(&self) -> Handle {
        self.inner.borrow().handle
    }

    /// The entity's name.
    pub fn name(&self) -> Name {
        self.inner.borrow().name.clone()
    }

    /// Sets the authorization value used when this context authorizes a
    /// command. Commands that create resources set it automatically;
    /// contexts obtained any other way start with an empty value.
    pub fn set_auth_value(&self, auth_value: &[u8]) {
        self.inner.borrow_mut().auth_value = auth_value.to_vec();
    }

    /// Serializes this context for cross-process persistence. The
    /// authorization value is not included.
    ///
    /// Panics if called on a permanent context (they are interned on
    /// demand, not persisted).
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let data = self.inner.borrow();
        match data.payload {
            ContextPayload::Object(_) | ContextPayload::Nv(_) => serialize_context(&data),
            _ => panic!("only object and NV index contexts can be serialized"),
        }
    }

    pub(crate) fn auth_value(&self) -> Vec<u8> {
        self.inner.borrow().auth_value.clone()
    }

    pub(crate) fn data(&self) -> Ref<'_, ContextData> {
        self.inner.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, ContextData> {
        self.inner.borrow_mut()
    }

    /// Panics if this context has been invalidated; called by every command
    /// before any transport I/O.
    pub(crate) fn assert_usable(&self) {
        if self.handle() == Handle::UNASSIGNED {
            panic!("resource context has been invalidated and can no longer be used");
        }
    }
}

impl SessionContext {
    pub(crate) fn new(data: ContextData) -> Self {
        Self {
            inner: Rc::new(RefCell::new(data)),
        }
    }

    /// The session handle, or [`Handle::UNASSIGNED`] once invalidated.
    pub fn handle(&self) -> Handle {
        self.inner.borrow().handle
    }

    pub fn name(&self) -> Name {
        self.inner.borrow().name.clone()
    }

    /// The most recent nonce returned by the TPM for this session.
    pub fn nonce_tpm(&self) -> Vec<u8> {
        match &self.inner.borrow().payload {
            ContextPayload::Session(Some(d)) => d.nonce_tpm.clone(),
            _ => Vec::new(),
        }
    }

    pub fn is_audit(&self) -> bool {
        matches!(&self.inner.borrow().payload, ContextPayload::Session(Some(d)) if d.is_audit)
    }

    pub fn is_exclusive(&self) -> bool {
        matches!(&self.inner.borrow().payload, ContextPayload::Session(Some(d)) if d.is_exclusive)
    }

    /// Serializes this session context; the attached attributes are a
    /// per-use property and are not part of the serialized form.
    ///
    /// Panics on an incomplete session context.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let data = self.inner.borrow();
        match data.payload {
            ContextPayload::Session(Some(_)) => serialize_context(&data),
            ContextPayload::Session(None) => {
                panic!("an incomplete session context cannot be serialized")
            }
            _ => unreachable!("session context with non-session payload"),
        }
    }

    /// Pairs this session with usage attributes for one or more commands.
    pub fn with_attrs(&self, attrs: SessionAttributes) -> Session {
        Session {
            context: self.clone(),
            attrs,
        }
    }

    pub(crate) fn data(&self) -> Ref<'_, ContextData> {
        self.inner.borrow()
    }

    pub(crate) fn data_mut(&self) -> RefMut<'_, ContextData> {
        self.inner.borrow_mut()
    }

    pub(crate) fn assert_usable(&self) {
        if self.handle() == Handle::UNASSIGNED {
            panic!("session context has been invalidated and can no longer be used");
        }
    }
}

/// A session plus the attributes it should carry on a command.
#[derive(Debug, Clone)]
pub struct Session {
    pub context: SessionContext,
    pub attrs: SessionAttributes,
}

/// A restored context: sessions and non-session resources deserialize to
/// different types.
#[derive(Debug, Clone)]
pub enum HandleContext {
    Resource(ResourceContext),
    Session(SessionContext),
}

/// Restores a context from its serialized form. The digest is verified,
/// permanent contexts are rejected, and the result carries an empty
/// authorization value.
pub(crate) fn context_data_from_bytes(blob: &[u8]) -> Result<ContextData> {
    let mut buf = ResponseBuffer::new(blob);
    let restore = |msg: &str| Error::InvalidContextData(msg.to_string());

    let alg_raw = buf.get_u16().map_err(Error::Unmarshal)?;
    let alg = TpmAlgId::from_u16(alg_raw)
        .filter(|a| a.is_supported_digest())
        .ok_or_else(|| restore("invalid checksum algorithm"))?;
    let checksum = buf.get_sized_buffer().map_err(Error::Unmarshal)?;
    let body = buf.get_sized_buffer().map_err(Error::Unmarshal)?;
    buf.finish().map_err(Error::Unmarshal)?;

    if crypto::digest(alg, &[&body]) != checksum {
        return Err(restore("invalid checksum"));
    }

    let data = ContextData::unmarshal_body(&body).map_err(Error::Unmarshal)?;
    if matches!(data.payload, ContextPayload::Permanent) {
        return Err(restore("cannot restore a permanent context from serialized data"));
    }
    data.check_consistency().map_err(Error::InvalidContextData)?;
    Ok(data)
}

/// The set of live contexts owned by a [`crate::TpmContext`].
#[derive(Default)]
pub(crate) struct Registry {
    resources: HashMap<u32, SharedContext>,
    permanent: HashMap<u32, ResourceContext>,
}

impl Registry {
    /// Get-or-create the canonical context for a permanent or PCR handle.
    ///
    /// Panics on any other handle type.
    pub fn intern_permanent(&mut self, handle: Handle) -> ResourceContext {
        match handle.handle_type() {
            Some(TpmHt::Permanent) | Some(TpmHt::Pcr) => {}
            _ => panic!("invalid handle type for a permanent context: {handle}"),
        }
        self.permanent
            .entry(handle.0)
            .or_insert_with(|| ResourceContext::new(ContextData::permanent(handle)))
            .clone()
    }

    /// Adds an object, NV or session context. A context already tracked at
    /// the same handle is displaced; its shadow state is stale by
    /// construction, so at most one context per handle (and therefore per
    /// (handle, name) pair) is live.
    pub fn track(&mut self, context: SharedContext) {
        let handle = context.borrow().handle;
        self.resources.insert(handle.0, context);
    }

    pub fn lookup(&self, handle: Handle) -> Option<SharedContext> {
        self.resources.get(&handle.0).cloned()
    }

    /// A snapshot of all tracked non-permanent contexts, for whole-registry
    /// sweeps (Clear, NVGlobalWriteLock).
    pub fn snapshot(&self) -> Vec<SharedContext> {
        self.resources.values().cloned().collect()
    }

    /// Invalidates a context and evicts it from the registry. Safe to call
    /// with a context that is not tracked (it is still invalidated).
    pub fn evict(&mut self, context: &SharedContext) {
        let handle = context.borrow().handle;
        if let Some(tracked) = self.resources.get(&handle.0) {
            if Rc::ptr_eq(tracked, context) {
                self.resources.remove(&handle.0);
            }
        }
        context.borrow_mut().invalidate();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::TpmaNv;

    fn object_context() -> ResourceContext {
        let public = TpmtPublic::rsa_storage_key();
        let name = public.name().unwrap();
        ResourceContext::new(ContextData::object(Handle(0x8000_0001), name, public))
    }

    fn session_data(hash_alg: TpmAlgId) -> SessionData {
        let n = hash_alg.digest_size();
        SessionData {
            hash_alg,
            session_type: TpmSe::Hmac,
            policy_hmac_type: PolicyHmacType::None,
            is_bound: false,
            bound_entity: Name::default(),
            session_key: vec![0x11; n],
            nonce_caller: vec![0x22; n],
            nonce_tpm: vec![0x33; n],
            symmetric: TpmtSymDef::aes_128_cfb(),
            is_audit: false,
            is_exclusive: false,
        }
    }

    #[test]
    fn object_context_roundtrip_drops_auth_value() {
        let ctx = object_context();
        ctx.set_auth_value(b"secret");
        let blob = ctx.serialize().unwrap();

        let restored = context_data_from_bytes(&blob).unwrap();
        assert_eq!(restored.handle, ctx.handle());
        assert_eq!(restored.name, ctx.name());
        assert_eq!(restored.payload, ctx.data().payload);
        assert!(restored.auth_value.is_empty());
    }

    #[test]
    fn session_context_roundtrip() {
        let ctx = SessionContext::new(ContextData::session(
            Handle(0x0200_0000),
            Some(session_data(TpmAlgId::Sha256)),
        ));
        let blob = ctx.serialize().unwrap();
        let restored = context_data_from_bytes(&blob).unwrap();
        assert_eq!(restored.handle, ctx.handle());
        assert_eq!(restored.payload, ctx.data().payload);
    }

    #[test]
    fn corrupt_body_fails_checksum() {
        let blob = object_context().serialize().unwrap();
        let mut corrupt = blob.clone();
        let last = corrupt.len() - 1;
        corrupt[last] ^= 0x01;
        let err = context_data_from_bytes(&corrupt).unwrap_err();
        assert!(matches!(err, Error::InvalidContextData(msg) if msg.contains("checksum")));
    }

    #[test]
    fn permanent_context_cannot_be_restored() {
        let data = ContextData::permanent(Handle::OWNER);
        let blob = serialize_context(&data).unwrap();
        let err = context_data_from_bytes(&blob).unwrap_err();
        assert!(matches!(err, Error::InvalidContextData(msg) if msg.contains("permanent")));
    }

    #[test]
    fn trailing_bytes_after_blob_rejected() {
        let mut blob = object_context().serialize().unwrap();
        blob.push(0x00);
        let err = context_data_from_bytes(&blob).unwrap_err();
        assert!(matches!(
            err,
            Error::Unmarshal(UnmarshalError::TrailingBytes(1))
        ));
    }

    #[test]
    fn invalidate_sets_unassigned_handle_and_name() {
        let ctx = object_context();
        let mut registry = Registry::default();
        registry.track(ctx.inner.clone());
        registry.evict(&ctx.inner);
        assert_eq!(ctx.handle(), Handle::UNASSIGNED);
        assert_eq!(ctx.name().as_bytes(), &[0xff, 0xff, 0xff, 0xff]);
        assert!(registry.lookup(Handle(0x8000_0001)).is_none());
    }

    #[test]
    #[should_panic(expected = "invalidated")]
    fn use_after_invalidate_panics() {
        let ctx = object_context();
        let mut registry = Registry::default();
        registry.evict(&ctx.inner);
        ctx.assert_usable();
    }

    #[test]
    fn permanent_contexts_are_interned() {
        let mut registry = Registry::default();
        let a = registry.intern_permanent(Handle::OWNER);
        let b = registry.intern_permanent(Handle::OWNER);
        assert!(Rc::ptr_eq(&a.inner, &b.inner));
        assert_eq!(a.name().as_bytes(), &[0x40, 0x00, 0x00, 0x01]);
    }

    #[test]
    #[should_panic(expected = "invalid handle type")]
    fn interning_a_transient_handle_panics() {
        let mut registry = Registry::default();
        registry.intern_permanent(Handle(0x8000_0000));
    }

    #[test]
    fn consistency_rejects_exclusive_without_audit() {
        let mut data = session_data(TpmAlgId::Sha256);
        data.is_exclusive = true;
        let ctx = ContextData::session(Handle(0x0200_0000), Some(data));
        assert!(ctx.check_consistency().unwrap_err().contains("audit"));
    }

    #[test]
    fn consistency_rejects_bad_nonce_size() {
        let mut data = session_data(TpmAlgId::Sha256);
        data.nonce_tpm = vec![0; 20];
        let ctx = ContextData::session(Handle(0x0200_0000), Some(data));
        assert!(ctx.check_consistency().unwrap_err().contains("nonce"));
    }

    #[test]
    fn consistency_rejects_bound_without_entity_name() {
        let mut data = session_data(TpmAlgId::Sha256);
        data.is_bound = true;
        let ctx = ContextData::session(Handle(0x0300_0000), Some(data));
        assert!(ctx.check_consistency().unwrap_err().contains("bind"));
    }

    #[test]
    fn consistency_rejects_mismatched_nv_name() {
        let public = TpmsNvPublic::new(Handle(0x0150_0000), 8, TpmaNv::new());
        let wrong_name = Name::new(vec![0x00, 0x0B, 0xde, 0xad]);
        let ctx = ContextData::nv(wrong_name, public);
        assert!(ctx.check_consistency().unwrap_err().contains("name"));
    }

    #[test]
    fn consistency_rejects_handle_type_mismatch() {
        let public = TpmtPublic::rsa_storage_key();
        let name = public.name().unwrap();
        let ctx = ContextData::object(Handle(0x0150_0000), name, public);
        assert!(ctx.check_consistency().unwrap_err().contains("handle type"));
    }
}
