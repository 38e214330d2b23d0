// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Context construction and registry surface
//!
//! Resource contexts come from four places: lazy interning of permanent
//! handles, reading a public area back from the TPM, restoring a
//! serialized blob, and caller-supplied public areas. All of them land in
//! the registry so that whole-registry sweeps (Clear, NVGlobalWriteLock)
//! see every context the application holds.

use tracing::debug;

use crate::constants::{Handle, TpmHt};
use crate::errors::{is_tpm_handle_error, is_tpm_warning, Error, ErrorCode, Result, WarningCode};
use crate::resources::{
    context_data_from_bytes, ContextData, ContextPayload, HandleContext, ResourceContext, Session,
    SessionContext,
};
use crate::tpm::TpmContext;
use crate::types::{TpmsNvPublic, TpmtPublic};

impl TpmContext {
    /// The canonical context for a permanent or PCR handle, interned on
    /// first use and never invalidated.
    ///
    /// Panics on any other handle type.
    pub fn get_permanent_context(&mut self, handle: Handle) -> ResourceContext {
        self.registry.intern_permanent(handle)
    }

    pub fn owner_handle_context(&mut self) -> ResourceContext {
        self.get_permanent_context(Handle::OWNER)
    }

    pub fn null_handle_context(&mut self) -> ResourceContext {
        self.get_permanent_context(Handle::NULL)
    }

    pub fn lockout_handle_context(&mut self) -> ResourceContext {
        self.get_permanent_context(Handle::LOCKOUT)
    }

    pub fn endorsement_handle_context(&mut self) -> ResourceContext {
        self.get_permanent_context(Handle::ENDORSEMENT)
    }

    pub fn platform_handle_context(&mut self) -> ResourceContext {
        self.get_permanent_context(Handle::PLATFORM)
    }

    pub fn platform_nv_handle_context(&mut self) -> ResourceContext {
        self.get_permanent_context(Handle::PLATFORM_NV)
    }

    /// The context for the PCR at `pcr`. Panics if `pcr` is not a valid
    /// PCR index.
    pub fn pcr_handle_context(&mut self, pcr: u32) -> ResourceContext {
        let handle = Handle(pcr);
        if handle.handle_type() != Some(TpmHt::Pcr) {
            panic!("invalid PCR index {pcr}");
        }
        self.get_permanent_context(handle)
    }

    /// Creates a context for an object or NV index by reading its public
    /// area back from the TPM. Without sessions the only protection is the
    /// name/public-area cross-check; with sessions the public area is read
    /// twice and the session authorizes the second read against the name
    /// learned in the first, proving an entity with that name lives on the
    /// TPM.
    ///
    /// Returns [`Error::ResourceUnavailable`] when nothing usable lives at
    /// `handle`. Panics if `handle` is not an NV index, transient or
    /// persistent handle.
    pub fn create_resource_context_from_tpm(
        &mut self,
        handle: Handle,
        sessions: &[&Session],
    ) -> Result<ResourceContext> {
        let is_nv = match handle.handle_type() {
            Some(TpmHt::NvIndex) => true,
            Some(TpmHt::Transient) | Some(TpmHt::Persistent) => false,
            _ => panic!("invalid handle type for a TPM resource lookup: {handle}"),
        };

        let mut context = ResourceContext::new(ContextData::dummy(handle));
        let mut pass_sessions: &[&Session] = &[];
        for _ in 0..2 {
            let read = if is_nv {
                self.make_nv_context_from_tpm(&context, pass_sessions)
            } else {
                self.make_object_context_from_tpm(&context, pass_sessions)
            };

            context = match read {
                Err(ref e)
                    if is_tpm_warning(e, Some(WarningCode::REFERENCE_H0), None)
                        || is_tpm_handle_error(e, Some(ErrorCode::HANDLE), None, None) =>
                {
                    return Err(Error::ResourceUnavailable { handle });
                }
                Err(e) => return Err(e),
                Ok(c) => c,
            };

            if sessions.is_empty() {
                break;
            }
            pass_sessions = sessions;
        }

        self.registry.track(context.inner.clone());
        Ok(context)
    }

    fn make_object_context_from_tpm(
        &mut self,
        context: &ResourceContext,
        sessions: &[&Session],
    ) -> Result<ResourceContext> {
        let (public, name, _qualified_name) = self.read_public(context, sessions)?;
        let computed = public.name()?;
        if computed != name {
            return Err(Error::InvalidResponse {
                command: crate::constants::TpmCc::ReadPublic,
                reason: "name and public area don't match".to_string(),
            });
        }
        Ok(ResourceContext::new(ContextData::object(
            context.handle(),
            name,
            public,
        )))
    }

    fn make_nv_context_from_tpm(
        &mut self,
        context: &ResourceContext,
        sessions: &[&Session],
    ) -> Result<ResourceContext> {
        let (public, name) = self.nv_read_public(context, sessions)?;
        let computed = public.name()?;
        if computed != name {
            return Err(Error::InvalidResponse {
                command: crate::constants::TpmCc::NvReadPublic,
                reason: "name and public area don't match".to_string(),
            });
        }
        if public.index != context.handle() {
            return Err(Error::InvalidResponse {
                command: crate::constants::TpmCc::NvReadPublic,
                reason: "unexpected index in public area".to_string(),
            });
        }
        Ok(ResourceContext::new(ContextData::nv(name, public)))
    }

    /// A session context for a handle of unknown provenance. The result is
    /// incomplete: it cannot authorize anything and is only good for
    /// [`TpmContext::flush_session`].
    ///
    /// Panics if `handle` is not a session handle.
    pub fn create_incomplete_session_context(handle: Handle) -> SessionContext {
        match handle.handle_type() {
            Some(TpmHt::HmacSession) | Some(TpmHt::PolicySession) => {
                SessionContext::new(ContextData::session(handle, None))
            }
            _ => panic!("invalid handle type for a session context: {handle}"),
        }
    }

    /// Restores a context serialized with `serialize()` and tracks it. The
    /// restored context carries no authorization value.
    pub fn context_from_bytes(&mut self, blob: &[u8]) -> Result<HandleContext> {
        let data = context_data_from_bytes(blob)?;
        let restored = match data.payload {
            ContextPayload::Session(_) => {
                let ctx = SessionContext::new(data);
                self.registry.track(ctx.inner.clone());
                HandleContext::Session(ctx)
            }
            _ => {
                let ctx = ResourceContext::new(data);
                self.registry.track(ctx.inner.clone());
                HandleContext::Resource(ctx)
            }
        };
        Ok(restored)
    }

    /// A context for an NV index from a caller-supplied public area.
    pub fn nv_index_context_from_public(
        &mut self,
        public: &TpmsNvPublic,
    ) -> Result<ResourceContext> {
        let name = public.name()?;
        let data = ContextData::nv(name, public.clone());
        data.check_consistency().map_err(Error::InvalidContextData)?;
        let context = ResourceContext::new(data);
        self.registry.track(context.inner.clone());
        Ok(context)
    }

    /// A context for an object from a caller-supplied public area.
    pub fn object_context_from_public(
        &mut self,
        handle: Handle,
        public: &TpmtPublic,
    ) -> Result<ResourceContext> {
        let name = public.name()?;
        let data = ContextData::object(handle, name, public.clone());
        data.check_consistency().map_err(Error::InvalidContextData)?;
        let context = ResourceContext::new(data);
        self.registry.track(context.inner.clone());
        Ok(context)
    }

    /// Force-invalidates whatever context is tracked at `handle`. After an
    /// invalid-response error from a resource-destroying command the
    /// affected contexts are stale; this is the escape hatch.
    pub fn forget_resource(&mut self, handle: Handle) -> bool {
        match self.registry.lookup(handle) {
            Some(context) => {
                debug!("forgetting resource context at {handle}");
                self.registry.evict(&context);
                true
            }
            None => false,
        }
    }
}
