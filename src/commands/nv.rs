// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Non-volatile storage commands
//!
//! The TPM mutates NV index attributes as a side effect of most of these
//! commands (the written and lock bits), and an index's name hashes over
//! its attributes, so each facade function re-derives the context's name
//! after updating the shadow attributes.

use tracing::debug;

use crate::constants::{TpmCc, TpmaNv};
use crate::errors::{Error, Result};
use crate::marshal::{CommandBuffer, Unmarshal};
use crate::resources::{ContextData, ContextPayload, ResourceContext, Session};
use crate::tpm::{CommandArgs, HandleArg, TpmContext};
use crate::types::{Name, TpmsNvPublic};

fn expect_nv_context(context: &ResourceContext) {
    if !matches!(context.data().payload, ContextPayload::Nv(_)) {
        panic!("an NV index context is required");
    }
}

/// Sets attribute bits on the shadow public area and re-derives the name.
fn set_nv_attr(context: &ResourceContext, bits: u32) -> Result<()> {
    let mut data = context.data_mut();
    let name = match &mut data.payload {
        ContextPayload::Nv(public) => {
            public.attributes = public.attributes.with(bits);
            public.name()?
        }
        _ => unreachable!("checked by expect_nv_context"),
    };
    data.name = name;
    Ok(())
}

impl TpmContext {
    /// TPM2_NV_DefineSpace: allocates an NV index described by
    /// `public_info`, with `auth` as its authorization value. Returns the
    /// context for the new index.
    pub fn nv_define_space(
        &mut self,
        auth_handle: &ResourceContext,
        auth: &[u8],
        public_info: &TpmsNvPublic,
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<ResourceContext> {
        let mut cp = CommandBuffer::new();
        cp.put_sized_buffer(auth)?;
        cp.put_sized(Some(public_info))?;
        let handles = [HandleArg::Auth(auth_handle, auth_session)];
        let mut args = CommandArgs::new(&handles, cp.into_vec());
        args.extra_sessions = sessions;
        args.first_param_sized = true;
        self.run_command(TpmCc::NvDefineSpace, args)?.no_params()?;

        let name = public_info.name()?;
        let data = ContextData::nv(name, public_info.clone());
        data.check_consistency().map_err(Error::InvalidContextData)?;
        let context = ResourceContext::new(data);
        context.set_auth_value(auth);
        self.registry.track(context.inner.clone());
        debug!(
            "defined NV index {} with {} bytes",
            public_info.index, public_info.data_size
        );
        Ok(context)
    }

    /// TPM2_NV_UndefineSpace: deletes an NV index and invalidates its
    /// context.
    pub fn nv_undefine_space(
        &mut self,
        auth_handle: &ResourceContext,
        nv_index: &ResourceContext,
        auth_session: Option<&Session>,
    ) -> Result<()> {
        expect_nv_context(nv_index);
        let handles = [
            HandleArg::Auth(auth_handle, auth_session),
            HandleArg::Plain(nv_index),
        ];
        self.run_command(TpmCc::NvUndefineSpace, CommandArgs::new(&handles, Vec::new()))?
            .no_params()?;
        debug!("undefined NV index {}", nv_index.handle());
        self.registry.evict(&nv_index.inner);
        Ok(())
    }

    /// TPM2_NV_UndefineSpaceSpecial: deletes a POLICY_DELETE index; the
    /// index itself must be authorized with a policy session.
    pub fn nv_undefine_space_special(
        &mut self,
        nv_index: &ResourceContext,
        platform: &ResourceContext,
        nv_index_auth: Option<&Session>,
        platform_auth: Option<&Session>,
    ) -> Result<()> {
        expect_nv_context(nv_index);
        let handles = [
            HandleArg::Auth(nv_index, nv_index_auth),
            HandleArg::Auth(platform, platform_auth),
        ];
        self.run_command(
            TpmCc::NvUndefineSpaceSpecial,
            CommandArgs::new(&handles, Vec::new()),
        )?
        .no_params()?;
        self.registry.evict(&nv_index.inner);
        Ok(())
    }

    /// TPM2_NV_ReadPublic: the public area and name of an NV index.
    pub fn nv_read_public(
        &mut self,
        nv_index: &ResourceContext,
        sessions: &[&Session],
    ) -> Result<(TpmsNvPublic, Name)> {
        let handles = [HandleArg::Plain(nv_index)];
        let mut args = CommandArgs::new(&handles, Vec::new());
        args.extra_sessions = sessions;
        args.first_response_param_sized = true;
        let resp = self.run_command(TpmCc::NvReadPublic, args)?;
        let (public, name) = resp.parse(|buf| {
            let public = buf.get_sized::<TpmsNvPublic>()?;
            let name = Name::unmarshal(buf)?;
            Ok((public, name))
        })?;
        let public = public.ok_or_else(|| Error::InvalidResponse {
            command: TpmCc::NvReadPublic,
            reason: "empty NV public area".to_string(),
        })?;
        Ok((public, name))
    }

    /// TPM2_NV_Write: writes `data` at `offset`. Sets the written bit on
    /// the shadow context.
    pub fn nv_write(
        &mut self,
        auth: &ResourceContext,
        nv_index: &ResourceContext,
        data: &[u8],
        offset: u16,
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<()> {
        expect_nv_context(nv_index);
        let mut cp = CommandBuffer::new();
        cp.put_sized_buffer(data)?;
        cp.put_u16(offset);
        let handles = [
            HandleArg::Auth(auth, auth_session),
            HandleArg::Plain(nv_index),
        ];
        let mut args = CommandArgs::new(&handles, cp.into_vec());
        args.extra_sessions = sessions;
        args.first_param_sized = true;
        self.run_command(TpmCc::NvWrite, args)?.no_params()?;
        debug!(
            "wrote {} bytes to NV index {} at offset {offset}",
            data.len(),
            nv_index.handle()
        );
        set_nv_attr(nv_index, TpmaNv::WRITTEN)
    }

    /// TPM2_NV_Increment: increments a counter index.
    pub fn nv_increment(
        &mut self,
        auth: &ResourceContext,
        nv_index: &ResourceContext,
        auth_session: Option<&Session>,
    ) -> Result<()> {
        expect_nv_context(nv_index);
        let handles = [
            HandleArg::Auth(auth, auth_session),
            HandleArg::Plain(nv_index),
        ];
        self.run_command(TpmCc::NvIncrement, CommandArgs::new(&handles, Vec::new()))?
            .no_params()?;
        set_nv_attr(nv_index, TpmaNv::WRITTEN)
    }

    /// TPM2_NV_Extend: extends `data` into an extend index.
    pub fn nv_extend(
        &mut self,
        auth: &ResourceContext,
        nv_index: &ResourceContext,
        data: &[u8],
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<()> {
        expect_nv_context(nv_index);
        let mut cp = CommandBuffer::new();
        cp.put_sized_buffer(data)?;
        let handles = [
            HandleArg::Auth(auth, auth_session),
            HandleArg::Plain(nv_index),
        ];
        let mut args = CommandArgs::new(&handles, cp.into_vec());
        args.extra_sessions = sessions;
        args.first_param_sized = true;
        self.run_command(TpmCc::NvExtend, args)?.no_params()?;
        set_nv_attr(nv_index, TpmaNv::WRITTEN)
    }

    /// TPM2_NV_SetBits: ORs `bits` into a bit-field index.
    pub fn nv_set_bits(
        &mut self,
        auth: &ResourceContext,
        nv_index: &ResourceContext,
        bits: u64,
        auth_session: Option<&Session>,
    ) -> Result<()> {
        expect_nv_context(nv_index);
        let mut cp = CommandBuffer::new();
        cp.put_u64(bits);
        let handles = [
            HandleArg::Auth(auth, auth_session),
            HandleArg::Plain(nv_index),
        ];
        self.run_command(TpmCc::NvSetBits, CommandArgs::new(&handles, cp.into_vec()))?
            .no_params()?;
        set_nv_attr(nv_index, TpmaNv::WRITTEN)
    }

    /// TPM2_NV_WriteLock: locks the index against writes.
    pub fn nv_write_lock(
        &mut self,
        auth: &ResourceContext,
        nv_index: &ResourceContext,
        auth_session: Option<&Session>,
    ) -> Result<()> {
        expect_nv_context(nv_index);
        let handles = [
            HandleArg::Auth(auth, auth_session),
            HandleArg::Plain(nv_index),
        ];
        self.run_command(TpmCc::NvWriteLock, CommandArgs::new(&handles, Vec::new()))?
            .no_params()?;
        set_nv_attr(nv_index, TpmaNv::WRITE_LOCKED)
    }

    /// TPM2_NV_GlobalWriteLock: write-locks every index with the
    /// global-lock attribute, on the TPM and in the registry.
    pub fn nv_global_write_lock(
        &mut self,
        auth_handle: &ResourceContext,
        auth_session: Option<&Session>,
    ) -> Result<()> {
        let handles = [HandleArg::Auth(auth_handle, auth_session)];
        self.run_command(TpmCc::NvGlobalWriteLock, CommandArgs::new(&handles, Vec::new()))?
            .no_params()?;

        for context in self.registry.snapshot() {
            let is_lockable_nv = matches!(
                &context.borrow().payload,
                ContextPayload::Nv(public) if public.attributes.contains(TpmaNv::GLOBAL_LOCK)
            );
            if is_lockable_nv {
                let wrapper = ResourceContext { inner: context };
                set_nv_attr(&wrapper, TpmaNv::WRITE_LOCKED)?;
            }
        }
        Ok(())
    }

    /// TPM2_NV_Read: reads `size` bytes at `offset`.
    pub fn nv_read(
        &mut self,
        auth: &ResourceContext,
        nv_index: &ResourceContext,
        size: u16,
        offset: u16,
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<Vec<u8>> {
        expect_nv_context(nv_index);
        let mut cp = CommandBuffer::new();
        cp.put_u16(size);
        cp.put_u16(offset);
        let handles = [
            HandleArg::Auth(auth, auth_session),
            HandleArg::Plain(nv_index),
        ];
        let mut args = CommandArgs::new(&handles, cp.into_vec());
        args.extra_sessions = sessions;
        args.first_response_param_sized = true;
        self.run_command(TpmCc::NvRead, args)?
            .parse(|buf| buf.get_sized_buffer())
    }

    /// TPM2_NV_ReadLock: locks the index against reads.
    pub fn nv_read_lock(
        &mut self,
        auth: &ResourceContext,
        nv_index: &ResourceContext,
        auth_session: Option<&Session>,
    ) -> Result<()> {
        expect_nv_context(nv_index);
        let handles = [
            HandleArg::Auth(auth, auth_session),
            HandleArg::Plain(nv_index),
        ];
        self.run_command(TpmCc::NvReadLock, CommandArgs::new(&handles, Vec::new()))?
            .no_params()?;
        set_nv_attr(nv_index, TpmaNv::READ_LOCKED)
    }

    /// TPM2_NV_ChangeAuth: changes the index's auth value. The index must
    /// be authorized with its ADMIN role (a policy session). The response
    /// HMAC is keyed with the new auth value unless the session is bound
    /// to the index.
    pub fn nv_change_auth(
        &mut self,
        nv_index: &ResourceContext,
        new_auth: &[u8],
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<()> {
        expect_nv_context(nv_index);
        let mut cp = CommandBuffer::new();
        cp.put_sized_buffer(new_auth)?;
        let handles = [HandleArg::Auth(nv_index, auth_session)];
        let mut args = CommandArgs::new(&handles, cp.into_vec());
        args.extra_sessions = sessions;
        args.first_param_sized = true;
        args.session0_response_auth = Some(new_auth.to_vec());
        self.run_command(TpmCc::NvChangeAuth, args)?.no_params()?;
        nv_index.set_auth_value(new_auth);
        debug!("changed auth value for NV index {}", nv_index.handle());
        Ok(())
    }
}
