// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Object and hierarchy-object commands

use tracing::debug;

use crate::constants::{Handle, TpmCc, TpmHt};
use crate::errors::{Error, Result};
use crate::marshal::{CommandBuffer, Marshal, Unmarshal};
use crate::resources::{ContextData, ContextPayload, ResourceContext, Session};
use crate::tpm::{CommandArgs, HandleArg, TpmContext};
use crate::types::{
    Name, TpmlPcrSelection, TpmsSensitiveCreate, TpmtPublic, TpmtTkCreation,
};

/// The creation evidence returned by Create and CreatePrimary.
#[derive(Debug, Clone)]
pub struct CreationInfo {
    /// The marshalled TPMS_CREATION_DATA, kept opaque.
    pub creation_data: Vec<u8>,
    pub creation_hash: Vec<u8>,
    pub creation_ticket: TpmtTkCreation,
}

fn marshal_create_params(
    in_sensitive: &TpmsSensitiveCreate,
    in_public: &TpmtPublic,
    outside_info: &[u8],
    creation_pcr: &TpmlPcrSelection,
) -> Result<Vec<u8>> {
    let mut cp = CommandBuffer::new();
    cp.put_sized(Some(in_sensitive))?;
    cp.put_sized(Some(in_public))?;
    cp.put_sized_buffer(outside_info)?;
    creation_pcr.marshal(&mut cp)?;
    Ok(cp.into_vec())
}

impl TpmContext {
    /// TPM2_CreatePrimary: creates a primary object in the hierarchy named
    /// by `primary_object`. The returned context's authorization value is
    /// the `user_auth` of `in_sensitive`.
    pub fn create_primary(
        &mut self,
        primary_object: &ResourceContext,
        in_sensitive: &TpmsSensitiveCreate,
        in_public: &TpmtPublic,
        outside_info: &[u8],
        creation_pcr: &TpmlPcrSelection,
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<(ResourceContext, TpmtPublic, CreationInfo)> {
        let cp = marshal_create_params(in_sensitive, in_public, outside_info, creation_pcr)?;
        let handles = [HandleArg::Auth(primary_object, auth_session)];
        let mut args = CommandArgs::new(&handles, cp);
        args.extra_sessions = sessions;
        args.first_param_sized = true;
        args.response_handle = true;

        let resp = self.run_command(TpmCc::CreatePrimary, args)?;
        let handle = resp.handle.unwrap_or(Handle::UNASSIGNED);
        let (out_public, info, name) = resp.parse(|buf| {
            let out_public = buf.get_sized::<TpmtPublic>()?;
            let creation_data = buf.get_sized_buffer()?;
            let creation_hash = buf.get_sized_buffer()?;
            let creation_ticket = TpmtTkCreation::unmarshal(buf)?;
            let name = Name::unmarshal(buf)?;
            Ok((
                out_public,
                CreationInfo {
                    creation_data,
                    creation_hash,
                    creation_ticket,
                },
                name,
            ))
        })?;
        let out_public = out_public.ok_or_else(|| Error::InvalidResponse {
            command: TpmCc::CreatePrimary,
            reason: "empty public area".to_string(),
        })?;
        if out_public.name()? != name {
            return Err(Error::InvalidResponse {
                command: TpmCc::CreatePrimary,
                reason: "name and public area don't match".to_string(),
            });
        }

        let context =
            ResourceContext::new(ContextData::object(handle, name, out_public.clone()));
        context.set_auth_value(&in_sensitive.user_auth);
        self.registry.track(context.inner.clone());
        debug!("created primary object at {handle}");
        Ok((context, out_public, info))
    }

    /// TPM2_Create: creates an ordinary object under `parent`, returning
    /// its private and public areas for a later Load.
    pub fn create(
        &mut self,
        parent: &ResourceContext,
        in_sensitive: &TpmsSensitiveCreate,
        in_public: &TpmtPublic,
        outside_info: &[u8],
        creation_pcr: &TpmlPcrSelection,
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<(Vec<u8>, TpmtPublic, CreationInfo)> {
        let cp = marshal_create_params(in_sensitive, in_public, outside_info, creation_pcr)?;
        let handles = [HandleArg::Auth(parent, auth_session)];
        let mut args = CommandArgs::new(&handles, cp);
        args.extra_sessions = sessions;
        args.first_param_sized = true;
        args.first_response_param_sized = true;

        let resp = self.run_command(TpmCc::Create, args)?;
        let (out_private, out_public, info) = resp.parse(|buf| {
            let out_private = buf.get_sized_buffer()?;
            let out_public = buf.get_sized::<TpmtPublic>()?;
            let creation_data = buf.get_sized_buffer()?;
            let creation_hash = buf.get_sized_buffer()?;
            let creation_ticket = TpmtTkCreation::unmarshal(buf)?;
            Ok((
                out_private,
                out_public,
                CreationInfo {
                    creation_data,
                    creation_hash,
                    creation_ticket,
                },
            ))
        })?;
        let out_public = out_public.ok_or_else(|| Error::InvalidResponse {
            command: TpmCc::Create,
            reason: "empty public area".to_string(),
        })?;
        debug!("created object under parent {}", parent.handle());
        Ok((out_private, out_public, info))
    }

    /// TPM2_Load: loads a created object. The returned context's name is
    /// cross-checked against the supplied public area.
    pub fn load(
        &mut self,
        parent: &ResourceContext,
        in_private: &[u8],
        in_public: &TpmtPublic,
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<ResourceContext> {
        let mut cp = CommandBuffer::new();
        cp.put_sized_buffer(in_private)?;
        cp.put_sized(Some(in_public))?;
        let handles = [HandleArg::Auth(parent, auth_session)];
        let mut args = CommandArgs::new(&handles, cp.into_vec());
        args.extra_sessions = sessions;
        args.first_param_sized = true;
        args.response_handle = true;

        let resp = self.run_command(TpmCc::Load, args)?;
        let handle = resp.handle.unwrap_or(Handle::UNASSIGNED);
        let name = resp.parse(|buf| Name::unmarshal(buf))?;
        if in_public.name()? != name {
            return Err(Error::InvalidResponse {
                command: TpmCc::Load,
                reason: "name and public area don't match".to_string(),
            });
        }

        let context =
            ResourceContext::new(ContextData::object(handle, name, in_public.clone()));
        self.registry.track(context.inner.clone());
        debug!("loaded object at {handle}");
        Ok(context)
    }

    /// TPM2_ReadPublic: the public area, name and qualified name of a
    /// loaded object.
    pub fn read_public(
        &mut self,
        object: &ResourceContext,
        sessions: &[&Session],
    ) -> Result<(TpmtPublic, Name, Name)> {
        let handles = [HandleArg::Plain(object)];
        let mut args = CommandArgs::new(&handles, Vec::new());
        args.extra_sessions = sessions;
        args.first_response_param_sized = true;

        let resp = self.run_command(TpmCc::ReadPublic, args)?;
        let (out_public, name, qualified_name) = resp.parse(|buf| {
            let out_public = buf.get_sized::<TpmtPublic>()?;
            let name = Name::unmarshal(buf)?;
            let qualified_name = Name::unmarshal(buf)?;
            Ok((out_public, name, qualified_name))
        })?;
        let out_public = out_public.ok_or_else(|| Error::InvalidResponse {
            command: TpmCc::ReadPublic,
            reason: "empty public area".to_string(),
        })?;
        Ok((out_public, name, qualified_name))
    }

    /// TPM2_Unseal: the data sealed in a keyed-hash object.
    pub fn unseal(
        &mut self,
        item: &ResourceContext,
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<Vec<u8>> {
        let handles = [HandleArg::Auth(item, auth_session)];
        let mut args = CommandArgs::new(&handles, Vec::new());
        args.extra_sessions = sessions;
        args.first_response_param_sized = true;
        self.run_command(TpmCc::Unseal, args)?
            .parse(|buf| buf.get_sized_buffer())
    }

    /// TPM2_EvictControl: persists a transient object (returning the new
    /// persistent context) or removes a persistent one (invalidating its
    /// context and returning `None`).
    ///
    /// Panics if `persistent_handle` is not in the persistent range or if
    /// `object` is not an object context.
    pub fn evict_control(
        &mut self,
        auth: &ResourceContext,
        object: &ResourceContext,
        persistent_handle: Handle,
        auth_session: Option<&Session>,
    ) -> Result<Option<ResourceContext>> {
        if persistent_handle.handle_type() != Some(TpmHt::Persistent) {
            panic!("invalid persistent handle {persistent_handle}");
        }
        let public = match &object.data().payload {
            ContextPayload::Object(public) => public.clone(),
            _ => panic!("evict_control requires an object context"),
        };

        let mut cp = CommandBuffer::new();
        cp.put_u32(persistent_handle.0);
        let handles = [HandleArg::Auth(auth, auth_session), HandleArg::Plain(object)];
        self.run_command(TpmCc::EvictControl, CommandArgs::new(&handles, cp.into_vec()))?
            .no_params()?;

        if object.handle().handle_type() == Some(TpmHt::Persistent) {
            debug!("removed persistent object at {}", object.handle());
            self.registry.evict(&object.inner);
            return Ok(None);
        }

        let persistent = ResourceContext::new(ContextData::object(
            persistent_handle,
            object.name(),
            public,
        ));
        persistent.set_auth_value(&object.auth_value());
        self.registry.track(persistent.inner.clone());
        debug!("persisted object at {persistent_handle}");
        Ok(Some(persistent))
    }
}
