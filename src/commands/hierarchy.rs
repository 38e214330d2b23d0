// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Hierarchy commands
//!
//! Clear and HierarchyChangeAuth change the authorization value the TPM
//! will use for its response HMAC, so both substitute the post-command
//! value before response verification and update the stored auth values of
//! the affected contexts afterwards.

use std::collections::HashSet;

use tracing::debug;

use crate::constants::{Handle, TpmCc, TpmHt, TpmaNv, CAPABILITY_MAX_PROPERTIES};
use crate::errors::Result;
use crate::marshal::CommandBuffer;
use crate::resources::{ContextPayload, ResourceContext, Session};
use crate::tpm::{CommandArgs, HandleArg, TpmContext};

impl TpmContext {
    /// TPM2_Clear: wipes the storage and endorsement hierarchies.
    /// `auth_handle` must be the platform or lockout hierarchy.
    ///
    /// On success every transient and persistent object context that no
    /// longer exists on the TPM is invalidated, along with every NV index
    /// context that is not platform-created, and the owner, endorsement
    /// and lockout auth values are reset to empty.
    pub fn clear(
        &mut self,
        auth_handle: &ResourceContext,
        auth_session: Option<&Session>,
    ) -> Result<()> {
        let handles = [HandleArg::Auth(auth_handle, auth_session)];
        let mut args = CommandArgs::new(&handles, Vec::new());
        // The TPM's response HMAC is keyed with the post-Clear (empty)
        // auth value.
        args.session0_response_auth = Some(Vec::new());
        self.run_command(TpmCc::Clear, args)?.no_params()?;
        debug!("cleared TPM owner state");

        for hierarchy in [Handle::OWNER, Handle::ENDORSEMENT, Handle::LOCKOUT] {
            self.get_permanent_context(hierarchy).set_auth_value(&[]);
        }

        // A fresh capability query tells surviving handles (platform
        // transients and persistents) apart from cleared ones.
        let mut survivors: HashSet<u32> = HashSet::new();
        for ht in [TpmHt::Transient, TpmHt::Persistent] {
            let handles =
                self.get_capability_handles(Handle::base_of(ht), CAPABILITY_MAX_PROPERTIES)?;
            survivors.extend(handles.into_iter().map(|h| h.0));
        }

        for context in self.registry.snapshot() {
            let evict = match &context.borrow().payload {
                ContextPayload::Object(_) => !survivors.contains(&context.borrow().handle.0),
                ContextPayload::Nv(public) => {
                    !public.attributes.contains(TpmaNv::PLATFORM_CREATE)
                }
                _ => false,
            };
            if evict {
                self.registry.evict(&context);
            }
        }
        Ok(())
    }

    /// TPM2_ClearControl: enables (`disable = false`, platform only) or
    /// disables execution of TPM2_Clear.
    pub fn clear_control(
        &mut self,
        auth_handle: &ResourceContext,
        disable: bool,
        auth_session: Option<&Session>,
    ) -> Result<()> {
        let mut cp = CommandBuffer::new();
        cp.put_bool(disable);
        let handles = [HandleArg::Auth(auth_handle, auth_session)];
        self.run_command(TpmCc::ClearControl, CommandArgs::new(&handles, cp.into_vec()))?
            .no_params()
    }

    /// TPM2_HierarchyChangeAuth: changes the auth value of the hierarchy
    /// at `auth_handle` to `new_auth`, and records it on the context.
    pub fn hierarchy_change_auth(
        &mut self,
        auth_handle: &ResourceContext,
        new_auth: &[u8],
        auth_session: Option<&Session>,
        sessions: &[&Session],
    ) -> Result<()> {
        let mut cp = CommandBuffer::new();
        cp.put_sized_buffer(new_auth)?;
        let handles = [HandleArg::Auth(auth_handle, auth_session)];
        let mut args = CommandArgs::new(&handles, cp.into_vec());
        args.extra_sessions = sessions;
        args.first_param_sized = true;
        // If the command HMAC key includes the old auth value, the TPM
        // responds with a key that includes the new one instead.
        args.session0_response_auth = Some(new_auth.to_vec());
        self.run_command(TpmCc::HierarchyChangeAuth, args)?
            .no_params()?;

        auth_handle.set_auth_value(new_auth);
        debug!("changed auth value for hierarchy {}", auth_handle.handle());
        Ok(())
    }
}
