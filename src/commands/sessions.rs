// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Session lifecycle and policy assists

use tracing::debug;

use crate::constants::{Handle, TpmAlgId, TpmCc, TpmHt, TpmSe};
use crate::errors::{Error, Result};
use crate::marshal::CommandBuffer;
use crate::resources::{
    ContextData, ContextPayload, PolicyHmacType, ResourceContext, Session, SessionContext,
    SessionData,
};
use crate::session::derive_session_key;
use crate::tpm::{CommandArgs, HandleArg, TpmContext};
use crate::types::{Name, TpmlPcrSelection, TpmtSymDef};
use crate::{crypto, marshal::Marshal};

impl TpmContext {
    /// TPM2_StartAuthSession. `bind` binds the session to an entity whose
    /// auth value seeds the session key; `symmetric` enables parameter
    /// encryption for commands run with this session.
    ///
    /// Salted sessions (`tpm_key`) are not supported: the crypto surface of
    /// this crate has no asymmetric operations, so passing `Some` panics.
    pub fn start_auth_session(
        &mut self,
        tpm_key: Option<&ResourceContext>,
        bind: Option<&ResourceContext>,
        session_type: TpmSe,
        symmetric: Option<TpmtSymDef>,
        auth_hash: TpmAlgId,
    ) -> Result<SessionContext> {
        if tpm_key.is_some() {
            panic!("salted sessions are not supported");
        }
        if !auth_hash.is_supported_digest() {
            panic!("invalid digest algorithm for a session");
        }
        let symmetric = symmetric.unwrap_or(TpmtSymDef::Null);

        let digest_size = auth_hash.digest_size();
        let nonce_caller = crypto::random_bytes(digest_size);

        let tpm_key_ctx = self.null_handle_context();
        let bind_ctx = match bind {
            Some(b) => {
                b.assert_usable();
                b.clone()
            }
            None => self.null_handle_context(),
        };

        let mut cp = CommandBuffer::new();
        cp.put_sized_buffer(&nonce_caller)?;
        cp.put_sized_buffer(&[])?; // encryptedSalt
        cp.put_u8(session_type as u8);
        symmetric.marshal(&mut cp)?;
        cp.put_u16(auth_hash.to_u16());

        let handles = [HandleArg::Plain(&tpm_key_ctx), HandleArg::Plain(&bind_ctx)];
        let mut args = CommandArgs::new(&handles, cp.into_vec());
        args.response_handle = true;

        let resp = self.run_command(TpmCc::StartAuthSession, args)?;
        let handle = resp.handle.unwrap_or(Handle::UNASSIGNED);
        let nonce_tpm = resp.parse(|buf| buf.get_sized_buffer())?;

        let invalid = |reason: &str| Error::InvalidResponse {
            command: TpmCc::StartAuthSession,
            reason: reason.to_string(),
        };
        let expected_type = match session_type {
            TpmSe::Hmac => TpmHt::HmacSession,
            TpmSe::Policy | TpmSe::Trial => TpmHt::PolicySession,
        };
        if handle.handle_type() != Some(expected_type) {
            return Err(invalid("session handle of unexpected type"));
        }
        if nonce_tpm.len() != digest_size {
            return Err(invalid("session nonce of unexpected size"));
        }

        let bind_auth = bind.map(|b| b.auth_value());
        let session_key = derive_session_key(
            auth_hash,
            bind_auth.as_deref(),
            &nonce_tpm,
            &nonce_caller,
        );

        let data = SessionData {
            hash_alg: auth_hash,
            session_type,
            policy_hmac_type: PolicyHmacType::None,
            is_bound: bind.is_some(),
            bound_entity: bind.map(|b| b.name()).unwrap_or_else(Name::default),
            session_key,
            nonce_caller,
            nonce_tpm,
            symmetric,
            is_audit: false,
            is_exclusive: false,
        };
        let context = SessionContext::new(ContextData::session(handle, Some(data)));
        self.registry.track(context.inner.clone());
        debug!("started {session_type:?} session at {handle}");
        Ok(context)
    }

    /// TPM2_FlushContext for a transient object context.
    pub fn flush_context(&mut self, context: &ResourceContext) -> Result<()> {
        context.assert_usable();
        let mut cp = CommandBuffer::new();
        cp.put_u32(context.handle().0);
        self.run_command(TpmCc::FlushContext, CommandArgs::new(&[], cp.into_vec()))?
            .no_params()?;
        debug!("flushed context at {}", context.handle());
        self.registry.evict(&context.inner);
        Ok(())
    }

    /// TPM2_FlushContext for a session context (complete or incomplete).
    pub fn flush_session(&mut self, context: &SessionContext) -> Result<()> {
        context.assert_usable();
        let mut cp = CommandBuffer::new();
        cp.put_u32(context.handle().0);
        self.run_command(TpmCc::FlushContext, CommandArgs::new(&[], cp.into_vec()))?
            .no_params()?;
        debug!("flushed session at {}", context.handle());
        self.registry.evict(&context.inner);
        Ok(())
    }

    /// TPM2_PolicyPCR: gates the policy session on the current value of the
    /// selected PCRs. An empty `pcr_digest` lets the TPM compute it.
    pub fn policy_pcr(
        &mut self,
        policy_session: &SessionContext,
        pcr_digest: &[u8],
        pcrs: &TpmlPcrSelection,
        sessions: &[&Session],
    ) -> Result<()> {
        let mut cp = CommandBuffer::new();
        cp.put_sized_buffer(pcr_digest)?;
        pcrs.marshal(&mut cp)?;
        let handles = [HandleArg::Session(policy_session)];
        let mut args = CommandArgs::new(&handles, cp.into_vec());
        args.extra_sessions = sessions;
        args.first_param_sized = true;
        self.run_command(TpmCc::PolicyPcr, args)?.no_params()
    }

    /// TPM2_PolicyGetDigest: the session's current policy digest.
    pub fn policy_get_digest(
        &mut self,
        policy_session: &SessionContext,
        sessions: &[&Session],
    ) -> Result<Vec<u8>> {
        let handles = [HandleArg::Session(policy_session)];
        let mut args = CommandArgs::new(&handles, Vec::new());
        args.extra_sessions = sessions;
        args.first_response_param_sized = true;
        self.run_command(TpmCc::PolicyGetDigest, args)?
            .parse(|buf| buf.get_sized_buffer())
    }

    /// TPM2_PolicyAuthValue: the session will include the authorized
    /// entity's auth value in its HMAC key from now on.
    pub fn policy_auth_value(&mut self, policy_session: &SessionContext) -> Result<()> {
        let handles = [HandleArg::Session(policy_session)];
        self.run_command(TpmCc::PolicyAuthValue, CommandArgs::new(&handles, Vec::new()))?
            .no_params()?;
        set_policy_hmac_type(policy_session, PolicyHmacType::Auth);
        Ok(())
    }

    /// TPM2_PolicyPassword: the session will carry the authorized entity's
    /// auth value in cleartext, like a password authorization.
    pub fn policy_password(&mut self, policy_session: &SessionContext) -> Result<()> {
        let handles = [HandleArg::Session(policy_session)];
        self.run_command(TpmCc::PolicyPassword, CommandArgs::new(&handles, Vec::new()))?
            .no_params()?;
        set_policy_hmac_type(policy_session, PolicyHmacType::Password);
        Ok(())
    }
}

fn set_policy_hmac_type(session: &SessionContext, hmac_type: PolicyHmacType) {
    let mut data = session.data_mut();
    if let ContextPayload::Session(Some(d)) = &mut data.payload {
        d.policy_hmac_type = hmac_type;
    }
}
