// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! TPM 2.0 authorization protocol
//!
//! Builds the command authorization area for password, HMAC and policy
//! sessions, verifies response authorizations, rotates nonces and performs
//! parameter encryption. The registry effects of session use (flushing a
//! session without continue-session) are applied by the command pipeline.
//!
//! For each HMAC session:
//!
//! ```text
//! cpHash   = H(commandCode || name_1 || .. || name_n || cpBytes)
//! authHMAC = HMAC_H(K || authValue, cpHash || nonceCaller || nonceTPM || attrs)
//! ```
//!
//! where `authValue` is omitted for a session bound to the entity it is
//! authorizing, and a password session carries the cleartext value instead.

use super::constants::{Handle, SessionAttributes, TpmAlgId, TpmCc, TpmSe};
use super::crypto;
use super::errors::{Error, Result};
use super::resources::{ContextPayload, PolicyHmacType, ResourceContext, Session, SessionData};
use super::types::{TpmsAuthCommand, TpmsAuthResponse, TpmtSymDef};

/// One authorization slot of a command: either a password authorization
/// for `resource` (no session), a session authorizing `resource`, or an
/// extra session with no associated handle (encryption or audit only).
pub(crate) struct SessionParam {
    pub session: Option<Session>,
    pub resource: Option<ResourceContext>,
    /// Substituted authorization value for response verification, used by
    /// the commands that change the entity's auth value as a side effect.
    pub response_auth_value: Option<Vec<u8>>,
}

impl SessionParam {
    pub fn password(resource: &ResourceContext) -> Self {
        Self {
            session: None,
            resource: Some(resource.clone()),
            response_auth_value: None,
        }
    }

    pub fn auth_session(resource: &ResourceContext, session: &Session) -> Self {
        Self {
            session: Some(session.clone()),
            resource: Some(resource.clone()),
            response_auth_value: None,
        }
    }

    pub fn extra(session: &Session) -> Self {
        Self {
            session: Some(session.clone()),
            resource: None,
            response_auth_value: None,
        }
    }

    fn attrs(&self) -> SessionAttributes {
        self.session
            .as_ref()
            .map(|s| s.attrs)
            .unwrap_or_default()
    }

    /// Runs `f` over the session's shadow data.
    ///
    /// Panics if this param carries an incomplete session context; those
    /// can only be flushed, never used for authorization.
    fn with_session_data<R>(&self, f: impl FnOnce(&mut SessionData) -> R) -> R {
        let session = self
            .session
            .as_ref()
            .expect("password authorizations carry no session data");
        let mut data = session.context.data_mut();
        match &mut data.payload {
            ContextPayload::Session(Some(d)) => f(d),
            ContextPayload::Session(None) => {
                panic!("an incomplete session context cannot be used for authorization")
            }
            _ => unreachable!("session context with non-session payload"),
        }
    }

    fn auth_value(&self, response: bool) -> Vec<u8> {
        if response {
            if let Some(swapped) = &self.response_auth_value {
                return swapped.clone();
            }
        }
        self.resource
            .as_ref()
            .map(|r| r.auth_value())
            .unwrap_or_default()
    }

    /// The HMAC key: session key, then the entity's auth value unless the
    /// session is bound to that same entity or is a policy session without
    /// PolicyAuthValue.
    fn hmac_key(&self, d: &SessionData, response: bool) -> Vec<u8> {
        let mut key = d.session_key.clone();
        let include_auth = match (d.session_type, d.policy_hmac_type) {
            (TpmSe::Policy, PolicyHmacType::Auth) => true,
            (TpmSe::Policy, _) => false,
            (TpmSe::Trial, _) => false,
            _ => match &self.resource {
                None => false,
                Some(resource) => !(d.is_bound && d.bound_entity == resource.name()),
            },
        };
        if include_auth {
            key.extend_from_slice(&self.auth_value(response));
        }
        key
    }
}

/// A policy session after PolicyPassword authorizes like a password
/// session: cleartext auth value, no HMAC.
fn is_policy_password(d: &SessionData) -> bool {
    d.session_type == TpmSe::Policy && d.policy_hmac_type == PolicyHmacType::Password
}

pub(crate) fn cp_hash(alg: TpmAlgId, command: TpmCc, names: &[super::types::Name], cp_bytes: &[u8]) -> Vec<u8> {
    let cc = command.to_u32().to_be_bytes();
    let mut chunks: Vec<&[u8]> = vec![&cc];
    for name in names {
        chunks.push(name.as_bytes());
    }
    chunks.push(cp_bytes);
    crypto::digest(alg, &chunks)
}

pub(crate) fn rp_hash(alg: TpmAlgId, rc: u32, command: TpmCc, rp_bytes: &[u8]) -> Vec<u8> {
    crypto::digest(
        alg,
        &[
            &rc.to_be_bytes(),
            &command.to_u32().to_be_bytes(),
            rp_bytes,
        ],
    )
}

pub(crate) fn auth_hmac(
    alg: TpmAlgId,
    key: &[u8],
    p_hash: &[u8],
    nonce_newer: &[u8],
    nonce_older: &[u8],
    attrs: u8,
) -> Vec<u8> {
    crypto::hmac(alg, key, &[p_hash, nonce_newer, nonce_older, &[attrs]])
}

/// Builds the command authorization area. Fresh caller nonces are
/// generated for every real session first; if the leading session asks for
/// command encryption the first parameter of `cp_bytes` is encrypted in
/// place (it must be a sized buffer, `first_param_sized` is the facade's
/// assertion of that); cpHash and the per-session HMACs are computed over
/// the final parameter bytes.
pub(crate) fn build_auth_area(
    command: TpmCc,
    params: &mut [SessionParam],
    handle_names: &[super::types::Name],
    cp_bytes: &mut [u8],
    first_param_sized: bool,
) -> Result<Vec<TpmsAuthCommand>> {
    for p in params.iter() {
        if let Some(session) = &p.session {
            session.context.assert_usable();
            p.with_session_data(|d| {
                d.nonce_caller = crypto::random_bytes(d.hash_alg.digest_size());
            });
        }
    }

    if let Some(first) = params.first() {
        if first.attrs().contains(SessionAttributes::COMMAND_ENCRYPT) {
            if !first_param_sized {
                panic!("command encryption requires a sized buffer as the first parameter");
            }
            first.with_session_data(|d| apply_parameter_crypt(d, cp_bytes, true));
        }
    }

    let mut area = Vec::with_capacity(params.len());
    for p in params.iter() {
        match &p.session {
            None => {
                // Password authorization: cleartext auth value, no nonces.
                area.push(TpmsAuthCommand {
                    session_handle: Handle::PW,
                    nonce: Vec::new(),
                    attrs: p.attrs().to_wire(),
                    hmac: p.auth_value(false),
                });
            }
            Some(session) => {
                let attrs = p.attrs().to_wire();
                // Read the handle before the session data is borrowed.
                let session_handle = session.context.handle();
                let entry = p.with_session_data(|d| {
                    let hmac = if is_policy_password(d) {
                        p.auth_value(false)
                    } else {
                        let key = p.hmac_key(d, false);
                        let cp = cp_hash(d.hash_alg, command, handle_names, cp_bytes);
                        auth_hmac(d.hash_alg, &key, &cp, &d.nonce_caller, &d.nonce_tpm, attrs)
                    };
                    TpmsAuthCommand {
                        session_handle,
                        nonce: d.nonce_caller.clone(),
                        attrs,
                        hmac,
                    }
                });
                area.push(entry);
            }
        }
    }
    Ok(area)
}

/// Verifies the response authorization area, rotates TPM nonces and
/// decrypts the first response parameter when requested. On any mismatch
/// the caller must mark every session invalid and surface the error.
pub(crate) fn process_auth_responses(
    command: TpmCc,
    rc: u32,
    rp_bytes: &mut [u8],
    first_param_sized: bool,
    params: &mut [SessionParam],
    responses: &[TpmsAuthResponse],
) -> Result<()> {
    let invalid = |reason: &str| Error::InvalidResponse {
        command,
        reason: reason.to_string(),
    };

    if responses.len() != params.len() {
        return Err(invalid("wrong number of response auth entries"));
    }

    for (p, resp) in params.iter_mut().zip(responses) {
        match &p.session {
            None => {
                if !resp.nonce.is_empty() || !resp.hmac.is_empty() {
                    return Err(invalid("unexpected auth data for password session"));
                }
            }
            Some(_session) => {
                let command_attrs = p.attrs();
                let verified = p.with_session_data(|d| {
                    if resp.nonce.len() != d.hash_alg.digest_size() {
                        return Err(invalid("wrong response nonce size"));
                    }
                    d.nonce_tpm = resp.nonce.clone();
                    if command_attrs.to_wire() & super::constants::wire_session_attrs::AUDIT != 0 {
                        d.is_audit = true;
                    }
                    d.is_exclusive = d.is_audit
                        && resp.attrs & super::constants::wire_session_attrs::AUDIT_EXCLUSIVE != 0;

                    if is_policy_password(d) {
                        if !resp.hmac.is_empty() {
                            return Err(invalid("unexpected HMAC for password policy session"));
                        }
                        return Ok(());
                    }

                    let key = p.hmac_key(d, true);
                    let rp = rp_hash(d.hash_alg, rc, command, rp_bytes);
                    let expected =
                        auth_hmac(d.hash_alg, &key, &rp, &d.nonce_tpm, &d.nonce_caller, resp.attrs);
                    if expected != resp.hmac {
                        return Err(invalid("invalid response auth HMAC"));
                    }
                    Ok(())
                });
                verified?;
            }
        }
    }

    if let Some(first) = params.first() {
        if first.attrs().contains(SessionAttributes::RESPONSE_ENCRYPT) {
            if !first_param_sized {
                panic!("response decryption requires a sized buffer as the first parameter");
            }
            first.with_session_data(|d| apply_parameter_crypt(d, rp_bytes, false));
        }
    }

    Ok(())
}

/// Encrypts or decrypts the data portion of the leading sized buffer in
/// `param_bytes`. For the command direction the newer nonce is the
/// caller's, for the response direction it is the TPM's.
fn apply_parameter_crypt(d: &mut SessionData, param_bytes: &mut [u8], command: bool) {
    if param_bytes.len() < 2 {
        panic!("parameter area too short for a sized buffer");
    }
    let len = u16::from_be_bytes([param_bytes[0], param_bytes[1]]) as usize;
    if 2 + len > param_bytes.len() {
        panic!("first parameter is not a sized buffer");
    }
    let data = &mut param_bytes[2..2 + len];

    let (nonce_newer, nonce_older) = if command {
        (d.nonce_caller.clone(), d.nonce_tpm.clone())
    } else {
        (d.nonce_tpm.clone(), d.nonce_caller.clone())
    };

    match d.symmetric {
        TpmtSymDef::Null => panic!("session has no symmetric algorithm for parameter encryption"),
        TpmtSymDef::Xor(hash) => {
            let mask = crypto::kdf_a(
                hash,
                &d.session_key,
                b"XOR",
                &nonce_newer,
                &nonce_older,
                data.len(),
            );
            for (b, m) in data.iter_mut().zip(mask) {
                *b ^= m;
            }
        }
        TpmtSymDef::Cipher {
            algorithm,
            key_bits,
            ..
        } => {
            let key_bytes = key_bits as usize / 8;
            let block = crypto::symmetric_block_size(algorithm);
            let bits = crypto::kdf_a(
                d.hash_alg,
                &d.session_key,
                b"CFB",
                &nonce_newer,
                &nonce_older,
                key_bytes + block,
            );
            crypto::symmetric_cfb(
                algorithm,
                &bits[..key_bytes],
                &bits[key_bytes..],
                data,
                command,
            );
        }
    }
}

/// Derives the session key at StartAuthSession time. Unbound (and
/// unsalted) sessions have an empty session key; bound sessions derive it
/// from the bind entity's auth value and both initial nonces.
pub(crate) fn derive_session_key(
    hash_alg: TpmAlgId,
    bind_auth: Option<&[u8]>,
    nonce_tpm: &[u8],
    nonce_caller: &[u8],
) -> Vec<u8> {
    match bind_auth {
        None => Vec::new(),
        Some(auth) => crypto::kdf_a(
            hash_alg,
            auth,
            b"ATH",
            nonce_tpm,
            nonce_caller,
            hash_alg.digest_size(),
        ),
    }
}
