// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! The TPM connection and its command pipeline
//!
//! [`TpmContext`] owns the transport and the registry of live resource
//! contexts. Every command goes through [`TpmContext::run_command`], which
//! assembles the handle, authorization and parameter areas, performs the
//! transport round-trip, decodes the response code, verifies response
//! authorizations and hands the (decrypted) response parameters back to
//! the per-command facade.
//!
//! One TPM executes one command at a time; a `TpmContext` assumes
//! exclusive ownership of its transport and is not internally
//! synchronized. Callers that share one instance across threads must
//! serialize externally.

use super::constants::{Handle, SessionAttributes, TpmCc, TpmSt};
use super::device::{Tcti, TpmDevice, MAX_COMMAND_SIZE};
use super::errors::{decode_response_code, Error, Result};
use super::marshal::{CommandBuffer, Marshal, ResponseBuffer, Unmarshal, UnmarshalError};
use super::resources::{Registry, ResourceContext, Session, SessionContext};
use super::session::{build_auth_area, process_auth_responses, SessionParam};
use super::types::{Name, TpmsAuthResponse};

/// A command handle slot: with or without an authorization role.
pub(crate) enum HandleArg<'a> {
    /// A handle that requires no authorization.
    Plain(&'a ResourceContext),
    /// A session handle appearing in the handle area without an
    /// authorization role (the policy commands).
    Session(&'a SessionContext),
    /// A handle authorized by `1`, or by a password session using the
    /// context's auth value when `1` is `None`.
    Auth(&'a ResourceContext, Option<&'a Session>),
}

impl HandleArg<'_> {
    fn handle(&self) -> Handle {
        match self {
            HandleArg::Plain(r) | HandleArg::Auth(r, _) => r.handle(),
            HandleArg::Session(s) => s.handle(),
        }
    }

    fn name(&self) -> Name {
        match self {
            HandleArg::Plain(r) | HandleArg::Auth(r, _) => r.name(),
            HandleArg::Session(s) => s.name(),
        }
    }

    fn assert_usable(&self) {
        match self {
            HandleArg::Plain(r) | HandleArg::Auth(r, _) => r.assert_usable(),
            HandleArg::Session(s) => s.assert_usable(),
        }
    }
}

/// Everything a facade function passes to the pipeline.
pub(crate) struct CommandArgs<'a> {
    pub handles: &'a [HandleArg<'a>],
    pub params: Vec<u8>,
    /// Sessions beyond the authorization roles (audit, encryption).
    pub extra_sessions: &'a [&'a Session],
    /// Facade's assertion that the first command parameter is a sized
    /// buffer and therefore encryptable.
    pub first_param_sized: bool,
    /// Likewise for the first response parameter.
    pub first_response_param_sized: bool,
    /// Whether the response carries a handle before the parameter area.
    pub response_handle: bool,
    /// Substituted auth value for the first authorization when the command
    /// changes the entity's auth value as a side effect.
    pub session0_response_auth: Option<Vec<u8>>,
}

impl<'a> CommandArgs<'a> {
    pub fn new(handles: &'a [HandleArg<'a>], params: Vec<u8>) -> Self {
        Self {
            handles,
            params,
            extra_sessions: &[],
            first_param_sized: false,
            first_response_param_sized: false,
            response_handle: false,
            session0_response_auth: None,
        }
    }
}

/// The parsed, verified and decrypted result of a successful command.
pub(crate) struct CommandResponse {
    command: TpmCc,
    pub handle: Option<Handle>,
    params: Vec<u8>,
}

impl CommandResponse {
    /// Parses the response parameter area; the closure must consume it
    /// exactly. Codec failures surface as [`Error::InvalidResponse`].
    pub fn parse<T>(
        self,
        f: impl FnOnce(&mut ResponseBuffer<'_>) -> std::result::Result<T, UnmarshalError>,
    ) -> Result<T> {
        let command = self.command;
        let mut buf = ResponseBuffer::new(&self.params);
        let value = f(&mut buf).map_err(|e| Error::InvalidResponse {
            command,
            reason: e.to_string(),
        })?;
        buf.finish().map_err(|e| Error::InvalidResponse {
            command,
            reason: e.to_string(),
        })?;
        Ok(value)
    }

    /// Asserts an empty response parameter area.
    pub fn no_params(self) -> Result<()> {
        self.parse(|_| Ok(()))
    }
}

/// A connection to a TPM and the host-side state of every entity the
/// application holds on it.
pub struct TpmContext {
    pub(crate) tcti: Box<dyn Tcti>,
    pub(crate) registry: Registry,
}

impl TpmContext {
    /// Wraps an already-open transport.
    pub fn new(tcti: Box<dyn Tcti>) -> Self {
        Self {
            tcti,
            registry: Registry::default(),
        }
    }

    /// Opens the TPM character device at `path`, or auto-detects one.
    pub fn open(path: Option<&str>) -> Result<Self> {
        let device = match path {
            Some(p) => TpmDevice::open(p)?,
            None => TpmDevice::detect()?,
        };
        Ok(Self::new(Box::new(device)))
    }

    /// Closes the transport. Contexts in the registry are dropped with the
    /// connection.
    pub fn close(mut self) -> Result<()> {
        self.tcti
            .close()
            .map_err(|source| Error::Transport { op: "close", source })
    }

    fn assemble_session_params(args: &CommandArgs<'_>) -> Vec<SessionParam> {
        let mut params = Vec::new();
        for handle in args.handles {
            if let HandleArg::Auth(resource, session) = handle {
                params.push(match session {
                    None => SessionParam::password(resource),
                    Some(session) => SessionParam::auth_session(resource, session),
                });
            }
        }
        for session in args.extra_sessions {
            params.push(SessionParam::extra(session));
        }
        params
    }

    fn mark_sessions_invalid(&mut self, params: &[SessionParam]) {
        for p in params {
            if let Some(session) = &p.session {
                self.registry.evict(&session.context.inner);
            }
        }
    }

    /// Runs one command round-trip.
    pub(crate) fn run_command(
        &mut self,
        command: TpmCc,
        mut args: CommandArgs<'_>,
    ) -> Result<CommandResponse> {
        // Refuse invalidated contexts before any I/O.
        for handle in args.handles {
            handle.assert_usable();
        }

        let names: Vec<Name> = args.handles.iter().map(|h| h.name()).collect();

        let mut ch_bytes = CommandBuffer::new();
        for handle in args.handles {
            ch_bytes.put_u32(handle.handle().0);
        }

        let mut session_params = Self::assemble_session_params(&args);
        if let Some(auth) = args.session0_response_auth.take() {
            if let Some(first) = session_params.first_mut() {
                first.response_auth_value = Some(auth);
            }
        }

        let tag = if session_params.is_empty() {
            TpmSt::NoSessions
        } else {
            TpmSt::Sessions
        };

        let mut request = CommandBuffer::with_capacity(64 + args.params.len());
        request.put_u16(tag.to_u16());
        request.put_u32(0); // patched below
        request.put_u32(command.to_u32());
        request.put_bytes(ch_bytes.as_bytes());

        if !session_params.is_empty() {
            let auth_area = build_auth_area(
                command,
                &mut session_params,
                &names,
                &mut args.params,
                args.first_param_sized,
            )?;
            let mut ca_bytes = CommandBuffer::new();
            for entry in &auth_area {
                entry.marshal(&mut ca_bytes)?;
            }
            request.put_u32(ca_bytes.len() as u32);
            request.put_bytes(ca_bytes.as_bytes());
        }

        request.put_bytes(&args.params);
        let size = request.len() as u32;
        request.update_u32(2, size);

        if let Err(source) = self.tcti.write(request.as_bytes()) {
            return Err(Error::Transport { op: "write", source });
        }

        let mut response = vec![0u8; MAX_COMMAND_SIZE];
        let n = match self.tcti.read(&mut response) {
            Ok(n) => n,
            Err(source) => {
                // A response may have been half-consumed; nothing about
                // these sessions can be trusted any more.
                self.mark_sessions_invalid(&session_params);
                return Err(Error::Transport { op: "read", source });
            }
        };
        response.truncate(n);

        let outcome = self.process_response(command, &args, &mut session_params, &response);
        if matches!(outcome, Err(Error::InvalidResponse { .. })) {
            self.mark_sessions_invalid(&session_params);
        }
        let resp = outcome?;

        // The TPM flushes sessions used without continue-session; drop the
        // host-side contexts to match.
        for p in &session_params {
            if let Some(session) = &p.session {
                if !session.attrs.contains(SessionAttributes::CONTINUE_SESSION) {
                    self.registry.evict(&session.context.inner);
                }
            }
        }

        Ok(resp)
    }

    fn process_response(
        &mut self,
        command: TpmCc,
        args: &CommandArgs<'_>,
        session_params: &mut [SessionParam],
        response: &[u8],
    ) -> Result<CommandResponse> {
        let invalid = |reason: &str| Error::InvalidResponse {
            command,
            reason: reason.to_string(),
        };

        if response.len() < 10 {
            return Err(invalid("response shorter than the header"));
        }
        let mut buf = ResponseBuffer::new(response);
        let tag_raw = buf.get_u16().map_err(|e| invalid(&e.to_string()))?;
        let tag = TpmSt::from_u16(tag_raw)
            .ok_or_else(|| invalid(&format!("invalid response tag 0x{tag_raw:04x}")))?;
        let size = buf.get_u32().map_err(|e| invalid(&e.to_string()))? as usize;
        let rc = buf.get_u32().map_err(|e| invalid(&e.to_string()))?;

        if size < 10 || size > response.len() {
            return Err(invalid("response size field inconsistent with payload"));
        }

        // A TPM error carries no response sessions and leaves the attached
        // sessions untouched on both sides.
        decode_response_code(command, rc)?;

        let expected_tag = if session_params.is_empty() {
            TpmSt::NoSessions
        } else {
            TpmSt::Sessions
        };
        if tag != expected_tag {
            return Err(invalid("response tag does not match the command tag"));
        }

        let mut body = ResponseBuffer::new(&response[10..size]);

        let handle = if args.response_handle {
            Some(Handle(
                body.get_u32().map_err(|e| invalid(&e.to_string()))?,
            ))
        } else {
            None
        };

        let mut rp_bytes;
        if tag == TpmSt::Sessions {
            let param_size = body.get_u32().map_err(|e| invalid(&e.to_string()))? as usize;
            let mut region = body
                .get_region(param_size)
                .map_err(|e| invalid(&e.to_string()))?;
            rp_bytes = region.get_remaining();

            let mut auth_responses: Vec<TpmsAuthResponse> =
                Vec::with_capacity(session_params.len());
            for _ in 0..session_params.len() {
                auth_responses
                    .push(TpmsAuthResponse::unmarshal(&mut body).map_err(|e| invalid(&e.to_string()))?);
            }
            body.finish().map_err(|e| invalid(&e.to_string()))?;

            process_auth_responses(
                command,
                rc,
                &mut rp_bytes,
                args.first_response_param_sized,
                session_params,
                &auth_responses,
            )?;
        } else {
            rp_bytes = body.get_remaining();
        }

        Ok(CommandResponse {
            command,
            handle,
            params: rp_bytes,
        })
    }
}
