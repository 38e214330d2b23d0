// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! An in-memory transport for driving TpmContext without hardware.
//!
//! Each queued exchange answers one command: either a canned byte string,
//! or a computed HMAC-session response that plays the TPM's side of the
//! authorization protocol (SHA-256, single auth session).

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::io;
use std::rc::Rc;

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};
use tpm2_client::{CommandBuffer, Tcti};

/// One computed HMAC-session response.
pub struct HmacExchange {
    /// Key material for the response HMAC. For the unbound, unsalted
    /// sessions used in tests the session key is empty, so this is the
    /// entity's (possibly post-command) auth value.
    pub auth_key: Vec<u8>,
    pub nonce_tpm: Vec<u8>,
    /// Session attribute byte echoed in the response.
    pub attrs: u8,
    /// Number of handles in the command being answered.
    pub handle_count: usize,
    pub response_handle: Option<u32>,
    pub rp_params: Vec<u8>,
    /// XOR-mask the data of the leading sized buffer in `rp_params` with
    /// the session's KDFa stream (empty session key), as a TPM performing
    /// response parameter encryption would.
    pub encrypt_first_param: bool,
    pub corrupt_hmac: bool,
}

/// Single-block TCG KDFa with SHA-256 as the PRF.
pub fn kdfa_sha256(key: &[u8], label: &[u8], context_u: &[u8], context_v: &[u8], len: usize) -> Vec<u8> {
    assert!(len <= 32);
    let mut mac = Hmac::<Sha256>::new_from_slice(key).unwrap();
    mac.update(&1u32.to_be_bytes());
    mac.update(label);
    mac.update(&[0u8]);
    mac.update(context_u);
    mac.update(context_v);
    mac.update(&((len as u32) * 8).to_be_bytes());
    mac.finalize().into_bytes()[..len].to_vec()
}

impl HmacExchange {
    pub fn new(auth_key: &[u8], handle_count: usize) -> Self {
        Self {
            auth_key: auth_key.to_vec(),
            nonce_tpm: vec![0x99; 32],
            attrs: 0x01,
            handle_count,
            response_handle: None,
            rp_params: Vec::new(),
            encrypt_first_param: false,
            corrupt_hmac: false,
        }
    }

    fn respond(&self, request: &[u8]) -> Vec<u8> {
        let cc = u32::from_be_bytes(request[6..10].try_into().unwrap());
        // Skip header, handles, authorizationSize and sessionHandle to
        // reach the caller nonce.
        let at = 10 + 4 * self.handle_count + 4 + 4;
        let nonce_len = u16::from_be_bytes(request[at..at + 2].try_into().unwrap()) as usize;
        let nonce_caller = request[at + 2..at + 2 + nonce_len].to_vec();

        let mut rp_params = self.rp_params.clone();
        if self.encrypt_first_param {
            let data_len = u16::from_be_bytes(rp_params[0..2].try_into().unwrap()) as usize;
            let mask = kdfa_sha256(&[], b"XOR", &self.nonce_tpm, &nonce_caller, data_len);
            for (b, m) in rp_params[2..2 + data_len].iter_mut().zip(mask) {
                *b ^= m;
            }
        }

        let mut rp_hash = Sha256::new();
        rp_hash.update(0u32.to_be_bytes());
        rp_hash.update(cc.to_be_bytes());
        rp_hash.update(&rp_params);
        let rp_hash = rp_hash.finalize();

        let mut mac = Hmac::<Sha256>::new_from_slice(&self.auth_key).unwrap();
        mac.update(&rp_hash);
        mac.update(&self.nonce_tpm);
        mac.update(&nonce_caller);
        mac.update(&[self.attrs]);
        let mut hmac = mac.finalize().into_bytes().to_vec();
        if self.corrupt_hmac {
            hmac[0] ^= 0xff;
        }

        let mut buf = CommandBuffer::new();
        buf.put_u16(0x8002);
        buf.put_u32(0);
        buf.put_u32(0);
        if let Some(h) = self.response_handle {
            buf.put_u32(h);
        }
        buf.put_u32(rp_params.len() as u32);
        buf.put_bytes(&rp_params);
        buf.put_sized_buffer(&self.nonce_tpm).unwrap();
        buf.put_u8(self.attrs);
        buf.put_sized_buffer(&hmac).unwrap();
        let size = buf.len() as u32;
        buf.update_u32(2, size);
        buf.into_vec()
    }
}

pub enum Exchange {
    Canned(Vec<u8>),
    Hmac(HmacExchange),
}

#[derive(Default)]
pub struct TctiState {
    pub requests: Vec<Vec<u8>>,
    pub queue: VecDeque<Exchange>,
    pending: Option<Vec<u8>>,
}

/// The transport half handed to TpmContext; the state stays with the test.
pub struct ReplayTcti(Rc<RefCell<TctiState>>);

impl Tcti for ReplayTcti {
    fn write(&mut self, buf: &[u8]) -> io::Result<()> {
        let mut state = self.0.borrow_mut();
        state.requests.push(buf.to_vec());
        let exchange = state
            .queue
            .pop_front()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no queued exchange"))?;
        state.pending = Some(match exchange {
            Exchange::Canned(bytes) => bytes,
            Exchange::Hmac(hmac) => hmac.respond(buf),
        });
        Ok(())
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let response = self
            .0
            .borrow_mut()
            .pending
            .take()
            .ok_or_else(|| io::Error::new(io::ErrorKind::UnexpectedEof, "no pending response"))?;
        buf[..response.len()].copy_from_slice(&response);
        Ok(response.len())
    }

    fn close(&mut self) -> io::Result<()> {
        Ok(())
    }
}

/// Creates the transport and the shared state used to queue exchanges and
/// inspect requests.
pub fn replay_tcti() -> (ReplayTcti, Rc<RefCell<TctiState>>) {
    let state = Rc::new(RefCell::new(TctiState::default()));
    (ReplayTcti(state.clone()), state)
}

pub fn queue(state: &Rc<RefCell<TctiState>>, exchange: Exchange) {
    state.borrow_mut().queue.push_back(exchange);
}

/// A successful response without sessions.
pub fn ok_response(handle: Option<u32>, params: &[u8]) -> Vec<u8> {
    let mut buf = CommandBuffer::new();
    buf.put_u16(0x8001);
    buf.put_u32(0);
    buf.put_u32(0); // TPM_RC_SUCCESS
    if let Some(h) = handle {
        buf.put_u32(h);
    }
    buf.put_bytes(params);
    let size = buf.len() as u32;
    buf.update_u32(2, size);
    buf.into_vec()
}

/// A successful response with `sessions` password-style auth entries
/// (empty nonce, continue-session, empty HMAC).
pub fn ok_response_with_sessions(handle: Option<u32>, params: &[u8], sessions: usize) -> Vec<u8> {
    let mut buf = CommandBuffer::new();
    buf.put_u16(0x8002);
    buf.put_u32(0);
    buf.put_u32(0);
    if let Some(h) = handle {
        buf.put_u32(h);
    }
    buf.put_u32(params.len() as u32);
    buf.put_bytes(params);
    for _ in 0..sessions {
        buf.put_u16(0); // nonce
        buf.put_u8(0x01); // continue-session
        buf.put_u16(0); // hmac
    }
    let size = buf.len() as u32;
    buf.update_u32(2, size);
    buf.into_vec()
}

/// An error response.
pub fn error_response(rc: u32) -> Vec<u8> {
    let mut buf = CommandBuffer::new();
    buf.put_u16(0x8001);
    buf.put_u32(10);
    buf.put_u32(rc);
    buf.into_vec()
}
