// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! HMAC session authorization against a transport that plays the TPM's
//! side of the protocol.

mod common;

use std::cell::RefCell;
use std::rc::Rc;

use common::{ok_response, queue, replay_tcti, Exchange, HmacExchange, TctiState};
use tpm2_client::{
    CommandBuffer, Error, Handle, SessionAttributes, SessionContext, TpmAlgId, TpmContext,
    TpmSe, TpmtPublic, TpmtSymDef,
};

/// Starts an unbound, unsalted SHA-256 HMAC session whose TPM nonce is
/// [0x77; 32]; the derived session key is empty.
fn start_hmac_session(
    tpm: &mut TpmContext,
    state: &Rc<RefCell<TctiState>>,
    symmetric: Option<TpmtSymDef>,
) -> SessionContext {
    let mut params = CommandBuffer::new();
    params.put_sized_buffer(&[0x77; 32]).unwrap();
    queue(
        state,
        Exchange::Canned(ok_response(Some(0x0200_0000), params.as_bytes())),
    );
    tpm.start_auth_session(None, None, TpmSe::Hmac, symmetric, TpmAlgId::Sha256)
        .unwrap()
}

fn sealed_object(tpm: &mut TpmContext, auth: &[u8]) -> tpm2_client::ResourceContext {
    let public = TpmtPublic::sealed_object(Vec::new());
    let object = tpm
        .object_context_from_public(Handle(0x8000_0003), &public)
        .unwrap();
    object.set_auth_value(auth);
    object
}

#[test]
fn hierarchy_change_auth_verifies_with_the_new_auth_value() {
    let (tcti, state) = replay_tcti();
    let mut tpm = TpmContext::new(Box::new(tcti));
    let session = start_hmac_session(&mut tpm, &state, None);

    let owner = tpm.owner_handle_context();
    owner.set_auth_value(b"old-pw");

    // The TPM keys its response HMAC with the new auth value.
    queue(
        &state,
        Exchange::Hmac(HmacExchange::new(b"new-pw", 1)),
    );
    let auth = session.with_attrs(
        SessionAttributes::new().with(SessionAttributes::CONTINUE_SESSION),
    );
    tpm.hierarchy_change_auth(&owner, b"new-pw", Some(&auth), &[])
        .unwrap();

    // The session survived and rotated to the responder's nonce.
    assert_eq!(session.handle(), Handle(0x0200_0000));
    assert_eq!(session.nonce_tpm(), vec![0x99; 32]);

    // The request carried a real HMAC entry: session handle, a 32-byte
    // nonce and a 32-byte HMAC.
    let request = state.borrow().requests.last().unwrap().clone();
    assert_eq!(&request[18..22], &[0x02, 0x00, 0x00, 0x00]);
    assert_eq!(&request[22..24], &[0x00, 0x20]);
    let attrs_at = 24 + 32;
    assert_eq!(request[attrs_at], 0x01); // continue-session
    assert_eq!(
        &request[attrs_at + 1..attrs_at + 3],
        &[0x00, 0x20] // 32-byte HMAC
    );
}

#[test]
fn session_without_continue_is_invalidated_after_use() {
    let (tcti, state) = replay_tcti();
    let mut tpm = TpmContext::new(Box::new(tcti));
    let session = start_hmac_session(&mut tpm, &state, None);
    let object = sealed_object(&mut tpm, b"item-pw");

    let mut exchange = HmacExchange::new(b"item-pw", 1);
    exchange.attrs = 0x00; // the TPM flushed the session
    let mut rp = CommandBuffer::new();
    rp.put_sized_buffer(b"secret!!").unwrap();
    exchange.rp_params = rp.into_vec();
    queue(&state, Exchange::Hmac(exchange));

    let auth = session.with_attrs(SessionAttributes::new());
    let data = tpm.unseal(&object, Some(&auth), &[]).unwrap();
    assert_eq!(data, b"secret!!");
    assert_eq!(session.handle(), Handle::UNASSIGNED);
}

#[test]
fn bad_response_hmac_invalidates_the_session() {
    let (tcti, state) = replay_tcti();
    let mut tpm = TpmContext::new(Box::new(tcti));
    let session = start_hmac_session(&mut tpm, &state, None);
    let object = sealed_object(&mut tpm, b"item-pw");

    let mut exchange = HmacExchange::new(b"item-pw", 1);
    let mut rp = CommandBuffer::new();
    rp.put_sized_buffer(b"secret!!").unwrap();
    exchange.rp_params = rp.into_vec();
    exchange.corrupt_hmac = true;
    queue(&state, Exchange::Hmac(exchange));

    let auth = session.with_attrs(
        SessionAttributes::new().with(SessionAttributes::CONTINUE_SESSION),
    );
    let err = tpm.unseal(&object, Some(&auth), &[]).unwrap_err();
    assert!(matches!(err, Error::InvalidResponse { .. }));
    assert_eq!(session.handle(), Handle::UNASSIGNED);
}

#[test]
fn encrypted_response_parameter_is_decrypted() {
    let (tcti, state) = replay_tcti();
    let mut tpm = TpmContext::new(Box::new(tcti));
    let session =
        start_hmac_session(&mut tpm, &state, Some(TpmtSymDef::xor(TpmAlgId::Sha256)));
    let object = sealed_object(&mut tpm, b"item-pw");

    let mut exchange = HmacExchange::new(b"item-pw", 1);
    let mut rp = CommandBuffer::new();
    rp.put_sized_buffer(b"secret!!").unwrap();
    exchange.rp_params = rp.into_vec();
    exchange.encrypt_first_param = true;
    queue(&state, Exchange::Hmac(exchange));

    let auth = session.with_attrs(
        SessionAttributes::new()
            .with(SessionAttributes::CONTINUE_SESSION)
            .with(SessionAttributes::RESPONSE_ENCRYPT),
    );
    let data = tpm.unseal(&object, Some(&auth), &[]).unwrap();
    assert_eq!(data, b"secret!!");
}
