// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Resource context construction, persistence and eviction.

mod common;

use common::{error_response, ok_response, ok_response_with_sessions, queue, replay_tcti, Exchange};
use tpm2_client::{
    CommandBuffer, Error, Handle, HandleContext, Marshal, TpmContext, TpmaNv, TpmsNvPublic,
    TpmtPublic, TpmuPublicId,
};

fn transient_public() -> TpmtPublic {
    let mut public = TpmtPublic::rsa_storage_key();
    public.unique = TpmuPublicId::Rsa(vec![0xC4; 256]);
    public
}

#[test]
fn nv_context_from_tpm_cross_checks_name_and_index() {
    let public = TpmsNvPublic::new(
        Handle(0x0150_0000),
        8,
        TpmaNv::new().with(TpmaNv::OWNER_READ).with(TpmaNv::OWNER_WRITE),
    );
    let name = public.name().unwrap();

    let mut params = CommandBuffer::new();
    params.put_sized(Some(&public)).unwrap();
    name.marshal(&mut params).unwrap();

    let (tcti, state) = replay_tcti();
    queue(&state, Exchange::Canned(ok_response(None, params.as_bytes())));

    let mut tpm = TpmContext::new(Box::new(tcti));
    let nv = tpm
        .create_resource_context_from_tpm(Handle(0x0150_0000), &[])
        .unwrap();
    assert_eq!(nv.handle(), Handle(0x0150_0000));
    assert_eq!(nv.name(), name);
}

#[test]
fn nv_context_from_tpm_rejects_forged_name() {
    let public = TpmsNvPublic::new(Handle(0x0150_0000), 8, TpmaNv::new());
    let mut params = CommandBuffer::new();
    params.put_sized(Some(&public)).unwrap();
    params.put_sized_buffer(&[0x00, 0x0B, 0xba, 0xad]).unwrap();

    let (tcti, state) = replay_tcti();
    queue(&state, Exchange::Canned(ok_response(None, params.as_bytes())));

    let mut tpm = TpmContext::new(Box::new(tcti));
    let err = tpm
        .create_resource_context_from_tpm(Handle(0x0150_0000), &[])
        .unwrap_err();
    assert!(matches!(err, Error::InvalidResponse { .. }));
}

#[test]
fn unavailable_resource_maps_reference_warning() {
    let (tcti, state) = replay_tcti();
    // TPM_RC_REFERENCE_H0: warning 0x10.
    queue(&state, Exchange::Canned(error_response(0x0000_0910)));

    let mut tpm = TpmContext::new(Box::new(tcti));
    let err = tpm
        .create_resource_context_from_tpm(Handle(0x8000_0007), &[])
        .unwrap_err();
    assert!(matches!(
        err,
        Error::ResourceUnavailable { handle: Handle(0x8000_0007) }
    ));
}

#[test]
#[should_panic(expected = "invalid handle type")]
fn from_tpm_lookup_of_a_permanent_handle_panics() {
    let (tcti, _state) = replay_tcti();
    let mut tpm = TpmContext::new(Box::new(tcti));
    let _ = tpm.create_resource_context_from_tpm(Handle::OWNER, &[]);
}

#[test]
fn serialized_context_restores_through_the_registry() {
    let (tcti, _state) = replay_tcti();
    let mut tpm = TpmContext::new(Box::new(tcti));

    let object = tpm
        .object_context_from_public(Handle(0x8000_0001), &transient_public())
        .unwrap();
    object.set_auth_value(b"secret");
    let blob = object.serialize().unwrap();

    let restored = match tpm.context_from_bytes(&blob).unwrap() {
        HandleContext::Resource(ctx) => ctx,
        HandleContext::Session(_) => panic!("expected a resource context"),
    };
    assert_eq!(restored.handle(), object.handle());
    assert_eq!(restored.name(), object.name());
}

#[test]
fn restore_rejects_a_corrupted_blob() {
    let (tcti, _state) = replay_tcti();
    let mut tpm = TpmContext::new(Box::new(tcti));

    let object = tpm
        .object_context_from_public(Handle(0x8000_0001), &transient_public())
        .unwrap();
    let mut blob = object.serialize().unwrap();
    let last = blob.len() - 1;
    blob[last] ^= 0x01;
    let err = tpm.context_from_bytes(&blob).unwrap_err();
    assert!(matches!(err, Error::InvalidContextData(_)));
}

#[test]
fn evict_control_persists_a_transient_object() {
    let (tcti, state) = replay_tcti();
    queue(
        &state,
        Exchange::Canned(ok_response_with_sessions(None, &[], 1)),
    );

    let mut tpm = TpmContext::new(Box::new(tcti));
    let owner = tpm.owner_handle_context();
    let transient = tpm
        .object_context_from_public(Handle(0x8000_0001), &transient_public())
        .unwrap();
    transient.set_auth_value(b"object-pw");

    let persistent = tpm
        .evict_control(&owner, &transient, Handle(0x8100_0010), None)
        .unwrap()
        .expect("persisting returns the new context");
    assert_eq!(persistent.handle(), Handle(0x8100_0010));
    assert_eq!(persistent.name(), transient.name());
    // The transient object itself stays loaded and usable.
    assert_eq!(transient.handle(), Handle(0x8000_0001));
}

#[test]
fn evict_control_removes_a_persistent_object() {
    let (tcti, state) = replay_tcti();
    queue(
        &state,
        Exchange::Canned(ok_response_with_sessions(None, &[], 1)),
    );

    let mut tpm = TpmContext::new(Box::new(tcti));
    let owner = tpm.owner_handle_context();
    let persistent = tpm
        .object_context_from_public(Handle(0x8100_0010), &transient_public())
        .unwrap();

    let removed = tpm
        .evict_control(&owner, &persistent, Handle(0x8100_0010), None)
        .unwrap();
    assert!(removed.is_none());
    assert_eq!(persistent.handle(), Handle::UNASSIGNED);
}

#[test]
fn forget_resource_force_invalidates_by_handle() {
    let (tcti, _state) = replay_tcti();
    let mut tpm = TpmContext::new(Box::new(tcti));
    let object = tpm
        .object_context_from_public(Handle(0x8000_0001), &transient_public())
        .unwrap();

    assert!(tpm.forget_resource(Handle(0x8000_0001)));
    assert_eq!(object.handle(), Handle::UNASSIGNED);
    assert!(!tpm.forget_resource(Handle(0x8000_0001)));
}
