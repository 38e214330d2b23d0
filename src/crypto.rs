// SPDX-FileCopyrightText: © 2025 Phala Network <dstack@phala.network>
//
// SPDX-License-Identifier: Apache-2.0

//! Cryptographic capability provider
//!
//! Hashing, HMAC, the TCG KDFa construction, CFB parameter encryption and
//! nonce generation. Asymmetric operations are intentionally absent; the
//! session protocol only ever needs the primitives below.

use aes::{Aes128, Aes192, Aes256};
use camellia::{Camellia128, Camellia192, Camellia256};
use cfb_mode::{Decryptor, Encryptor};
use cipher::{AsyncStreamCipher, KeyIvInit};
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha1::Sha1;
use sha2::{Digest, Sha256, Sha384, Sha512};
use sm4::Sm4;

use super::constants::TpmAlgId;

/// Digest over a sequence of chunks.
///
/// Panics if `alg` is not a supported digest algorithm; callers validate
/// algorithms before reaching this point.
pub(crate) fn digest(alg: TpmAlgId, chunks: &[&[u8]]) -> Vec<u8> {
    fn run<D: Digest>(chunks: &[&[u8]]) -> Vec<u8> {
        let mut h = D::new();
        for chunk in chunks {
            h.update(chunk);
        }
        h.finalize().to_vec()
    }

    match alg {
        TpmAlgId::Sha1 => run::<Sha1>(chunks),
        TpmAlgId::Sha256 => run::<Sha256>(chunks),
        TpmAlgId::Sha384 => run::<Sha384>(chunks),
        TpmAlgId::Sha512 => run::<Sha512>(chunks),
        other => panic!("not a supported digest algorithm: {other:?}"),
    }
}

/// Keyed HMAC over a sequence of chunks.
pub(crate) fn hmac(alg: TpmAlgId, key: &[u8], chunks: &[&[u8]]) -> Vec<u8> {
    macro_rules! run {
        ($hash:ty) => {{
            let mut mac =
                Hmac::<$hash>::new_from_slice(key).expect("hmac accepts keys of any length");
            for chunk in chunks {
                mac.update(chunk);
            }
            mac.finalize().into_bytes().to_vec()
        }};
    }

    match alg {
        TpmAlgId::Sha1 => run!(Sha1),
        TpmAlgId::Sha256 => run!(Sha256),
        TpmAlgId::Sha384 => run!(Sha384),
        TpmAlgId::Sha512 => run!(Sha512),
        other => panic!("not a supported digest algorithm: {other:?}"),
    }
}

/// TCG KDFa (SP800-108 counter mode with HMAC as the PRF).
///
/// `label` is appended with a terminating zero byte; `context_u` and
/// `context_v` are the two nonces. Returns `out_len` bytes.
pub(crate) fn kdf_a(
    alg: TpmAlgId,
    key: &[u8],
    label: &[u8],
    context_u: &[u8],
    context_v: &[u8],
    out_len: usize,
) -> Vec<u8> {
    let bits = (out_len as u32) * 8;
    let mut out = Vec::with_capacity(out_len);
    let mut counter: u32 = 0;
    while out.len() < out_len {
        counter += 1;
        let block = hmac(
            alg,
            key,
            &[
                &counter.to_be_bytes(),
                label,
                &[0u8],
                context_u,
                context_v,
                &bits.to_be_bytes(),
            ],
        );
        out.extend_from_slice(&block);
    }
    out.truncate(out_len);
    out
}

/// In-place CFB-mode encryption/decryption for the session symmetric
/// algorithms. Panics on an algorithm/key-size combination that session
/// consistency checking would have rejected.
pub(crate) fn symmetric_cfb(
    alg: TpmAlgId,
    key: &[u8],
    iv: &[u8],
    data: &mut [u8],
    encrypt: bool,
) {
    macro_rules! apply {
        ($cipher:ty) => {{
            if encrypt {
                Encryptor::<$cipher>::new_from_slices(key, iv)
                    .expect("key and IV sizes checked by the caller")
                    .encrypt(data);
            } else {
                Decryptor::<$cipher>::new_from_slices(key, iv)
                    .expect("key and IV sizes checked by the caller")
                    .decrypt(data);
            }
        }};
    }

    match (alg, key.len() * 8) {
        (TpmAlgId::Aes, 128) => apply!(Aes128),
        (TpmAlgId::Aes, 192) => apply!(Aes192),
        (TpmAlgId::Aes, 256) => apply!(Aes256),
        (TpmAlgId::Sm4, 128) => apply!(Sm4),
        (TpmAlgId::Camellia, 128) => apply!(Camellia128),
        (TpmAlgId::Camellia, 192) => apply!(Camellia192),
        (TpmAlgId::Camellia, 256) => apply!(Camellia256),
        (alg, bits) => panic!("unsupported symmetric algorithm {alg:?} with {bits} key bits"),
    }
}

/// Block size in bytes of a session symmetric algorithm.
pub(crate) fn symmetric_block_size(alg: TpmAlgId) -> usize {
    match alg {
        TpmAlgId::Aes | TpmAlgId::Sm4 | TpmAlgId::Camellia => 16,
        other => panic!("unsupported symmetric algorithm {other:?}"),
    }
}

/// Fresh random bytes from the operating system.
pub(crate) fn random_bytes(n: usize) -> Vec<u8> {
    let mut buf = vec![0u8; n];
    OsRng.fill_bytes(&mut buf);
    buf
}

/// A TPM name: the name algorithm id followed by the digest of the public
/// area in that algorithm.
pub(crate) fn make_name(alg: TpmAlgId, public_area: &[u8]) -> Vec<u8> {
    let mut name = alg.to_u16().to_be_bytes().to_vec();
    name.extend_from_slice(&digest(alg, &[public_area]));
    name
}
