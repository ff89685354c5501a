//! Legacy primitives behind MS-CHAPv2 (RFC 2759 Section 8)
//!
//! MD4, single DES and truncated SHA-1 are all broken or obsolete as general
//! purpose primitives. They exist here only because NPS speaks MS-CHAPv2 and
//! the protocol fixes them. Nothing outside the MS-CHAPv2 engine should call
//! into this module.
//!
//! Every function takes fixed-size arrays, so a wrong-length input is a
//! compile error rather than a runtime failure.

use des::Des;
use des::cipher::{BlockEncrypt, KeyInit, generic_array::GenericArray};
use md4::{Digest, Md4};
use sha1::Sha1;

/// NtPasswordHash: MD4 over the UTF-16LE encoding of the password
///
/// Unsalted and unkeyed. Anyone holding this value can authenticate as the
/// user, which is the inherited weakness of the NT credential format.
pub fn nt_hash(password: &str) -> [u8; 16] {
    let unicode: Vec<u8> = password
        .encode_utf16()
        .flat_map(|unit| unit.to_le_bytes())
        .collect();
    md4_digest(&unicode)
}

/// HashNtPasswordHash: MD4 of the NT hash, used for the authenticator response
pub fn hash_nt_hash(password_hash: &[u8; 16]) -> [u8; 16] {
    md4_digest(password_hash)
}

fn md4_digest(data: &[u8]) -> [u8; 16] {
    let digest = Md4::digest(data);
    let mut out = [0u8; 16];
    out.copy_from_slice(&digest);
    out
}

/// ChallengeHash: first 8 bytes of SHA-1(peer ∥ authenticator ∥ username)
///
/// The username is the bare account name as sent in User-Name, UTF-8 encoded.
pub fn challenge_hash(
    peer_challenge: &[u8; 16],
    auth_challenge: &[u8; 16],
    username: &str,
) -> [u8; 8] {
    let mut hasher = Sha1::new();
    hasher.update(peer_challenge);
    hasher.update(auth_challenge);
    hasher.update(username.as_bytes());
    let digest = hasher.finalize();

    let mut out = [0u8; 8];
    out.copy_from_slice(&digest[..8]);
    out
}

/// Spread 56 key bits over 8 bytes, 7 bits each, with the low bit of every
/// byte set so the byte has odd parity.
pub fn expand_des_key(key7: &[u8; 7]) -> [u8; 8] {
    let mut key8 = [
        key7[0],
        (key7[0] << 7) | (key7[1] >> 1),
        (key7[1] << 6) | (key7[2] >> 2),
        (key7[2] << 5) | (key7[3] >> 3),
        (key7[3] << 4) | (key7[4] >> 4),
        (key7[4] << 3) | (key7[5] >> 5),
        (key7[5] << 2) | (key7[6] >> 6),
        key7[6] << 1,
    ];

    for byte in &mut key8 {
        let high = *byte & 0xFE;
        let parity = !(high.count_ones() as u8) & 1;
        *byte = high | parity;
    }
    key8
}

/// DesEncrypt: one 8-byte block, ECB, no padding
pub fn des_encrypt_block(key7: &[u8; 7], data: &[u8; 8]) -> [u8; 8] {
    let key = expand_des_key(key7);
    let cipher = Des::new(GenericArray::from_slice(&key));
    let mut block = GenericArray::clone_from_slice(data);
    cipher.encrypt_block(&mut block);

    let mut out = [0u8; 8];
    out.copy_from_slice(&block);
    out
}

/// ChallengeResponse: DES the challenge under three keys cut from the
/// zero-padded 21-byte password hash
pub fn challenge_response(challenge: &[u8; 8], password_hash: &[u8; 16]) -> [u8; 24] {
    let mut padded = [0u8; 21];
    padded[..16].copy_from_slice(password_hash);

    let mut response = [0u8; 24];
    for (i, key) in padded.chunks_exact(7).enumerate() {
        let key: &[u8; 7] = key.try_into().expect("chunks_exact yields 7 bytes");
        response[i * 8..(i + 1) * 8].copy_from_slice(&des_encrypt_block(key, challenge));
    }
    response
}
