//! Key derivations used by full and quick verify.
//!
//! Every derived value is HMAC-SHA256 keyed by the session secret over a two-letter label
//! (plus context), truncated where the wire field is shorter.

use hmac::{Hmac, Mac};
use sha2::{Digest, Sha256};

use crate::chaskey::Subkeys;
use crate::device::PairingCredential;

type HmacSha256 = Hmac<Sha256>;

/// 32-byte secret shared after a full verify.
pub type SessionSecret = [u8; 32];

fn hmac(secret: &SessionSecret, parts: &[&[u8]]) -> [u8; 32] {
    // HMAC accepts keys of any length.
    let mut mac = match <HmacSha256 as Mac>::new_from_slice(secret) {
        Ok(mac) => mac,
        Err(_) => unreachable!("hmac key length"),
    };
    for part in parts {
        mac.update(part);
    }
    mac.finalize().into_bytes().into()
}

fn truncate16(v: [u8; 32]) -> [u8; 16] {
    let mut out = [0u8; 16];
    out.copy_from_slice(&v[..16]);
    out
}

/// `SHA256(shared ‖ variant ‖ device random ‖ app random ‖ flags)`; flags are always zero.
pub fn session_secret(
    shared: &[u8; 32],
    signature_variant: u8,
    device_random: &[u8; 8],
    app_random: &[u8; 8],
) -> SessionSecret {
    let mut h = Sha256::new();
    h.update(shared);
    h.update([signature_variant]);
    h.update(device_random);
    h.update(app_random);
    h.update([0u8]);
    h.finalize().into()
}

/// Proves to the button that we hold the session secret.
pub fn verifier(secret: &SessionSecret) -> [u8; 16] {
    truncate16(hmac(secret, &[b"AT"]))
}

/// Packet signing keys for a fully verified session.
pub fn session_subkeys(secret: &SessionSecret) -> Subkeys {
    Subkeys::generate(&truncate16(hmac(secret, &[b"SK"])))
}

/// Long-term credential handed out on a successful pairing.
pub fn pairing_credential(secret: &SessionSecret) -> PairingCredential {
    let pk = hmac(secret, &[b"PK"]);
    let mut key = [0u8; 16];
    key.copy_from_slice(&pk[4..20]);
    PairingCredential {
        id: u32::from_le_bytes([pk[0], pk[1], pk[2], pk[3]]),
        key,
    }
}

/// Proof of an existing credential, sent when asking whether it was revoked.
pub fn pairing_token(secret: &SessionSecret, credential: &PairingCredential) -> [u8; 16] {
    truncate16(hmac(
        secret,
        &[b"PT", &credential.id.to_le_bytes(), &credential.key],
    ))
}

/// Button's answer when it no longer knows the credential.
pub fn not_found_tag(secret: &SessionSecret, token: &[u8; 16]) -> [u8; 16] {
    truncate16(hmac(secret, &[b"NE", token]))
}

/// Button's answer when it still holds the credential.
pub fn exists_tag(secret: &SessionSecret, token: &[u8; 16]) -> [u8; 16] {
    truncate16(hmac(secret, &[b"EX", token]))
}

/// Signing keys for a quick-verified session:
/// the pairing key's permutation over `app random(7) ‖ 0 ‖ device random(8)`, expanded.
pub fn quick_verify_subkeys(
    pairing_key: &[u8; 16],
    app_random: &[u8; 7],
    device_random: &[u8; 8],
) -> Subkeys {
    let mut block = [0u8; 16];
    block[..7].copy_from_slice(app_random);
    block[8..].copy_from_slice(device_random);
    let session_key = Subkeys::generate(pairing_key).mac16(&block);
    Subkeys::generate(&session_key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn labels_give_distinct_values() {
        let secret = [3u8; 32];
        let cred = pairing_credential(&secret);
        let token = pairing_token(&secret, &cred);
        assert_ne!(verifier(&secret), token);
        assert_ne!(not_found_tag(&secret, &token), exists_tag(&secret, &token));
    }

    #[test]
    fn credential_splits_pk_material() {
        let secret = [9u8; 32];
        let pk = hmac(&secret, &[b"PK"]);
        let cred = pairing_credential(&secret);
        assert_eq!(cred.id.to_le_bytes(), pk[..4]);
        assert_eq!(cred.key, pk[4..20]);
        assert_eq!(PairingCredential::from_derived(&pk), Some(cred));
    }

    #[test]
    fn hmac_over_parts_matches_concatenation() {
        let secret = [1u8; 32];
        let cred = PairingCredential {
            id: 0x0a0b0c0d,
            key: [5; 16],
        };
        let mut joined = b"PT".to_vec();
        joined.extend_from_slice(&cred.id.to_le_bytes());
        joined.extend_from_slice(&cred.key);
        assert_eq!(
            pairing_token(&secret, &cred),
            truncate16(hmac(&secret, &[&joined]))
        );
    }

    #[test]
    fn session_secret_binds_all_inputs() {
        let base = session_secret(&[1; 32], 0, &[2; 8], &[3; 8]);
        assert_ne!(base, session_secret(&[1; 32], 1, &[2; 8], &[3; 8]));
        assert_ne!(base, session_secret(&[1; 32], 0, &[3; 8], &[2; 8]));
    }

    #[test]
    fn quick_verify_keys_depend_on_randoms() {
        let key = [4u8; 16];
        let a = quick_verify_subkeys(&key, &[1; 7], &[2; 8]);
        assert_eq!(a, quick_verify_subkeys(&key, &[1; 7], &[2; 8]));
        assert_ne!(a, quick_verify_subkeys(&key, &[1; 7], &[3; 8]));
    }
}
