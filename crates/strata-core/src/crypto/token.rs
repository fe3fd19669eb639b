//! PASETO `v2.public` token signing and verification.
//!
//! A token is the fixed header `v2.public.` followed by the URL-safe
//! unpadded base64 encoding of `claims_json || signature`. The Ed25519
//! signature covers a pre-authentication encoding (PAE) binding the header,
//! the serialized claims, and an empty footer, which prevents
//! algorithm-confusion and length-extension attacks: every input is bound
//! into the signed material with an explicit length.
//!
//! Verification interprets no claim byte before the signature checks out.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey, SIGNATURE_LENGTH};
use thiserror::Error;

use crate::capability::Capability;

/// Fixed token prefix identifying the algorithm family.
pub const V2_PUBLIC_HEADER: &str = "v2.public.";

/// Errors from token signing or verification.
///
/// Variants deliberately carry no cryptographic detail; services surface a
/// generic "invalid token" message to clients.
#[derive(Debug, Error)]
pub enum TokenError {
    /// Token does not start with the `v2.public.` header.
    #[error("invalid token header")]
    InvalidHeader,

    /// Token body is not valid URL-safe base64.
    #[error("decode token: {0}")]
    Decode(#[from] base64::DecodeError),

    /// Token body is shorter than an Ed25519 signature.
    #[error("token too short")]
    TooShort,

    /// Signature does not verify against the public key.
    #[error("invalid signature")]
    InvalidSignature,

    /// Claims failed to serialize or deserialize.
    #[error("claims encoding: {0}")]
    Claims(#[from] serde_json::Error),
}

/// Pre-authentication encoding: the piece count as 8 little-endian bytes,
/// then each piece's byte length (8 little-endian bytes) followed by its
/// bytes.
fn pae(pieces: &[&[u8]]) -> Vec<u8> {
    let total: usize = pieces.iter().map(|p| 8 + p.len()).sum();
    let mut out = Vec::with_capacity(8 + total);
    out.extend_from_slice(&(pieces.len() as u64).to_le_bytes());
    for piece in pieces {
        out.extend_from_slice(&(piece.len() as u64).to_le_bytes());
        out.extend_from_slice(piece);
    }
    out
}

/// Signs `capability` into a `v2.public` token string.
///
/// # Errors
///
/// Returns an error if the claims fail to serialize.
pub fn sign(capability: &Capability, key: &SigningKey) -> Result<String, TokenError> {
    let message = serde_json::to_vec(capability)?;

    let m2 = pae(&[V2_PUBLIC_HEADER.as_bytes(), &message, b""]);
    let signature = key.sign(&m2);

    let mut body = Vec::with_capacity(message.len() + SIGNATURE_LENGTH);
    body.extend_from_slice(&message);
    body.extend_from_slice(&signature.to_bytes());

    Ok(format!("{V2_PUBLIC_HEADER}{}", URL_SAFE_NO_PAD.encode(body)))
}

/// Verifies a `v2.public` token and returns the embedded claims.
///
/// Rejects, in order: header mismatch, base64 decode failure, body shorter
/// than the signature, signature failure, claims decode failure.
///
/// # Errors
///
/// Returns [`TokenError`] describing the first check that failed.
pub fn verify(token: &str, key: &VerifyingKey) -> Result<Capability, TokenError> {
    let body = token
        .strip_prefix(V2_PUBLIC_HEADER)
        .ok_or(TokenError::InvalidHeader)?;

    let decoded = URL_SAFE_NO_PAD.decode(body)?;
    if decoded.len() < SIGNATURE_LENGTH {
        return Err(TokenError::TooShort);
    }

    let (message, sig_bytes) = decoded.split_at(decoded.len() - SIGNATURE_LENGTH);
    let sig_bytes: [u8; SIGNATURE_LENGTH] = sig_bytes
        .try_into()
        .map_err(|_| TokenError::InvalidSignature)?;
    let signature = Signature::from_bytes(&sig_bytes);

    let m2 = pae(&[V2_PUBLIC_HEADER.as_bytes(), message, b""]);
    key.verify(&m2, &signature)
        .map_err(|_| TokenError::InvalidSignature)?;

    Ok(serde_json::from_slice(message)?)
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::capability::Constraints;
    use crate::crypto::keys::generate_keypair;

    fn sample() -> Capability {
        Capability::new(
            "fs",
            vec!["open".into(), "read".into()],
            vec!["fs.open".into(), "fs.read".into()],
            Constraints {
                path_prefix: "/tmp".into(),
                rate_limit: String::new(),
            },
            Duration::seconds(300),
        )
    }

    #[test]
    fn pae_encodes_counts_and_lengths() {
        assert_eq!(pae(&[]), 0u64.to_le_bytes().to_vec());

        let encoded = pae(&[b"ab"]);
        let mut expected = Vec::new();
        expected.extend_from_slice(&1u64.to_le_bytes());
        expected.extend_from_slice(&2u64.to_le_bytes());
        expected.extend_from_slice(b"ab");
        assert_eq!(encoded, expected);
    }

    #[test]
    fn sign_verify_round_trip() {
        let key = generate_keypair();
        let cap = sample();

        let token = sign(&cap, &key).unwrap();
        assert!(token.starts_with(V2_PUBLIC_HEADER));

        let claims = verify(&token, &key.verifying_key()).unwrap();
        assert_eq!(claims, cap);
    }

    #[test]
    fn verify_rejects_wrong_key() {
        let key = generate_keypair();
        let other = generate_keypair();
        let token = sign(&sample(), &key).unwrap();

        assert!(matches!(
            verify(&token, &other.verifying_key()),
            Err(TokenError::InvalidSignature)
        ));
    }

    #[test]
    fn verify_rejects_missing_header() {
        let key = generate_keypair();
        assert!(matches!(
            verify("v2.local.abcdef", &key.verifying_key()),
            Err(TokenError::InvalidHeader)
        ));
    }

    #[test]
    fn verify_rejects_short_body() {
        let key = generate_keypair();
        let token = format!("{V2_PUBLIC_HEADER}{}", URL_SAFE_NO_PAD.encode(b"tiny"));
        assert!(matches!(
            verify(&token, &key.verifying_key()),
            Err(TokenError::TooShort)
        ));
    }

    #[test]
    fn flipping_any_body_byte_invalidates_token() {
        let key = generate_keypair();
        let token = sign(&sample(), &key).unwrap();
        let body = token.strip_prefix(V2_PUBLIC_HEADER).unwrap();
        let mut raw = URL_SAFE_NO_PAD.decode(body).unwrap();

        // Flip one byte in the claims and one in the signature.
        for index in [0, raw.len() - 1] {
            raw[index] ^= 0x01;
            let tampered = format!("{V2_PUBLIC_HEADER}{}", URL_SAFE_NO_PAD.encode(&raw));
            assert!(verify(&tampered, &key.verifying_key()).is_err());
            raw[index] ^= 0x01;
        }
    }

    #[test]
    fn claims_are_not_parsed_before_signature_passes() {
        let key = generate_keypair();
        // Valid-length body with garbage claims and garbage signature: the
        // error must be the signature, not a claims parse failure.
        let mut body = b"not json at all".to_vec();
        body.extend_from_slice(&[0u8; SIGNATURE_LENGTH]);
        let token = format!("{V2_PUBLIC_HEADER}{}", URL_SAFE_NO_PAD.encode(body));
        assert!(matches!(
            verify(&token, &key.verifying_key()),
            Err(TokenError::InvalidSignature)
        ));
    }
}
