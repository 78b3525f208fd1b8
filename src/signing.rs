use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::error::{SigningError, VerificationError};

/// Header carrying the hex HMAC of the raw request body.
pub const SIGNATURE_HEADER: &str = "X-Webhook-Signature";

type HmacSha256 = Hmac<Sha256>;

fn mac_for(secret: &[u8]) -> Result<HmacSha256, SigningError> {
    HmacSha256::new_from_slice(secret).map_err(|_| SigningError::InvalidKey)
}

/// Compute the hex HMAC-SHA256 tag of `payload` under `secret`.
///
/// `payload` must be the exact bytes that go on the wire. Receivers
/// recompute the tag over the raw body they got, so signing a
/// re-serialization of the same value breaks verification.
pub fn sign(secret: &[u8], payload: &[u8]) -> Result<String, SigningError> {
    let mut mac = mac_for(secret)?;
    mac.update(payload);
    Ok(hex::encode(mac.finalize().into_bytes()))
}

/// Verify a received signature against the raw body, in constant time.
pub fn verify_signature(secret: &[u8], payload: &[u8], signature_hex: &str) -> bool {
    let Ok(signature) = hex::decode(signature_hex.trim()) else {
        return false;
    };

    let Ok(mut mac) = mac_for(secret) else {
        return false;
    };
    mac.update(payload);
    mac.verify_slice(&signature).is_ok()
}

/// Find the signature header (case-insensitive) in a list of headers.
pub fn find_signature_header<'a, I>(headers: I) -> Option<&'a str>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    headers
        .into_iter()
        .find(|(name, _)| name.eq_ignore_ascii_case(SIGNATURE_HEADER))
        .map(|(_, value)| value)
}

/// Verify an incoming webhook request in one call.
pub fn verify_webhook_request<'a, I>(
    headers: I,
    raw_body: &[u8],
    secret: &[u8],
) -> Result<(), VerificationError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let signature = find_signature_header(headers).ok_or(VerificationError::MissingSignature)?;

    if verify_signature(secret, raw_body, signature) {
        Ok(())
    } else {
        Err(VerificationError::InvalidSignature)
    }
}
