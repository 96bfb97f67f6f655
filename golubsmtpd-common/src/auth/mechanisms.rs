//! SASL mechanism plumbing shared by AUTH PLAIN and AUTH LOGIN.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine;
use thiserror::Error;

/// Raw base64 input limit. Anything larger is rejected before decoding.
pub const MAX_AUTH_DATA_SIZE: usize = 1024;
/// Decoded payload limit.
pub const MAX_DECODED_SIZE: usize = 768;

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("authentication data too large: {0} bytes (max {MAX_AUTH_DATA_SIZE})")]
    InputTooLarge(usize),

    #[error("decoded authentication data too large: {0} bytes (max {MAX_DECODED_SIZE})")]
    DecodedTooLarge(usize),

    #[error("invalid base64 encoding: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("decoded data is not valid UTF-8")]
    Utf8,

    #[error("invalid PLAIN format: expected 3 parts, got {0}")]
    PlainFormat(usize),

    #[error("username cannot be empty")]
    EmptyUsername,
}

fn check_input(input: &str) -> Result<(), AuthError> {
    if input.len() > MAX_AUTH_DATA_SIZE {
        return Err(AuthError::InputTooLarge(input.len()));
    }
    Ok(())
}

fn check_decoded(data: &[u8]) -> Result<(), AuthError> {
    if data.len() > MAX_DECODED_SIZE {
        return Err(AuthError::DecodedTooLarge(data.len()));
    }
    Ok(())
}

/// Decode PLAIN SASL data: `[authzid] NUL authcid NUL passwd`.
pub fn decode_plain(encoded: &str) -> Result<(String, String), AuthError> {
    check_input(encoded)?;

    let decoded = BASE64_STANDARD.decode(encoded)?;
    check_decoded(&decoded)?;

    let decoded = String::from_utf8(decoded).map_err(|_| AuthError::Utf8)?;
    let parts: Vec<&str> = decoded.split('\0').collect();
    if parts.len() != 3 {
        return Err(AuthError::PlainFormat(parts.len()));
    }

    // parts[0] is the authorization identity, usually empty.
    let username = parts[1];
    let password = parts[2];
    if username.is_empty() {
        return Err(AuthError::EmptyUsername);
    }

    Ok((username.to_string(), password.to_string()))
}

/// Base64-encode a challenge string for a `334` reply.
pub fn encode_base64(raw: &str) -> String {
    BASE64_STANDARD.encode(raw.as_bytes())
}

/// Decode one base64 AUTH LOGIN response with the size limits applied.
pub fn decode_base64(encoded: &str) -> Result<String, AuthError> {
    check_input(encoded)?;

    let decoded = BASE64_STANDARD.decode(encoded)?;
    check_decoded(&decoded)?;

    String::from_utf8(decoded).map_err(|_| AuthError::Utf8)
}
