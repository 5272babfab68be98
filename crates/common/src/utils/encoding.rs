use base64::{Engine as _, engine::general_purpose::STANDARD};

/// Encode a binary body (e.g. WAV audio) for the tunnel's `body` field
pub fn encode_body(body: &[u8]) -> String {
    STANDARD.encode(body)
}

/// Decode a `body_binary` body back to bytes
pub fn decode_body(encoded: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(encoded)
}
