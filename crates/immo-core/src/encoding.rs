//! Base64 helpers for IVs, tags and keys crossing text boundaries

use crate::Result;
use base64::{engine::general_purpose::STANDARD, Engine as _};

/// Encode bytes as standard padded base64.
pub fn bytes_to_base64(bytes: &[u8]) -> String {
    STANDARD.encode(bytes)
}

/// Decode standard padded base64 into bytes.
pub fn base64_to_bytes(text: &str) -> Result<Vec<u8>> {
    Ok(STANDARD.decode(text.trim())?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::RngCore;

    #[test]
    fn test_round_trip_random_lengths() {
        for len in [0usize, 1, 16, 1000] {
            let mut data = vec![0u8; len];
            rand::thread_rng().fill_bytes(&mut data);

            let encoded = bytes_to_base64(&data);
            let decoded = base64_to_bytes(&encoded).unwrap();
            assert_eq!(decoded, data, "round trip failed for length {}", len);
        }
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(bytes_to_base64(b""), "");
        assert!(base64_to_bytes("").unwrap().is_empty());
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(bytes_to_base64(b"helloworld"), "aGVsbG93b3JsZA==");
    }

    #[test]
    fn test_invalid_input_is_rejected() {
        let result = base64_to_bytes("not base64!");
        assert!(matches!(result, Err(crate::ImmoError::Encoding(_))));
    }
}
