pub mod tokens;

use axum::http::HeaderMap;
use rand::Rng;

use crate::error::{AppError, AppResult};

pub use tokens::TokenStore;

/// Length in bytes of a freshly issued player token, before hex encoding.
pub const TOKEN_BYTES: usize = 32;

/// Generates an unpredictable player credential (64 hex characters).
pub fn generate_token() -> String {
    let bytes: [u8; TOKEN_BYTES] = rand::thread_rng().gen();
    hex::encode(bytes)
}

/// Compares two tokens without short-circuiting on the first differing byte.
pub fn tokens_match(expected: &str, presented: &str) -> bool {
    let (expected, presented) = (expected.as_bytes(), presented.as_bytes());
    if expected.len() != presented.len() {
        return false;
    }
    expected
        .iter()
        .zip(presented)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

/// Extracts the token from an `Authorization: Bearer <token>` header.
///
/// No header yields `Ok(None)`; a header that is present but not a usable bearer token is
/// `Unauthorized`.
pub fn bearer_token(headers: &HeaderMap) -> AppResult<Option<&str>> {
    let Some(value) = headers.get("authorization") else {
        return Ok(None);
    };
    let token = value
        .to_str()
        .ok()
        .and_then(|h| h.split_once(' '))
        .filter(|(scheme, _)| scheme.eq_ignore_ascii_case("bearer"))
        .map(|(_, token)| token.trim())
        .filter(|t| !t.is_empty());
    match token {
        Some(token) => Ok(Some(token)),
        None => {
            tracing::warn!("Rejected malformed Authorization header");
            Err(AppError::Unauthorized)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn test_generated_tokens_are_hex_and_distinct() {
        let a = generate_token();
        let b = generate_token();
        assert_eq!(a.len(), TOKEN_BYTES * 2);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit()));
        assert_ne!(a, b);
    }

    #[test]
    fn test_tokens_match() {
        assert!(tokens_match("abc123", "abc123"));
        assert!(!tokens_match("abc123", "abc124"));
        assert!(!tokens_match("abc123", "abc12"));
        assert!(!tokens_match("abc123", ""));
    }

    #[test]
    fn test_bearer_token_parsing() {
        let mut headers = HeaderMap::new();
        assert!(matches!(bearer_token(&headers), Ok(None)));

        headers.insert("authorization", HeaderValue::from_static("Bearer deadbeef"));
        assert!(matches!(bearer_token(&headers), Ok(Some("deadbeef"))));

        for malformed in ["Basic deadbeef", "Bearer ", "deadbeef"] {
            headers.insert("authorization", HeaderValue::from_static(malformed));
            assert!(matches!(
                bearer_token(&headers),
                Err(AppError::Unauthorized)
            ));
        }
    }
}
