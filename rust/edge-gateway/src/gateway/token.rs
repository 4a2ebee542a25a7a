//! Signed session tokens.
//!
//! A token is the URL-safe base64 encoding of a 64-byte buffer:
//!
//! ```text
//! +-----------------------------+----------------------------------+
//! | 32 cryptographically random | HMAC-SHA256(id bytes, signing key) |
//! +-----------------------------+----------------------------------+
//! ```
//!
//! Tokens carry no expiry. They stop working when their session state is
//! deleted from the store or when the signing key changes.

use std::collections::HashMap;
use std::fmt;

use axum::http::{header::AUTHORIZATION, HeaderMap};
use base64::{
    alphabet,
    engine::{DecodePaddingMode, GeneralPurpose, GeneralPurposeConfig},
    Engine as _,
};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, TryRngCore};
use sha2::Sha256;

use crate::error::TokenError;

type HmacSha256 = Hmac<Sha256>;

/// Length of the random id portion.
pub const ID_LENGTH: usize = 32;

/// Length of the decoded token (id plus signature).
pub const SIGNED_LENGTH: usize = ID_LENGTH + 32;

/// Query parameter consulted when no `Authorization` header is present.
pub const AUTH_QUERY_PARAM: &str = "auth";

/// Authorization scheme prefix.
pub const SCHEME_BEARER: &str = "Bearer ";

/// URL-safe alphabet; pads on encode, accepts either form on decode.
const TOKEN_ENGINE: GeneralPurpose = GeneralPurpose::new(
    &alphabet::URL_SAFE,
    GeneralPurposeConfig::new().with_decode_padding_mode(DecodePaddingMode::Indifferent),
);

/// A digitally signed session id.
///
/// Values of this type were either minted by [`SessionToken::new`] or passed
/// [`SessionToken::validate`].
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct SessionToken(String);

impl SessionToken {
    /// Mint a fresh token signed with `signing_key`.
    pub fn new(signing_key: &str) -> Result<Self, TokenError> {
        if signing_key.is_empty() {
            return Err(TokenError::EmptySecret);
        }

        let mut id = [0u8; ID_LENGTH];
        OsRng
            .try_fill_bytes(&mut id)
            .map_err(|e| TokenError::RandomSource(e.to_string()))?;

        let mut buf = Vec::with_capacity(SIGNED_LENGTH);
        buf.extend_from_slice(&id);
        buf.extend_from_slice(&sign(&id, signing_key));

        Ok(Self(TOKEN_ENGINE.encode(buf)))
    }

    /// Verify the signature of a raw token string.
    ///
    /// Only the cryptography is checked: a well-formed token whose session was
    /// never stored, or was already deleted, still validates here.
    pub fn validate(raw: &str, signing_key: &str) -> Result<Self, TokenError> {
        let decoded = TOKEN_ENGINE
            .decode(raw)
            .map_err(|e| TokenError::Decode(e.to_string()))?;

        if decoded.len() != SIGNED_LENGTH {
            return Err(TokenError::BadLength {
                expected: SIGNED_LENGTH,
                actual: decoded.len(),
            });
        }

        let (id, claimed) = decoded.split_at(ID_LENGTH);
        let mut mac = mac_for(signing_key);
        mac.update(id);
        // verify_slice compares in constant time
        mac.verify_slice(claimed)
            .map_err(|_| TokenError::SignatureMismatch)?;

        Ok(Self(raw.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Key under which the session state is stored.
    pub fn store_key(&self) -> String {
        format!("sessionToken:{}", self.0)
    }

    /// `Authorization` header value carrying this token.
    pub fn bearer(&self) -> String {
        format!("{SCHEME_BEARER}{}", self.0)
    }
}

impl fmt::Display for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Tokens are bearer credentials; keep them out of logs.
        let prefix: String = self.0.chars().take(6).collect();
        write!(f, "SessionToken({prefix}…)")
    }
}

/// Pull the raw (unverified) token out of a request.
///
/// The `Authorization` header wins. Without it, the `auth` query parameter is
/// used; browsers cannot set headers on WebSocket upgrades, so the parameter
/// may hold either a bare token or a `Bearer <token>` value.
pub fn extract_raw_token(
    headers: &HeaderMap,
    query: &HashMap<String, String>,
) -> Result<String, TokenError> {
    if let Some(value) = headers.get(AUTHORIZATION) {
        let value = value.to_str().map_err(|_| TokenError::UnsupportedScheme)?;
        if value.is_empty() {
            return Err(TokenError::MissingToken);
        }
        return value
            .strip_prefix(SCHEME_BEARER)
            .map(str::to_string)
            .ok_or(TokenError::UnsupportedScheme);
    }

    match query.get(AUTH_QUERY_PARAM).map(String::as_str) {
        None | Some("") => Err(TokenError::MissingToken),
        Some(value) => Ok(value
            .strip_prefix(SCHEME_BEARER)
            .unwrap_or(value)
            .to_string()),
    }
}

fn mac_for(signing_key: &str) -> HmacSha256 {
    <HmacSha256 as Mac>::new_from_slice(signing_key.as_bytes())
        .expect("HMAC can take key of any size")
}

fn sign(id: &[u8], signing_key: &str) -> Vec<u8> {
    let mut mac = mac_for(signing_key);
    mac.update(id);
    mac.finalize().into_bytes().to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    const KEY: &str = "test signing key";

    fn reencode(mut bytes: Vec<u8>, flip_bit: usize) -> String {
        bytes[flip_bit / 8] ^= 1 << (flip_bit % 8);
        TOKEN_ENGINE.encode(bytes)
    }

    #[test]
    fn test_new_token_validates() {
        for key in ["k", KEY, "a much longer signing key with spaces and ünïcode"] {
            let token = SessionToken::new(key).unwrap();
            let validated = SessionToken::validate(token.as_str(), key).unwrap();
            assert_eq!(validated, token);
        }
    }

    #[test]
    fn test_tokens_are_unique() {
        let a = SessionToken::new(KEY).unwrap();
        let b = SessionToken::new(KEY).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_empty_secret_rejected() {
        assert_eq!(SessionToken::new("").unwrap_err(), TokenError::EmptySecret);
    }

    #[test]
    fn test_decoded_length_is_64() {
        let token = SessionToken::new(KEY).unwrap();
        let decoded = TOKEN_ENGINE.decode(token.as_str()).unwrap();
        assert_eq!(decoded.len(), SIGNED_LENGTH);
    }

    #[test]
    fn test_any_bit_flip_is_signature_mismatch() {
        let token = SessionToken::new(KEY).unwrap();
        let decoded = TOKEN_ENGINE.decode(token.as_str()).unwrap();

        for bit in 0..SIGNED_LENGTH * 8 {
            let tampered = reencode(decoded.clone(), bit);
            assert_eq!(
                SessionToken::validate(&tampered, KEY).unwrap_err(),
                TokenError::SignatureMismatch,
                "bit {bit} flip was accepted"
            );
        }
    }

    #[test]
    fn test_wrong_secret_fails() {
        let token = SessionToken::new(KEY).unwrap();
        assert_eq!(
            SessionToken::validate(token.as_str(), "another key").unwrap_err(),
            TokenError::SignatureMismatch
        );
    }

    #[test]
    fn test_bad_length() {
        let short = TOKEN_ENGINE.encode([7u8; 40]);
        assert_eq!(
            SessionToken::validate(&short, KEY).unwrap_err(),
            TokenError::BadLength {
                expected: 64,
                actual: 40
            }
        );
    }

    #[test]
    fn test_not_base64() {
        assert!(matches!(
            SessionToken::validate("not*base64!", KEY),
            Err(TokenError::Decode(_))
        ));
    }

    #[test]
    fn test_unpadded_token_accepted() {
        let token = SessionToken::new(KEY).unwrap();
        let unpadded = token.as_str().trim_end_matches('=');
        assert!(SessionToken::validate(unpadded, KEY).is_ok());
    }

    #[test]
    fn test_extract_prefers_header() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer from-header"));
        let query = HashMap::from([("auth".to_string(), "from-query".to_string())]);

        assert_eq!(extract_raw_token(&headers, &query).unwrap(), "from-header");
    }

    #[test]
    fn test_extract_falls_back_to_query() {
        let headers = HeaderMap::new();
        let bare = HashMap::from([("auth".to_string(), "abc".to_string())]);
        let prefixed = HashMap::from([("auth".to_string(), "Bearer abc".to_string())]);

        assert_eq!(extract_raw_token(&headers, &bare).unwrap(), "abc");
        assert_eq!(extract_raw_token(&headers, &prefixed).unwrap(), "abc");
    }

    #[test]
    fn test_extract_missing() {
        assert_eq!(
            extract_raw_token(&HeaderMap::new(), &HashMap::new()).unwrap_err(),
            TokenError::MissingToken
        );
    }

    #[test]
    fn test_extract_rejects_other_schemes() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcjpwYXNz"));
        assert_eq!(
            extract_raw_token(&headers, &HashMap::new()).unwrap_err(),
            TokenError::UnsupportedScheme
        );
    }

    #[test]
    fn test_debug_does_not_leak_token() {
        let token = SessionToken::new(KEY).unwrap();
        let debug = format!("{token:?}");
        assert!(!debug.contains(token.as_str()));
    }
}
