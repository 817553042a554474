//! Launch credential verification.
//!
//! The mini-app receives a URL-encoded bundle of fields from the chat platform.
//! Every field except `hash` is bound into an HMAC-SHA256 signature keyed by a
//! secret derived from the bot token, and `auth_date` bounds how long the bundle
//! can be replayed.

use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::collections::BTreeMap;
use std::fmt;
use tapgame_types::Identity;
use thiserror::Error as ThisError;

type HmacSha256 = Hmac<Sha256>;

/// Static key used to derive the per-bot secret.
pub const WEB_APP_DATA_KEY: &[u8] = b"WebAppData";
/// Default replay window.
pub const DEFAULT_MAX_AGE_SECS: u64 = 24 * 60 * 60;

const SIGNATURE_FIELD: &str = "hash";
const AUTH_DATE_FIELD: &str = "auth_date";
const USER_FIELD: &str = "user";

#[derive(Debug, ThisError, PartialEq, Eq)]
pub enum AuthError {
    #[error("credential missing")]
    Missing,
    #[error("signature field missing")]
    MissingSignature,
    #[error("signature mismatch")]
    BadSignature,
    #[error("auth_date missing or invalid")]
    InvalidAuthDate,
    #[error("credential expired (age={age_secs}s, max={max_age_secs}s)")]
    Expired { age_secs: i64, max_age_secs: u64 },
    #[error("identity payload missing or invalid")]
    InvalidIdentity,
}

fn hmac_sha256(key: &[u8], message: &[u8]) -> HmacSha256 {
    let mut mac = HmacSha256::new_from_slice(key).expect("hmac accepts keys of any length");
    mac.update(message);
    mac
}

/// Joins the signed fields as sorted `key=value` lines.
pub fn data_check_string(fields: &BTreeMap<String, String>) -> String {
    fields
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("\n")
}

/// Verifies credentials signed for one bot token.
#[derive(Clone)]
pub struct CredentialVerifier {
    secret: [u8; 32],
    max_age_secs: u64,
}

impl fmt::Debug for CredentialVerifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CredentialVerifier")
            .field("max_age_secs", &self.max_age_secs)
            .finish_non_exhaustive()
    }
}

impl CredentialVerifier {
    pub fn new(bot_token: &str, max_age_secs: u64) -> Self {
        let derived = hmac_sha256(WEB_APP_DATA_KEY, bot_token.as_bytes())
            .finalize()
            .into_bytes();
        let mut secret = [0u8; 32];
        secret.copy_from_slice(&derived);
        Self {
            secret,
            max_age_secs,
        }
    }

    pub fn max_age_secs(&self) -> u64 {
        self.max_age_secs
    }

    /// Hex signature over the given fields. The signature field itself must not be present.
    pub fn sign(&self, fields: &BTreeMap<String, String>) -> String {
        let mac = hmac_sha256(&self.secret, data_check_string(fields).as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    pub fn verify(&self, raw: &str, now_secs: u64) -> Result<Identity, AuthError> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(AuthError::Missing);
        }

        let mut fields: BTreeMap<String, String> = url::form_urlencoded::parse(raw.as_bytes())
            .map(|(key, value)| (key.into_owned(), value.into_owned()))
            .collect();
        let signature = fields
            .remove(SIGNATURE_FIELD)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::MissingSignature)?;
        if signature.bytes().any(|b| b.is_ascii_uppercase()) {
            return Err(AuthError::BadSignature);
        }
        let signature = hex::decode(signature).map_err(|_| AuthError::BadSignature)?;

        let mac = hmac_sha256(&self.secret, data_check_string(&fields).as_bytes());
        mac.verify_slice(&signature)
            .map_err(|_| AuthError::BadSignature)?;

        let auth_date = fields
            .get(AUTH_DATE_FIELD)
            .map(String::as_str)
            .unwrap_or("0")
            .parse::<i64>()
            .map_err(|_| AuthError::InvalidAuthDate)?;
        if auth_date <= 0 {
            return Err(AuthError::InvalidAuthDate);
        }
        let age_secs = (now_secs as i64).saturating_sub(auth_date);
        if age_secs > self.max_age_secs as i64 {
            return Err(AuthError::Expired {
                age_secs,
                max_age_secs: self.max_age_secs,
            });
        }

        let user = fields
            .get(USER_FIELD)
            .filter(|value| !value.is_empty())
            .ok_or(AuthError::InvalidIdentity)?;
        parse_identity(user)
    }
}

fn parse_identity(user: &str) -> Result<Identity, AuthError> {
    let value: serde_json::Value =
        serde_json::from_str(user).map_err(|_| AuthError::InvalidIdentity)?;
    let object = value.as_object().ok_or(AuthError::InvalidIdentity)?;
    let id = match object.get("id") {
        Some(serde_json::Value::Number(number)) => number.to_string(),
        Some(serde_json::Value::String(id)) if !id.is_empty() => id.clone(),
        _ => return Err(AuthError::InvalidIdentity),
    };
    let text = |key: &str| object.get(key).and_then(|value| value.as_str());
    Ok(Identity::new(id).with_names(text("username"), text("first_name")))
}

/// Verifies `raw` against `bot_token` in one call.
pub fn verify(
    raw: &str,
    bot_token: &str,
    max_age_secs: u64,
    now_secs: u64,
) -> Result<Identity, AuthError> {
    CredentialVerifier::new(bot_token, max_age_secs).verify(raw, now_secs)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mocks::{init_data, init_data_fields};

    const TOKEN: &str = "123456:test-bot-token";
    const NOW: u64 = 1_700_000_000;

    fn verifier() -> CredentialVerifier {
        CredentialVerifier::new(TOKEN, DEFAULT_MAX_AGE_SECS)
    }

    #[test]
    fn accepts_fresh_signed_credential() {
        let raw = init_data(TOKEN, r#"{"id":42,"first_name":"Ann","username":"ann"}"#, NOW - 60);
        let identity = verifier().verify(&raw, NOW).expect("valid credential");
        assert_eq!(identity.id, "42");
        assert_eq!(identity.first_name.as_deref(), Some("Ann"));
        assert_eq!(identity.username.as_deref(), Some("ann"));
    }

    #[test]
    fn matches_reference_check_string() {
        let mut fields = BTreeMap::new();
        fields.insert("user".to_string(), "{}".to_string());
        fields.insert("auth_date".to_string(), "1".to_string());
        fields.insert("query_id".to_string(), "q".to_string());
        assert_eq!(data_check_string(&fields), "auth_date=1\nquery_id=q\nuser={}");
    }

    #[test]
    fn rejects_replayed_credential() {
        let raw = init_data(TOKEN, r#"{"id":42}"#, NOW - 25 * 60 * 60);
        assert!(matches!(
            verifier().verify(&raw, NOW),
            Err(AuthError::Expired { .. })
        ));
    }

    #[test]
    fn accepts_credential_at_window_edge() {
        let raw = init_data(TOKEN, r#"{"id":42}"#, NOW - DEFAULT_MAX_AGE_SECS);
        assert!(verifier().verify(&raw, NOW).is_ok());
    }

    #[test]
    fn rejects_other_bot_token() {
        let raw = init_data("999:other", r#"{"id":42}"#, NOW);
        assert_eq!(verifier().verify(&raw, NOW), Err(AuthError::BadSignature));
    }

    #[test]
    fn rejects_tampered_field() {
        let raw = init_data(TOKEN, r#"{"id":42}"#, NOW);
        let tampered = raw.replace("42", "43");
        assert_eq!(verifier().verify(&tampered, NOW), Err(AuthError::BadSignature));
    }

    #[test]
    fn rejects_uppercase_signature() {
        let raw = init_data(TOKEN, r#"{"id":42}"#, NOW);
        let start = raw.find("hash=").expect("signature field") + "hash=".len();
        let end = raw[start..].find('&').map_or(raw.len(), |offset| start + offset);
        let upper = format!(
            "{}{}{}",
            &raw[..start],
            raw[start..end].to_ascii_uppercase(),
            &raw[end..]
        );
        assert_ne!(upper, raw);
        assert_eq!(verifier().verify(&upper, NOW), Err(AuthError::BadSignature));
        assert!(verifier().verify(&raw, NOW).is_ok());
    }

    #[test]
    fn rejects_missing_pieces() {
        assert_eq!(verifier().verify("", NOW), Err(AuthError::Missing));
        assert_eq!(
            verifier().verify("auth_date=1&user=%7B%7D", NOW),
            Err(AuthError::MissingSignature)
        );
        assert_eq!(
            verifier().verify("auth_date=1&hash=zz", NOW),
            Err(AuthError::BadSignature)
        );
    }

    #[test]
    fn rejects_non_positive_auth_date() {
        let raw = init_data_fields(TOKEN, &[("auth_date", "0"), ("user", r#"{"id":1}"#)]);
        assert_eq!(verifier().verify(&raw, NOW), Err(AuthError::InvalidAuthDate));
        let raw = init_data_fields(TOKEN, &[("user", r#"{"id":1}"#)]);
        assert_eq!(verifier().verify(&raw, NOW), Err(AuthError::InvalidAuthDate));
        let raw = init_data_fields(TOKEN, &[("auth_date", "soon"), ("user", r#"{"id":1}"#)]);
        assert_eq!(verifier().verify(&raw, NOW), Err(AuthError::InvalidAuthDate));
    }

    #[test]
    fn rejects_bad_identity_payload() {
        let date = NOW.to_string();
        for user in ["not json", r#"{"name":"x"}"#, "[1,2]", r#"{"id":null}"#] {
            let raw = init_data_fields(TOKEN, &[("auth_date", &date), ("user", user)]);
            assert_eq!(
                verifier().verify(&raw, NOW),
                Err(AuthError::InvalidIdentity),
                "user payload {user}"
            );
        }
        let raw = init_data_fields(TOKEN, &[("auth_date", &date)]);
        assert_eq!(verifier().verify(&raw, NOW), Err(AuthError::InvalidIdentity));
    }

    #[test]
    fn string_ids_are_kept() {
        let raw = init_data(TOKEN, r#"{"id":"777"}"#, NOW);
        assert_eq!(verifier().verify(&raw, NOW).unwrap().id, "777");
    }

    #[test]
    fn free_function_matches_verifier() {
        let raw = init_data(TOKEN, r#"{"id":5}"#, NOW);
        assert_eq!(
            verify(&raw, TOKEN, DEFAULT_MAX_AGE_SECS, NOW),
            verifier().verify(&raw, NOW)
        );
    }
}
