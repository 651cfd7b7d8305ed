//! Request signing.
//!
//! Signed calls carry `apiKey`, `timestamp` and `signature` parameters. The
//! signature is the lowercase hex HMAC-SHA256 of the canonical query string:
//! every parameter except `signature`, sorted by key, values percent-encoded.

use std::fmt;

use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;

use crate::error::{Error, Result};
use crate::types::Params;

type HmacSha256 = Hmac<Sha256>;

pub const API_KEY_PARAM: &str = "apiKey";
pub const TIMESTAMP_PARAM: &str = "timestamp";
pub const SIGNATURE_PARAM: &str = "signature";

/// API key and secret.
#[derive(Clone)]
pub struct Credentials {
    pub api_key: String,
    api_secret: String,
}

impl Credentials {
    const API_KEY_ENV: &'static str = "BINANCE_API_KEY";
    const API_SECRET_ENV: &'static str = "BINANCE_API_SECRET";

    pub fn new(api_key: impl Into<String>, api_secret: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_secret: api_secret.into(),
        }
    }

    /// Read `BINANCE_API_KEY` / `BINANCE_API_SECRET`, if both are set.
    pub fn from_env() -> Option<Self> {
        let api_key = std::env::var(Self::API_KEY_ENV).ok()?;
        let api_secret = std::env::var(Self::API_SECRET_ENV).ok()?;
        Some(Self::new(api_key, api_secret))
    }

    pub fn api_key(&self) -> &str {
        &self.api_key
    }

    pub(crate) fn api_secret(&self) -> &str {
        &self.api_secret
    }
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("api_key", &self.api_key)
            .field("api_secret", &"<redacted>")
            .finish()
    }
}

/// How a request is authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Auth {
    /// Sent as is.
    None,
    /// `apiKey` injected, no signature (user data stream calls).
    ApiKey,
    /// `apiKey`, `timestamp` and `signature` injected.
    Signed,
}

/// Stateless signing helpers.
pub struct Authenticator;

impl Authenticator {
    /// Render `params` as `k1=v1&k2=v2`, keys in lexicographic order.
    pub fn canonical_query(params: &Params) -> String {
        let mut keys: Vec<&String> = params
            .iter()
            .filter(|(key, value)| key.as_str() != SIGNATURE_PARAM && !value.is_null())
            .map(|(key, _)| key)
            .collect();
        keys.sort();

        keys.into_iter()
            .map(|key| {
                let value = render_value(&params[key.as_str()]);
                format!("{key}={}", urlencoding::encode(&value))
            })
            .collect::<Vec<_>>()
            .join("&")
    }

    /// Signature of `params` under `secret`.
    pub fn sign(params: &Params, secret: &str) -> Result<String> {
        Self::sign_payload(&Self::canonical_query(params), secret)
    }

    /// Signature of a raw payload under `secret`.
    pub fn sign_payload(payload: &str, secret: &str) -> Result<String> {
        let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
            .map_err(|e| Error::Auth(e.to_string()))?;
        mac.update(payload.as_bytes());
        Ok(hex::encode(mac.finalize().into_bytes()))
    }

    /// Copy of `params` with `apiKey` and the current timestamp.
    pub fn with_auth(params: &Params, api_key: &str) -> Params {
        Self::with_auth_at(params, api_key, now_millis())
    }

    /// Copy of `params` with `apiKey` and the given timestamp.
    pub fn with_auth_at(params: &Params, api_key: &str, timestamp: u64) -> Params {
        let mut authed = Self::with_api_key(params, api_key);
        authed.insert(TIMESTAMP_PARAM.to_string(), Value::from(timestamp));
        authed
    }

    /// Copy of `params` with only `apiKey` injected. Null values are
    /// dropped, since they never enter the signature payload.
    pub fn with_api_key(params: &Params, api_key: &str) -> Params {
        let mut authed: Params = params
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect();
        authed.insert(API_KEY_PARAM.to_string(), Value::from(api_key));
        authed
    }

    /// Fully signed copy of `params`, ready to send.
    pub fn signed(params: &Params, credentials: &Credentials, timestamp: u64) -> Result<Params> {
        let mut signed = Self::with_auth_at(params, credentials.api_key(), timestamp);
        let signature = Self::sign(&signed, credentials.api_secret())?;
        signed.insert(SIGNATURE_PARAM.to_string(), Value::from(signature));
        Ok(signed)
    }
}

/// Epoch milliseconds from the local clock.
pub fn now_millis() -> u64 {
    u64::try_from(chrono::Utc::now().timestamp_millis()).unwrap_or_default()
}

fn render_value(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => String::new(),
        Value::Array(_) | Value::Object(_) => value.to_string(),
    }
}
