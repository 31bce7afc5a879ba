//! HMAC application authentication for the incident API.
//!
//! Every request carries
//! `Authorization: hmac {app}:{urlsafe_b64(HMAC-SHA512(key, "{window} {METHOD} {path} {body}"))}`
//! where `window` is the Unix time divided into five-second buckets.

use std::time::{SystemTime, UNIX_EPOCH};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE;
use ring::hmac;
use secrecy::{ExposeSecret, SecretString};

/// Signs requests on behalf of one application.
pub struct HmacAuth {
    app: String,
    key: hmac::Key,
}

impl HmacAuth {
    pub fn new(app: impl Into<String>, app_key: &SecretString) -> Self {
        Self {
            app: app.into(),
            key: hmac::Key::new(hmac::HMAC_SHA512, app_key.expose_secret().as_bytes()),
        }
    }

    /// Authorization header value for a request sent now.
    pub fn header(&self, method: &str, path: &str, body: &[u8]) -> String {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.header_for_window(now / 5, method, path, body)
    }

    /// Authorization header value for an explicit time window.
    pub fn header_for_window(&self, window: u64, method: &str, path: &str, body: &[u8]) -> String {
        let mut content = format!("{window} {method} {path} ").into_bytes();
        content.extend_from_slice(body);
        let tag = hmac::sign(&self.key, &content);
        format!("hmac {}:{}", self.app, URL_SAFE.encode(tag.as_ref()))
    }
}
