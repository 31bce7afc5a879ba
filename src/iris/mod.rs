//! Client for the downstream incident API.

pub mod auth;

use async_trait::async_trait;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::ApiConfig;
use crate::error::RelayError;
use crate::mailbox::Header;

pub use auth::HmacAuth;

/// API version segment prepended to every endpoint.
const API_VERSION: u32 = 0;

/// Endpoint receiving inbound email events.
pub const EMAIL_ENDPOINT: &str = "response/email";

/// JSON body posted for one relayed email.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EmailPayload {
    pub headers: Vec<Header>,
    pub body: String,
}

/// Where relayed email goes.
#[async_trait]
pub trait IncidentApi: Send + Sync {
    /// Post one email event. Non-2xx responses are errors.
    async fn post_email(&self, payload: &EmailPayload) -> Result<(), RelayError>;
}

/// Authenticated HTTP client for the incident API.
pub struct IrisClient {
    base: reqwest::Url,
    auth: HmacAuth,
    client: reqwest::Client,
}

impl IrisClient {
    pub fn new(config: &ApiConfig) -> Result<Self, RelayError> {
        let base = format!("{}/v{API_VERSION}/", config.host.trim_end_matches('/'));
        let base = reqwest::Url::parse(&base).map_err(|e| RelayError::InvalidHost {
            host: config.host.clone(),
            reason: e.to_string(),
        })?;

        Ok(Self {
            base,
            auth: HmacAuth::new(config.app.clone(), &config.app_key),
            client: reqwest::Client::new(),
        })
    }

    /// Full URL for an endpoint relative to the versioned base.
    pub fn url(&self, endpoint: &str) -> Result<reqwest::Url, RelayError> {
        self.base.join(endpoint).map_err(|e| RelayError::InvalidHost {
            host: self.base.to_string(),
            reason: e.to_string(),
        })
    }

    /// POST `body` as JSON to `endpoint`; any non-2xx status is an error.
    pub async fn post<T: Serialize + ?Sized>(
        &self,
        endpoint: &str,
        body: &T,
    ) -> Result<reqwest::Response, RelayError> {
        let url = self.url(endpoint)?;
        // Serialize once so the signed bytes are the sent bytes.
        let bytes = serde_json::to_vec(body)?;
        let authorization = self.auth.header("POST", url.path(), &bytes);

        let resp = self
            .client
            .post(url)
            .header(CONTENT_TYPE, "application/json")
            .header(AUTHORIZATION, authorization)
            .body(bytes)
            .send()
            .await?;

        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(RelayError::Status {
                status: status.as_u16(),
                body,
            });
        }

        debug!(endpoint, status = status.as_u16(), "POST succeeded");
        Ok(resp)
    }
}

#[async_trait]
impl IncidentApi for IrisClient {
    async fn post_email(&self, payload: &EmailPayload) -> Result<(), RelayError> {
        self.post(EMAIL_ENDPOINT, payload).await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use secrecy::SecretString;

    use super::*;

    fn client(host: &str) -> IrisClient {
        IrisClient::new(&ApiConfig {
            host: host.into(),
            app: "oncall-relay".into(),
            app_key: SecretString::from("s3cret"),
        })
        .unwrap()
    }

    #[test]
    fn url_includes_version() {
        let url = client("http://localhost:16649").url(EMAIL_ENDPOINT).unwrap();
        assert_eq!(url.as_str(), "http://localhost:16649/v0/response/email");
    }

    #[test]
    fn url_handles_trailing_slash_and_prefix() {
        let url = client("https://iris.corp/api/").url(EMAIL_ENDPOINT).unwrap();
        assert_eq!(url.as_str(), "https://iris.corp/api/v0/response/email");
    }

    #[test]
    fn invalid_host_rejected() {
        let result = IrisClient::new(&ApiConfig {
            host: "not a url".into(),
            app: "a".into(),
            app_key: SecretString::from("k"),
        });
        assert!(matches!(result, Err(RelayError::InvalidHost { .. })));
    }

    #[test]
    fn payload_json_shape() {
        let payload = EmailPayload {
            headers: vec![Header::new("From", "alice@example.com")],
            body: "hello".into(),
        };
        let json = serde_json::to_value(&payload).unwrap();
        assert_eq!(
            json,
            serde_json::json!({
                "headers": [{"name": "From", "value": "alice@example.com"}],
                "body": "hello"
            })
        );
    }

    #[tokio::test]
    async fn transport_failure_surfaces_as_error() {
        let port = {
            let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
            listener.local_addr().unwrap().port()
        };
        let client = client(&format!("http://127.0.0.1:{port}"));
        let payload = EmailPayload {
            headers: vec![],
            body: String::new(),
        };
        let err = client.post_email(&payload).await.unwrap_err();
        assert!(matches!(err, RelayError::Transport(_)));
    }
}
