//! Configuration types, built from environment variables.

use std::net::SocketAddr;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;

/// Fallback poll interval when none (or a non-numeric one) is configured.
pub const DEFAULT_SLEEP_INTERVAL_SECS: u64 = 60;

const DEFAULT_API_HOST: &str = "http://localhost:16649";
const DEFAULT_METRICS_ADDR: &str = "0.0.0.0:9092";

/// Mailbox connection settings.
#[derive(Debug, Clone)]
pub struct MailboxConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    /// Folder to poll.
    pub mailbox: String,
}

/// Outbound proxy settings for the mailbox transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyConfig {
    pub host: String,
    pub port: u16,
}

impl ProxyConfig {
    /// Parse `http://host:port` (scheme optional).
    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let invalid = |message: &str| ConfigError::InvalidValue {
            key: "MAIL_RELAY_PROXY".into(),
            message: message.into(),
        };

        let rest = raw.trim();
        let rest = match rest.split_once("://") {
            Some(("http", rest)) => rest,
            Some((scheme, _)) => return Err(invalid(&format!("unsupported scheme {scheme}"))),
            None => rest,
        };
        let rest = rest.trim_end_matches('/');

        let (host, port) = rest
            .rsplit_once(':')
            .ok_or_else(|| invalid("expected host:port"))?;
        if host.is_empty() {
            return Err(invalid("empty host"));
        }
        let port = port.parse().map_err(|_| invalid("port is not a number"))?;

        Ok(Self {
            host: host.to_string(),
            port,
        })
    }
}

/// Transport options injected into the mailbox client at construction.
#[derive(Debug, Clone, Default)]
pub struct TransportOptions {
    pub proxy: Option<ProxyConfig>,
    /// Socket read timeout for mailbox I/O; `None` blocks indefinitely.
    pub read_timeout: Option<Duration>,
}

/// Downstream API settings.
#[derive(Debug, Clone)]
pub struct ApiConfig {
    pub host: String,
    pub app: String,
    pub app_key: SecretString,
}

/// Which metrics sink to flush into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MetricsSinkKind {
    Log,
    Prometheus { addr: SocketAddr },
    None,
}

/// Metrics settings.
#[derive(Debug, Clone)]
pub struct MetricsConfig {
    pub sink: MetricsSinkKind,
    pub flush_interval: Duration,
}

/// Full relay configuration.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    pub mailbox: MailboxConfig,
    pub transport: TransportOptions,
    pub api: ApiConfig,
    pub metrics: MetricsConfig,
    /// Pause between poll cycles.
    pub sleep_interval: Duration,
}

impl RelayConfig {
    /// Build config from the process environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Build config from an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let required = |key: &str| {
            lookup(key)
                .filter(|v| !v.trim().is_empty())
                .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
        };

        let host = required("MAIL_RELAY_IMAP_HOST")?;
        let port = match lookup("MAIL_RELAY_IMAP_PORT") {
            Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                key: "MAIL_RELAY_IMAP_PORT".into(),
                message: format!("{raw:?} is not a port number"),
            })?,
            None => 993,
        };
        let mailbox = MailboxConfig {
            host,
            port,
            username: required("MAIL_RELAY_USERNAME")?,
            password: SecretString::from(required("MAIL_RELAY_PASSWORD")?),
            mailbox: lookup("MAIL_RELAY_MAILBOX").unwrap_or_else(|| "INBOX".to_string()),
        };

        let proxy = lookup("MAIL_RELAY_PROXY")
            .filter(|v| !v.trim().is_empty())
            .map(|raw| ProxyConfig::parse(&raw))
            .transpose()?;
        let read_timeout = match lookup("MAIL_RELAY_IMAP_TIMEOUT") {
            Some(raw) if !raw.trim().is_empty() => {
                let secs: u64 = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "MAIL_RELAY_IMAP_TIMEOUT".into(),
                    message: format!("{raw:?} is not a number of seconds"),
                })?;
                (secs > 0).then_some(Duration::from_secs(secs))
            }
            _ => None,
        };
        let transport = TransportOptions {
            proxy,
            read_timeout,
        };

        let api = ApiConfig {
            host: lookup("MAIL_RELAY_API_HOST").unwrap_or_else(|| DEFAULT_API_HOST.to_string()),
            app: required("MAIL_RELAY_APP")?,
            app_key: SecretString::from(required("MAIL_RELAY_APP_KEY")?),
        };

        let sink = match lookup("MAIL_RELAY_METRICS").as_deref().map(str::trim) {
            None | Some("") | Some("log") => MetricsSinkKind::Log,
            Some("none") => MetricsSinkKind::None,
            Some("prometheus") => {
                let raw = lookup("MAIL_RELAY_METRICS_ADDR")
                    .unwrap_or_else(|| DEFAULT_METRICS_ADDR.to_string());
                let addr = raw.trim().parse().map_err(|_| ConfigError::InvalidValue {
                    key: "MAIL_RELAY_METRICS_ADDR".into(),
                    message: format!("{raw:?} is not a socket address"),
                })?;
                MetricsSinkKind::Prometheus { addr }
            }
            Some(other) => {
                return Err(ConfigError::InvalidValue {
                    key: "MAIL_RELAY_METRICS".into(),
                    message: format!("unknown sink {other:?} (expected log, prometheus or none)"),
                });
            }
        };
        let metrics = MetricsConfig {
            sink,
            // A zero period would make the flush ticker panic.
            flush_interval: Duration::from_secs(
                parse_interval_secs(lookup("MAIL_RELAY_METRICS_INTERVAL").as_deref()).max(1),
            ),
        };

        Ok(Self {
            mailbox,
            transport,
            api,
            metrics,
            sleep_interval: Duration::from_secs(parse_interval_secs(
                lookup("MAIL_RELAY_SLEEP_INTERVAL").as_deref(),
            )),
        })
    }
}

/// Parse an interval in seconds. Missing or non-numeric values yield 60.
pub fn parse_interval_secs(raw: Option<&str>) -> u64 {
    raw.and_then(|s| s.trim().parse().ok())
        .unwrap_or(DEFAULT_SLEEP_INTERVAL_SECS)
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use secrecy::ExposeSecret;

    use super::*;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    fn minimal() -> Vec<(&'static str, &'static str)> {
        vec![
            ("MAIL_RELAY_IMAP_HOST", "imap.example.com"),
            ("MAIL_RELAY_USERNAME", "oncall@example.com"),
            ("MAIL_RELAY_PASSWORD", "hunter2"),
            ("MAIL_RELAY_APP", "oncall-relay"),
            ("MAIL_RELAY_APP_KEY", "s3cret"),
        ]
    }

    #[test]
    fn minimal_config_uses_defaults() {
        let config = RelayConfig::from_lookup(lookup_from(&minimal())).unwrap();
        assert_eq!(config.mailbox.port, 993);
        assert_eq!(config.mailbox.mailbox, "INBOX");
        assert_eq!(config.mailbox.password.expose_secret(), "hunter2");
        assert_eq!(config.api.host, "http://localhost:16649");
        assert_eq!(config.api.app_key.expose_secret(), "s3cret");
        assert_eq!(config.sleep_interval, Duration::from_secs(60));
        assert_eq!(config.metrics.sink, MetricsSinkKind::Log);
        assert!(config.transport.proxy.is_none());
        assert!(config.transport.read_timeout.is_none());
    }

    #[test]
    fn imap_timeout_is_opt_in() {
        let mut pairs = minimal();
        pairs.push(("MAIL_RELAY_IMAP_TIMEOUT", "45"));
        let config = RelayConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.transport.read_timeout, Some(Duration::from_secs(45)));

        let mut pairs = minimal();
        pairs.push(("MAIL_RELAY_IMAP_TIMEOUT", "0"));
        let config = RelayConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert!(config.transport.read_timeout.is_none());

        let mut pairs = minimal();
        pairs.push(("MAIL_RELAY_IMAP_TIMEOUT", "soon"));
        assert!(RelayConfig::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn missing_required_value_is_an_error() {
        let mut pairs = minimal();
        pairs.retain(|(k, _)| *k != "MAIL_RELAY_APP_KEY");
        let err = RelayConfig::from_lookup(lookup_from(&pairs)).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(ref k) if k == "MAIL_RELAY_APP_KEY"));
    }

    #[test]
    fn blank_required_value_counts_as_missing() {
        let mut pairs = minimal();
        pairs.retain(|(k, _)| *k != "MAIL_RELAY_IMAP_HOST");
        pairs.push(("MAIL_RELAY_IMAP_HOST", "  "));
        assert!(RelayConfig::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn non_numeric_sleep_interval_falls_back() {
        let mut pairs = minimal();
        pairs.push(("MAIL_RELAY_SLEEP_INTERVAL", "soon"));
        let config = RelayConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.sleep_interval, Duration::from_secs(60));
    }

    #[test]
    fn numeric_sleep_interval_is_used() {
        let mut pairs = minimal();
        pairs.push(("MAIL_RELAY_SLEEP_INTERVAL", "15"));
        let config = RelayConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(config.sleep_interval, Duration::from_secs(15));
    }

    #[test]
    fn prometheus_sink_parses_address() {
        let mut pairs = minimal();
        pairs.push(("MAIL_RELAY_METRICS", "prometheus"));
        pairs.push(("MAIL_RELAY_METRICS_ADDR", "127.0.0.1:9100"));
        let config = RelayConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(
            config.metrics.sink,
            MetricsSinkKind::Prometheus {
                addr: "127.0.0.1:9100".parse().unwrap()
            }
        );
    }

    #[test]
    fn unknown_metrics_sink_rejected() {
        let mut pairs = minimal();
        pairs.push(("MAIL_RELAY_METRICS", "statsd"));
        assert!(RelayConfig::from_lookup(lookup_from(&pairs)).is_err());
    }

    #[test]
    fn proxy_is_passed_into_transport_options() {
        let mut pairs = minimal();
        pairs.push(("MAIL_RELAY_PROXY", "http://proxy.corp:3128"));
        let config = RelayConfig::from_lookup(lookup_from(&pairs)).unwrap();
        assert_eq!(
            config.transport.proxy,
            Some(ProxyConfig {
                host: "proxy.corp".into(),
                port: 3128
            })
        );
    }

    #[test]
    fn proxy_parse_variants() {
        assert_eq!(ProxyConfig::parse("proxy:8080").unwrap().port, 8080);
        assert_eq!(ProxyConfig::parse("http://proxy:8080/").unwrap().host, "proxy");
        assert!(ProxyConfig::parse("socks5://proxy:1080").is_err());
        assert!(ProxyConfig::parse("proxy").is_err());
        assert!(ProxyConfig::parse(":8080").is_err());
    }

    #[test]
    fn parse_interval_defaults() {
        assert_eq!(parse_interval_secs(None), 60);
        assert_eq!(parse_interval_secs(Some("abc")), 60);
        assert_eq!(parse_interval_secs(Some(" 30 ")), 30);
    }
}
