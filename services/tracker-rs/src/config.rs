use serde::Deserialize;
use std::fmt;
use std::time::Duration;

use crate::enums::TransportKind;
use crate::error::ConfigError;

/// All configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub app_name: String,
    pub app_env: String,
    pub bind_addr: String,

    /// `None` disables delivery: events are accepted and logged only.
    pub broker: Option<BrokerConfig>,
    pub topic: String,
    pub client_id: String,
    /// Value of the `source` header stamped on every message.
    pub source: String,

    pub connect_timeout: Duration,
    pub send_timeout: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrokerConfig {
    Direct {
        brokers: Vec<String>,
        credentials: Option<Credentials>,
        tls: bool,
    },
    Rest {
        base_url: String,
        credentials: Option<Credentials>,
    },
}

#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Raw env shape as `envy` sees it (lowercased variable names).
#[derive(Debug, Deserialize)]
struct RawSettings {
    #[serde(default = "default_app_name")]
    app_name: String,
    #[serde(default = "default_app_env")]
    app_env: String,
    #[serde(default = "default_bind_addr")]
    bind_addr: String,

    kafka_transport: Option<String>,
    kafka_brokers: Option<String>,
    kafka_rest_url: Option<String>,
    kafka_username: Option<String>,
    kafka_api_key: Option<String>,
    kafka_password: Option<String>,
    kafka_api_secret: Option<String>,
    kafka_ssl: Option<String>,
    #[serde(default = "default_topic")]
    kafka_topic: String,
    #[serde(default = "default_client_id")]
    kafka_client_id: String,
    #[serde(default = "default_connect_timeout_ms")]
    kafka_connect_timeout_ms: u64,
    #[serde(default = "default_send_timeout_ms")]
    kafka_send_timeout_ms: u64,

    #[serde(default = "default_source")]
    tracking_source: String,
}

fn default_app_name() -> String {
    "portfolio-tracker".to_string()
}

fn default_app_env() -> String {
    "development".to_string()
}

fn default_bind_addr() -> String {
    "0.0.0.0:8000".to_string()
}

fn default_topic() -> String {
    "click-events".to_string()
}

fn default_client_id() -> String {
    "portfolio-tracker".to_string()
}

fn default_connect_timeout_ms() -> u64 {
    3000
}

fn default_send_timeout_ms() -> u64 {
    5000
}

fn default_source() -> String {
    "portfolio-website".to_string()
}

/// Treat blank variables the same as unset ones.
fn non_empty(value: Option<String>) -> Option<String> {
    value
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn credentials(user: Option<String>, secret: Option<String>) -> Option<Credentials> {
    match (user, secret) {
        (Some(username), Some(password)) => Some(Credentials { username, password }),
        _ => None,
    }
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_vars(std::env::vars())
    }

    /// Build from an explicit variable list. `from_env` delegates here.
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        let raw: RawSettings = envy::from_iter(vars)?;

        if raw.kafka_connect_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("KAFKA_CONNECT_TIMEOUT_MS"));
        }
        if raw.kafka_send_timeout_ms == 0 {
            return Err(ConfigError::ZeroTimeout("KAFKA_SEND_TIMEOUT_MS"));
        }

        let forced = non_empty(raw.kafka_transport)
            .map(|t| t.parse::<TransportKind>())
            .transpose()?;

        // API key/secret are the REST proxy's names for the same SASL pair.
        let creds = credentials(
            non_empty(raw.kafka_username).or(non_empty(raw.kafka_api_key)),
            non_empty(raw.kafka_password).or(non_empty(raw.kafka_api_secret)),
        );
        let brokers: Vec<String> = non_empty(raw.kafka_brokers)
            .map(|list| {
                list.split(',')
                    .map(str::trim)
                    .filter(|b| !b.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();
        let rest_url = non_empty(raw.kafka_rest_url).map(|u| u.trim_end_matches('/').to_string());
        let tls = non_empty(raw.kafka_ssl)
            .map(|v| v.eq_ignore_ascii_case("true") || v == "1")
            .unwrap_or(false);

        let direct = |brokers: Vec<String>| BrokerConfig::Direct {
            brokers,
            credentials: creds.clone(),
            tls,
        };
        let rest = |base_url: String| BrokerConfig::Rest {
            base_url,
            credentials: creds.clone(),
        };

        let broker = match forced {
            Some(TransportKind::Direct) => (!brokers.is_empty()).then(|| direct(brokers)),
            Some(TransportKind::Rest) => rest_url.map(rest),
            Some(TransportKind::Disabled) => None,
            None if !brokers.is_empty() => Some(direct(brokers)),
            None => rest_url.map(rest),
        };

        // librdkafka without OpenSSL refuses SSL protocols on every connect.
        if matches!(broker, Some(BrokerConfig::Direct { tls: true, .. })) && !cfg!(feature = "tls")
        {
            return Err(ConfigError::TlsUnavailable);
        }

        Ok(Self {
            app_name: raw.app_name,
            app_env: raw.app_env,
            bind_addr: raw.bind_addr,
            broker,
            topic: raw.kafka_topic,
            client_id: raw.kafka_client_id,
            source: raw.tracking_source,
            connect_timeout: Duration::from_millis(raw.kafka_connect_timeout_ms),
            send_timeout: Duration::from_millis(raw.kafka_send_timeout_ms),
        })
    }

    pub fn transport(&self) -> TransportKind {
        match self.broker {
            Some(BrokerConfig::Direct { .. }) => TransportKind::Direct,
            Some(BrokerConfig::Rest { .. }) => TransportKind::Rest,
            None => TransportKind::Disabled,
        }
    }

    /// Whether broker connection parameters are present. Never touches the network.
    pub fn kafka_available(&self) -> bool {
        self.broker.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn defaults_without_broker() {
        let config = Config::from_vars(vars(&[])).unwrap();
        assert!(config.broker.is_none());
        assert!(!config.kafka_available());
        assert_eq!(config.transport(), TransportKind::Disabled);
        assert_eq!(config.topic, "click-events");
        assert_eq!(config.connect_timeout, Duration::from_secs(3));
        assert_eq!(config.send_timeout, Duration::from_secs(5));
        assert_eq!(config.bind_addr, "0.0.0.0:8000");
    }

    #[test]
    fn brokers_select_direct_transport() {
        let config = Config::from_vars(vars(&[
            ("KAFKA_BROKERS", "b1:9092, b2:9092,,"),
            ("KAFKA_USERNAME", "user"),
            ("KAFKA_PASSWORD", "secret"),
            ("KAFKA_TOPIC", "sibi_web_events_store"),
        ]))
        .unwrap();

        assert_eq!(
            config.broker,
            Some(BrokerConfig::Direct {
                brokers: vec!["b1:9092".into(), "b2:9092".into()],
                credentials: Some(Credentials {
                    username: "user".into(),
                    password: "secret".into(),
                }),
                tls: false,
            })
        );
        assert_eq!(config.topic, "sibi_web_events_store");
    }

    #[cfg(feature = "tls")]
    #[test]
    fn ssl_flag_enables_tls_on_direct_transport() {
        let config = Config::from_vars(vars(&[
            ("KAFKA_BROKERS", "b1:9092"),
            ("KAFKA_SSL", "true"),
        ]))
        .unwrap();
        match config.broker {
            Some(BrokerConfig::Direct { tls, .. }) => assert!(tls),
            other => panic!("unexpected broker config: {other:?}"),
        }
    }

    #[cfg(not(feature = "tls"))]
    #[test]
    fn ssl_flag_without_tls_build_fails_at_startup() {
        assert!(matches!(
            Config::from_vars(vars(&[("KAFKA_BROKERS", "b1:9092"), ("KAFKA_SSL", "1")])),
            Err(ConfigError::TlsUnavailable)
        ));
    }

    #[test]
    fn ssl_flag_is_ignored_by_rest_transport() {
        let config = Config::from_vars(vars(&[
            ("KAFKA_REST_URL", "https://proxy.test"),
            ("KAFKA_SSL", "true"),
        ]))
        .unwrap();
        assert_eq!(config.transport(), TransportKind::Rest);
    }

    #[test]
    fn rest_url_with_api_key_pair() {
        let config = Config::from_vars(vars(&[
            ("KAFKA_REST_URL", "https://proxy.test:443/"),
            ("KAFKA_API_KEY", "key"),
            ("KAFKA_API_SECRET", "shh"),
        ]))
        .unwrap();

        assert_eq!(config.transport(), TransportKind::Rest);
        match config.broker {
            Some(BrokerConfig::Rest { base_url, credentials }) => {
                assert_eq!(base_url, "https://proxy.test:443");
                assert_eq!(credentials.unwrap().username, "key");
            }
            other => panic!("unexpected broker config: {other:?}"),
        }
    }

    #[test]
    fn half_credentials_are_ignored() {
        let config = Config::from_vars(vars(&[
            ("KAFKA_BROKERS", "b1:9092"),
            ("KAFKA_USERNAME", "user"),
        ]))
        .unwrap();
        match config.broker {
            Some(BrokerConfig::Direct { credentials, tls, .. }) => {
                assert!(credentials.is_none());
                assert!(!tls);
            }
            other => panic!("unexpected broker config: {other:?}"),
        }
    }

    #[test]
    fn forced_transport_without_address_disables_delivery() {
        let config = Config::from_vars(vars(&[
            ("KAFKA_TRANSPORT", "rest"),
            ("KAFKA_BROKERS", "b1:9092"),
        ]))
        .unwrap();
        assert!(!config.kafka_available());
    }

    #[test]
    fn blank_values_count_as_unset() {
        let config = Config::from_vars(vars(&[("KAFKA_BROKERS", "  ")])).unwrap();
        assert!(config.broker.is_none());
    }

    #[test]
    fn rejects_bad_values() {
        assert!(matches!(
            Config::from_vars(vars(&[("KAFKA_TRANSPORT", "smoke-signals")])),
            Err(ConfigError::UnknownTransport(_))
        ));
        assert!(matches!(
            Config::from_vars(vars(&[("KAFKA_SEND_TIMEOUT_MS", "0")])),
            Err(ConfigError::ZeroTimeout(_))
        ));
        assert!(matches!(
            Config::from_vars(vars(&[("KAFKA_CONNECT_TIMEOUT_MS", "soon")])),
            Err(ConfigError::Env(_))
        ));
    }

    #[test]
    fn credentials_debug_redacts_password() {
        let creds = Credentials {
            username: "user".into(),
            password: "hunter2".into(),
        };
        let rendered = format!("{creds:?}");
        assert!(rendered.contains("user"));
        assert!(!rendered.contains("hunter2"));
    }
}
