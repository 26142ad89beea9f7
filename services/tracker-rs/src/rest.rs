//! Kafka REST proxy transport (v2 JSON embedded format).

use async_trait::async_trait;
use reqwest::header::{ACCEPT, CONTENT_TYPE};
use reqwest::{RequestBuilder, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::Credentials;
use crate::error::{ConnectError, SendError};
use crate::transport::{Connector, Delivery, OutboundMessage, Producer};

pub const KAFKA_JSON_V2: &str = "application/vnd.kafka.json.v2+json";
pub const KAFKA_V2: &str = "application/vnd.kafka.v2+json";

pub struct RestProxyConnector {
    base_url: String,
    credentials: Option<Credentials>,
    topic: String,
    connect_timeout: Duration,
    send_timeout: Duration,
}

impl RestProxyConnector {
    pub fn new(
        base_url: String,
        credentials: Option<Credentials>,
        topic: String,
        connect_timeout: Duration,
        send_timeout: Duration,
    ) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            credentials,
            topic,
            connect_timeout,
            send_timeout,
        }
    }

    pub fn topic_url(&self) -> String {
        format!("{}/topics/{}", self.base_url, self.topic)
    }
}

fn authorize(request: RequestBuilder, credentials: Option<&Credentials>) -> RequestBuilder {
    match credentials {
        Some(creds) => request.basic_auth(&creds.username, Some(&creds.password)),
        None => request,
    }
}

#[async_trait]
impl Connector for RestProxyConnector {
    /// A REST "session" is a fresh HTTP client whose credentials the proxy
    /// has accepted for the target topic.
    async fn connect(&self) -> Result<Arc<dyn Producer>, ConnectError> {
        let http = reqwest::Client::builder()
            .connect_timeout(self.connect_timeout)
            .timeout(self.send_timeout)
            .build()
            .map_err(|e| ConnectError::Unreachable(e.to_string()))?;

        let topic_url = self.topic_url();
        let response = authorize(http.get(&topic_url), self.credentials.as_ref())
            .header(ACCEPT, KAFKA_V2)
            .timeout(self.connect_timeout)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ConnectError::Timeout(self.connect_timeout)
                } else {
                    ConnectError::Unreachable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ConnectError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        Ok(Arc::new(RestProxyProducer {
            http,
            topic_url,
            credentials: self.credentials.clone(),
            send_timeout: self.send_timeout,
        }))
    }
}

pub struct RestProxyProducer {
    http: reqwest::Client,
    topic_url: String,
    credentials: Option<Credentials>,
    send_timeout: Duration,
}

#[derive(Debug, Serialize)]
pub struct ProduceRequest<'a> {
    pub records: Vec<ProduceRecord<'a>>,
}

#[derive(Debug, Serialize)]
pub struct ProduceRecord<'a> {
    pub key: &'a str,
    pub value: Value,
    pub headers: BTreeMap<&'a str, &'a str>,
}

impl<'a> ProduceRequest<'a> {
    pub fn from_message(message: &'a OutboundMessage) -> Result<Self, SendError> {
        let value = serde_json::from_slice(&message.payload)
            .map_err(|e| SendError::Encode(e.to_string()))?;
        let headers = message
            .headers
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect();
        Ok(Self {
            records: vec![ProduceRecord {
                key: &message.key,
                value,
                headers,
            }],
        })
    }
}

#[derive(Debug, Deserialize)]
pub struct ProduceResponse {
    #[serde(default)]
    pub offsets: Vec<RecordOffset>,
}

#[derive(Debug, Deserialize)]
pub struct RecordOffset {
    pub partition: Option<i32>,
    pub offset: Option<i64>,
    pub error_code: Option<i64>,
    pub error: Option<String>,
}

impl ProduceResponse {
    /// Placement of the single record we sent, or the proxy's per-record error.
    pub fn delivery(&self, status: StatusCode) -> Result<Delivery, SendError> {
        match self.offsets.first() {
            Some(RecordOffset {
                error_code: Some(code),
                error,
                ..
            }) => Err(SendError::Rejected {
                status: status.as_u16(),
                body: format!("error_code {code}: {}", error.as_deref().unwrap_or("")),
            }),
            Some(record) => Ok(Delivery {
                partition: record.partition,
                offset: record.offset,
            }),
            None => Ok(Delivery::default()),
        }
    }
}

#[async_trait]
impl Producer for RestProxyProducer {
    async fn send(&self, message: &OutboundMessage) -> Result<Delivery, SendError> {
        let body = ProduceRequest::from_message(message)?;
        let response = authorize(self.http.post(&self.topic_url), self.credentials.as_ref())
            .header(CONTENT_TYPE, KAFKA_JSON_V2)
            .header(ACCEPT, KAFKA_V2)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SendError::Timeout(self.send_timeout)
                } else {
                    SendError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SendError::Rejected {
                status: status.as_u16(),
                body,
            });
        }

        let reply: ProduceResponse = response
            .json()
            .await
            .map_err(|e| SendError::Transport(e.to_string()))?;
        reply.delivery(status)
    }
}
