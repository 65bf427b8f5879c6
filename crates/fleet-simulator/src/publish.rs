//! Publish collaborators.
//!
//! Every publisher takes one [`TelemetryPacket`] and delivers it as a JSON
//! envelope. Retries and timeouts live here, not in the scheduler.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use fleet_domain::{FieldValue, TelemetryPacket};
use serde_json::{Map, Value, json};
use tracing::{debug, info, warn};

use crate::error::PublishError;

// =============================================================================
// ENVELOPE
// =============================================================================

/// Broker topic for a device: `{prefix}/{device_id}/from`.
pub fn topic(prefix: &str, device_id: &str) -> String {
    format!("{prefix}/{device_id}/from")
}

/// NATS subject for a device: `{prefix}.{device_id}.from`.
pub fn nats_subject(prefix: &str, device_id: &str) -> String {
    format!("{}.{device_id}.from", prefix.replace('/', "."))
}

/// Encode a packet as `{"state":{"reported":{...}}}`.
pub fn encode_envelope(packet: &TelemetryPacket) -> Value {
    let mut reported = Map::new();
    for (name, value) in &packet.fields {
        reported.insert(name.clone(), json!(value));
    }

    #[allow(clippy::cast_possible_truncation)]
    let speed = packet.speed_kmh.round() as i64;
    #[allow(clippy::cast_possible_truncation)]
    let angle = packet.heading_deg.rem_euclid(360.0).round() as i64 % 360;

    reported.insert("ts".into(), json!(packet.timestamp_ms()));
    reported.insert("latlng".into(), json!(packet.position.to_string()));
    reported.insert("sp".into(), json!(speed));
    reported.insert("ang".into(), json!(angle));
    reported.insert("evt".into(), json!(0));
    // Priority is raised on ticks with a door event
    let door_event = matches!(packet.fields.get("door_open"), Some(FieldValue::Int(n)) if *n > 0);
    reported.insert("pr".into(), json!(i64::from(door_event)));
    reported.insert("message_id".into(), json!(packet.message_id.to_string()));

    json!({ "state": { "reported": reported } })
}

// =============================================================================
// PUBLISHERS
// =============================================================================

/// Delivers packets somewhere. Shared across entity tasks.
#[async_trait]
pub trait Publisher: Send + Sync {
    fn name(&self) -> &'static str;

    async fn publish(&self, packet: &TelemetryPacket) -> Result<(), PublishError>;
}

/// Logs every envelope instead of sending it.
#[derive(Debug, Clone)]
pub struct LogPublisher {
    topic_prefix: String,
}

impl LogPublisher {
    pub fn new(topic_prefix: impl Into<String>) -> Self {
        Self {
            topic_prefix: topic_prefix.into(),
        }
    }
}

#[async_trait]
impl Publisher for LogPublisher {
    fn name(&self) -> &'static str {
        "log"
    }

    async fn publish(&self, packet: &TelemetryPacket) -> Result<(), PublishError> {
        let payload = serde_json::to_string(&encode_envelope(packet))?;
        info!(
            topic = %topic(&self.topic_prefix, &packet.device_id),
            phase = packet.phase.as_str(),
            payload = %payload,
            "telemetry"
        );
        Ok(())
    }
}

/// POSTs envelopes to `{endpoint}/{device_id}`.
#[derive(Debug, Clone)]
pub struct HttpPublisher {
    client: reqwest::Client,
    endpoint: String,
    auth_token: Option<String>,
}

impl HttpPublisher {
    /// # Errors
    ///
    /// Returns [`PublishError::Transport`] if the HTTP client cannot be built.
    pub fn new(endpoint: &str, auth_token: Option<String>, timeout: Duration) -> Result<Self, PublishError> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_owned(),
            auth_token,
        })
    }

    fn url(&self, device_id: &str) -> String {
        format!("{}/{device_id}", self.endpoint)
    }
}

#[async_trait]
impl Publisher for HttpPublisher {
    fn name(&self) -> &'static str {
        "http"
    }

    async fn publish(&self, packet: &TelemetryPacket) -> Result<(), PublishError> {
        let mut request = self
            .client
            .post(self.url(&packet.device_id))
            .json(&encode_envelope(packet));
        if let Some(token) = &self.auth_token {
            request = request.bearer_auth(token);
        }

        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(PublishError::Status(response.status().as_u16()));
        }
        debug!(device_id = %packet.device_id, "telemetry posted");
        Ok(())
    }
}

/// Publishes envelopes on `{prefix}.{device_id}.from`.
#[derive(Debug, Clone)]
pub struct NatsPublisher {
    client: async_nats::Client,
    topic_prefix: String,
}

impl NatsPublisher {
    /// Connect to a NATS server.
    ///
    /// # Errors
    ///
    /// Returns [`PublishError::Transport`] if the connection cannot be established.
    pub async fn connect(url: &str, topic_prefix: impl Into<String>) -> Result<Self, PublishError> {
        info!(url = url, "connecting to NATS server");
        let client = async_nats::connect(url)
            .await
            .map_err(|e| PublishError::Transport(format!("failed to connect to {url}: {e}")))?;
        info!("NATS connection established");
        Ok(Self {
            client,
            topic_prefix: topic_prefix.into(),
        })
    }
}

#[async_trait]
impl Publisher for NatsPublisher {
    fn name(&self) -> &'static str {
        "nats"
    }

    async fn publish(&self, packet: &TelemetryPacket) -> Result<(), PublishError> {
        let subject = nats_subject(&self.topic_prefix, &packet.device_id);
        let payload = serde_json::to_vec(&encode_envelope(packet))?;
        self.client
            .publish(subject.clone(), payload.into())
            .await
            .map_err(|e| PublishError::Transport(format!("failed to publish to {subject}: {e}")))?;
        Ok(())
    }
}

// =============================================================================
// RETRY
// =============================================================================

/// Bounded attempts with a per-attempt timeout and linear backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub backoff: Duration,
    pub timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff: Duration::from_millis(500),
            timeout: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    ///
    /// # Errors
    ///
    /// The first non-retryable error, or [`PublishError::RetriesExhausted`].
    pub async fn run<F, Fut>(&self, mut op: F) -> Result<(), PublishError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<(), PublishError>>,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let err = match tokio::time::timeout(self.timeout, op()).await {
                Ok(Ok(())) => return Ok(()),
                Ok(Err(e)) => e,
                Err(_) => PublishError::Timeout {
                    timeout_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
                },
            };

            if !err.is_retryable() {
                return Err(err);
            }
            if attempt >= attempts {
                return Err(PublishError::RetriesExhausted {
                    attempts,
                    last: Box::new(err),
                });
            }

            debug!(attempt, error = %err, "publish attempt failed, retrying");
            tokio::time::sleep(self.backoff * attempt).await;
        }
    }
}

/// Wraps a publisher with a [`RetryPolicy`].
pub struct RetryingPublisher {
    inner: Arc<dyn Publisher>,
    policy: RetryPolicy,
}

impl RetryingPublisher {
    pub fn new(inner: Arc<dyn Publisher>, policy: RetryPolicy) -> Self {
        Self { inner, policy }
    }
}

#[async_trait]
impl Publisher for RetryingPublisher {
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    async fn publish(&self, packet: &TelemetryPacket) -> Result<(), PublishError> {
        let result = self.policy.run(|| self.inner.publish(packet)).await;
        if let Err(e) = &result {
            warn!(
                publisher = self.inner.name(),
                device_id = %packet.device_id,
                error = %e,
                "publish failed"
            );
        }
        result
    }
}

// =============================================================================
// TEST DOUBLES
// =============================================================================
