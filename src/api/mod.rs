//! Sends decoded codes to the backend, one request at a time.

pub mod events;

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;

use crate::{
    config::{ApiMode, Settings},
    error::DispatchError,
    media::types::DecodedPayload,
    queue::DropQueue,
    stats::{Counter, PipelineStats},
};

use events::EventBuilder;

#[derive(Debug, PartialEq, Eq)]
pub enum Dispatched {
    Sent,
    /// Nothing to send for this payload (not an event record).
    Skipped,
}

pub struct ApiSender {
    client: reqwest::Client,
    base_url: String,
    api_path: String,
    mode: ApiMode,
    timeout: Duration,
    max_age: Option<Duration>,
    events: EventBuilder,
    stats: Arc<PipelineStats>,
}

impl ApiSender {
    pub fn new(settings: &Settings, stats: Arc<PipelineStats>) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.api_timeout())
            .build()?;
        Ok(Self {
            client,
            base_url: settings.api_url.trim_end_matches('/').to_string(),
            api_path: settings.api_path.clone(),
            mode: settings.api_mode,
            timeout: settings.api_timeout(),
            max_age: settings.payload_max_age(),
            events: EventBuilder::new(settings.sco_id()),
            stats,
        })
    }

    /// Drains `queue` until it is closed and empty, or `stop` fires. `stop`
    /// is only observed between requests.
    pub async fn run(mut self, queue: Arc<DropQueue<DecodedPayload>>, stop: CancellationToken) {
        log::info!("[APISender] starting: {} ({:?})", self.base_url, self.mode);
        loop {
            let item = tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                item = queue.pop() => item,
            };
            let Some(item) = item else {
                break;
            };

            let age = item.age();
            if let Some(max_age) = self.max_age {
                if age > max_age {
                    self.stats.incr(Counter::Errors);
                    log::warn!("[APISender] {}", DispatchError::Stale(age));
                    continue;
                }
            }

            match self.dispatch(item.into_inner()).await {
                Ok(Dispatched::Sent) => self.stats.incr(Counter::ApiSent),
                Ok(Dispatched::Skipped) => {}
                Err(e) => {
                    self.stats.incr(Counter::Errors);
                    log::warn!("[APISender] {}", e);
                }
            }
        }
        log::info!("[APISender] stopped");
    }

    pub async fn dispatch(&mut self, payload: DecodedPayload) -> Result<Dispatched, DispatchError> {
        let (url, body) = match self.mode {
            ApiMode::Generic => (
                format!("{}{}", self.base_url, self.api_path),
                json!({
                    "timestamp": payload.timestamp_secs(),
                    "qr_data": payload.data,
                }),
            ),
            ApiMode::ScoEvents => {
                let Some(record) = payload.data.as_text().and_then(events::parse_record) else {
                    log::debug!(
                        "[APISender] frame {}: code is not an event record, skipped",
                        payload.sequence
                    );
                    return Ok(Dispatched::Skipped);
                };
                let action = record?;
                let body = self.events.body(action, payload.timestamp_millis());
                (format!("{}{}", self.base_url, self.events.path(action)), body)
            }
        };

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.classify(e))?;
        let status = response.status();
        if !status.is_success() {
            return Err(DispatchError::Status(status.as_u16()));
        }
        log::debug!("[APISender] frame {} -> {} {}", payload.sequence, url, status);
        Ok(Dispatched::Sent)
    }

    fn classify(&self, e: reqwest::Error) -> DispatchError {
        if e.is_timeout() {
            DispatchError::Timeout(self.timeout)
        } else {
            DispatchError::Transport(e.to_string())
        }
    }
}
