//! Scripted [`Sender`] for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tokio::time::Instant;

use super::{SendError, Sender, SenderResponse};

#[derive(Debug)]
pub(crate) struct SentBody {
    pub at: Instant,
    pub body: serde_json::Value,
}

/// Replays scripted responses in order, then answers 200.
#[derive(Debug, Default)]
pub(crate) struct MockSender {
    script: Mutex<VecDeque<Result<SenderResponse, SendError>>>,
    sent: Mutex<Vec<SentBody>>,
    delay: Option<Duration>,
}

impl MockSender {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_statuses(self, statuses: impl IntoIterator<Item = u16>) -> Self {
        self.with_responses(statuses.into_iter().map(|s| Ok(SenderResponse::status(s))))
    }

    pub fn with_responses(
        self,
        responses: impl IntoIterator<Item = Result<SenderResponse, SendError>>,
    ) -> Self {
        self.script.lock().unwrap().extend(responses);
        self
    }

    /// Makes every send take `delay` before answering.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> usize {
        self.sent.lock().unwrap().len()
    }

    pub fn call_times(&self) -> Vec<Instant> {
        self.sent.lock().unwrap().iter().map(|s| s.at).collect()
    }

    pub fn bodies(&self) -> Vec<serde_json::Value> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .map(|s| s.body.clone())
            .collect()
    }

    /// Number of records across every body sent, retries included.
    pub fn records_sent(&self) -> usize {
        self.bodies()
            .iter()
            .flat_map(|body| body.as_object().cloned().unwrap_or_default())
            .map(|(_, list)| list.as_array().map_or(0, Vec::len))
            .sum()
    }
}

#[async_trait]
impl Sender for MockSender {
    async fn send(&self, body: &[u8]) -> Result<SenderResponse, SendError> {
        let at = Instant::now();
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.sent.lock().unwrap().push(SentBody {
            at,
            body: serde_json::from_slice(body).unwrap(),
        });
        self.script
            .lock()
            .unwrap()
            .pop_front()
            .unwrap_or(Ok(SenderResponse::status(200)))
    }
}
