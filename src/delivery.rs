//! Bounded-retry delivery of one document.
//!
//! [`Deliverer`] wraps a [`Transport`] and gives each document a fixed
//! number of attempts with a constant pause between them. The result is a
//! [`DeliveryOutcome`] carrying the [`AttemptRecord`] that ends up in the
//! document's sidecar metadata.

use std::time::Duration;

use bytes::Bytes;
use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::transport::Transport;

/// Default number of attempts per document.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;
/// Default pause between attempts.
pub const DEFAULT_BACKOFF: Duration = Duration::from_secs(1);

/// Prefix of the error note recorded when no acknowledgement arrived.
pub const NO_ACK_NOTE: &str = "no_ack_or_timeout";
/// Prefix of the error note recorded when the document could not be read.
pub const READ_ERROR_NOTE: &str = "read_error";

/// Attempt budget and fixed backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    backoff: Duration,
}

impl RetryPolicy {
    /// Create a policy allowing `max_attempts` sends separated by `backoff`.
    #[must_use]
    pub const fn new(max_attempts: u32, backoff: Duration) -> Self {
        Self {
            max_attempts,
            backoff,
        }
    }

    /// Return the attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 { self.max_attempts }

    /// Return the pause between attempts.
    #[must_use]
    pub const fn backoff(&self) -> Duration { self.backoff }
}

impl Default for RetryPolicy {
    fn default() -> Self { Self::new(DEFAULT_MAX_ATTEMPTS, DEFAULT_BACKOFF) }
}

/// Acknowledgement payload, classified by whether it is readable text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum AckContent {
    /// UTF-8 acknowledgement.
    Text(String),
    /// Acknowledgement that is not valid UTF-8.
    Binary(Vec<u8>),
}

impl AckContent {
    /// Classify raw acknowledgement bytes.
    #[must_use]
    pub fn from_bytes(raw: Bytes) -> Self {
        match String::from_utf8(raw.to_vec()) {
            Ok(text) => Self::Text(text),
            Err(e) => Self::Binary(e.into_bytes()),
        }
    }

    /// Return the text form, if the acknowledgement was textual.
    #[must_use]
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(text) => Some(text),
            Self::Binary(_) => None,
        }
    }
}

/// State of the most recent attempt for a document.
///
/// Each attempt overwrites the previous values; nothing accumulates.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttemptRecord {
    /// Number of the last attempt made (0 if none was made).
    pub attempts: u32,
    /// When the last send completed or failed.
    pub sent_at: Option<DateTime<Utc>>,
    /// Acknowledgement from the successful attempt.
    pub ack: Option<AckContent>,
    /// Note describing why the last attempt failed.
    pub error: Option<String>,
}

/// Result of a delivery cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryOutcome {
    /// `true` when an acknowledgement was received.
    pub delivered: bool,
    /// The final attempt record.
    pub record: AttemptRecord,
}

/// Applies a [`RetryPolicy`] around a [`Transport`].
#[derive(Debug, Clone)]
pub struct Deliverer<T> {
    transport: T,
    policy: RetryPolicy,
}

impl<T: Transport> Deliverer<T> {
    /// Create a deliverer.
    #[must_use]
    pub const fn new(transport: T, policy: RetryPolicy) -> Self { Self { transport, policy } }

    /// Return the retry policy.
    #[must_use]
    pub const fn policy(&self) -> RetryPolicy { self.policy }

    /// Return the wrapped transport.
    #[must_use]
    pub const fn transport(&self) -> &T { &self.transport }

    /// Deliver the document stored at `path`.
    ///
    /// The file is re-read before every attempt. A read failure ends the
    /// cycle at once, since retrying cannot make a missing file appear.
    pub async fn deliver(&self, path: &Utf8Path) -> DeliveryOutcome {
        self.run(|| async move {
            tokio::fs::read(path)
                .await
                .map_err(|e| format!("{READ_ERROR_NOTE}:{e}"))
        })
        .await
    }

    /// Deliver an in-memory payload.
    pub async fn deliver_bytes(&self, payload: &[u8]) -> DeliveryOutcome {
        self.run(|| async move { Ok(payload.to_vec()) }).await
    }

    async fn run<F, Fut>(&self, mut load: F) -> DeliveryOutcome
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Vec<u8>, String>>,
    {
        let mut record = AttemptRecord::default();
        for attempt in 1..=self.policy.max_attempts {
            record.attempts = attempt;
            let payload = match load().await {
                Ok(payload) => payload,
                Err(note) => {
                    warn!(attempt, error = %note, "document unreadable; abandoning delivery");
                    record.error = Some(note);
                    return DeliveryOutcome {
                        delivered: false,
                        record,
                    };
                }
            };

            let result = self.transport.send(&payload).await;
            record.sent_at = Some(Utc::now());
            match result {
                Ok(ack) => {
                    info!(attempt, ack_len = ack.len(), "acknowledgement received");
                    record.ack = Some(AckContent::from_bytes(ack));
                    record.error = None;
                    return DeliveryOutcome {
                        delivered: true,
                        record,
                    };
                }
                Err(e) => {
                    warn!(attempt, max_attempts = self.policy.max_attempts, error = %e, "attempt failed");
                    record.error = Some(format!("{NO_ACK_NOTE}: {e}"));
                    if attempt < self.policy.max_attempts {
                        tokio::time::sleep(self.policy.backoff).await;
                    }
                }
            }
        }
        DeliveryOutcome {
            delivered: false,
            record,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{
            Mutex,
            atomic::{AtomicU32, Ordering},
        },
    };

    use async_trait::async_trait;
    use camino::Utf8PathBuf;
    use rstest::{fixture, rstest};
    use tempfile::TempDir;

    use super::*;
    use crate::transport::TransportError;

    /// Transport that replays a fixed script of outcomes.
    #[derive(Default)]
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<Bytes, ()>>>,
        calls: AtomicU32,
    }

    impl ScriptedTransport {
        fn failing_then_ack(failures: usize, ack: &'static [u8]) -> Self {
            let mut script: VecDeque<_> = std::iter::repeat_n(Err(()), failures).collect();
            script.push_back(Ok(Bytes::from_static(ack)));
            Self {
                script: Mutex::new(script),
                calls: AtomicU32::new(0),
            }
        }

        fn calls(&self) -> u32 { self.calls.load(Ordering::SeqCst) }
    }

    #[async_trait]
    impl Transport for ScriptedTransport {
        async fn send(&self, _payload: &[u8]) -> Result<Bytes, TransportError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let next = self
                .script
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .pop_front();
            match next {
                Some(Ok(ack)) => Ok(ack),
                Some(Err(())) | None => Err(TransportError::Closed),
            }
        }
    }

    fn policy(max_attempts: u32) -> RetryPolicy { RetryPolicy::new(max_attempts, Duration::from_millis(1)) }

    #[fixture]
    fn document() -> (TempDir, Utf8PathBuf) {
        let dir = TempDir::new().expect("temp dir");
        let path = Utf8PathBuf::from_path_buf(dir.path().join("order.edi")).expect("utf8 path");
        std::fs::write(&path, b"UNB+UNOA:1'").expect("write document");
        (dir, path)
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(5)]
    #[tokio::test]
    async fn always_failing_transport_uses_whole_budget(#[case] max_attempts: u32) {
        let deliverer = Deliverer::new(ScriptedTransport::default(), policy(max_attempts));

        let outcome = deliverer.deliver_bytes(b"UNB").await;

        assert!(!outcome.delivered);
        assert_eq!(outcome.record.attempts, max_attempts);
        assert_eq!(deliverer.transport().calls(), max_attempts);
        assert!(outcome.record.ack.is_none());
        assert!(
            outcome
                .record
                .error
                .as_deref()
                .is_some_and(|e| e.starts_with(NO_ACK_NOTE))
        );
        assert!(outcome.record.sent_at.is_some());
    }

    #[rstest]
    #[case(0, 3)]
    #[case(1, 3)]
    #[case(2, 3)]
    #[tokio::test]
    async fn stops_at_first_ack(#[case] failures: usize, #[case] max_attempts: u32) {
        let transport = ScriptedTransport::failing_then_ack(failures, b"UNB+ACK'");
        let deliverer = Deliverer::new(transport, policy(max_attempts));

        let outcome = deliverer.deliver_bytes(b"UNB").await;

        let expected_attempts = u32::try_from(failures).expect("small") + 1;
        assert!(outcome.delivered);
        assert_eq!(outcome.record.attempts, expected_attempts);
        assert_eq!(deliverer.transport().calls(), expected_attempts);
        assert_eq!(outcome.record.ack, Some(AckContent::Text("UNB+ACK'".to_owned())));
        assert_eq!(outcome.record.error, None);
    }

    #[rstest]
    #[case::fails_every_attempt(None, 3, 2)]
    #[case::first_attempt_acked(Some(0), 3, 0)]
    #[case::second_attempt_acked(Some(1), 3, 1)]
    #[case::single_attempt_budget(None, 1, 0)]
    #[tokio::test(start_paused = true)]
    async fn backs_off_only_between_attempts(
        #[case] failures: Option<usize>,
        #[case] max_attempts: u32,
        #[case] waited_secs: u64,
    ) {
        let transport = failures.map_or_else(ScriptedTransport::default, |n| {
            ScriptedTransport::failing_then_ack(n, b"ok")
        });
        let deliverer = Deliverer::new(
            transport,
            RetryPolicy::new(max_attempts, Duration::from_secs(1)),
        );
        let start = tokio::time::Instant::now();

        let outcome = deliverer.deliver_bytes(b"UNB").await;

        assert_eq!(outcome.delivered, failures.is_some());
        assert_eq!(start.elapsed(), Duration::from_secs(waited_secs));
    }

    #[rstest]
    #[tokio::test]
    async fn reads_document_from_disk(document: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = document;
        let deliverer = Deliverer::new(ScriptedTransport::failing_then_ack(0, b"ok"), policy(2));

        let outcome = deliverer.deliver(&path).await;

        assert!(outcome.delivered);
        assert_eq!(outcome.record.attempts, 1);
    }

    #[rstest]
    #[tokio::test]
    async fn unreadable_document_aborts_without_sending(document: (TempDir, Utf8PathBuf)) {
        let (_dir, path) = document;
        std::fs::remove_file(&path).expect("remove document");
        let deliverer = Deliverer::new(ScriptedTransport::default(), policy(3));

        let outcome = deliverer.deliver(&path).await;

        assert!(!outcome.delivered);
        assert_eq!(outcome.record.attempts, 1);
        assert_eq!(deliverer.transport().calls(), 0);
        assert!(outcome.record.sent_at.is_none());
        assert!(
            outcome
                .record
                .error
                .as_deref()
                .is_some_and(|e| e.starts_with(READ_ERROR_NOTE))
        );
    }

    #[tokio::test]
    async fn zero_budget_makes_no_attempt() {
        let deliverer = Deliverer::new(ScriptedTransport::default(), policy(0));
        let outcome = deliverer.deliver_bytes(b"UNB").await;
        assert!(!outcome.delivered);
        assert_eq!(outcome.record, AttemptRecord::default());
        assert_eq!(deliverer.transport().calls(), 0);
    }

    #[tokio::test]
    async fn each_invocation_restarts_the_counter() {
        let deliverer = Deliverer::new(ScriptedTransport::default(), policy(2));
        let first = deliverer.deliver_bytes(b"UNB").await;
        let second = deliverer.deliver_bytes(b"UNB").await;
        assert_eq!(first.record.attempts, 2);
        assert_eq!(second.record.attempts, 2);
        assert_eq!(deliverer.transport().calls(), 4);
    }

    #[rstest]
    #[case(Bytes::from_static(b"UNZ+1'"), AckContent::Text("UNZ+1'".to_owned()))]
    #[case(Bytes::from_static(&[0xC3, 0x28]), AckContent::Binary(vec![0xC3, 0x28]))]
    fn classifies_ack_bytes(#[case] raw: Bytes, #[case] expected: AckContent) {
        assert_eq!(AckContent::from_bytes(raw), expected);
    }

    #[test]
    fn ack_content_is_tagged_in_json() {
        let json = serde_json::to_value(AckContent::Text("AA".to_owned())).expect("serialize");
        assert_eq!(json, serde_json::json!({"kind": "text", "data": "AA"}));
    }
}
