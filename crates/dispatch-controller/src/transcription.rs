//! Transcription adapter.
//!
//! Transcription is advisory and fully decoupled from the live audio
//! path: completed transmissions are queued to a background worker, and
//! the arbiter never waits on it. A flaky backend is retried with
//! backoff; a full queue or an exhausted retry budget degrades the
//! transmission record to `failed`, nothing else.

use crate::actors::messages::{ChannelCommand, ChannelEvent};
use crate::errors::DcError;
use crate::history::HistoryStore;
use crate::observability;
use crate::resilience::BackoffSchedule;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Depth of the pending-transcription queue. Overflow marks the
/// transmission `failed` rather than applying backpressure upstream.
const TRANSCRIPTION_QUEUE_DEPTH: usize = 256;

/// Attempts per job before the record is marked `failed`.
const TRANSCRIPTION_ATTEMPTS: u32 = 3;

/// Backoff between retries against the backend. The worker is off the
/// live path, so the pauses only delay the transcript, never a release.
fn retry_schedule() -> BackoffSchedule {
    BackoffSchedule::new(Duration::from_millis(500), 2, Duration::from_secs(5))
}

/// A completed transmission awaiting transcription.
#[derive(Debug)]
pub struct TranscriptionJob {
    pub transmission_id: Uuid,
    pub channel_id: String,
    pub audio_ref: String,
    pub duration_ms: u64,
    /// Mailbox of the owning channel actor, for broadcasting the result
    /// in that channel's sequence order.
    pub notify: mpsc::Sender<ChannelCommand>,
}

/// Output of a transcription backend.
#[derive(Debug, Clone)]
pub struct TranscriptionResult {
    pub text: String,
    pub confidence: f32,
}

/// A speech-to-text backend.
pub trait Transcriber: Send + Sync + 'static {
    fn transcribe(
        &self,
        job: &TranscriptionJob,
    ) -> impl Future<Output = Result<TranscriptionResult, DcError>> + Send;
}

/// Fallback backend used when no external speech service is configured.
/// Emits a placeholder transcript so downstream consumers see a uniform
/// record shape; confidence 0.0 marks it as non-speech-derived.
#[derive(Debug, Default, Clone, Copy)]
pub struct OfflineTranscriber;

impl Transcriber for OfflineTranscriber {
    async fn transcribe(&self, job: &TranscriptionJob) -> Result<TranscriptionResult, DcError> {
        let seconds = job.duration_ms as f64 / 1000.0;
        Ok(TranscriptionResult {
            text: format!("[voice transmission, {seconds:.1}s]"),
            confidence: 0.0,
        })
    }
}

/// Submission handle held by channel actors.
#[derive(Clone)]
pub struct TranscriptionHandle {
    sender: mpsc::Sender<TranscriptionJob>,
}

impl TranscriptionHandle {
    /// Queue a job without waiting.
    ///
    /// # Errors
    ///
    /// `TranscriptionUnavailable` if the queue is full or the worker is
    /// gone. The caller marks the transmission `failed` and moves on.
    pub fn try_submit(&self, job: TranscriptionJob) -> Result<(), DcError> {
        self.sender
            .try_send(job)
            .map_err(|e| match e {
                mpsc::error::TrySendError::Full(_) => {
                    DcError::TranscriptionUnavailable("queue full".to_string())
                }
                mpsc::error::TrySendError::Closed(_) => {
                    DcError::TranscriptionUnavailable("worker stopped".to_string())
                }
            })
    }
}

/// Background worker that drains the job queue one at a time.
pub struct TranscriptionAdapter;

impl TranscriptionAdapter {
    /// Spawn the worker task and return the submission handle.
    pub fn spawn<T: Transcriber>(
        transcriber: T,
        history: Arc<HistoryStore>,
        cancel_token: CancellationToken,
    ) -> TranscriptionHandle {
        let (sender, mut receiver) = mpsc::channel::<TranscriptionJob>(TRANSCRIPTION_QUEUE_DEPTH);

        tokio::spawn(async move {
            info!(target: "dc.transcription", "Transcription worker started");
            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => {
                        info!(target: "dc.transcription", "Transcription worker shutting down");
                        break;
                    }
                    job = receiver.recv() => {
                        let Some(job) = job else { break };
                        Self::process(&transcriber, &history, job).await;
                    }
                }
            }
        });

        TranscriptionHandle { sender }
    }

    async fn process<T: Transcriber>(transcriber: &T, history: &HistoryStore, job: TranscriptionJob) {
        let transmission_id = job.transmission_id;
        let schedule = retry_schedule();
        let mut attempt = 0;
        let outcome = loop {
            match transcriber.transcribe(&job).await {
                Ok(result) => break Ok(result),
                Err(e) if attempt + 1 < TRANSCRIPTION_ATTEMPTS => {
                    warn!(
                        target: "dc.transcription",
                        transmission_id = %transmission_id,
                        attempt,
                        error = %e,
                        "Transcription attempt failed, backing off"
                    );
                    tokio::time::sleep(schedule.jittered_delay(attempt)).await;
                    attempt += 1;
                }
                Err(e) => break Err(e),
            }
        };

        match outcome {
            Ok(result) => {
                if let Err(e) = history
                    .attach_transcription(transmission_id, result.text.clone(), result.confidence)
                    .await
                {
                    // Record disappeared or was already patched; drop the result.
                    warn!(
                        target: "dc.transcription",
                        transmission_id = %transmission_id,
                        error = %e,
                        "Discarding transcription result"
                    );
                    return;
                }
                observability::record_transcription("complete");
                debug!(
                    target: "dc.transcription",
                    transmission_id = %transmission_id,
                    channel_id = %job.channel_id,
                    confidence = result.confidence,
                    "Transcription attached"
                );
                // Best effort: if the channel actor is gone, the history
                // record already holds the text.
                let _ = job.notify.try_send(ChannelCommand::Broadcast {
                    event: ChannelEvent::TranscriptionUpdate {
                        transmission_id,
                        text: result.text,
                        confidence: result.confidence,
                    },
                });
            }
            Err(e) => {
                observability::record_transcription("failed");
                warn!(
                    target: "dc.transcription",
                    transmission_id = %transmission_id,
                    error = %e,
                    "Transcription failed, retry budget exhausted"
                );
                if let Err(e) = history.mark_transcription_failed(transmission_id).await {
                    warn!(
                        target: "dc.transcription",
                        transmission_id = %transmission_id,
                        error = %e,
                        "Failed to record transcription failure"
                    );
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::history::Transmission;
    use chrono::Utc;
    use dispatch_protocol::types::{ReleaseReason, TranscriptionStatus};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedTranscriber {
        text: &'static str,
    }

    impl Transcriber for FixedTranscriber {
        async fn transcribe(&self, _job: &TranscriptionJob) -> Result<TranscriptionResult, DcError> {
            Ok(TranscriptionResult {
                text: self.text.to_string(),
                confidence: 0.87,
            })
        }
    }

    #[derive(Default)]
    struct FailingTranscriber {
        calls: AtomicUsize,
    }

    impl Transcriber for FailingTranscriber {
        async fn transcribe(&self, _job: &TranscriptionJob) -> Result<TranscriptionResult, DcError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(DcError::TranscriptionUnavailable("backend outage".to_string()))
        }
    }

    /// Fails the first call, succeeds afterwards.
    #[derive(Default)]
    struct FlakyTranscriber {
        calls: AtomicUsize,
    }

    impl Transcriber for FlakyTranscriber {
        async fn transcribe(&self, _job: &TranscriptionJob) -> Result<TranscriptionResult, DcError> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                Err(DcError::TranscriptionUnavailable("transient".to_string()))
            } else {
                Ok(TranscriptionResult {
                    text: "second try".to_string(),
                    confidence: 0.75,
                })
            }
        }
    }

    async fn pending_transmission(history: &HistoryStore) -> Uuid {
        let id = Uuid::new_v4();
        history
            .record_transmission_started(Transmission {
                transmission_id: id,
                channel_id: "ops-1".to_string(),
                user_id: "unit-7".to_string(),
                started_at: Utc::now(),
                ended_at: None,
                duration_ms: None,
                audio_ref: format!("audio/{id}"),
                transcription_status: TranscriptionStatus::None,
                transcription_text: None,
                transcription_confidence: None,
                release_reason: None,
            })
            .await;
        history
            .finalize_transmission(id, Utc::now(), 1800, ReleaseReason::ExplicitStop)
            .await
            .unwrap();
        id
    }

    fn job(transmission_id: Uuid, notify: mpsc::Sender<ChannelCommand>) -> TranscriptionJob {
        TranscriptionJob {
            transmission_id,
            channel_id: "ops-1".to_string(),
            audio_ref: format!("audio/{transmission_id}"),
            duration_ms: 1800,
            notify,
        }
    }

    #[tokio::test]
    async fn test_successful_job_attaches_and_notifies() {
        let history = Arc::new(HistoryStore::new());
        let id = pending_transmission(&history).await;
        let (notify_tx, mut notify_rx) = mpsc::channel(8);

        let transcriber = FixedTranscriber { text: "copy that" };
        TranscriptionAdapter::process(&transcriber, &history, job(id, notify_tx)).await;

        let record = history.get_transmission(id).await.unwrap();
        assert_eq!(record.transcription_status, TranscriptionStatus::Complete);
        assert_eq!(record.transcription_text.as_deref(), Some("copy that"));

        let cmd = notify_rx.try_recv().unwrap();
        let ChannelCommand::Broadcast {
            event: ChannelEvent::TranscriptionUpdate { text, .. },
        } = cmd
        else {
            panic!("expected transcription broadcast");
        };
        assert_eq!(text, "copy that");
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_job_retries_then_marks_record_failed() {
        let history = Arc::new(HistoryStore::new());
        let id = pending_transmission(&history).await;
        let (notify_tx, mut notify_rx) = mpsc::channel(8);

        let transcriber = FailingTranscriber::default();
        TranscriptionAdapter::process(&transcriber, &history, job(id, notify_tx)).await;

        // Full retry budget spent before giving up
        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 3);
        let record = history.get_transmission(id).await.unwrap();
        assert_eq!(record.transcription_status, TranscriptionStatus::Failed);
        assert!(notify_rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_transient_failure_retried_to_success() {
        let history = Arc::new(HistoryStore::new());
        let id = pending_transmission(&history).await;
        let (notify_tx, mut notify_rx) = mpsc::channel(8);

        let transcriber = FlakyTranscriber::default();
        TranscriptionAdapter::process(&transcriber, &history, job(id, notify_tx)).await;

        assert_eq!(transcriber.calls.load(Ordering::SeqCst), 2);
        let record = history.get_transmission(id).await.unwrap();
        assert_eq!(record.transcription_status, TranscriptionStatus::Complete);
        assert_eq!(record.transcription_text.as_deref(), Some("second try"));
        assert!(notify_rx.try_recv().is_ok(), "retry success still broadcasts");
    }

    #[tokio::test]
    async fn test_offline_transcriber_placeholder() {
        let (notify_tx, _notify_rx) = mpsc::channel(1);
        let result = OfflineTranscriber
            .transcribe(&job(Uuid::new_v4(), notify_tx))
            .await
            .unwrap();
        assert_eq!(result.text, "[voice transmission, 1.8s]");
        assert!((result.confidence - 0.0).abs() < f32::EPSILON);
    }

    #[tokio::test]
    async fn test_try_submit_full_queue_is_unavailable() {
        let (sender, _receiver) = mpsc::channel(1);
        let handle = TranscriptionHandle { sender };
        let (notify_tx, _notify_rx) = mpsc::channel(1);

        handle.try_submit(job(Uuid::new_v4(), notify_tx.clone())).unwrap();
        let result = handle.try_submit(job(Uuid::new_v4(), notify_tx));
        assert!(matches!(result, Err(DcError::TranscriptionUnavailable(_))));
    }

    #[tokio::test]
    async fn test_spawned_worker_drains_queue() {
        let history = Arc::new(HistoryStore::new());
        let id = pending_transmission(&history).await;
        let cancel = CancellationToken::new();
        let handle = TranscriptionAdapter::spawn(
            FixedTranscriber { text: "en route" },
            Arc::clone(&history),
            cancel.clone(),
        );

        let (notify_tx, mut notify_rx) = mpsc::channel(8);
        handle.try_submit(job(id, notify_tx)).unwrap();

        // Worker runs asynchronously; wait for the broadcast it emits last.
        let cmd = notify_rx.recv().await.unwrap();
        assert!(matches!(cmd, ChannelCommand::Broadcast { .. }));

        let record = history.get_transmission(id).await.unwrap();
        assert_eq!(record.transcription_text.as_deref(), Some("en route"));
        cancel.cancel();
    }
}
