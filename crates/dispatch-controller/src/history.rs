//! Transmission history store.
//!
//! An append-only event log with materialized indexes for the read API.
//! The only permitted mutations are the narrow patch events: transmission
//! finalization, the single transcription attachment, and forward-only
//! alert status transitions. Everything else is immutable once appended.

use crate::alerts::EmergencyAlert;
use crate::errors::DcError;
use chrono::{DateTime, Utc};
use dispatch_protocol::types::{AlertStatus, ReleaseReason, TranscriptionStatus};
use serde::Serialize;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

/// A durable transmission record.
///
/// Created when a token is issued, finalized when the token is released,
/// immutable thereafter except the transcription fields.
#[derive(Debug, Clone, Serialize)]
pub struct Transmission {
    pub transmission_id: Uuid,
    pub channel_id: String,
    pub user_id: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
    pub duration_ms: Option<u64>,
    /// Opaque blob handle; blob storage is an external collaborator.
    pub audio_ref: String,
    pub transcription_status: TranscriptionStatus,
    pub transcription_text: Option<String>,
    pub transcription_confidence: Option<f32>,
    pub release_reason: Option<ReleaseReason>,
}

/// One entry in the append-only log.
#[derive(Debug, Clone)]
pub enum HistoryEvent {
    TransmissionStarted {
        transmission_id: Uuid,
        channel_id: String,
        user_id: String,
        at: DateTime<Utc>,
    },
    TransmissionEnded {
        transmission_id: Uuid,
        at: DateTime<Utc>,
        duration_ms: u64,
        reason: ReleaseReason,
    },
    TranscriptionAttached {
        transmission_id: Uuid,
    },
    TranscriptionFailed {
        transmission_id: Uuid,
    },
    AlertRaised {
        alert_id: Uuid,
        channel_id: Option<String>,
        at: DateTime<Utc>,
    },
    AlertAcknowledged {
        alert_id: Uuid,
        at: DateTime<Utc>,
    },
    AlertResolved {
        alert_id: Uuid,
        at: DateTime<Utc>,
    },
}

#[derive(Default)]
struct Inner {
    log: Vec<HistoryEvent>,
    transmissions: HashMap<Uuid, Transmission>,
    /// Insertion-ordered transmission ids per channel, for range queries.
    by_channel: HashMap<String, Vec<Uuid>>,
    alerts: HashMap<Uuid, EmergencyAlert>,
    alert_order: Vec<Uuid>,
}

/// Append-only history of transmissions and alerts.
#[derive(Default)]
pub struct HistoryStore {
    inner: RwLock<Inner>,
}

impl HistoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a transmission-started record. Called on token issue.
    pub async fn record_transmission_started(&self, record: Transmission) {
        let mut inner = self.inner.write().await;
        inner.log.push(HistoryEvent::TransmissionStarted {
            transmission_id: record.transmission_id,
            channel_id: record.channel_id.clone(),
            user_id: record.user_id.clone(),
            at: record.started_at,
        });
        inner
            .by_channel
            .entry(record.channel_id.clone())
            .or_default()
            .push(record.transmission_id);
        inner.transmissions.insert(record.transmission_id, record);
    }

    /// Finalize a transmission on token release and mark transcription
    /// `pending`. Single-writer: only the owning channel actor calls this.
    ///
    /// # Errors
    ///
    /// `Internal` if the id is unknown or already finalized.
    pub async fn finalize_transmission(
        &self,
        transmission_id: Uuid,
        ended_at: DateTime<Utc>,
        duration_ms: u64,
        reason: ReleaseReason,
    ) -> Result<(), DcError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .transmissions
            .get_mut(&transmission_id)
            .ok_or_else(|| DcError::Internal(format!("unknown transmission {transmission_id}")))?;

        if record.ended_at.is_some() {
            return Err(DcError::Internal(format!(
                "transmission {transmission_id} already finalized"
            )));
        }

        record.ended_at = Some(ended_at);
        record.duration_ms = Some(duration_ms);
        record.release_reason = Some(reason);
        record.transcription_status = TranscriptionStatus::Pending;

        inner.log.push(HistoryEvent::TransmissionEnded {
            transmission_id,
            at: ended_at,
            duration_ms,
            reason,
        });
        Ok(())
    }

    /// Attach the transcription result: `pending -> complete`. Appended once.
    ///
    /// # Errors
    ///
    /// `Internal` if the id is unknown or the record is not `pending`.
    pub async fn attach_transcription(
        &self,
        transmission_id: Uuid,
        text: String,
        confidence: f32,
    ) -> Result<(), DcError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .transmissions
            .get_mut(&transmission_id)
            .ok_or_else(|| DcError::Internal(format!("unknown transmission {transmission_id}")))?;

        if record.transcription_status != TranscriptionStatus::Pending {
            return Err(DcError::Internal(format!(
                "transmission {transmission_id} is not awaiting transcription"
            )));
        }

        record.transcription_status = TranscriptionStatus::Complete;
        record.transcription_text = Some(text);
        record.transcription_confidence = Some(confidence);

        inner
            .log
            .push(HistoryEvent::TranscriptionAttached { transmission_id });
        Ok(())
    }

    /// Record a transcription failure: `pending -> failed`. Non-fatal; the
    /// transmission stays retrievable and playable.
    ///
    /// # Errors
    ///
    /// `Internal` if the id is unknown or the record is not `pending`.
    pub async fn mark_transcription_failed(&self, transmission_id: Uuid) -> Result<(), DcError> {
        let mut inner = self.inner.write().await;
        let record = inner
            .transmissions
            .get_mut(&transmission_id)
            .ok_or_else(|| DcError::Internal(format!("unknown transmission {transmission_id}")))?;

        if record.transcription_status != TranscriptionStatus::Pending {
            return Err(DcError::Internal(format!(
                "transmission {transmission_id} is not awaiting transcription"
            )));
        }

        record.transcription_status = TranscriptionStatus::Failed;
        inner
            .log
            .push(HistoryEvent::TranscriptionFailed { transmission_id });
        Ok(())
    }

    /// Append a newly raised alert. Alerts are retained indefinitely.
    pub async fn record_alert(&self, alert: EmergencyAlert) {
        let mut inner = self.inner.write().await;
        inner.log.push(HistoryEvent::AlertRaised {
            alert_id: alert.alert_id,
            channel_id: alert.channel_id.clone(),
            at: alert.raised_at,
        });
        inner.alert_order.push(alert.alert_id);
        inner.alerts.insert(alert.alert_id, alert);
    }

    /// Apply the `active -> acknowledged` transition.
    ///
    /// # Errors
    ///
    /// `AlertNotFound` for an unknown id; `InvalidTransition` if the alert
    /// is not `active` (state left unchanged).
    pub async fn acknowledge_alert(
        &self,
        alert_id: Uuid,
        user_id: &str,
    ) -> Result<EmergencyAlert, DcError> {
        let mut inner = self.inner.write().await;
        let alert = inner
            .alerts
            .get_mut(&alert_id)
            .ok_or_else(|| DcError::AlertNotFound(alert_id.to_string()))?;

        alert.acknowledge(user_id)?;
        let snapshot = alert.clone();
        inner.log.push(HistoryEvent::AlertAcknowledged {
            alert_id,
            at: Utc::now(),
        });
        Ok(snapshot)
    }

    /// Apply the `acknowledged -> resolved` transition.
    ///
    /// # Errors
    ///
    /// `AlertNotFound` for an unknown id; `InvalidTransition` if the alert
    /// is not `acknowledged`.
    pub async fn resolve_alert(
        &self,
        alert_id: Uuid,
        user_id: &str,
        notes: String,
    ) -> Result<EmergencyAlert, DcError> {
        let mut inner = self.inner.write().await;
        let alert = inner
            .alerts
            .get_mut(&alert_id)
            .ok_or_else(|| DcError::AlertNotFound(alert_id.to_string()))?;

        alert.resolve(user_id, notes)?;
        let snapshot = alert.clone();
        inner.log.push(HistoryEvent::AlertResolved {
            alert_id,
            at: Utc::now(),
        });
        Ok(snapshot)
    }

    /// Look up a single transmission for playback.
    pub async fn get_transmission(&self, transmission_id: Uuid) -> Option<Transmission> {
        self.inner
            .read()
            .await
            .transmissions
            .get(&transmission_id)
            .cloned()
    }

    /// List transmissions on a channel within an optional time range,
    /// in start order.
    pub async fn list_transmissions(
        &self,
        channel_id: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Vec<Transmission> {
        let inner = self.inner.read().await;
        let Some(ids) = inner.by_channel.get(channel_id) else {
            return Vec::new();
        };
        ids.iter()
            .filter_map(|id| inner.transmissions.get(id))
            .filter(|t| from.is_none_or(|f| t.started_at >= f))
            .filter(|t| to.is_none_or(|u| t.started_at <= u))
            .cloned()
            .collect()
    }

    /// Look up a single alert.
    pub async fn get_alert(&self, alert_id: Uuid) -> Option<EmergencyAlert> {
        self.inner.read().await.alerts.get(&alert_id).cloned()
    }

    /// List alerts, optionally filtered by channel and status, in raise order.
    pub async fn list_alerts(
        &self,
        channel_id: Option<&str>,
        status: Option<AlertStatus>,
    ) -> Vec<EmergencyAlert> {
        let inner = self.inner.read().await;
        inner
            .alert_order
            .iter()
            .filter_map(|id| inner.alerts.get(id))
            .filter(|a| channel_id.is_none_or(|c| a.channel_id.as_deref() == Some(c)))
            .filter(|a| status.is_none_or(|s| a.status == s))
            .cloned()
            .collect()
    }

    /// Number of events appended so far.
    pub async fn event_count(&self) -> usize {
        self.inner.read().await.log.len()
    }
}
