//! Emergency alert lifecycle.
//!
//! Alerts live independently of channel PTT state: raising, acknowledging,
//! and resolving never contend with the transmission arbiter. Transitions
//! are strictly forward (`active -> acknowledged -> resolved`); an invalid
//! transition is rejected and leaves the alert unchanged.

use crate::errors::DcError;
use chrono::{DateTime, Utc};
use dispatch_protocol::types::{AlertStatus, AlertType};
use serde::Serialize;
use uuid::Uuid;

/// An emergency alert, channel-scoped or global.
///
/// Retained permanently in the history store; there is no delete.
#[derive(Debug, Clone, Serialize)]
pub struct EmergencyAlert {
    pub alert_id: Uuid,
    /// `None` means global: delivered to every live session.
    pub channel_id: Option<String>,
    pub alert_type: AlertType,
    pub raised_by: String,
    pub description: String,
    pub status: AlertStatus,
    pub raised_at: DateTime<Utc>,
    pub acknowledged_by: Option<String>,
    pub acknowledged_at: Option<DateTime<Utc>>,
    pub resolved_by: Option<String>,
    pub resolved_at: Option<DateTime<Utc>>,
    pub resolution_notes: Option<String>,
}

impl EmergencyAlert {
    /// Create a new alert in `active` state.
    #[must_use]
    pub fn raise(
        channel_id: Option<String>,
        alert_type: AlertType,
        raised_by: String,
        description: String,
    ) -> Self {
        Self {
            alert_id: Uuid::new_v4(),
            channel_id,
            alert_type,
            raised_by,
            description,
            status: AlertStatus::Active,
            raised_at: Utc::now(),
            acknowledged_by: None,
            acknowledged_at: None,
            resolved_by: None,
            resolved_at: None,
            resolution_notes: None,
        }
    }

    /// Acknowledge an active alert.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the current state is `active`; the alert
    /// is left unchanged on rejection.
    pub fn acknowledge(&mut self, user_id: &str) -> Result<(), DcError> {
        if self.status != AlertStatus::Active {
            return Err(DcError::InvalidTransition {
                current: self.status,
                attempted: "acknowledge",
            });
        }
        self.status = AlertStatus::Acknowledged;
        self.acknowledged_by = Some(user_id.to_string());
        self.acknowledged_at = Some(Utc::now());
        Ok(())
    }

    /// Resolve an acknowledged alert. `resolved` is terminal.
    ///
    /// # Errors
    ///
    /// `InvalidTransition` unless the current state is `acknowledged`.
    pub fn resolve(&mut self, user_id: &str, notes: String) -> Result<(), DcError> {
        if self.status != AlertStatus::Acknowledged {
            return Err(DcError::InvalidTransition {
                current: self.status,
                attempted: "resolve",
            });
        }
        self.status = AlertStatus::Resolved;
        self.resolved_by = Some(user_id.to_string());
        self.resolved_at = Some(Utc::now());
        self.resolution_notes = Some(notes);
        Ok(())
    }

    /// True when this alert is global rather than channel-scoped.
    #[must_use]
    pub fn is_global(&self) -> bool {
        self.channel_id.is_none()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    fn active_alert() -> EmergencyAlert {
        EmergencyAlert::raise(
            Some("ops-1".to_string()),
            AlertType::BackupRequest,
            "unit-7".to_string(),
            "backup needed".to_string(),
        )
    }

    #[test]
    fn test_raise_starts_active() {
        let alert = active_alert();
        assert_eq!(alert.status, AlertStatus::Active);
        assert!(alert.acknowledged_by.is_none());
        assert!(!alert.is_global());
    }

    #[test]
    fn test_full_lifecycle() {
        let mut alert = active_alert();

        alert.acknowledge("dispatcher-1").unwrap();
        assert_eq!(alert.status, AlertStatus::Acknowledged);
        assert_eq!(alert.acknowledged_by.as_deref(), Some("dispatcher-1"));

        alert.resolve("dispatcher-1", "units on scene".to_string()).unwrap();
        assert_eq!(alert.status, AlertStatus::Resolved);
        assert_eq!(alert.resolution_notes.as_deref(), Some("units on scene"));
    }

    #[test]
    fn test_resolve_active_rejected() {
        let mut alert = active_alert();
        let result = alert.resolve("dispatcher-1", "notes".to_string());
        assert!(matches!(
            result,
            Err(DcError::InvalidTransition {
                current: AlertStatus::Active,
                attempted: "resolve"
            })
        ));
        // State unchanged
        assert_eq!(alert.status, AlertStatus::Active);
        assert!(alert.resolved_by.is_none());
    }

    #[test]
    fn test_acknowledge_twice_rejected() {
        let mut alert = active_alert();
        alert.acknowledge("dispatcher-1").unwrap();

        let result = alert.acknowledge("dispatcher-2");
        assert!(matches!(
            result,
            Err(DcError::InvalidTransition {
                current: AlertStatus::Acknowledged,
                attempted: "acknowledge"
            })
        ));
        // First acknowledgment stands
        assert_eq!(alert.acknowledged_by.as_deref(), Some("dispatcher-1"));
    }

    #[test]
    fn test_acknowledge_resolved_rejected() {
        let mut alert = active_alert();
        alert.acknowledge("dispatcher-1").unwrap();
        alert.resolve("dispatcher-1", "done".to_string()).unwrap();

        let result = alert.acknowledge("dispatcher-2");
        assert!(matches!(
            result,
            Err(DcError::InvalidTransition {
                current: AlertStatus::Resolved,
                ..
            })
        ));
        assert_eq!(alert.status, AlertStatus::Resolved);
    }

    #[test]
    fn test_global_alert() {
        let alert = EmergencyAlert::raise(
            None,
            AlertType::OfficerDown,
            "unit-3".to_string(),
            "officer down at 5th and Main".to_string(),
        );
        assert!(alert.is_global());
    }
}
