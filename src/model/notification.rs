use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Notification urgency; each level maps to a minimum age before dispatch so
/// low-priority noise can be batched into fewer sink calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Low,
    Normal,
    High,
}

impl Urgency {
    /// Minimum delay before a notification of this urgency is sent.
    pub fn send_delay(&self) -> Duration {
        match self {
            Urgency::High => Duration::ZERO,
            Urgency::Normal => Duration::from_secs(60),
            Urgency::Low => Duration::from_secs(15 * 60),
        }
    }
}

/// A queued notification awaiting dispatch through the configured sinks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    pub title: String,
    pub body: String,
    pub urgency: Urgency,
    pub created_at: DateTime<Utc>,
    #[serde(default)]
    pub sent: bool,
}

impl Notification {
    pub fn new(title: impl Into<String>, body: impl Into<String>, urgency: Urgency) -> Self {
        Self {
            id: Uuid::now_v7(),
            title: title.into(),
            body: body.into(),
            urgency,
            created_at: Utc::now(),
            sent: false,
        }
    }

    /// True once the urgency delay has elapsed and the notification may be
    /// included in the next dispatch batch.
    pub fn due(&self, now: DateTime<Utc>) -> bool {
        !self.sent
            && now.signed_duration_since(self.created_at).to_std().unwrap_or(Duration::ZERO)
                >= self.urgency.send_delay()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeDelta;

    #[test]
    fn test_high_urgency_is_immediately_due() {
        let n = Notification::new("t", "b", Urgency::High);
        assert!(n.due(Utc::now()));
    }

    #[test]
    fn test_normal_urgency_waits_for_delay() {
        let n = Notification::new("t", "b", Urgency::Normal);
        assert!(!n.due(Utc::now()));
        assert!(n.due(Utc::now() + TimeDelta::seconds(61)));
    }

    #[test]
    fn test_sent_notifications_never_due() {
        let mut n = Notification::new("t", "b", Urgency::High);
        n.sent = true;
        assert!(!n.due(Utc::now() + TimeDelta::days(1)));
    }
}
