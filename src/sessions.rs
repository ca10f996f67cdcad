//! Inactivity watchdog for logged-in sessions.
//!
//! A session expires after a fixed quiet period (default 15 minutes) and
//! enters a warning state two minutes before that. Any activity touch resets
//! the clock; logout clears the entry. Timestamps are passed in by the
//! caller, which keeps the state machine deterministic under test.

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Mutex;

/// Warning lead time before forced logout.
const WARNING_LEAD_MINUTES: i64 = 2;

/// Watchdog state for one session at one instant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SessionStatus {
    /// No activity recorded (never touched, or logged out).
    Unknown,
    Active {
        seconds_remaining: i64,
    },
    /// Inside the warning window before forced logout.
    Warning {
        seconds_remaining: i64,
    },
    Expired,
}

/// Tracks last-activity timestamps per session id.
pub struct SessionTracker {
    timeout: Duration,
    last_activity: Mutex<HashMap<String, DateTime<Utc>>>,
}

impl SessionTracker {
    pub fn new(timeout_minutes: u64) -> Self {
        Self {
            timeout: Duration::minutes(timeout_minutes as i64),
            last_activity: Mutex::new(HashMap::new()),
        }
    }

    /// Record activity, resetting the inactivity clock.
    pub fn touch(&self, session_id: &str, now: DateTime<Utc>) {
        let mut sessions = self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        sessions.insert(session_id.to_string(), now);
    }

    /// Current watchdog state. An expired session is removed on observation,
    /// matching the forced logout of the original watchdog.
    pub fn status(&self, session_id: &str, now: DateTime<Utc>) -> SessionStatus {
        let mut sessions = self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        let Some(&last) = sessions.get(session_id) else {
            return SessionStatus::Unknown;
        };

        let deadline = last + self.timeout;
        if now >= deadline {
            sessions.remove(session_id);
            return SessionStatus::Expired;
        }

        let seconds_remaining = (deadline - now).num_seconds();
        if deadline - now <= Duration::minutes(WARNING_LEAD_MINUTES) {
            SessionStatus::Warning { seconds_remaining }
        } else {
            SessionStatus::Active { seconds_remaining }
        }
    }

    /// Explicit logout; the watchdog forgets the session immediately.
    pub fn logout(&self, session_id: &str) {
        let mut sessions = self.last_activity.lock().unwrap_or_else(|e| e.into_inner());
        sessions.remove(session_id);
    }
}
