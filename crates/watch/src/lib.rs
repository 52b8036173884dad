//! Change notification bus: committed mutations fan out to prefix-scoped
//! subscribers over bounded queues.
//!
//! Publishing is strictly non-blocking. A subscriber that cannot keep up
//! loses events on its own queue only; the apply path never stalls.

pub mod bus;

use serde::{Deserialize, Serialize};

pub use bus::{Subscriber, WatchBus, WatchStats};

/// Default per-subscriber queue capacity.
pub const DEFAULT_WATCH_BUFFER: usize = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventKind {
    Put,
    Delete,
}

/// One key mutation as seen by watchers. `value` is set for puts,
/// `prev_value` for deletes that could resolve the old value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prev_value: Option<String>,
}

impl Event {
    pub fn put(key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: EventKind::Put,
            key: key.into(),
            value: Some(value.into()),
            prev_value: None,
        }
    }

    pub fn delete(key: impl Into<String>, prev_value: Option<String>) -> Self {
        Self {
            kind: EventKind::Delete,
            key: key.into(),
            value: None,
            prev_value,
        }
    }

    /// Byte-wise prefix match; the empty prefix matches every key.
    pub fn matches_prefix(&self, prefix: &str) -> bool {
        self.key.as_bytes().starts_with(prefix.as_bytes())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_prefix_matching_is_bytewise() {
        let event = Event::put("foo/a", "1");
        assert!(event.matches_prefix(""));
        assert!(event.matches_prefix("foo"));
        assert!(event.matches_prefix("foo/"));
        assert!(event.matches_prefix("foo/a"));
        assert!(!event.matches_prefix("foo/ab"));
        assert!(!event.matches_prefix("bar"));
    }

    #[test]
    fn test_event_json_shape() {
        let put = Event::put("x", "v");
        assert_eq!(
            serde_json::to_string(&put).unwrap(),
            r#"{"type":"put","key":"x","value":"v"}"#
        );

        let delete = Event::delete("x", Some("v".into()));
        assert_eq!(
            serde_json::to_string(&delete).unwrap(),
            r#"{"type":"delete","key":"x","prev_value":"v"}"#
        );

        let bare_delete = Event::delete("gone", None);
        assert_eq!(
            serde_json::to_string(&bare_delete).unwrap(),
            r#"{"type":"delete","key":"gone"}"#
        );

        let parsed: Event =
            serde_json::from_str(r#"{"type":"put","key":"x","value":"v"}"#).unwrap();
        assert_eq!(parsed, put);
    }
}
