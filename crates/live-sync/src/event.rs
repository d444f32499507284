use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{Record, RecordId};

/// Kind of row mutation carried by a change event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeKind {
	Insert,
	Update,
	Delete,
}

impl ChangeKind {
	pub const ALL: [Self; 3] = [Self::Insert, Self::Update, Self::Delete];

	/// Parses a wire tag, ignoring case (`INSERT`, `insert`, ...).
	#[must_use]
	pub fn parse(tag: &str) -> Option<Self> {
		Self::ALL
			.into_iter()
			.find(|kind| kind.as_str().eq_ignore_ascii_case(tag))
	}

	#[must_use]
	pub const fn as_str(self) -> &'static str {
		match self {
			Self::Insert => "INSERT",
			Self::Update => "UPDATE",
			Self::Delete => "DELETE",
		}
	}
}

impl fmt::Display for ChangeKind {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// A change event exactly as the feed delivered it, before any validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawChangeEvent {
	#[serde(rename = "eventType")]
	pub event_type: String,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub new: Option<Value>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub old: Option<Value>,
}

impl RawChangeEvent {
	#[must_use]
	pub fn insert(new: Value) -> Self {
		Self {
			event_type: ChangeKind::Insert.as_str().to_string(),
			new: Some(new),
			old: None,
		}
	}

	#[must_use]
	pub fn update(new: Value, old: Option<Value>) -> Self {
		Self {
			event_type: ChangeKind::Update.as_str().to_string(),
			new: Some(new),
			old,
		}
	}

	#[must_use]
	pub fn delete(old: Value) -> Self {
		Self {
			event_type: ChangeKind::Delete.as_str().to_string(),
			new: None,
			old: Some(old),
		}
	}
}

/// A validated change event, ready to be reconciled against the mirror.
#[derive(Debug, Clone, PartialEq)]
pub enum ChangeEvent {
	Insert {
		record: Record,
	},
	Update {
		record: Record,
		old: Option<Value>,
	},
	Delete {
		id: RecordId,
		old: Option<Value>,
	},
}

impl ChangeEvent {
	#[must_use]
	pub const fn kind(&self) -> ChangeKind {
		match self {
			Self::Insert { .. } => ChangeKind::Insert,
			Self::Update { .. } => ChangeKind::Update,
			Self::Delete { .. } => ChangeKind::Delete,
		}
	}

	#[must_use]
	pub const fn id(&self) -> &RecordId {
		match self {
			Self::Insert { record } | Self::Update { record, .. } => &record.id,
			Self::Delete { id, .. } => id,
		}
	}
}

/// Subscription status reported by a channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelStatus {
	Subscribed,
	ChannelError,
	TimedOut,
	Closed,
}

impl ChannelStatus {
	#[must_use]
	pub const fn is_failure(self) -> bool {
		!matches!(self, Self::Subscribed)
	}
}

impl fmt::Display for ChannelStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::Subscribed => "SUBSCRIBED",
			Self::ChannelError => "CHANNEL_ERROR",
			Self::TimedOut => "TIMED_OUT",
			Self::Closed => "CLOSED",
		})
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusEvent {
	pub status: ChannelStatus,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub detail: Option<String>,
}

impl StatusEvent {
	#[must_use]
	pub const fn new(status: ChannelStatus) -> Self {
		Self {
			status,
			detail: None,
		}
	}

	#[must_use]
	pub fn with_detail(status: ChannelStatus, detail: impl Into<String>) -> Self {
		Self {
			status,
			detail: Some(detail.into()),
		}
	}

	/// Human readable reason, used when the status ends up as a terminal error.
	#[must_use]
	pub fn reason(&self) -> String {
		self.detail.as_ref().map_or_else(
			|| self.status.to_string(),
			|detail| format!("{}: {detail}", self.status),
		)
	}
}

/// Everything a channel delivers, in arrival order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FeedMessage {
	Status(StatusEvent),
	Change(RawChangeEvent),
}

impl From<StatusEvent> for FeedMessage {
	fn from(status: StatusEvent) -> Self {
		Self::Status(status)
	}
}

impl From<RawChangeEvent> for FeedMessage {
	fn from(change: RawChangeEvent) -> Self {
		Self::Change(change)
	}
}

#[cfg(test)]
mod tests {
	use serde_json::json;

	use super::*;

	#[test]
	fn parses_tags_case_insensitively() {
		assert_eq!(ChangeKind::parse("INSERT"), Some(ChangeKind::Insert));
		assert_eq!(ChangeKind::parse("update"), Some(ChangeKind::Update));
		assert_eq!(ChangeKind::parse("Delete"), Some(ChangeKind::Delete));
		assert_eq!(ChangeKind::parse("TRUNCATE"), None);
	}

	#[test]
	fn feed_messages_from_wire_json() {
		let change: FeedMessage = serde_json::from_value(json!({
			"eventType": "UPDATE",
			"new": { "id": 3, "status": "Ready" },
			"old": {}
		}))
		.unwrap();

		assert_eq!(
			change,
			FeedMessage::Change(RawChangeEvent::update(
				json!({ "id": 3, "status": "Ready" }),
				Some(json!({}))
			))
		);

		let status: FeedMessage = serde_json::from_value(json!({
			"status": "timed_out",
			"detail": "no heartbeat"
		}))
		.unwrap();

		assert_eq!(
			status,
			FeedMessage::Status(StatusEvent::with_detail(
				ChannelStatus::TimedOut,
				"no heartbeat"
			))
		);
	}

	#[test]
	fn status_reason_includes_detail() {
		assert_eq!(
			StatusEvent::new(ChannelStatus::Closed).reason(),
			"CLOSED".to_string()
		);
		assert_eq!(
			StatusEvent::with_detail(ChannelStatus::ChannelError, "socket reset").reason(),
			"CHANNEL_ERROR: socket reset".to_string()
		);
	}
}
