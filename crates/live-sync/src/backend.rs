//! Seams to the outside world: the change feed we subscribe to and the
//! persistence service that owns the data.

use std::fmt;

use async_channel as chan;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::{
	error::{FeedError, PersistenceError},
	event::{ChangeKind, FeedMessage},
	record::{Fields, Record, RecordId},
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(Uuid);

impl ChannelId {
	#[must_use]
	pub fn new() -> Self {
		Self(Uuid::new_v4())
	}
}

impl Default for ChannelId {
	fn default() -> Self {
		Self::new()
	}
}

impl fmt::Display for ChannelId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		self.0.fmt(f)
	}
}

/// Which events a subscription asks the backend for.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventFilter {
	pub events: Vec<ChangeKind>,
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub filter: Option<String>,
}

impl EventFilter {
	#[must_use]
	pub fn all() -> Self {
		Self {
			events: ChangeKind::ALL.to_vec(),
			filter: None,
		}
	}

	#[must_use]
	pub fn accepts(&self, kind: ChangeKind) -> bool {
		self.events.contains(&kind)
	}
}

impl Default for EventFilter {
	fn default() -> Self {
		Self::all()
	}
}

/// One open subscription: status reports and change events, in arrival order.
#[derive(Debug)]
pub struct Channel {
	id: ChannelId,
	messages: chan::Receiver<FeedMessage>,
}

impl Channel {
	#[must_use]
	pub const fn new(id: ChannelId, messages: chan::Receiver<FeedMessage>) -> Self {
		Self { id, messages }
	}

	#[must_use]
	pub const fn id(&self) -> ChannelId {
		self.id
	}

	/// Next message, or `None` once the backend dropped its side of the channel.
	pub async fn recv(&self) -> Option<FeedMessage> {
		self.messages.recv().await.ok()
	}
}

/// A backend that streams row changes for a topic.
#[async_trait]
pub trait ChangeFeed: Send + Sync + 'static {
	/// Opens a channel and requests the subscription. The outcome of the request
	/// arrives later on the channel itself as a status message.
	async fn subscribe(&self, topic: &str, filter: &EventFilter) -> Result<Channel, FeedError>;

	async fn unsubscribe(&self, channel: ChannelId) -> Result<(), FeedError>;
}

/// The service that owns the data: snapshot reads and mutations.
///
/// Calls are never retried by the sync engine.
#[async_trait]
pub trait Persistence: Send + Sync + 'static {
	async fn fetch_all(&self, topic: &str) -> Result<Vec<Record>, PersistenceError>;

	async fn insert(&self, topic: &str, record: &Record) -> Result<(), PersistenceError>;

	async fn update(
		&self,
		topic: &str,
		id: &RecordId,
		diff: &Fields,
	) -> Result<(), PersistenceError>;

	async fn delete(&self, topic: &str, id: &RecordId) -> Result<(), PersistenceError>;
}

#[cfg(test)]
mod tests {
	use serde_json::{json, Value};

	use super::*;

	#[test]
	fn channel_id_serializes_as_plain_uuid() {
		let id = ChannelId::new();

		let value = serde_json::to_value(id).unwrap();
		assert_eq!(value, Value::String(id.to_string()));
		assert_eq!(serde_json::from_value::<ChannelId>(value).unwrap(), id);
	}

	#[test]
	fn filter_accepts_only_listed_kinds() {
		let filter =
			serde_json::from_value::<EventFilter>(json!({ "events": ["delete"] })).unwrap();

		assert!(filter.accepts(ChangeKind::Delete));
		assert!(!filter.accepts(ChangeKind::Insert));
		assert!(EventFilter::all().accepts(ChangeKind::Update));
	}
}
