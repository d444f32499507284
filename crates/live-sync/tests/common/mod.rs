#![allow(dead_code)]

use std::{sync::Arc, time::Duration};

use od_live_sync::{
	memory::{MemoryFeed, MemoryPersistence},
	ChangeFeed, ConnectionState, LiveSync, Persistence, RawChangeEvent, Record, RecordId, SyncConfig,
};
use serde_json::{json, Value};
use tokio::time::sleep;

pub struct Harness {
	pub sync: LiveSync,
	pub feed: Arc<MemoryFeed>,
	pub persistence: Arc<MemoryPersistence>,
}

impl Harness {
	pub fn start(feed: MemoryFeed, rows: impl IntoIterator<Item = Record>) -> Self {
		Self::start_with(&SyncConfig::default(), feed, rows)
	}

	pub fn start_with(
		config: &SyncConfig,
		feed: MemoryFeed,
		rows: impl IntoIterator<Item = Record>,
	) -> Self {
		let feed = Arc::new(feed);
		let persistence = Arc::new(MemoryPersistence::with_rows(rows));

		let feed_handle: Arc<dyn ChangeFeed> = feed.clone();
		let persistence_handle: Arc<dyn Persistence> = persistence.clone();

		let sync = LiveSync::start(config, feed_handle, persistence_handle);

		Self {
			sync,
			feed,
			persistence,
		}
	}

	/// Starts against a feed that acknowledges right away and waits for the initial
	/// snapshot to land.
	pub async fn connected(rows: impl IntoIterator<Item = Record>) -> Self {
		let harness = Self::start(MemoryFeed::new(), rows);
		settle().await;
		assert_eq!(harness.sync.connection_state(), ConnectionState::Connected);

		harness
	}

	pub async fn push(&self, event: RawChangeEvent) {
		assert!(self.feed.push(event).await, "no open channel to push on");
		settle().await;
	}

	pub async fn status(&self, id: i64) -> Option<Value> {
		self.sync
			.get(&RecordId::from(id))
			.await
			.and_then(|record| record.get("status").cloned())
	}
}

/// Lets the driver task drain everything it has queued.
///
/// Tests run on a paused clock, so this only moves time by a millisecond once every
/// task is idle, far below any reconnect delay.
pub async fn settle() {
	sleep(Duration::from_millis(1)).await;
}

pub fn order(id: i64, status: &str) -> Record {
	Record::from_value(&order_json(id, status), "id").unwrap()
}

pub fn order_json(id: i64, status: &str) -> Value {
	json!({ "id": id, "status": status, "total": 10 })
}
