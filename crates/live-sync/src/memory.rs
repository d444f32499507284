//! In-process implementations of [`ChangeFeed`] and [`Persistence`].
//!
//! They back the replay tool and the tests: the feed hands out channels whose
//! messages are pushed by hand, the persistence service keeps rows in a map and
//! can be told to reject or slow down calls.

use std::{
	collections::{BTreeMap, HashMap, HashSet, VecDeque},
	time::Duration,
};

use async_channel as chan;
use async_trait::async_trait;
use tokio::{
	sync::Mutex,
	time::{sleep, Instant},
};
use tracing::debug;

use crate::{
	backend::{Channel, ChangeFeed, ChannelId, EventFilter, Persistence},
	error::{FeedError, Operation, PersistenceError},
	event::{ChannelStatus, FeedMessage, StatusEvent},
	record::{Fields, Record, RecordId},
};

const CHANNEL_CAPACITY: usize = 1024;

/// A subscribe call seen by [`MemoryFeed`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscribeCall {
	pub channel: Option<ChannelId>,
	pub topic: String,
	pub filter: EventFilter,
	pub at: Instant,
}

#[derive(Debug)]
struct FeedState {
	open: HashMap<ChannelId, chan::Sender<FeedMessage>>,
	latest: Option<ChannelId>,
	/// Status pushed on the next channels, one per subscribe, before falling back
	/// to `default_reply`.
	scripted: VecDeque<ChannelStatus>,
	default_reply: Option<ChannelStatus>,
	refuse_next: usize,
	calls: Vec<SubscribeCall>,
}

#[derive(Debug)]
pub struct MemoryFeed {
	state: Mutex<FeedState>,
}

impl Default for MemoryFeed {
	fn default() -> Self {
		Self::new()
	}
}

impl MemoryFeed {
	/// A feed that acknowledges every subscription right away.
	#[must_use]
	pub fn new() -> Self {
		Self::with_default_reply(Some(ChannelStatus::Subscribed))
	}

	/// A feed that answers every subscription with `reply`, or stays silent on `None`.
	#[must_use]
	pub fn with_default_reply(reply: Option<ChannelStatus>) -> Self {
		Self {
			state: Mutex::new(FeedState {
				open: HashMap::new(),
				latest: None,
				scripted: VecDeque::new(),
				default_reply: reply,
				refuse_next: 0,
				calls: Vec::new(),
			}),
		}
	}

	pub async fn set_default_reply(&self, reply: Option<ChannelStatus>) {
		self.state.lock().await.default_reply = reply;
	}

	/// Replies for the next subscriptions, in order.
	pub async fn script_replies(&self, replies: impl IntoIterator<Item = ChannelStatus>) {
		self.state.lock().await.scripted.extend(replies);
	}

	/// Makes the next `count` subscribe calls fail outright.
	pub async fn refuse_next(&self, count: usize) {
		self.state.lock().await.refuse_next = count;
	}

	/// Delivers a message on the most recently opened channel.
	///
	/// Returns `false` if that channel was already removed.
	pub async fn push(&self, message: impl Into<FeedMessage>) -> bool {
		let sender = {
			let state = self.state.lock().await;
			state
				.latest
				.and_then(|channel| state.open.get(&channel))
				.cloned()
		};

		match sender {
			Some(sender) => sender.send(message.into()).await.is_ok(),
			None => false,
		}
	}

	/// Closes the sending side of the latest channel, as a dropped socket would.
	pub async fn drop_latest(&self) {
		let mut state = self.state.lock().await;
		if let Some(channel) = state.latest.take() {
			state.open.remove(&channel);
		}
	}

	pub async fn calls(&self) -> Vec<SubscribeCall> {
		self.state.lock().await.calls.clone()
	}

	pub async fn open_channels(&self) -> usize {
		self.state.lock().await.open.len()
	}
}

#[async_trait]
impl ChangeFeed for MemoryFeed {
	async fn subscribe(&self, topic: &str, filter: &EventFilter) -> Result<Channel, FeedError> {
		let mut state = self.state.lock().await;

		if state.refuse_next > 0 {
			state.refuse_next -= 1;
			state.calls.push(SubscribeCall {
				channel: None,
				topic: topic.to_string(),
				filter: filter.clone(),
				at: Instant::now(),
			});

			return Err(FeedError::Subscribe {
				topic: topic.to_string(),
				message: "connection refused".to_string(),
			});
		}

		let id = ChannelId::new();
		let (tx, rx) = chan::bounded(CHANNEL_CAPACITY);

		let reply = state.scripted.pop_front().or(state.default_reply);
		if let Some(status) = reply {
			// Fresh channel with room to spare, can't be full
			let _ = tx.try_send(FeedMessage::Status(StatusEvent::new(status)));
		}

		state.open.insert(id, tx);
		state.latest = Some(id);
		state.calls.push(SubscribeCall {
			channel: Some(id),
			topic: topic.to_string(),
			filter: filter.clone(),
			at: Instant::now(),
		});

		debug!(channel = %id, %topic, ?reply, "Memory feed channel opened");

		Ok(Channel::new(id, rx))
	}

	async fn unsubscribe(&self, channel: ChannelId) -> Result<(), FeedError> {
		let mut state = self.state.lock().await;
		state.open.remove(&channel);
		if state.latest == Some(channel) {
			state.latest = None;
		}

		Ok(())
	}
}

#[derive(Debug, Default)]
struct PersistenceState {
	rows: BTreeMap<RecordId, Record>,
	failing: HashSet<Operation>,
	latency: Duration,
	calls: Vec<Operation>,
}

/// Row storage for a single topic.
#[derive(Debug, Default)]
pub struct MemoryPersistence {
	state: Mutex<PersistenceState>,
}

impl MemoryPersistence {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	#[must_use]
	pub fn with_rows(rows: impl IntoIterator<Item = Record>) -> Self {
		Self {
			state: Mutex::new(PersistenceState {
				rows: rows
					.into_iter()
					.map(|record| (record.id.clone(), record))
					.collect(),
				..Default::default()
			}),
		}
	}

	/// Makes every call of `operation` fail until told otherwise.
	pub async fn set_failing(&self, operation: Operation, failing: bool) {
		let mut state = self.state.lock().await;
		if failing {
			state.failing.insert(operation);
		} else {
			state.failing.remove(&operation);
		}
	}

	/// Every call waits this long before touching the rows.
	pub async fn set_latency(&self, latency: Duration) {
		self.state.lock().await.latency = latency;
	}

	/// Changes a row behind the sync engine's back, as another client would.
	pub async fn put(&self, record: Record) {
		self.state
			.lock()
			.await
			.rows
			.insert(record.id.clone(), record);
	}

	pub async fn remove(&self, id: &RecordId) -> Option<Record> {
		self.state.lock().await.rows.remove(id)
	}

	pub async fn row(&self, id: &RecordId) -> Option<Record> {
		self.state.lock().await.rows.get(id).cloned()
	}

	pub async fn calls(&self) -> Vec<Operation> {
		self.state.lock().await.calls.clone()
	}

	pub async fn count_calls(&self, operation: Operation) -> usize {
		self.state
			.lock()
			.await
			.calls
			.iter()
			.filter(|call| **call == operation)
			.count()
	}

	async fn round_trip(&self) {
		let latency = self.state.lock().await.latency;
		if !latency.is_zero() {
			sleep(latency).await;
		}
	}
}

impl PersistenceState {
	fn record_call(&mut self, operation: Operation) -> Result<(), PersistenceError> {
		self.calls.push(operation);
		if self.failing.contains(&operation) {
			Err(PersistenceError::new(operation, "rejected by backend"))
		} else {
			Ok(())
		}
	}
}

#[async_trait]
impl Persistence for MemoryPersistence {
	async fn fetch_all(&self, _topic: &str) -> Result<Vec<Record>, PersistenceError> {
		self.round_trip().await;

		let mut state = self.state.lock().await;
		state.record_call(Operation::FetchAll)?;

		Ok(state.rows.values().cloned().collect())
	}

	async fn insert(&self, _topic: &str, record: &Record) -> Result<(), PersistenceError> {
		self.round_trip().await;

		let mut state = self.state.lock().await;
		state.record_call(Operation::Insert)?;

		if state.rows.contains_key(&record.id) {
			return Err(PersistenceError::new(
				Operation::Insert,
				format!("duplicate key <id='{}'>", record.id),
			));
		}

		state.rows.insert(record.id.clone(), record.clone());

		Ok(())
	}

	async fn update(
		&self,
		_topic: &str,
		id: &RecordId,
		diff: &Fields,
	) -> Result<(), PersistenceError> {
		self.round_trip().await;

		let mut state = self.state.lock().await;
		state.record_call(Operation::Update)?;

		let row = state.rows.get_mut(id).ok_or_else(|| {
			PersistenceError::new(Operation::Update, format!("no row <id='{id}'>"))
		})?;
		row.apply(diff);

		Ok(())
	}

	async fn delete(&self, _topic: &str, id: &RecordId) -> Result<(), PersistenceError> {
		self.round_trip().await;

		let mut state = self.state.lock().await;
		state.record_call(Operation::Delete)?;
		state.rows.remove(id);

		Ok(())
	}
}
