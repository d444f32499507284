//! The running sync engine: a driver task that owns the subscription, and the
//! [`LiveSync`] handle the dashboard talks to.

use std::sync::Arc;

use async_channel as chan;
use serde_json::Value;
use tokio::{
	spawn,
	sync::{broadcast, oneshot, watch, RwLock},
};
use tracing::{debug, info, instrument, warn};

use crate::{
	backend::{ChangeFeed, Persistence},
	config::{SyncConfig, TopicConfig},
	connection::{ConnectionMachine, ConnectionState},
	dispatch::{DispatchStats, Dispatcher},
	edit::Settled,
	error::Error,
	record::{Fields, Record, RecordId},
	store::ReconciliationStore,
};

mod driver;
mod message;

use driver::Driver;
use message::Command;

const COMMANDS_CAPACITY: usize = 16;
const INVALIDATE_CAPACITY: usize = 1;

/// Result of [`LiveSync::commit_edit`].
#[derive(Debug, Clone, PartialEq)]
pub enum CommitOutcome {
	/// The diff went through the persistence service and is now in the mirror.
	Saved(Fields),
	/// Nothing differed from the baseline, no request was made and the session is
	/// closed.
	Unchanged,
}

pub(crate) struct Shared {
	store: RwLock<ReconciliationStore>,
	state_tx: watch::Sender<ConnectionState>,
	stats_tx: watch::Sender<DispatchStats>,
	invalidate_tx: broadcast::Sender<()>,
}

impl Shared {
	fn invalidate(&self) {
		// No subscribers is fine, nobody is looking at the mirror right now
		let _ = self.invalidate_tx.send(());
	}
}

/// Handle to a running sync engine for one topic.
///
/// Cheap to clone. The engine tears itself down once every handle is dropped, or
/// right away on [`LiveSync::shutdown`].
#[derive(Clone)]
pub struct LiveSync {
	topic: Arc<TopicConfig>,
	persistence: Arc<dyn Persistence>,
	shared: Arc<Shared>,
	commands_tx: chan::Sender<Command>,
	state_rx: watch::Receiver<ConnectionState>,
	stats_rx: watch::Receiver<DispatchStats>,
}

impl LiveSync {
	/// Spawns the driver task and subscribes right away.
	///
	/// Must be called from within a tokio runtime.
	pub fn start(
		config: &SyncConfig,
		feed: Arc<dyn ChangeFeed>,
		persistence: Arc<dyn Persistence>,
	) -> Self {
		let topic = Arc::new(config.topic.clone());

		let (state_tx, state_rx) = watch::channel(ConnectionState::Idle);
		let (stats_tx, stats_rx) = watch::channel(DispatchStats::default());
		let (invalidate_tx, _) = broadcast::channel(INVALIDATE_CAPACITY);
		let (commands_tx, commands_rx) = chan::bounded(COMMANDS_CAPACITY);

		let shared = Arc::new(Shared {
			store: RwLock::new(ReconciliationStore::new(&topic)),
			state_tx,
			stats_tx,
			invalidate_tx,
		});

		info!(
			table = %topic.table,
			primary_key = %topic.primary_key,
			"Starting live sync"
		);

		spawn(
			Driver {
				topic: Arc::clone(&topic),
				feed,
				persistence: Arc::clone(&persistence),
				shared: Arc::clone(&shared),
				machine: ConnectionMachine::new(config.reconnect.policy()),
				dispatcher: Dispatcher::new(topic.primary_key.clone())
					.with_filter(topic.event_filter()),
				commands_rx,
				channel: None,
				timer: None,
			}
			.run(),
		);

		Self {
			topic,
			persistence,
			shared,
			commands_tx,
			state_rx,
			stats_rx,
		}
	}

	#[must_use]
	pub fn topic(&self) -> &TopicConfig {
		&self.topic
	}

	/// Every record in display order, local edits included.
	pub async fn get_mirror(&self) -> Vec<Record> {
		self.shared.store.read().await.records()
	}

	pub async fn get(&self, id: &RecordId) -> Option<Record> {
		self.shared.store.read().await.get(id)
	}

	#[must_use]
	pub fn connection_state(&self) -> ConnectionState {
		self.state_rx.borrow().clone()
	}

	/// Follows connection state changes.
	#[must_use]
	pub fn watch_connection(&self) -> watch::Receiver<ConnectionState> {
		self.state_rx.clone()
	}

	#[must_use]
	pub fn dispatch_stats(&self) -> DispatchStats {
		*self.stats_rx.borrow()
	}

	#[must_use]
	pub fn watch_dispatch_stats(&self) -> watch::Receiver<DispatchStats> {
		self.stats_rx.clone()
	}

	/// Fires every time the visible mirror may have changed. Receivers should just
	/// re-read [`Self::get_mirror`], lagging behind is harmless.
	#[must_use]
	pub fn subscribe_changes(&self) -> broadcast::Receiver<()> {
		self.shared.invalidate_tx.subscribe()
	}

	pub async fn begin_edit(&self, id: &RecordId) -> Result<(), Error> {
		self.shared.store.write().await.begin_edit(id)
	}

	pub async fn set_edit_field(
		&self,
		id: &RecordId,
		field: impl Into<String> + Send,
		value: Value,
	) -> Result<(), Error> {
		self.shared
			.store
			.write()
			.await
			.set_edit_field(id, field, value)?;
		self.shared.invalidate();

		Ok(())
	}

	pub async fn has_changes(&self, id: &RecordId) -> bool {
		self.shared.store.read().await.has_changes(id)
	}

	/// Saves the edit session of `id` through the persistence service.
	///
	/// Only the fields that differ from the baseline are sent. On failure the
	/// session and its pending values stay as they were, ready for another try.
	/// Fields set while the save is in flight stay pending, the session is only
	/// closed once nothing is left to save. One save per record at a time.
	#[instrument(skip(self), fields(table = %self.topic.table), err)]
	pub async fn commit_edit(&self, id: &RecordId) -> Result<CommitOutcome, Error> {
		let diff = {
			let mut store = self.shared.store.write().await;
			let diff = store.begin_save(id)?;

			if diff.is_empty() {
				debug!("Nothing to save, closing edit session");
				store.cancel_edit(id);
				return Ok(CommitOutcome::Unchanged);
			}

			diff
		};

		if let Err(e) = self.persistence.update(&self.topic.table, id, &diff).await {
			warn!(?e, "Save rejected, keeping edit session");
			self.shared.store.write().await.abort_save(id);
			return Err(e.into());
		}

		match self.shared.store.write().await.finish_save(id, &diff) {
			Settled::Closed => {}
			Settled::StillEditing => debug!("Saved, newer edits still pending"),
			Settled::Gone => debug!("Edit session went away while saving"),
		}
		self.shared.invalidate();

		Ok(CommitOutcome::Saved(diff))
	}

	/// Drops the edit session, the record goes back to its last known-good value.
	pub async fn cancel_edit(&self, id: &RecordId) -> bool {
		let cancelled = self.shared.store.write().await.cancel_edit(id).is_some();
		if cancelled {
			self.shared.invalidate();
		}

		cancelled
	}

	/// Creates a record through the persistence service and shows it right away.
	#[instrument(skip(self, record), fields(table = %self.topic.table, id = %record.id), err)]
	pub async fn create_record(&self, record: Record) -> Result<(), Error> {
		self.persistence.insert(&self.topic.table, &record).await?;

		if self
			.shared
			.store
			.write()
			.await
			.insert_local(record)
			.changed_mirror()
		{
			self.shared.invalidate();
		}

		Ok(())
	}

	/// Deletes a record through the persistence service and drops it right away,
	/// along with any edit session it had.
	#[instrument(skip(self), fields(table = %self.topic.table), err)]
	pub async fn delete_record(&self, id: &RecordId) -> Result<(), Error> {
		self.persistence.delete(&self.topic.table, id).await?;

		if self
			.shared
			.store
			.write()
			.await
			.remove_local(id)
			.changed_mirror()
		{
			self.shared.invalidate();
		}

		Ok(())
	}

	/// Re-fetches the whole snapshot, returns how many records it held.
	pub async fn refresh(&self) -> Result<usize, Error> {
		let (tx, rx) = oneshot::channel();

		self.commands_tx
			.send(Command::Refresh(tx))
			.await
			.map_err(|_| Error::EngineStopped)?;

		rx.await
			.map_err(|_| Error::EngineStopped)?
			.map_err(Into::into)
	}

	/// Resets the retry counter and subscribes again immediately, whatever the
	/// current state. The way out of [`ConnectionState::Errored`].
	pub async fn force_reconnect(&self) -> Result<(), Error> {
		self.commands_tx
			.send(Command::ForceReconnect)
			.await
			.map_err(|_| Error::EngineStopped)
	}

	/// Tears the subscription down and stops the engine. Calling it again is a no-op.
	pub async fn shutdown(&self) {
		let (tx, rx) = oneshot::channel();

		if self.commands_tx.send(Command::Shutdown(tx)).await.is_err() {
			return;
		}

		if rx.await.is_err() {
			debug!("Sync driver was already stopping");
		}
	}
}
