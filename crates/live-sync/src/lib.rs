//!
//! # Live Sync
//!
//! Keeps an in-memory mirror of one backend table in step with a realtime change feed,
//! while letting users edit records locally without remote updates clobbering their work.
//!
//! The pieces, from the network inwards:
//! - A connection state machine that subscribes to the feed, reconnects with exponential
//!   backoff and gives up into a visible errored state once retries run out;
//! - A dispatcher that validates raw change events and classifies them as inserts, updates
//!   or deletes;
//! - An edit tracker holding the baseline and pending fields of every record under edit;
//! - A reconciliation store that applies remote changes, shields records under edit and
//!   reloads the full snapshot after every successful (re)subscription.
//!
//! Bring your own [`ChangeFeed`] and [`Persistence`] implementations, or use the in-memory
//! ones from [`memory`].
//!
//! ## Basic example
//!
//! ```
//! use std::sync::Arc;
//!
//! use od_live_sync::{
//! 	memory::{MemoryFeed, MemoryPersistence},
//! 	LiveSync, Record, SyncConfig,
//! };
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() {
//! 	let persistence = Arc::new(MemoryPersistence::with_rows([Record::from_value(
//! 		&json!({ "id": 1, "status": "Pending" }),
//! 		"id",
//! 	)
//! 	.unwrap()]));
//!
//! 	let sync = LiveSync::start(
//! 		&SyncConfig::default(),
//! 		Arc::new(MemoryFeed::new()),
//! 		persistence,
//! 	);
//!
//! 	let mut state = sync.watch_connection();
//! 	state.wait_for(|state| state.is_live()).await.unwrap();
//!
//! 	assert_eq!(sync.refresh().await.unwrap(), 1);
//! 	assert_eq!(sync.get_mirror().await.len(), 1);
//!
//! 	sync.shutdown().await;
//! }
//! ```
#![warn(
	clippy::all,
	clippy::pedantic,
	clippy::correctness,
	clippy::perf,
	clippy::style,
	clippy::suspicious,
	clippy::complexity,
	clippy::nursery,
	clippy::unwrap_used,
	unused_qualifications,
	rust_2018_idioms,
	trivial_casts,
	trivial_numeric_casts,
	unused_allocation,
	clippy::unnecessary_cast,
	clippy::cast_lossless,
	clippy::cast_possible_truncation,
	clippy::cast_possible_wrap,
	clippy::cast_precision_loss,
	clippy::cast_sign_loss,
	clippy::dbg_macro,
	clippy::deprecated_cfg_attr,
	clippy::separated_literal_suffix,
	deprecated
)]
#![forbid(deprecated_in_future)]
#![allow(clippy::missing_errors_doc, clippy::module_name_repetitions)]

mod backend;
mod config;
mod connection;
mod dispatch;
mod edit;
mod engine;
mod error;
mod event;
mod record;
mod store;

pub mod memory;

pub use backend::{ChangeFeed, Channel, ChannelId, EventFilter, Persistence};
pub use config::{ReconnectConfig, SyncConfig, TopicConfig};
pub use connection::{
	BackoffPolicy, ConnectionMachine, ConnectionState, Effect, Input, RetryState,
	DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};
pub use dispatch::{DispatchStats, Dispatcher};
pub use edit::{EditSession, EditTracker, Settled};
pub use engine::{CommitOutcome, LiveSync};
pub use error::{ConfigError, EditError, Error, FeedError, Operation, PersistenceError};
pub use event::{ChangeEvent, ChangeKind, ChannelStatus, FeedMessage, RawChangeEvent, StatusEvent};
pub use record::{extract_id, normalize_record, Fields, Record, RecordId, SortKey};
pub use store::{ApplyOutcome, RefreshSummary, ReconciliationStore};
