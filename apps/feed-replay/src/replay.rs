use std::{fs, path::Path, sync::Arc, time::Duration};

use anyhow::{bail, Context, Result};
use od_live_sync::{
	memory::{MemoryFeed, MemoryPersistence},
	ChangeFeed, ConnectionState, DispatchStats, FeedMessage, LiveSync, Persistence, Record,
	RecordId, SyncConfig,
};
use serde::Serialize;
use serde_json::Value;
use tokio::{sync::watch, time::timeout};
use tracing::{debug, info, warn};

/// What the mirror looked like once the whole script went through.
#[derive(Debug, Serialize)]
pub struct Report {
	pub state: ConnectionState,
	pub stats: DispatchStats,
	pub records: Vec<Record>,
	/// Records still under edit, their pending fields are shown in `records`.
	pub editing: Vec<RecordId>,
	/// Messages that had no open channel to go to.
	pub undelivered: usize,
}

pub struct Replay {
	pub config: SyncConfig,
	pub snapshot: Vec<Record>,
	pub script: Vec<FeedMessage>,
	pub editing: Vec<RecordId>,
	pub wait: Duration,
}

/// Reads a JSON array of rows.
pub fn load_snapshot(path: &Path, primary_key: &str) -> Result<Vec<Record>> {
	let source = fs::read_to_string(path)
		.with_context(|| format!("failed to read snapshot <path='{}'>", path.display()))?;

	parse_snapshot(&source, primary_key)
}

pub fn parse_snapshot(source: &str, primary_key: &str) -> Result<Vec<Record>> {
	let rows = serde_json::from_str::<Vec<Value>>(source).context("snapshot is not a JSON array")?;

	rows.iter()
		.enumerate()
		.map(|(index, row)| {
			Record::from_value(row, primary_key).with_context(|| {
				format!("snapshot row {index} is not an object with a usable '{primary_key}'")
			})
		})
		.collect()
}

/// Reads one feed message per line, blank lines and `#` comments are skipped.
pub fn load_script(path: &Path) -> Result<Vec<FeedMessage>> {
	let source = fs::read_to_string(path)
		.with_context(|| format!("failed to read script <path='{}'>", path.display()))?;

	parse_script(&source)
}

pub fn parse_script(source: &str) -> Result<Vec<FeedMessage>> {
	source
		.lines()
		.enumerate()
		.filter(|(_, line)| {
			let line = line.trim();
			!line.is_empty() && !line.starts_with('#')
		})
		.map(|(index, line)| {
			serde_json::from_str(line)
				.with_context(|| format!("invalid feed message on line {}", index + 1))
		})
		.collect()
}

pub fn parse_record_id(raw: &str) -> RecordId {
	raw.parse::<i64>()
		.map_or_else(|_| RecordId::from(raw), RecordId::from)
}

impl Replay {
	pub async fn run(self) -> Result<Report> {
		let Self {
			config,
			snapshot,
			script,
			editing,
			wait,
		} = self;

		let feed = Arc::new(MemoryFeed::new());
		let persistence: Arc<dyn Persistence> = Arc::new(MemoryPersistence::with_rows(snapshot));

		let sync = LiveSync::start(&config, Arc::clone(&feed) as Arc<dyn ChangeFeed>, persistence);
		let mut state = sync.watch_connection();

		wait_usable(&mut state, wait).await?;

		for id in &editing {
			sync.begin_edit(id)
				.await
				.with_context(|| format!("can't hold record <id='{id}'> under edit"))?;
		}

		let mut changes = 0_u64;
		let mut undelivered = 0;

		for message in script {
			wait_usable(&mut state, wait).await?;

			let failure =
				matches!(&message, FeedMessage::Status(status) if status.status.is_failure());
			let is_change = matches!(message, FeedMessage::Change(_));

			if !feed.push(message).await {
				warn!("No open channel, message dropped");
				undelivered += 1;
				continue;
			}

			if is_change {
				changes += 1;
			}

			if failure {
				debug!("Waiting for the engine to notice the failure");
				timeout(wait, state.wait_for(|state| !state.is_live()))
					.await
					.context("engine never reacted to the failure status")?
					.context("sync engine stopped")?;
			}
		}

		let mut stats = sync.watch_dispatch_stats();
		timeout(wait, stats.wait_for(|stats| stats.received() >= changes))
			.await
			.context("timed out waiting for change events to be processed")?
			.context("sync engine stopped")?;

		let report = Report {
			state: sync.connection_state(),
			stats: sync.dispatch_stats(),
			records: sync.get_mirror().await,
			editing,
			undelivered,
		};

		info!(
			records = report.records.len(),
			dispatched = report.stats.dispatched(),
			discarded = report.stats.discarded(),
			"Replay done"
		);

		sync.shutdown().await;

		Ok(report)
	}
}

/// Waits until the engine is subscribed, bailing out if it gave up.
async fn wait_usable(state: &mut watch::Receiver<ConnectionState>, wait: Duration) -> Result<()> {
	let current = timeout(
		wait,
		state.wait_for(|state| state.is_live() || state.is_terminal()),
	)
	.await
	.context("timed out waiting for the subscription")?
	.context("sync engine stopped")?
	.clone();

	match current {
		ConnectionState::Errored { reason } => {
			bail!("sync engine gave up reconnecting: {reason}")
		}
		ConnectionState::Closed => bail!("sync engine was shut down"),
		_ => Ok(()),
	}
}
