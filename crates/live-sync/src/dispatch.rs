use serde::Serialize;
use tracing::{debug, trace, warn};

use crate::{
	backend::EventFilter,
	event::{ChangeEvent, ChangeKind, RawChangeEvent},
	record::{extract_id, normalize_record},
};

/// Counters of what the dispatcher did with the raw events it received.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DispatchStats {
	pub inserts: u64,
	pub updates: u64,
	pub deletes: u64,
	/// Neither side of the event carried a usable primary key.
	pub missing_id: u64,
	pub unknown_kind: u64,
	/// Valid kind, but not one the subscription asked for.
	pub filtered: u64,
	/// Insert or update without an object on the new side.
	pub malformed: u64,
	/// Arrived while the connection wasn't live.
	pub not_live: u64,
}

impl DispatchStats {
	/// Every raw event seen, whatever happened to it.
	#[must_use]
	pub const fn received(&self) -> u64 {
		self.dispatched() + self.discarded()
	}

	#[must_use]
	pub const fn dispatched(&self) -> u64 {
		self.inserts + self.updates + self.deletes
	}

	#[must_use]
	pub const fn discarded(&self) -> u64 {
		self.missing_id + self.unknown_kind + self.filtered + self.malformed + self.not_live
	}
}

/// Validates and classifies raw feed events for one topic.
///
/// Nothing here is fatal: events that can't be classified are logged, counted
/// and dropped.
#[derive(Debug)]
pub struct Dispatcher {
	primary_key: String,
	filter: EventFilter,
	stats: DispatchStats,
}

impl Dispatcher {
	#[must_use]
	pub fn new(primary_key: impl Into<String>) -> Self {
		Self {
			primary_key: primary_key.into(),
			filter: EventFilter::all(),
			stats: DispatchStats::default(),
		}
	}

	/// Only lets through the kinds the subscription asked for. Backends are
	/// expected to honour the filter themselves, this guards against the ones
	/// that don't.
	#[must_use]
	pub fn with_filter(mut self, filter: EventFilter) -> Self {
		self.filter = filter;
		self
	}

	#[must_use]
	pub const fn stats(&self) -> DispatchStats {
		self.stats
	}

	/// Accounts for an event that was dropped because the feed wasn't live.
	pub fn discard_not_live(&mut self, raw: &RawChangeEvent) {
		trace!(event_type = %raw.event_type, "Dropping change event received while not connected");
		self.stats.not_live += 1;
	}

	pub fn classify(&mut self, raw: RawChangeEvent) -> Option<ChangeEvent> {
		let Some(kind) = ChangeKind::parse(&raw.event_type) else {
			warn!(event_type = %raw.event_type, "Ignoring change event of unknown type");
			self.stats.unknown_kind += 1;
			return None;
		};

		if !self.filter.accepts(kind) {
			debug!(%kind, "Ignoring change event kind we didn't subscribe to");
			self.stats.filtered += 1;
			return None;
		}

		let Some(id) = extract_id(raw.new.as_ref(), &self.primary_key)
			.or_else(|| extract_id(raw.old.as_ref(), &self.primary_key))
		else {
			warn!(
				%kind,
				primary_key = %self.primary_key,
				"Discarding change event without an extractable id"
			);
			self.stats.missing_id += 1;
			return None;
		};

		let event = match kind {
			ChangeKind::Delete => {
				self.stats.deletes += 1;
				ChangeEvent::Delete { id, old: raw.old }
			}
			ChangeKind::Insert | ChangeKind::Update => {
				let Some(record) = raw
					.new
					.as_ref()
					.and_then(|payload| normalize_record(id.clone(), payload))
				else {
					warn!(%kind, %id, "Discarding change event without a new row payload");
					self.stats.malformed += 1;
					return None;
				};

				if kind == ChangeKind::Insert {
					self.stats.inserts += 1;
					ChangeEvent::Insert { record }
				} else {
					self.stats.updates += 1;
					ChangeEvent::Update {
						record,
						old: raw.old,
					}
				}
			}
		};

		trace!(kind = %event.kind(), id = %event.id(), "Classified change event");

		Some(event)
	}
}
