use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info};

use crate::{
	config::TopicConfig,
	edit::{EditSession, EditTracker, Settled},
	error::{EditError, Error},
	event::ChangeEvent,
	record::{Fields, Record, RecordId, SortKey},
};

/// What applying a change did to the mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyOutcome {
	Inserted,
	/// Insert for an id we already hold, typically our own optimistic insert
	/// coming back through the feed.
	Duplicate,
	Replaced,
	/// Update for an id we didn't hold yet.
	Upserted,
	/// Update for a record under local edit, dropped.
	Suppressed,
	Removed,
	/// Delete for an id we didn't hold.
	Absent,
}

impl ApplyOutcome {
	/// Whether readers of the mirror could see a difference.
	#[must_use]
	pub const fn changed_mirror(self) -> bool {
		matches!(
			self,
			Self::Inserted | Self::Replaced | Self::Upserted | Self::Removed
		)
	}
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
	pub records: usize,
	/// Edit sessions kept on top of the new snapshot.
	pub preserved_edits: usize,
	/// Edit sessions dropped because their record is gone from the snapshot.
	pub cancelled_edits: usize,
}

/// Authoritative in-memory mirror of one topic.
///
/// Stores the last known-good value the backend gave us for every row. Records under
/// local edit are served with their pending fields laid over that value, so remote
/// updates never clobber what the user is typing and cancelling an edit falls back
/// to whatever the backend last said.
#[derive(Debug)]
pub struct ReconciliationStore {
	primary_key: String,
	sort: Option<SortKey>,
	records: BTreeMap<RecordId, Record>,
	edits: EditTracker,
}

impl ReconciliationStore {
	#[must_use]
	pub fn new(topic: &TopicConfig) -> Self {
		Self {
			primary_key: topic.primary_key.clone(),
			sort: topic.sort.clone(),
			records: BTreeMap::new(),
			edits: EditTracker::new(),
		}
	}

	#[must_use]
	pub fn primary_key(&self) -> &str {
		&self.primary_key
	}

	#[must_use]
	pub const fn edits(&self) -> &EditTracker {
		&self.edits
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.records.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.records.is_empty()
	}

	#[must_use]
	pub fn contains(&self, id: &RecordId) -> bool {
		self.records.contains_key(id)
	}

	/// The record as the user should see it.
	#[must_use]
	pub fn get(&self, id: &RecordId) -> Option<Record> {
		self.records.get(id).map(|record| self.visible(record))
	}

	/// Every record as the user should see it, in display order.
	#[must_use]
	pub fn records(&self) -> Vec<Record> {
		let mut records = self
			.records
			.values()
			.map(|record| self.visible(record))
			.collect::<Vec<_>>();

		if let Some(sort) = &self.sort {
			records.sort_by(|a, b| sort.compare(a, b));
		}

		records
	}

	fn visible(&self, record: &Record) -> Record {
		self.edits
			.pending(&record.id)
			.map_or_else(|| record.clone(), |pending| record.overlaid(pending))
	}

	pub fn apply(&mut self, event: ChangeEvent) -> ApplyOutcome {
		let outcome = match event {
			ChangeEvent::Insert { record } => self.insert(record),
			ChangeEvent::Update { record, .. } => self.update(record),
			ChangeEvent::Delete { id, .. } => self.remove(&id),
		};

		debug!(?outcome, "Applied remote change");

		outcome
	}

	fn insert(&mut self, record: Record) -> ApplyOutcome {
		if self.records.contains_key(&record.id) {
			return ApplyOutcome::Duplicate;
		}

		self.records.insert(record.id.clone(), record);
		ApplyOutcome::Inserted
	}

	fn update(&mut self, record: Record) -> ApplyOutcome {
		if self.edits.is_editing(&record.id) {
			debug!(id = %record.id, "Suppressing remote update for record under local edit");
			return ApplyOutcome::Suppressed;
		}

		match self.records.insert(record.id.clone(), record) {
			Some(_) => ApplyOutcome::Replaced,
			None => ApplyOutcome::Upserted,
		}
	}

	fn remove(&mut self, id: &RecordId) -> ApplyOutcome {
		if self.edits.cancel(id).is_some() {
			info!(%id, "Record deleted while under local edit, edit session dropped");
		}

		if self.records.remove(id).is_some() {
			ApplyOutcome::Removed
		} else {
			ApplyOutcome::Absent
		}
	}

	/// Replaces the mirror with a freshly fetched snapshot.
	///
	/// Sessions stay open for records still present, their pending fields keep
	/// winning over the snapshot. Sessions of records missing from the snapshot are
	/// cancelled, the row was deleted while we weren't listening.
	pub fn replace_all(&mut self, snapshot: impl IntoIterator<Item = Record>) -> RefreshSummary {
		self.records = snapshot
			.into_iter()
			.map(|record| (record.id.clone(), record))
			.collect();

		let orphaned = self
			.edits
			.ids()
			.filter(|id| !self.records.contains_key(*id))
			.cloned()
			.collect::<Vec<_>>();

		for id in &orphaned {
			self.edits.cancel(id);
			info!(%id, "Record under local edit is gone from the snapshot, edit session dropped");
		}

		RefreshSummary {
			records: self.records.len(),
			preserved_edits: self.edits.len(),
			cancelled_edits: orphaned.len(),
		}
	}

	pub fn begin_edit(&mut self, id: &RecordId) -> Result<(), Error> {
		let current = self
			.records
			.get(id)
			.cloned()
			.ok_or_else(|| Error::UnknownRecord(id.clone()))?;

		self.edits.begin(id.clone(), current)?;

		Ok(())
	}

	pub fn set_edit_field(
		&mut self,
		id: &RecordId,
		field: impl Into<String>,
		value: Value,
	) -> Result<(), EditError> {
		self.edits.set_field(id, field, value)
	}

	#[must_use]
	pub fn has_changes(&self, id: &RecordId) -> bool {
		self.edits.has_changes(id)
	}

	/// Fields to submit for `id`; the session stays open while they are saved.
	pub fn begin_save(&mut self, id: &RecordId) -> Result<Fields, EditError> {
		self.edits.start_save(id)
	}

	/// Folds a saved diff into the mirror and the edit session.
	pub fn finish_save(&mut self, id: &RecordId, diff: &Fields) -> Settled {
		if let Some(record) = self.records.get_mut(id) {
			record.apply(diff);
		}

		self.edits.settle(id, diff)
	}

	pub fn abort_save(&mut self, id: &RecordId) {
		self.edits.abort_save(id);
	}

	pub fn cancel_edit(&mut self, id: &RecordId) -> Option<EditSession> {
		self.edits.cancel(id)
	}

	/// Applies a row we just created through the persistence service.
	pub fn insert_local(&mut self, record: Record) -> ApplyOutcome {
		self.insert(record)
	}

	/// Applies a row we just deleted through the persistence service.
	pub fn remove_local(&mut self, id: &RecordId) -> ApplyOutcome {
		self.remove(id)
	}
}
