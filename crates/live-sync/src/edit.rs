use std::collections::HashMap;

use serde_json::Value;
use tracing::debug;

use crate::{
	error::EditError,
	record::{Fields, Record, RecordId},
};

/// Local, unsaved state of a record being edited.
#[derive(Debug, Clone, PartialEq)]
pub struct EditSession {
	pub id: RecordId,
	/// The record as it was when editing started, moved forward by every save.
	pub baseline: Record,
	pub pending: Fields,
	/// A save is waiting on the persistence service.
	pub saving: bool,
}

impl EditSession {
	/// Pending fields whose value differs from the baseline.
	#[must_use]
	pub fn diff(&self) -> Fields {
		self.pending
			.iter()
			.filter(|(field, value)| self.baseline.get(field) != Some(*value))
			.map(|(field, value)| (field.clone(), value.clone()))
			.collect()
	}

	#[must_use]
	pub fn has_changes(&self) -> bool {
		self.pending
			.iter()
			.any(|(field, value)| self.baseline.get(field) != Some(value))
	}
}

/// What a successful save left of the edit session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
	/// Everything pending was saved, the session is closed.
	Closed,
	/// Fields changed while the save was in flight, they stay pending.
	StillEditing,
	/// The session was dropped while saving, by a delete or a cancel.
	Gone,
}

/// Records under local edit, at most one session per id.
#[derive(Debug, Default)]
pub struct EditTracker {
	sessions: HashMap<RecordId, EditSession>,
}

impl EditTracker {
	#[must_use]
	pub fn new() -> Self {
		Self::default()
	}

	pub fn begin(&mut self, id: RecordId, current: Record) -> Result<(), EditError> {
		if self.sessions.contains_key(&id) {
			return Err(EditError::AlreadyEditing(id));
		}

		debug!(%id, "Edit session started");

		self.sessions.insert(
			id.clone(),
			EditSession {
				id,
				baseline: current,
				pending: Fields::new(),
				saving: false,
			},
		);

		Ok(())
	}

	pub fn set_field(
		&mut self,
		id: &RecordId,
		field: impl Into<String>,
		value: Value,
	) -> Result<(), EditError> {
		let session = self
			.sessions
			.get_mut(id)
			.ok_or_else(|| EditError::NotEditing(id.clone()))?;

		session.pending.insert(field.into(), value);

		Ok(())
	}

	#[must_use]
	pub fn has_changes(&self, id: &RecordId) -> bool {
		self.sessions.get(id).is_some_and(EditSession::has_changes)
	}

	/// The diff to submit for `id`. The session stays open and is marked as saving
	/// until [`Self::settle`] or [`Self::abort_save`]; an empty diff marks nothing.
	pub fn start_save(&mut self, id: &RecordId) -> Result<Fields, EditError> {
		let session = self
			.sessions
			.get_mut(id)
			.ok_or_else(|| EditError::NotEditing(id.clone()))?;

		if session.saving {
			return Err(EditError::SaveInProgress(id.clone()));
		}

		let diff = session.diff();
		session.saving = !diff.is_empty();

		Ok(diff)
	}

	/// Folds `saved` into the baseline after a successful save.
	///
	/// The session only closes when nothing is left to save, fields set while the
	/// save was in flight are kept for the next one.
	pub fn settle(&mut self, id: &RecordId, saved: &Fields) -> Settled {
		let Some(session) = self.sessions.get_mut(id) else {
			return Settled::Gone;
		};

		session.baseline.apply(saved);
		session.saving = false;

		if session.has_changes() {
			debug!(%id, "Edit session saved, newer changes still pending");
			return Settled::StillEditing;
		}

		self.sessions.remove(id);
		debug!(%id, "Edit session finished");

		Settled::Closed
	}

	/// Clears the saving mark after a failed save, pending values are untouched.
	pub fn abort_save(&mut self, id: &RecordId) {
		if let Some(session) = self.sessions.get_mut(id) {
			session.saving = false;
		}
	}

	/// Drops the session and its pending values.
	pub fn cancel(&mut self, id: &RecordId) -> Option<EditSession> {
		let session = self.sessions.remove(id);
		if session.is_some() {
			debug!(%id, "Edit session cancelled");
		}
		session
	}

	#[must_use]
	pub fn is_editing(&self, id: &RecordId) -> bool {
		self.sessions.contains_key(id)
	}

	#[must_use]
	pub fn session(&self, id: &RecordId) -> Option<&EditSession> {
		self.sessions.get(id)
	}

	#[must_use]
	pub fn pending(&self, id: &RecordId) -> Option<&Fields> {
		self.sessions.get(id).map(|session| &session.pending)
	}

	pub fn ids(&self) -> impl Iterator<Item = &RecordId> {
		self.sessions.keys()
	}

	#[must_use]
	pub fn len(&self) -> usize {
		self.sessions.len()
	}

	#[must_use]
	pub fn is_empty(&self) -> bool {
		self.sessions.is_empty()
	}
}
