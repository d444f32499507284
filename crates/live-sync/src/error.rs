use std::{fmt, io, path::PathBuf};

use thiserror::Error;

use crate::record::RecordId;

#[derive(Debug, Error)]
pub enum Error {
	#[error(transparent)]
	Edit(#[from] EditError),
	#[error(transparent)]
	Persistence(#[from] PersistenceError),
	#[error(transparent)]
	Config(#[from] ConfigError),
	#[error("record not found <id='{0}'>")]
	UnknownRecord(RecordId),
	#[error("sync engine is not running")]
	EngineStopped,
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum EditError {
	#[error("record is already being edited <id='{0}'>")]
	AlreadyEditing(RecordId),
	#[error("record is not being edited <id='{0}'>")]
	NotEditing(RecordId),
	#[error("record is already being saved <id='{0}'>")]
	SaveInProgress(RecordId),
}

/// Persistence service call that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
	FetchAll,
	Insert,
	Update,
	Delete,
}

impl fmt::Display for Operation {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(match self {
			Self::FetchAll => "fetch",
			Self::Insert => "insert",
			Self::Update => "update",
			Self::Delete => "delete",
		})
	}
}

/// Structured failure reported by the persistence service.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{operation} failed: {message}")]
pub struct PersistenceError {
	pub operation: Operation,
	pub message: String,
}

impl PersistenceError {
	pub fn new(operation: Operation, message: impl Into<String>) -> Self {
		Self {
			operation,
			message: message.into(),
		}
	}
}

/// Failure to open or remove a feed channel.
///
/// Never surfaced to callers: a failed subscribe is just another connection
/// failure for the reconnect logic.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FeedError {
	#[error("failed to subscribe to '{topic}': {message}")]
	Subscribe { topic: String, message: String },
	#[error("failed to remove channel: {0}")]
	Unsubscribe(String),
}

#[derive(Debug, Error)]
pub enum ConfigError {
	#[error("failed to read config file <path='{}'>: {source}", .path.display())]
	Read {
		path: PathBuf,
		#[source]
		source: io::Error,
	},
	#[error("failed to parse config: {0}")]
	Parse(#[from] toml::de::Error),
	#[error("invalid config: {0}")]
	Invalid(String),
}
