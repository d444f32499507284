//! Sync configuration, usually loaded from a TOML file.

use std::{fs, path::Path, time::Duration};

use serde::{Deserialize, Serialize};

use crate::{
	backend::EventFilter,
	connection::{BackoffPolicy, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY},
	error::ConfigError,
	event::ChangeKind,
	record::SortKey,
};

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
	pub topic: TopicConfig,
	pub reconnect: ReconnectConfig,
}

/// Which table to mirror and how its rows look.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicConfig {
	pub table: String,
	pub primary_key: String,
	pub sort: Option<SortKey>,
	pub events: Vec<ChangeKind>,
	/// Row filter expression handed to the backend as is.
	pub filter: Option<String>,
}

impl Default for TopicConfig {
	fn default() -> Self {
		Self {
			table: "orders".to_string(),
			primary_key: "id".to_string(),
			sort: None,
			events: ChangeKind::ALL.to_vec(),
			filter: None,
		}
	}
}

impl TopicConfig {
	#[must_use]
	pub fn new(table: impl Into<String>) -> Self {
		Self {
			table: table.into(),
			..Default::default()
		}
	}

	#[must_use]
	pub fn with_primary_key(mut self, primary_key: impl Into<String>) -> Self {
		self.primary_key = primary_key.into();
		self
	}

	#[must_use]
	pub fn with_sort(mut self, sort: SortKey) -> Self {
		self.sort = Some(sort);
		self
	}

	#[must_use]
	pub fn event_filter(&self) -> EventFilter {
		EventFilter {
			events: self.events.clone(),
			filter: self.filter.clone(),
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectConfig {
	pub base_delay_ms: u64,
	pub max_delay_ms: u64,
	pub max_attempts: u32,
}

impl Default for ReconnectConfig {
	#[allow(clippy::cast_possible_truncation)] // Defaults are a handful of seconds
	fn default() -> Self {
		Self {
			base_delay_ms: DEFAULT_BASE_DELAY.as_millis() as u64,
			max_delay_ms: DEFAULT_MAX_DELAY.as_millis() as u64,
			max_attempts: DEFAULT_MAX_ATTEMPTS,
		}
	}
}

impl ReconnectConfig {
	#[must_use]
	pub const fn policy(&self) -> BackoffPolicy {
		BackoffPolicy {
			base: Duration::from_millis(self.base_delay_ms),
			max_delay: Duration::from_millis(self.max_delay_ms),
			max_attempts: self.max_attempts,
		}
	}
}

impl SyncConfig {
	pub fn from_toml_str(source: &str) -> Result<Self, ConfigError> {
		let config = toml::from_str::<Self>(source)?;
		config.validate()?;
		Ok(config)
	}

	pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
		let path = path.as_ref();
		let source = fs::read_to_string(path).map_err(|source| ConfigError::Read {
			path: path.to_path_buf(),
			source,
		})?;

		Self::from_toml_str(&source)
	}

	pub fn validate(&self) -> Result<(), ConfigError> {
		if self.topic.table.trim().is_empty() {
			return Err(ConfigError::Invalid("topic.table must not be empty".into()));
		}

		if self.topic.primary_key.trim().is_empty() {
			return Err(ConfigError::Invalid(
				"topic.primary_key must not be empty".into(),
			));
		}

		if self.topic.events.is_empty() {
			return Err(ConfigError::Invalid(
				"topic.events must list at least one event kind".into(),
			));
		}

		if self.reconnect.base_delay_ms == 0 {
			return Err(ConfigError::Invalid(
				"reconnect.base_delay_ms must be positive".into(),
			));
		}

		if self.reconnect.max_delay_ms < self.reconnect.base_delay_ms {
			return Err(ConfigError::Invalid(format!(
				"reconnect.max_delay_ms ({}) is lower than reconnect.base_delay_ms ({})",
				self.reconnect.max_delay_ms, self.reconnect.base_delay_ms
			)));
		}

		Ok(())
	}
}
