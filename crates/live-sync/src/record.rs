use std::{cmp::Ordering, fmt};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Field name to value mapping of a single row.
pub type Fields = Map<String, Value>;

/// Primary key of a mirrored row.
///
/// Backends hand us either integer or text keys, we keep whichever we got so that
/// round trips through the persistence service don't change the key's type.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RecordId {
	Int(i64),
	Text(String),
}

impl RecordId {
	/// Reads a key out of a JSON value. Floats, booleans, nulls and empty strings
	/// can't identify a row and yield `None`.
	#[must_use]
	pub fn from_value(value: &Value) -> Option<Self> {
		match value {
			Value::Number(number) => number.as_i64().map(Self::Int),
			Value::String(text) if !text.is_empty() => Some(Self::Text(text.clone())),
			_ => None,
		}
	}

	#[must_use]
	pub fn to_value(&self) -> Value {
		match self {
			Self::Int(int) => Value::from(*int),
			Self::Text(text) => Value::String(text.clone()),
		}
	}
}

impl fmt::Display for RecordId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			Self::Int(int) => write!(f, "{int}"),
			Self::Text(text) => f.write_str(text),
		}
	}
}

impl From<i64> for RecordId {
	fn from(int: i64) -> Self {
		Self::Int(int)
	}
}

impl From<&str> for RecordId {
	fn from(text: &str) -> Self {
		Self::Text(text.to_string())
	}
}

impl From<String> for RecordId {
	fn from(text: String) -> Self {
		Self::Text(text)
	}
}

/// A keyed row of the mirrored table.
///
/// `fields` is the row exactly as the backend sent it, primary key column included.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
	pub id: RecordId,
	pub fields: Fields,
}

impl Record {
	#[must_use]
	pub const fn new(id: RecordId, fields: Fields) -> Self {
		Self { id, fields }
	}

	/// Builds a record from a JSON object, reading its key from `primary_key`.
	#[must_use]
	pub fn from_value(value: &Value, primary_key: &str) -> Option<Self> {
		let id = extract_id(Some(value), primary_key)?;
		normalize_record(id, value)
	}

	#[must_use]
	pub fn get(&self, field: &str) -> Option<&Value> {
		self.fields.get(field)
	}

	/// Merges `diff` into this record's fields, overwriting what was there.
	pub fn apply(&mut self, diff: &Fields) {
		for (field, value) in diff {
			self.fields.insert(field.clone(), value.clone());
		}
	}

	/// A copy of this record with `diff` merged on top.
	#[must_use]
	pub fn overlaid(&self, diff: &Fields) -> Self {
		let mut record = self.clone();
		record.apply(diff);
		record
	}
}

/// Pulls the primary key out of one side of a change event.
///
/// Anything that isn't a JSON object, or an object whose key column is missing or
/// unusable, has no id.
#[must_use]
pub fn extract_id(side: Option<&Value>, primary_key: &str) -> Option<RecordId> {
	side?
		.as_object()?
		.get(primary_key)
		.and_then(RecordId::from_value)
}

/// Turns a raw row payload into a [`Record`] keyed by `id`.
///
/// The payload is kept as is; only non-object payloads are rejected. The key may
/// come from the other side of the event, so it's passed in rather than re-read.
#[must_use]
pub fn normalize_record(id: RecordId, payload: &Value) -> Option<Record> {
	payload
		.as_object()
		.map(|fields| Record::new(id, fields.clone()))
}

/// Display ordering of the mirror.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
	pub field: String,
	#[serde(default)]
	pub descending: bool,
}

impl SortKey {
	#[must_use]
	pub fn ascending(field: impl Into<String>) -> Self {
		Self {
			field: field.into(),
			descending: false,
		}
	}

	#[must_use]
	pub fn descending(field: impl Into<String>) -> Self {
		Self {
			field: field.into(),
			descending: true,
		}
	}

	/// Orders two records by this key, falling back to ascending id order on ties.
	#[must_use]
	pub fn compare(&self, a: &Record, b: &Record) -> Ordering {
		let by_field = compare_values(a.get(&self.field), b.get(&self.field));
		let by_field = if self.descending {
			by_field.reverse()
		} else {
			by_field
		};

		by_field.then_with(|| a.id.cmp(&b.id))
	}
}

const fn type_rank(value: Option<&Value>) -> u8 {
	match value {
		None | Some(Value::Null) => 0,
		Some(Value::Bool(_)) => 1,
		Some(Value::Number(_)) => 2,
		Some(Value::String(_)) => 3,
		Some(Value::Array(_)) => 4,
		Some(Value::Object(_)) => 5,
	}
}

fn compare_values(a: Option<&Value>, b: Option<&Value>) -> Ordering {
	match (a, b) {
		(Some(Value::Bool(a)), Some(Value::Bool(b))) => a.cmp(b),
		(Some(Value::Number(a)), Some(Value::Number(b))) => match (a.as_i64(), b.as_i64()) {
			(Some(a), Some(b)) => a.cmp(&b),
			_ => a
				.as_f64()
				.partial_cmp(&b.as_f64())
				.unwrap_or(Ordering::Equal),
		},
		(Some(Value::String(a)), Some(Value::String(b))) => a.cmp(b),
		_ => type_rank(a).cmp(&type_rank(b)),
	}
}
