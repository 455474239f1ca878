//! In-memory registry of domain records.
//!
//! A [`RecordStore`] holds JSON objects keyed by the string value of one id
//! field (`customerId` for the CRM). Records without an id get the next free
//! numeric id: one more than the largest numeric id in the store, `"1"` for an
//! empty store. Non-numeric ids are allowed and never influence assignment.
//!
//! # Example
//!
//! ```
//! use crosstalk_runtime::records::RecordStore;
//! use serde_json::json;
//!
//! let store = RecordStore::new("customerId");
//! let id = store.upsert(json!({ "firstName": "Molly", "city": "Zeewolde" })).unwrap();
//!
//! assert_eq!(id, "1");
//! assert_eq!(store.get("1").unwrap()["customerId"], "1");
//! ```

use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use std::sync::{PoisonError, RwLock};
use thiserror::Error;
use tracing::{debug, info};

/// Errors from record writes and seeding.
#[derive(Error, Debug)]
pub enum RecordError {
    /// The record is not a JSON object
    #[error("Record must be a JSON object")]
    NotAnObject,

    /// The id field holds something other than a string or a number
    #[error("Record id field '{field}' must be a string or a number")]
    InvalidId {
        /// Name of the id field
        field: String,
    },

    /// Every numeric id up to `u64::MAX` is taken
    #[error("No free numeric record id is left")]
    IdsExhausted,

    /// The seed file could not be read
    #[error("Failed to read seed file: {0}")]
    Io(#[from] std::io::Error),

    /// The seed file is not a JSON array of records
    #[error("Malformed seed file: {0}")]
    Malformed(#[from] serde_json::Error),

    /// The CSV seed file could not be read or parsed
    #[error("Malformed CSV seed file: {0}")]
    Csv(#[from] csv::Error),
}

/// Outcome of [`RecordStore::write`].
#[derive(Debug, Clone, PartialEq)]
pub struct Written {
    /// Id the record is stored under
    pub id: String,
    /// The record that was replaced; `None` for a new record
    pub previous: Option<Value>,
    /// The record as stored
    pub current: Value,
}

/// Thread-safe keyed registry of JSON records.
#[derive(Debug)]
pub struct RecordStore {
    id_field: String,
    records: RwLock<HashMap<String, Value>>,
}

impl RecordStore {
    /// Create an empty store keyed by `id_field`.
    #[must_use]
    pub fn new(id_field: impl Into<String>) -> Self {
        Self {
            id_field: id_field.into(),
            records: RwLock::new(HashMap::new()),
        }
    }

    /// Name of the id field.
    #[must_use]
    pub fn id_field(&self) -> &str {
        &self.id_field
    }

    /// The record stored under `id`.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Value> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    /// Whether a record is stored under `id`.
    #[must_use]
    pub fn contains(&self, id: &str) -> bool {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(id)
    }

    /// Number of records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Whether the store holds no records.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Insert or replace `record`, returning its id.
    ///
    /// A missing or `null` id is assigned. Numeric ids are stored as strings.
    /// The stored record always carries its id in the id field.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::NotAnObject`], [`RecordError::InvalidId`] or,
    /// when an id must be assigned and none is free,
    /// [`RecordError::IdsExhausted`]; the store is unchanged then.
    pub fn upsert(&self, record: Value) -> Result<String, RecordError> {
        self.write(record).map(|written| written.id)
    }

    /// Like [`upsert`](Self::upsert), but also returns the record that was
    /// replaced and the one now stored.
    ///
    /// # Errors
    ///
    /// Same as [`upsert`](Self::upsert).
    pub fn write(&self, record: Value) -> Result<Written, RecordError> {
        let Value::Object(mut fields) = record else {
            return Err(RecordError::NotAnObject);
        };

        let given = match fields.get(&self.id_field) {
            None | Some(Value::Null) => None,
            Some(Value::String(id)) => Some(id.clone()),
            Some(Value::Number(id)) => Some(id.to_string()),
            Some(_) => {
                return Err(RecordError::InvalidId {
                    field: self.id_field.clone(),
                });
            }
        };

        let mut records = self.records.write().unwrap_or_else(PoisonError::into_inner);
        let id = match given {
            Some(id) => id,
            None => next_id(&records)?,
        };
        fields.insert(self.id_field.clone(), Value::String(id.clone()));
        let current = Value::Object(fields);

        let previous = records.insert(id.clone(), current.clone());
        if previous.is_some() {
            debug!(id = %id, "Record updated");
        } else {
            debug!(id = %id, "Record created");
        }
        Ok(Written {
            id,
            previous,
            current,
        })
    }

    /// All records, ordered by numeric id, then non-numeric ids lexically.
    #[must_use]
    pub fn list(&self) -> Vec<Value> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        let mut entries: Vec<(&String, &Value)> = records.iter().collect();
        entries.sort_by(|(a, _), (b, _)| {
            let key = |id: &str| (id.parse::<u64>().unwrap_or(u64::MAX), id.to_string());
            key(a).cmp(&key(b))
        });
        entries.into_iter().map(|(_, record)| record.clone()).collect()
    }

    /// All records as a JSON object of id to record.
    #[must_use]
    pub fn snapshot(&self) -> Map<String, Value> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(id, record)| (id.clone(), record.clone()))
            .collect()
    }

    /// Upsert every record of `records`, returning how many were stored.
    ///
    /// # Errors
    ///
    /// Stops at the first record that cannot be stored.
    pub fn seed(&self, records: Vec<Value>) -> Result<usize, RecordError> {
        let count = records.len();
        for record in records {
            self.upsert(record)?;
        }
        Ok(count)
    }
}

/// Read the records of a seed file.
///
/// A `.csv` file needs a header row; every following row becomes one record
/// with a string field per column. Any other file must hold a JSON array of
/// records.
///
/// # Errors
///
/// Returns [`RecordError::Csv`] for an unreadable or malformed CSV file,
/// [`RecordError::Io`] or [`RecordError::Malformed`] for a JSON file.
pub fn read_seed_file(path: impl AsRef<Path>) -> Result<Vec<Value>, RecordError> {
    let path = path.as_ref();
    let is_csv = path
        .extension()
        .is_some_and(|extension| extension.eq_ignore_ascii_case("csv"));

    let records = if is_csv {
        read_csv(path)?
    } else {
        serde_json::from_str(&std::fs::read_to_string(path)?)?
    };
    info!(path = %path.display(), count = records.len(), "Read seed file");
    Ok(records)
}

fn read_csv(path: &Path) -> Result<Vec<Value>, RecordError> {
    let mut reader = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(path)?;
    let headers = reader.headers()?.clone();

    let mut records = Vec::new();
    for row in reader.records() {
        let row = row?;
        let fields: Map<String, Value> = headers
            .iter()
            .zip(row.iter())
            .map(|(name, value)| (name.to_string(), Value::String(value.to_string())))
            .collect();
        records.push(Value::Object(fields));
    }
    Ok(records)
}

fn next_id(records: &HashMap<String, Value>) -> Result<String, RecordError> {
    match records.keys().filter_map(|id| id.parse::<u64>().ok()).max() {
        None => Ok("1".to_string()),
        Some(max) => max
            .checked_add(1)
            .map(|id| id.to_string())
            .ok_or(RecordError::IdsExhausted),
    }
}
