//! Record source - the identity to record mapping.
//!
//! A source distinguishes three states per identity: a record that exists,
//! an identity the server explicitly reported as nonexistent (a tombstone),
//! and an identity that was simply never fetched. Tombstones count as known
//! data; only truly unknown identities are invisible to `size` and
//! `record_ids`.

use crate::{error::Result, DataId, Error, Record};
use serde::{Deserialize, Serialize};
use std::collections::{hash_map, BTreeMap, HashMap, HashSet};

/// Version of the serialized source format for future compatibility.
pub const SOURCE_FORMAT_VERSION: u32 = 1;

/// Status of an identity within a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordState {
    /// A record is present
    Existent,
    /// The server reported the entity as null
    Nonexistent,
    /// Never fetched
    Unknown,
}

/// A stored entry: either a live record or a tombstone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub(crate) enum Entry {
    Record(Record),
    Tombstone,
}

/// The read surface shared by mutable sources and composed overlay views.
pub trait RecordSourceRead {
    /// Get the record for an identity, if one exists.
    fn get(&self, id: &str) -> Option<&Record>;

    /// Get the status of an identity.
    fn status(&self, id: &str) -> RecordState;

    /// Check whether anything is known about an identity.
    fn has(&self, id: &str) -> bool {
        self.status(id) != RecordState::Unknown
    }
}

/// A mutable in-memory record source.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordSource {
    entries: HashMap<DataId, Entry>,
}

impl RecordSource {
    /// Create an empty source.
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record, keyed by its own identity. Replaces tombstones.
    pub fn set(&mut self, record: Record) {
        self.entries.insert(record.id.clone(), Entry::Record(record));
    }

    /// Mark an identity as nonexistent.
    pub fn delete(&mut self, id: impl Into<DataId>) {
        self.entries.insert(id.into(), Entry::Tombstone);
    }

    /// Forget an identity entirely, returning it to the unknown state.
    pub fn remove(&mut self, id: &str) {
        self.entries.remove(id);
    }

    /// Forget everything.
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Get a mutable record, if one exists for the identity.
    pub fn get_mut(&mut self, id: &str) -> Option<&mut Record> {
        match self.entries.get_mut(id) {
            Some(Entry::Record(record)) => Some(record),
            _ => None,
        }
    }

    /// Get the record for an identity, creating an empty one if it is
    /// unknown or tombstoned.
    pub fn get_or_create(&mut self, id: &str) -> &mut Record {
        let entry = self
            .entries
            .entry(id.to_string())
            .or_insert_with(|| Entry::Record(Record::new(id)));
        if matches!(entry, Entry::Tombstone) {
            *entry = Entry::Record(Record::new(id));
        }
        match entry {
            Entry::Record(record) => record,
            Entry::Tombstone => unreachable!(),
        }
    }

    /// Count of known identities, tombstones included.
    pub fn size(&self) -> usize {
        self.entries.len()
    }

    /// Check whether nothing is known.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All known identities, in no particular order.
    pub fn record_ids(&self) -> impl Iterator<Item = &DataId> {
        self.entries.keys()
    }

    /// Drop every identity not in `keep`.
    pub(crate) fn retain_ids(&mut self, keep: &HashSet<DataId>) {
        self.entries.retain(|id, _| keep.contains(id));
    }

    pub(crate) fn into_entries(self) -> hash_map::IntoIter<DataId, Entry> {
        self.entries.into_iter()
    }

    /// Serialize to JSON with deterministic ordering.
    pub fn to_json(&self) -> Result<String> {
        let export = SourceExport {
            format_version: SOURCE_FORMAT_VERSION,
            records: self.entries.iter().collect(),
        };
        serde_json::to_string(&export).map_err(|e| Error::InvalidSource(e.to_string()))
    }

    /// Deserialize from JSON produced by [`RecordSource::to_json`].
    pub fn from_json(json: &str) -> Result<Self> {
        let import: SourceImport =
            serde_json::from_str(json).map_err(|e| Error::InvalidSource(e.to_string()))?;
        if import.format_version > SOURCE_FORMAT_VERSION {
            return Err(Error::InvalidSource(format!(
                "unsupported source format version: {} (max supported: {})",
                import.format_version, SOURCE_FORMAT_VERSION
            )));
        }
        Ok(Self {
            entries: import.records.into_iter().collect(),
        })
    }
}

impl RecordSourceRead for RecordSource {
    fn get(&self, id: &str) -> Option<&Record> {
        match self.entries.get(id) {
            Some(Entry::Record(record)) => Some(record),
            _ => None,
        }
    }

    fn status(&self, id: &str) -> RecordState {
        match self.entries.get(id) {
            Some(Entry::Record(_)) => RecordState::Existent,
            Some(Entry::Tombstone) => RecordState::Nonexistent,
            None => RecordState::Unknown,
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SourceExport<'a> {
    format_version: u32,
    records: BTreeMap<&'a DataId, &'a Entry>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SourceImport {
    format_version: u32,
    records: BTreeMap<DataId, Entry>,
}

/// A read-only view composing a transient overlay atop a base source.
///
/// Any entry in the overlay, tombstones included, shadows the base.
#[derive(Debug, Clone, Copy)]
pub struct OverlaySource<'a> {
    overlay: &'a RecordSource,
    base: &'a RecordSource,
}

impl<'a> OverlaySource<'a> {
    /// Compose `overlay` over `base`.
    pub fn new(overlay: &'a RecordSource, base: &'a RecordSource) -> Self {
        Self { overlay, base }
    }
}

impl RecordSourceRead for OverlaySource<'_> {
    fn get(&self, id: &str) -> Option<&Record> {
        match self.overlay.status(id) {
            RecordState::Existent => self.overlay.get(id),
            RecordState::Nonexistent => None,
            RecordState::Unknown => self.base.get(id),
        }
    }

    fn status(&self, id: &str) -> RecordState {
        match self.overlay.status(id) {
            RecordState::Unknown => self.base.status(id),
            known => known,
        }
    }
}
