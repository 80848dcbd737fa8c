use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, PoisonError};

use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Map, Value};
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::giveaway::models::{ActiveRecord, FinishedRecord, GiveawayId};

pub const ACTIVE_TABLE_FILE: &str = "giveaways.json";
pub const FINISHED_TABLE_FILE: &str = "finished_giveaways.json";

/// Records that could be decoded from a table, in id order.
#[derive(Debug, Clone, Eq, PartialEq)]
pub struct LoadedTable<R> {
    pub records: Vec<(GiveawayId, R)>,
    // Amount of entries dropped because they couldn't be decoded.
    pub skipped: usize,
    // Set when the stored table was unreadable as a whole and got moved there.
    pub moved_aside: Option<PathBuf>,
}

impl<R> LoadedTable<R> {
    pub fn empty() -> Self {
        LoadedTable {
            records: Vec::new(),
            skipped: 0,
            moved_aside: None,
        }
    }
}

/// Durable persistence of the two giveaway tables. Each save replaces the
/// whole table at once.
pub trait GiveawayStore: Send + Sync {
    fn load_active(&self) -> Result<LoadedTable<ActiveRecord>>;

    fn load_finished(&self) -> Result<LoadedTable<FinishedRecord>>;

    fn save_active(&self, records: &BTreeMap<GiveawayId, ActiveRecord>) -> Result<()>;

    fn save_finished(&self, records: &BTreeMap<GiveawayId, FinishedRecord>) -> Result<()>;
}

// Decodes a table entry by entry, so that one broken record doesn't take the
// rest of the table with it.
fn decode_table<R: DeserializeOwned>(table: &str, raw: &str) -> Result<LoadedTable<R>> {
    let entries: Map<String, Value> = serde_json::from_str(raw)?;
    let mut loaded = LoadedTable::empty();

    for (key, value) in entries {
        let id = match key.parse::<GiveawayId>() {
            Ok(id) => id,
            Err(err) => {
                warn!("Skipping the record '{}' in the {} table: invalid id ({})", key, table, err);
                loaded.skipped += 1;
                continue;
            }
        };

        match serde_json::from_value::<R>(value) {
            Ok(record) => loaded.records.push((id, record)),
            Err(err) => {
                warn!("Skipping the giveaway {} in the {} table: {}", id, table, err);
                loaded.skipped += 1;
            }
        }
    }

    loaded.records.sort_by_key(|(id, _)| *id);
    Ok(loaded)
}

fn encode_table<R: Serialize>(records: &BTreeMap<GiveawayId, R>) -> Result<String> {
    Ok(serde_json::to_string_pretty(records)?)
}

/// Stores both tables as JSON files in a single directory.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    active_path: PathBuf,
    finished_path: PathBuf,
}

impl JsonFileStore {
    pub fn new<P: AsRef<Path>>(directory: P) -> Self {
        let directory = directory.as_ref();
        JsonFileStore {
            active_path: directory.join(ACTIVE_TABLE_FILE),
            finished_path: directory.join(FINISHED_TABLE_FILE),
        }
    }

    pub fn active_path(&self) -> &Path {
        &self.active_path
    }

    pub fn finished_path(&self) -> &Path {
        &self.finished_path
    }

    fn load<R: DeserializeOwned>(&self, table: &str, path: &Path) -> Result<LoadedTable<R>> {
        let decoded = match fs::read_to_string(path) {
            Ok(raw) => decode_table(table, &raw),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("No {} table at {}, starting empty", table, path.display());
                return Ok(LoadedTable::empty());
            }
            // Not UTF-8, so it can't be a JSON table either.
            Err(err) if err.kind() == ErrorKind::InvalidData => Err(Error::from(err)),
            Err(err) => return Err(Error::from(err)),
        };

        match decoded {
            Ok(loaded) => Ok(loaded),
            Err(err) => {
                // Keep the unreadable file around instead of overwriting it
                // with the next save.
                let backup = path.with_extension("json.corrupt");
                error!(
                    "The {} table at {} is unreadable ({}), moving it to {}",
                    table,
                    path.display(),
                    err,
                    backup.display()
                );
                fs::rename(path, &backup)?;

                let mut loaded = LoadedTable::empty();
                loaded.moved_aside = Some(backup);
                Ok(loaded)
            }
        }
    }

    // Writes into a sibling temporary file and renames it over the target,
    // so readers only ever see a complete table.
    fn write_atomic(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let tmp_path = path.with_extension("json.tmp");
        {
            let mut file = File::create(&tmp_path)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, path)?;
        Ok(())
    }
}

impl GiveawayStore for JsonFileStore {
    fn load_active(&self) -> Result<LoadedTable<ActiveRecord>> {
        self.load("active", &self.active_path)
    }

    fn load_finished(&self) -> Result<LoadedTable<FinishedRecord>> {
        self.load("finished", &self.finished_path)
    }

    fn save_active(&self, records: &BTreeMap<GiveawayId, ActiveRecord>) -> Result<()> {
        let content = encode_table(records)?;
        self.write_atomic(&self.active_path, &content)
    }

    fn save_finished(&self, records: &BTreeMap<GiveawayId, FinishedRecord>) -> Result<()> {
        let content = encode_table(records)?;
        self.write_atomic(&self.finished_path, &content)
    }
}

/// Keeps the serialized tables in memory. Goes through the same encoding as
/// the file store.
#[derive(Debug, Default)]
pub struct MemoryStore {
    active: Mutex<Option<String>>,
    finished: Mutex<Option<String>>,
    fail_writes: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        MemoryStore::default()
    }

    pub fn with_raw_tables(active: Option<&str>, finished: Option<&str>) -> Self {
        MemoryStore {
            active: Mutex::new(active.map(str::to_string)),
            finished: Mutex::new(finished.map(str::to_string)),
            fail_writes: AtomicBool::new(false),
        }
    }

    // Makes every following save fail, simulating an unavailable disk.
    pub fn set_fail_writes(&self, value: bool) {
        self.fail_writes.store(value, Ordering::SeqCst);
    }

    pub fn raw_active(&self) -> Option<String> {
        self.active.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn raw_finished(&self) -> Option<String> {
        self.finished.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    fn load<R: DeserializeOwned>(
        &self,
        table: &str,
        slot: &Mutex<Option<String>>,
    ) -> Result<LoadedTable<R>> {
        let raw = slot.lock().unwrap_or_else(PoisonError::into_inner).clone();
        match raw {
            Some(raw) => decode_table(table, &raw),
            None => Ok(LoadedTable::empty()),
        }
    }

    fn save<R: Serialize>(
        &self,
        slot: &Mutex<Option<String>>,
        records: &BTreeMap<GiveawayId, R>,
    ) -> Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(Error::Storage("The memory store rejects writes.".to_string()));
        }

        let content = encode_table(records)?;
        *slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(content);
        Ok(())
    }
}

impl GiveawayStore for MemoryStore {
    fn load_active(&self) -> Result<LoadedTable<ActiveRecord>> {
        self.load("active", &self.active)
    }

    fn load_finished(&self) -> Result<LoadedTable<FinishedRecord>> {
        self.load("finished", &self.finished)
    }

    fn save_active(&self, records: &BTreeMap<GiveawayId, ActiveRecord>) -> Result<()> {
        self.save(&self.active, records)
    }

    fn save_finished(&self, records: &BTreeMap<GiveawayId, FinishedRecord>) -> Result<()> {
        self.save(&self.finished, records)
    }
}
