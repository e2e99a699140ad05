use std::{
    collections::HashMap,
    fs::{OpenOptions, create_dir_all},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::{Mutex, RwLock},
};

use ranking::{RankedEntry, insertion_index, top_k};
use schema::{Entry, FieldKind, FieldValue, LeaderboardId, ValidationError};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum StoreError {
    #[error("validation error: {0}")]
    Validation(#[from] ValidationError),
    #[error("io error: {0}")]
    Io(String),
    #[error("wal parse error: {0}")]
    Parse(String),
    #[error("lock poisoned for {0}")]
    LockPoisoned(String),
}

impl From<std::io::Error> for StoreError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

pub trait LeaderboardStore: Send + Sync {
    fn insert(&self, entry: Entry) -> Result<(), StoreError>;

    fn top_k(&self, leaderboard: LeaderboardId, k: usize) -> Result<Vec<Entry>, StoreError>;

    fn entry_count(&self, leaderboard: LeaderboardId) -> Result<usize, StoreError>;
}

// ---------------------------------------------------------------------------
// In-memory boards
// ---------------------------------------------------------------------------

#[derive(Default)]
struct Board {
    ranked: Vec<RankedEntry>,
    next_sequence: u64,
}

impl Board {
    fn push(&mut self, entry: Entry) {
        let sequence = self.next_sequence;
        self.next_sequence += 1;
        let index = insertion_index(&self.ranked, entry.score());
        self.ranked.insert(index, RankedEntry { sequence, entry });
    }
}

pub struct InMemoryStore {
    boards: HashMap<LeaderboardId, RwLock<Board>>,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self {
            boards: LeaderboardId::all()
                .map(|id| (id, RwLock::new(Board::default())))
                .collect(),
        }
    }

    fn board(&self, leaderboard: LeaderboardId) -> &RwLock<Board> {
        // Boards are created for every registered id up front.
        &self.boards[&leaderboard]
    }

    pub fn total_entries(&self) -> usize {
        self.boards
            .values()
            .map(|board| board.read().map(|b| b.ranked.len()).unwrap_or(0))
            .sum()
    }
}

impl LeaderboardStore for InMemoryStore {
    fn insert(&self, entry: Entry) -> Result<(), StoreError> {
        let leaderboard = entry.leaderboard();
        let mut board = self
            .board(leaderboard)
            .write()
            .map_err(|_| StoreError::LockPoisoned(leaderboard.to_string()))?;
        board.push(entry);
        Ok(())
    }

    fn top_k(&self, leaderboard: LeaderboardId, k: usize) -> Result<Vec<Entry>, StoreError> {
        let board = self
            .board(leaderboard)
            .read()
            .map_err(|_| StoreError::LockPoisoned(leaderboard.to_string()))?;
        Ok(top_k(&board.ranked, k))
    }

    fn entry_count(&self, leaderboard: LeaderboardId) -> Result<usize, StoreError> {
        let board = self
            .board(leaderboard)
            .read()
            .map_err(|_| StoreError::LockPoisoned(leaderboard.to_string()))?;
        Ok(board.ranked.len())
    }
}

// ---------------------------------------------------------------------------
// Write-ahead log
// ---------------------------------------------------------------------------

const ENTRY_RECORD_KIND: &str = "E";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalWritePolicy {
    pub sync_every_records: usize,
}

impl Default for WalWritePolicy {
    fn default() -> Self {
        Self {
            sync_every_records: 1,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct StoreLoadStats {
    pub entries_loaded: usize,
    pub per_leaderboard: Vec<(String, usize)>,
}

/// Append-only entry log, one tab-separated record per line.
pub struct FileWal {
    path: PathBuf,
    wal_records: usize,
    sync_every_records: usize,
    unsynced_records: usize,
}

impl FileWal {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        Self::open_with_policy(path, WalWritePolicy::default())
    }

    pub fn open_with_policy(
        path: impl AsRef<Path>,
        policy: WalWritePolicy,
    ) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            create_dir_all(parent)?;
        }
        OpenOptions::new().create(true).append(true).open(&path)?;
        let wal_records = count_non_empty_lines(&path)?;
        Ok(Self {
            path,
            wal_records,
            sync_every_records: policy.sync_every_records.max(1),
            unsynced_records: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn wal_record_count(&self) -> usize {
        self.wal_records
    }

    #[cfg(test)]
    fn unsynced_record_count(&self) -> usize {
        self.unsynced_records
    }

    pub fn append_entry(&mut self, entry: &Entry) -> Result<(), StoreError> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(file, "{}", entry_to_line(entry))?;
        self.wal_records += 1;
        self.unsynced_records += 1;
        if self.unsynced_records >= self.sync_every_records {
            file.sync_data()?;
            self.unsynced_records = 0;
        }
        Ok(())
    }

    pub fn flush_pending_sync(&mut self) -> Result<(), StoreError> {
        if self.unsynced_records == 0 {
            return Ok(());
        }
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        file.sync_data()?;
        self.unsynced_records = 0;
        Ok(())
    }

    pub fn replay_entries(&self) -> Result<Vec<Entry>, StoreError> {
        let file = OpenOptions::new().read(true).open(&self.path)?;
        let reader = BufReader::new(file);
        let mut out = Vec::new();
        for line in reader.lines() {
            let line = line?;
            if line.trim().is_empty() {
                continue;
            }
            out.push(line_to_entry(&line)?);
        }
        Ok(out)
    }
}

impl Drop for FileWal {
    fn drop(&mut self) {
        let _ = self.flush_pending_sync();
    }
}

// ---------------------------------------------------------------------------
// Persistent store
// ---------------------------------------------------------------------------

pub struct PersistentStore {
    memory: InMemoryStore,
    wal: Mutex<FileWal>,
}

impl PersistentStore {
    pub fn load(wal: FileWal) -> Result<(Self, StoreLoadStats), StoreError> {
        let memory = InMemoryStore::new();
        let entries = wal.replay_entries()?;
        let entries_loaded = entries.len();
        for entry in entries {
            memory.insert(entry)?;
        }
        let mut per_leaderboard = Vec::new();
        for id in LeaderboardId::all() {
            per_leaderboard.push((id.to_string(), memory.entry_count(id)?));
        }
        tracing::debug!(
            wal = %wal.path().display(),
            entries_loaded,
            "replayed leaderboard wal"
        );
        Ok((
            Self {
                memory,
                wal: Mutex::new(wal),
            },
            StoreLoadStats {
                entries_loaded,
                per_leaderboard,
            },
        ))
    }

    pub fn open(
        path: impl AsRef<Path>,
        policy: WalWritePolicy,
    ) -> Result<(Self, StoreLoadStats), StoreError> {
        Self::load(FileWal::open_with_policy(path, policy)?)
    }

    pub fn wal_record_count(&self) -> Result<usize, StoreError> {
        let wal = self
            .wal
            .lock()
            .map_err(|_| StoreError::LockPoisoned("wal".to_string()))?;
        Ok(wal.wal_record_count())
    }
}

impl LeaderboardStore for PersistentStore {
    fn insert(&self, entry: Entry) -> Result<(), StoreError> {
        // The wal lock is held across the in-memory insert so replay order
        // matches the order in which ties were ranked.
        let mut wal = self
            .wal
            .lock()
            .map_err(|_| StoreError::LockPoisoned("wal".to_string()))?;
        wal.append_entry(&entry)?;
        self.memory.insert(entry)
    }

    fn top_k(&self, leaderboard: LeaderboardId, k: usize) -> Result<Vec<Entry>, StoreError> {
        self.memory.top_k(leaderboard, k)
    }

    fn entry_count(&self, leaderboard: LeaderboardId) -> Result<usize, StoreError> {
        self.memory.entry_count(leaderboard)
    }
}

// ---------------------------------------------------------------------------
// Record encoding
// ---------------------------------------------------------------------------

fn entry_to_line(entry: &Entry) -> String {
    let mut line = format!("{ENTRY_RECORD_KIND}\t{}", escape_field(entry.leaderboard().as_str()));
    for value in entry.values() {
        line.push('\t');
        match value {
            FieldValue::Integer(value) => line.push_str(&value.to_string()),
            FieldValue::Text(value) => line.push_str(&escape_field(value)),
        }
    }
    line
}

fn line_to_entry(line: &str) -> Result<Entry, StoreError> {
    let parts: Vec<&str> = line.split('\t').collect();
    if parts.len() < 2 || parts[0] != ENTRY_RECORD_KIND {
        return Err(StoreError::Parse("unknown wal record kind".to_string()));
    }
    let list = unescape_field(parts[1])?;
    let leaderboard = LeaderboardId::parse(&list)
        .ok_or_else(|| StoreError::Parse(format!("wal record for unknown list '{list}'")))?;
    let schema = leaderboard.schema();
    let raw_values = &parts[2..];
    if raw_values.len() != schema.len() {
        return Err(StoreError::Parse(format!(
            "{list} record has invalid field count"
        )));
    }
    let mut values = Vec::with_capacity(schema.len());
    for (field, raw) in schema.fields().iter().zip(raw_values) {
        let value = match field.kind {
            FieldKind::Integer => FieldValue::Integer(
                raw.parse::<i32>().map(i64::from).map_err(|_| {
                    StoreError::Parse(format!("{list} record has invalid {}", field.name))
                })?,
            ),
            FieldKind::Text => FieldValue::Text(unescape_field(raw)?),
        };
        values.push(value);
    }
    Ok(Entry::from_values(leaderboard, values)?)
}

fn count_non_empty_lines(path: &Path) -> Result<usize, StoreError> {
    let file = OpenOptions::new().read(true).open(path)?;
    let reader = BufReader::new(file);
    let mut count = 0usize;
    for line in reader.lines() {
        let line = line?;
        if !line.trim().is_empty() {
            count += 1;
        }
    }
    Ok(count)
}

fn escape_field(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('\t', "\\t")
        .replace('\n', "\\n")
        .replace('\r', "\\r")
}

fn unescape_field(value: &str) -> Result<String, StoreError> {
    let mut output = String::with_capacity(value.len());
    let mut escaped = false;
    for ch in value.chars() {
        if escaped {
            match ch {
                '\\' => output.push('\\'),
                't' => output.push('\t'),
                'n' => output.push('\n'),
                'r' => output.push('\r'),
                other => {
                    return Err(StoreError::Parse(format!(
                        "invalid escape sequence: \\{other}"
                    )));
                }
            }
            escaped = false;
        } else if ch == '\\' {
            escaped = true;
        } else {
            output.push(ch);
        }
    }
    if escaped {
        return Err(StoreError::Parse(
            "unterminated escape sequence in wal field".to_string(),
        ));
    }
    Ok(output)
}
