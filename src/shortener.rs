//! The shortener: identifier assignment, translation, and durable state.
//!
//! The authoritative mapping lives in a [`SkipList`]; durability comes from
//! an append-only operation log. Every successful mutation appends one line
//! and syncs it before returning, so the log always holds a prefix of the
//! committed mutations in linearisation order. Startup replays the log;
//! a periodic compaction pass rewrites it down to the live entries.
//!
//! # Locking
//!
//! Two locks, with distinct jobs:
//!
//! - the **log mutex** serialises appends to the file handle; it is taken
//!   after the map mutation, so file order matches commit order;
//! - the **compaction gate** is a read/write lock on which every mutating
//!   operation holds a read lease for its duration, while compaction holds
//!   the write lease. Mutations are excluded during compaction; map reads
//!   (`translate`, `list_all`) never touch the gate.

use std::fs;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::PathBuf;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::config::ShortenerConfig;
use crate::error::ShortenerError;
use crate::id::{random_id, ID_LENGTH};
use crate::oplog::{self, LogEntry, ACTION_INSERT, ACTION_REMOVE, DELETED_TARGET};
use crate::skiplist::{Iter, SkipList};

/// Random identifiers drawn before an insert gives up.
const ID_ATTEMPTS: u32 = 128;

/// Name of the compaction scratch file, created next to the log.
const SCRATCH_NAME: &str = "newlog";

/// The URL-shortening core.
///
/// # Example
///
/// ```no_run
/// use shortener_rs::{Shortener, ShortenerConfig};
///
/// let shortener = Shortener::open(ShortenerConfig::default()).unwrap();
/// shortener.load_from_log().unwrap();
///
/// let id = shortener.insert("https://example.com/a").unwrap();
/// assert_eq!(id.len(), 8);
/// assert_eq!(shortener.translate(&id).unwrap(), "https://example.com/a");
/// ```
pub struct Shortener {
    url_map: SkipList<String>,
    log: Mutex<fs::File>,
    compaction_gate: RwLock<()>,
    log_path: PathBuf,
    scratch_path: PathBuf,
}

impl Shortener {
    /// Opens (creating if missing) the operation log and an empty map.
    ///
    /// If a crash during a previous compaction left only the scratch file
    /// behind, it is promoted to be the log before opening. Call
    /// [`load_from_log`](Self::load_from_log) next to rebuild the map.
    pub fn open(config: ShortenerConfig) -> Result<Self, ShortenerError> {
        let log_path = config.log_path;
        let scratch_path = log_path
            .parent()
            .map(|dir| dir.join(SCRATCH_NAME))
            .unwrap_or_else(|| PathBuf::from(SCRATCH_NAME));

        oplog::recover_log_path(&log_path, &scratch_path)?;
        let log = oplog::open_log(&log_path)?;

        Ok(Shortener {
            url_map: SkipList::new(),
            log: Mutex::new(log),
            compaction_gate: RwLock::new(()),
            log_path,
            scratch_path,
        })
    }

    /// Shortens `url` under a freshly assigned identifier.
    ///
    /// Draws up to 128 uniform identifiers from the full ID space and keeps
    /// the first that does not collide with a live entry; expected cost is a
    /// single draw until the map is dense. The entry is logged and synced
    /// before the identifier is returned.
    ///
    /// Targets containing `|` will not survive a log round-trip; see the
    /// crate docs.
    pub fn insert(&self, url: &str) -> Result<String, ShortenerError> {
        if url.is_empty() {
            return Err(ShortenerError::EmptyInput);
        }
        let _lease = self.compaction_gate.read();

        for _ in 0..ID_ATTEMPTS {
            let id = random_id();
            debug_assert_eq!(id.len(), ID_LENGTH);
            if self.url_map.insert(id.clone(), url.to_string()).is_ok() {
                self.append(ACTION_INSERT, &id, url)?;
                return Ok(id);
            }
        }
        Err(ShortenerError::IdExhausted(ID_ATTEMPTS))
    }

    /// Shortens `url` under a caller-supplied identifier.
    ///
    /// No shape validation beyond non-emptiness: any non-empty id is
    /// accepted, whatever its length or alphabet.
    pub fn insert_custom(&self, id: &str, url: &str) -> Result<(), ShortenerError> {
        if id.is_empty() || url.is_empty() {
            return Err(ShortenerError::EmptyInput);
        }
        let _lease = self.compaction_gate.read();

        self.url_map.insert(id.to_string(), url.to_string())?;
        self.append(ACTION_INSERT, id, url)
    }

    /// Resolves an identifier to its target URL.
    pub fn translate(&self, id: &str) -> Result<String, ShortenerError> {
        self.url_map
            .search(id)
            .ok_or(crate::error::MapError::KeyNotFound.into())
    }

    /// Removes an identifier, logging the removal.
    pub fn remove(&self, id: &str) -> Result<(), ShortenerError> {
        let _lease = self.compaction_gate.read();

        self.url_map.remove(id)?;
        self.append(ACTION_REMOVE, id, DELETED_TARGET)
    }

    /// All live mappings in identifier order.
    pub fn list_all(&self) -> Iter<String> {
        self.url_map.iter()
    }

    /// Appends one entry to the log and syncs it.
    fn append(&self, action: &str, id: &str, target: &str) -> Result<(), ShortenerError> {
        let mut log = self.log.lock();
        oplog::write_entry(&mut log, action, id, target)?;
        Ok(())
    }

    /// Rebuilds the map by replaying the log from the start.
    ///
    /// Runs once at startup, before the instance is shared. Insert entries
    /// re-run a raw map insert (no log write, no randomness); remove entries
    /// a raw map remove. Malformed lines are logged and skipped. A map error
    /// during replay means the log and the compactor disagree about history
    /// and is fatal: the instance must be discarded.
    pub fn load_from_log(&self) -> Result<(), ShortenerError> {
        let mut log = self.log.lock();
        info!(path = %self.log_path.display(), "restoring state from log");

        log.seek(SeekFrom::Start(0))?;
        let mut replayed = 0usize;
        {
            let reader = BufReader::new(&*log);
            for (index, line) in reader.lines().enumerate() {
                let line = line?;
                let line_no = index + 1;
                match oplog::parse_line(&line) {
                    Some(LogEntry::Insert { id, target }) => {
                        debug!(id, target, "replay insert");
                        self.url_map
                            .insert(id.to_string(), target.to_string())
                            .map_err(|source| ShortenerError::Replay { line_no, source })?;
                        replayed += 1;
                    }
                    Some(LogEntry::Remove { id }) => {
                        debug!(id, "replay remove");
                        self.url_map
                            .remove(id)
                            .map_err(|source| ShortenerError::Replay { line_no, source })?;
                        replayed += 1;
                    }
                    None => warn!(line_no, line = %line, "skipping invalid log entry"),
                }
            }
        }
        log.seek(SeekFrom::End(0))?;

        info!(entries = replayed, "log replay complete");
        Ok(())
    }

    /// Rewrites the log down to the live entries.
    ///
    /// Takes the compaction gate's write lease (excluding all mutators; map
    /// reads stay unblocked) and the log mutex, streams the live map into the
    /// scratch file, syncs it, then swaps it over the log and reopens.
    /// Typically driven by a daily tick.
    pub fn compact_log(&self) -> Result<(), ShortenerError> {
        let _gate = self.compaction_gate.write();
        let mut log = self.log.lock();
        info!(path = %self.log_path.display(), "starting log compaction");

        let mut scratch = oplog::create_scratch(&self.scratch_path)?;
        let mut live = 0usize;
        for (id, target) in self.url_map.iter() {
            debug!(id = %id, target = %target, "compaction keep");
            oplog::write_entry(&mut scratch, ACTION_INSERT, &id, &target)?;
            live += 1;
        }
        scratch.sync_all()?;
        drop(scratch);

        fs::remove_file(&self.log_path)?;
        fs::rename(&self.scratch_path, &self.log_path)?;
        *log = oplog::open_log(&self.log_path)?;

        info!(entries = live, "log compaction complete");
        Ok(())
    }
}
