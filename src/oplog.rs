//! Operation-log line format and file plumbing.
//!
//! The log is UTF-8 text, one LF-terminated line per committed mutation:
//!
//! ```text
//! +|<id>|<target>
//! -|<id>|[DELETED]
//! ```
//!
//! The `|` delimiter is not escaped; targets containing `|` will not
//! round-trip. Parsing is lenient (malformed lines are the caller's problem
//! to skip), writing is strict: every append syncs the file before returning.

use std::fs::{File, OpenOptions};
use std::io::{self, Seek, SeekFrom, Write};
use std::path::Path;

/// Action symbol for an insert entry.
pub(crate) const ACTION_INSERT: &str = "+";

/// Action symbol for a remove entry.
pub(crate) const ACTION_REMOVE: &str = "-";

/// Placeholder target recorded for removes.
pub(crate) const DELETED_TARGET: &str = "[DELETED]";

#[cfg(unix)]
const LOG_FILE_MODE: u32 = 0o666;

/// One decoded log line.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum LogEntry<'a> {
    Insert { id: &'a str, target: &'a str },
    Remove { id: &'a str },
}

/// Parses a log line; `None` for anything malformed.
pub(crate) fn parse_line(line: &str) -> Option<LogEntry<'_>> {
    let mut parts = line.splitn(3, '|');
    let action = parts.next()?;
    let id = parts.next()?;
    let target = parts.next()?;
    match action {
        ACTION_INSERT => Some(LogEntry::Insert { id, target }),
        ACTION_REMOVE => Some(LogEntry::Remove { id }),
        _ => None,
    }
}

/// Appends one entry and syncs the file to storage.
pub(crate) fn write_entry(file: &mut File, action: &str, id: &str, target: &str) -> io::Result<()> {
    writeln!(file, "{action}|{id}|{target}")?;
    file.sync_all()
}

/// Opens (creating if missing) a log file for read/write and seeks to its
/// end, ready for appends.
pub(crate) fn open_log(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.read(true).write(true).create(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(LOG_FILE_MODE);
    }
    let mut file = options.open(path)?;
    file.seek(SeekFrom::End(0))?;
    Ok(file)
}

/// Creates a fresh compaction scratch file, truncating any stale leftover so
/// an interrupted earlier compaction can never leak old entries into a new
/// one.
pub(crate) fn create_scratch(path: &Path) -> io::Result<File> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(LOG_FILE_MODE);
    }
    options.open(path)
}

/// Picks up after a crash mid-compaction.
///
/// Compaction removes `log` before renaming `newlog` over it, so a crash in
/// that window leaves only `newlog`. The finished scratch file is the
/// authoritative state in that case: promote it. If `log` exists it wins and
/// any leftover `newlog` is ignored (it will be truncated by the next
/// compaction).
pub(crate) fn recover_log_path(log_path: &Path, scratch_path: &Path) -> io::Result<()> {
    if !log_path.exists() && scratch_path.exists() {
        std::fs::rename(scratch_path, log_path)?;
    }
    Ok(())
}
