//! The snapshot codec: newline-delimited `key:value` records.
//!
//! Both list flavors persist their committed contents as UTF-8 text, one
//! record per line, key and value joined by `:`. The separator is reserved
//! and must not appear in keys; values may contain it, since the split
//! happens at the first occurrence. A dump is a best-effort whole-file
//! rewrite — there is no write-ahead log and no atomic rename, so a crash
//! mid-dump may leave a partial file behind.
//!
//! On load, lines that are empty, lack the separator, or fail to parse are
//! skipped (and logged); I/O errors propagate to the caller.

use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufRead, BufReader, BufWriter, Write};
use std::path::Path;
use std::str::FromStr;

/// Default snapshot path for the MVCC list.
pub const MVCC_STORE_PATH: &str = "store/dumpFile_mvcc";
/// Default snapshot path for the sharded list.
pub const SHARDED_STORE_PATH: &str = "store/dumpFile_optimized";

/// The reserved key/value separator.
const RECORD_SEPARATOR: char = ':';

/// Rewrites `path` with one `key:value` line per record, creating the
/// parent directory if needed.
pub fn write_records<K, V>(path: &Path, records: &[(K, V)]) -> io::Result<()>
where
    K: fmt::Display,
    V: fmt::Display,
{
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let mut writer = BufWriter::new(File::create(path)?);
    for (key, value) in records {
        writeln!(writer, "{}{}{}", key, RECORD_SEPARATOR, value)?;
    }
    writer.flush()
}

/// Reads back every well-formed record from `path`, in file order.
pub fn read_records<K, V>(path: &Path) -> io::Result<Vec<(K, V)>>
where
    K: FromStr,
    V: FromStr,
{
    let reader = BufReader::new(File::open(path)?);
    let mut records = Vec::new();
    for line in reader.lines() {
        let line = line?;
        let Some((key, value)) = split_record(&line) else {
            if !line.is_empty() {
                log::warn!("skipping malformed snapshot line: {:?}", line);
            }
            continue;
        };
        match (key.parse::<K>(), value.parse::<V>()) {
            (Ok(key), Ok(value)) => records.push((key, value)),
            _ => log::warn!("skipping unparseable snapshot record: {:?}", line),
        }
    }
    Ok(records)
}

/// Splits a line at the first separator. Empty or separator-less lines are
/// not records.
fn split_record(line: &str) -> Option<(&str, &str)> {
    if line.is_empty() {
        return None;
    }
    line.split_once(RECORD_SEPARATOR)
}
