//! Partitioned log store
//!
//! Rendered event lines are appended to one file per (endpoint, instance,
//! calendar day):
//!
//! ```text
//! {root}/endpoint_{id}/i_{instance}/{YYYY-MM-DD}.log
//! ```
//!
//! Instance ids are percent-encoded, so distinct ids never share a directory.
//! Endpoint-scoped lines (no instance) go to the `_endpoint` directory, which
//! no encoded instance id can produce.
//! Removing `endpoint_{id}` purges everything recorded for that endpoint.
//! Each line is a JSON object, so multi-line messages survive a round trip.

use chrono::{DateTime, Days, Local, NaiveDate};
use dashmap::DashMap;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde::{Deserialize, Serialize};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Directory used for lines that do not belong to an instance
const ENDPOINT_SCOPE_DIR: &str = "_endpoint";

const INSTANCE_DIR_PREFIX: &str = "i_";

/// Everything but `[A-Za-z0-9_-]` is escaped, including `%` itself
const INSTANCE_ID_ESCAPES: &AsciiSet = &NON_ALPHANUMERIC.remove(b'-').remove(b'_');

const PARTITION_EXT: &str = "log";

#[derive(Debug, Error)]
pub enum FileLogError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, FileLogError>;

/// One stored line
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntry {
    pub timestamp: DateTime<Local>,
    pub message: String,
}

/// On-disk footprint of an endpoint's partitions
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LogStats {
    pub files: u64,
    pub bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct PartitionKey {
    endpoint_id: i64,
    instance: String,
}

/// File-backed, day-partitioned log store
pub struct FileLogStore {
    root: PathBuf,
    /// Serializes writers of one (endpoint, instance) pair
    locks: DashMap<PartitionKey, Arc<Mutex<()>>>,
}

impl FileLogStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: DashMap::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn endpoint_dir(&self, endpoint_id: i64) -> PathBuf {
        self.root.join(format!("endpoint_{}", endpoint_id))
    }

    fn instance_dir(&self, endpoint_id: i64, instance_id: Option<&str>) -> PathBuf {
        self.endpoint_dir(endpoint_id)
            .join(instance_dir_name(instance_id))
    }

    fn lock_for(&self, endpoint_id: i64, instance_id: Option<&str>) -> Arc<Mutex<()>> {
        self.locks
            .entry(partition_key(endpoint_id, instance_id))
            .or_default()
            .clone()
    }

    /// Append a line to today's partition
    pub async fn append(
        &self,
        endpoint_id: i64,
        instance_id: Option<&str>,
        message: &str,
    ) -> Result<()> {
        self.append_at(endpoint_id, instance_id, message, Local::now())
            .await
    }

    /// Append a line to the partition of `at`'s calendar day
    pub async fn append_at(
        &self,
        endpoint_id: i64,
        instance_id: Option<&str>,
        message: &str,
        at: DateTime<Local>,
    ) -> Result<()> {
        let entry = LogEntry {
            timestamp: at,
            message: message.to_string(),
        };
        let mut line = serde_json::to_vec(&entry)?;
        line.push(b'\n');

        let dir = self.instance_dir(endpoint_id, instance_id);
        let path = dir.join(partition_file_name(at.date_naive()));

        let lock = self.lock_for(endpoint_id, instance_id);
        let _guard = lock.lock().await;

        fs::create_dir_all(&dir).await?;
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }

    /// Most recent entries of the last `days` calendar days, newest first
    pub async fn read_recent(
        &self,
        endpoint_id: i64,
        instance_id: Option<&str>,
        days: u32,
        limit: usize,
    ) -> Result<Vec<LogEntry>> {
        self.read_recent_at(endpoint_id, instance_id, days, limit, Local::now().date_naive())
            .await
    }

    /// Same as [`Self::read_recent`] with an explicit "today"
    pub async fn read_recent_at(
        &self,
        endpoint_id: i64,
        instance_id: Option<&str>,
        days: u32,
        limit: usize,
        today: NaiveDate,
    ) -> Result<Vec<LogEntry>> {
        let mut entries = Vec::new();
        if limit == 0 {
            return Ok(entries);
        }

        let oldest = today
            .checked_sub_days(Days::new(u64::from(days.max(1) - 1)))
            .unwrap_or(NaiveDate::MIN);

        // Only partitions that exist are visited, however wide the window
        let dir = self.instance_dir(endpoint_id, instance_id);
        let mut in_window: Vec<_> = partitions(&dir)
            .await?
            .into_iter()
            .filter(|(_, day)| *day >= oldest && *day <= today)
            .collect();
        in_window.sort_by(|a, b| b.1.cmp(&a.1));

        for (path, _) in in_window {
            let content = match fs::read_to_string(&path).await {
                Ok(content) => content,
                Err(e) if e.kind() == ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };

            let mut day_entries: Vec<LogEntry> = content
                .lines()
                .filter(|line| !line.trim().is_empty())
                .filter_map(|line| match serde_json::from_str(line) {
                    Ok(entry) => Some(entry),
                    Err(e) => {
                        debug!(path = %path.display(), "Skipping unreadable log line: {}", e);
                        None
                    }
                })
                .collect();
            day_entries.reverse();
            entries.extend(day_entries);

            if entries.len() >= limit {
                entries.truncate(limit);
                break;
            }
        }

        Ok(entries)
    }

    /// Delete every partition of one (endpoint, instance) pair
    pub async fn clear(&self, endpoint_id: i64, instance_id: Option<&str>) -> Result<()> {
        let lock = self.lock_for(endpoint_id, instance_id);
        let _guard = lock.lock().await;

        remove_dir_if_exists(&self.instance_dir(endpoint_id, instance_id)).await?;
        // Held by the map and by this call only: nobody else is waiting
        self.locks.remove_if(&partition_key(endpoint_id, instance_id), |_, held| {
            Arc::strong_count(held) <= 2
        });
        debug!(endpoint_id, instance_id = ?instance_id, "Cleared file logs");
        Ok(())
    }

    /// Delete every partition of an endpoint
    pub async fn clear_endpoint(&self, endpoint_id: i64) -> Result<()> {
        remove_dir_if_exists(&self.endpoint_dir(endpoint_id)).await?;
        self.locks.retain(|key, _| key.endpoint_id != endpoint_id);
        info!(endpoint_id, "Removed file log directory");
        Ok(())
    }

    /// Remove partitions older than `retention_days` calendar days.
    ///
    /// Returns the number of partition files removed.
    pub async fn cleanup_expired(&self, retention_days: u32) -> Result<usize> {
        let today = Local::now().date_naive();
        let Some(oldest_kept) =
            today.checked_sub_days(Days::new(u64::from(retention_days.max(1) - 1)))
        else {
            return Ok(0);
        };

        let mut removed = 0;
        for instance_dir in self.instance_dirs(None).await? {
            for (path, day) in partitions(&instance_dir).await? {
                if day >= oldest_kept {
                    continue;
                }
                match fs::remove_file(&path).await {
                    Ok(()) => removed += 1,
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => {
                        warn!(path = %path.display(), "Failed to remove expired log: {}", e);
                    }
                }
            }
            // Only succeeds when the directory is now empty
            let _ = fs::remove_dir(&instance_dir).await;
        }

        if removed > 0 {
            info!(removed, retention_days, "Removed expired log partitions");
        }
        Ok(removed)
    }

    /// Partition count and total size for one endpoint
    pub async fn endpoint_stats(&self, endpoint_id: i64) -> Result<LogStats> {
        let mut stats = LogStats::default();
        for instance_dir in self.instance_dirs(Some(endpoint_id)).await? {
            for (path, _) in partitions(&instance_dir).await? {
                match fs::metadata(&path).await {
                    Ok(meta) => {
                        stats.files += 1;
                        stats.bytes += meta.len();
                    }
                    Err(e) if e.kind() == ErrorKind::NotFound => {}
                    Err(e) => return Err(e.into()),
                }
            }
        }
        Ok(stats)
    }

    /// Instance directories of one endpoint, or of every endpoint
    async fn instance_dirs(&self, endpoint_id: Option<i64>) -> Result<Vec<PathBuf>> {
        let endpoint_dirs = match endpoint_id {
            Some(id) => vec![self.endpoint_dir(id)],
            None => subdirs(&self.root)
                .await?
                .into_iter()
                .filter(|dir| {
                    dir.file_name()
                        .and_then(|name| name.to_str())
                        .is_some_and(|name| name.starts_with("endpoint_"))
                })
                .collect(),
        };

        let mut dirs = Vec::new();
        for endpoint_dir in endpoint_dirs {
            dirs.extend(subdirs(&endpoint_dir).await?);
        }
        Ok(dirs)
    }
}

fn instance_dir_name(instance_id: Option<&str>) -> String {
    match instance_id.filter(|id| !id.is_empty()) {
        Some(id) => format!(
            "{}{}",
            INSTANCE_DIR_PREFIX,
            utf8_percent_encode(id, INSTANCE_ID_ESCAPES)
        ),
        None => ENDPOINT_SCOPE_DIR.to_string(),
    }
}

fn partition_key(endpoint_id: i64, instance_id: Option<&str>) -> PartitionKey {
    PartitionKey {
        endpoint_id,
        instance: instance_dir_name(instance_id),
    }
}

fn partition_file_name(day: NaiveDate) -> String {
    format!("{}.{}", day.format("%Y-%m-%d"), PARTITION_EXT)
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Immediate subdirectories; a missing directory has none
async fn subdirs(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut dirs = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        if entry.file_type().await?.is_dir() {
            dirs.push(entry.path());
        }
    }
    Ok(dirs)
}

/// Partition files of an instance directory with their calendar day
async fn partitions(dir: &Path) -> Result<Vec<(PathBuf, NaiveDate)>> {
    let mut read_dir = match fs::read_dir(dir).await {
        Ok(read_dir) => read_dir,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut files = Vec::new();
    while let Some(entry) = read_dir.next_entry().await? {
        let path = entry.path();
        if path.extension().and_then(|ext| ext.to_str()) != Some(PARTITION_EXT) {
            continue;
        }
        let day = path
            .file_stem()
            .and_then(|stem| stem.to_str())
            .and_then(|stem| NaiveDate::parse_from_str(stem, "%Y-%m-%d").ok());
        if let Some(day) = day {
            files.push((path, day));
        }
    }
    Ok(files)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use tempfile::TempDir;

    fn at(day: NaiveDate, hour: u32) -> DateTime<Local> {
        Local
            .from_local_datetime(&day.and_hms_opt(hour, 0, 0).unwrap())
            .earliest()
            .unwrap()
    }

    fn days_ago(n: u64) -> NaiveDate {
        Local::now().date_naive().checked_sub_days(Days::new(n)).unwrap()
    }

    #[tokio::test]
    async fn test_append_and_read_newest_first() {
        let dir = TempDir::new().unwrap();
        let store = FileLogStore::new(dir.path());

        store.append(1, Some("abc"), "first").await.unwrap();
        store.append(1, Some("abc"), "second\nwith newline").await.unwrap();
        store.append(1, Some("other"), "elsewhere").await.unwrap();

        let entries = store.read_recent(1, Some("abc"), 1, 100).await.unwrap();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["second\nwith newline", "first"]);

        assert!(dir
            .path()
            .join("endpoint_1")
            .join("i_abc")
            .join(partition_file_name(Local::now().date_naive()))
            .exists());
    }

    #[tokio::test]
    async fn test_read_recent_respects_window_and_limit() {
        let dir = TempDir::new().unwrap();
        let store = FileLogStore::new(dir.path());

        for n in 0..5u64 {
            let day = days_ago(n);
            store
                .append_at(7, Some("abc"), &format!("day-{}-a", n), at(day, 8))
                .await
                .unwrap();
            store
                .append_at(7, Some("abc"), &format!("day-{}-b", n), at(day, 9))
                .await
                .unwrap();
        }

        let entries = store.read_recent(7, Some("abc"), 3, 1000).await.unwrap();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(
            messages,
            vec!["day-0-b", "day-0-a", "day-1-b", "day-1-a", "day-2-b", "day-2-a"]
        );
        let oldest = days_ago(2);
        assert!(entries.iter().all(|e| e.timestamp.date_naive() >= oldest));

        let limited = store.read_recent(7, Some("abc"), 3, 3).await.unwrap();
        assert_eq!(limited.len(), 3);
        assert_eq!(limited[2].message, "day-1-b");

        assert!(store.read_recent(7, Some("abc"), 3, 0).await.unwrap().is_empty());
        // Zero days still covers today
        assert_eq!(store.read_recent(7, Some("abc"), 0, 10).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_missing_partitions_are_empty() {
        let dir = TempDir::new().unwrap();
        let store = FileLogStore::new(dir.path());

        assert!(store.read_recent(9, Some("nope"), 30, 10).await.unwrap().is_empty());
        assert!(store.read_recent(9, None, 7, 10).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_clear_is_idempotent() {
        let dir = TempDir::new().unwrap();
        let store = FileLogStore::new(dir.path());

        store.append(1, Some("abc"), "x").await.unwrap();
        store.append(1, None, "endpoint line").await.unwrap();

        store.clear(1, Some("abc")).await.unwrap();
        store.clear(1, Some("abc")).await.unwrap();
        for days in [1, 7, 30] {
            assert!(store.read_recent(1, Some("abc"), days, 10).await.unwrap().is_empty());
        }
        assert_eq!(store.read_recent(1, None, 1, 10).await.unwrap().len(), 1);

        store.clear_endpoint(1).await.unwrap();
        store.clear_endpoint(1).await.unwrap();
        assert!(!dir.path().join("endpoint_1").exists());
    }

    #[tokio::test]
    async fn test_similar_ids_do_not_share_partitions() {
        let dir = TempDir::new().unwrap();
        let store = FileLogStore::new(dir.path());

        store.append(1, Some("a.b"), "dotted").await.unwrap();
        store.append(1, Some("a_b"), "underscored").await.unwrap();
        store.append(1, Some("_endpoint"), "odd id").await.unwrap();
        store.append(1, None, "endpoint line").await.unwrap();

        store.clear(1, Some("a.b")).await.unwrap();
        assert!(store.read_recent(1, Some("a.b"), 1, 10).await.unwrap().is_empty());
        let kept = store.read_recent(1, Some("a_b"), 1, 10).await.unwrap();
        assert_eq!(kept.len(), 1);
        assert_eq!(kept[0].message, "underscored");

        store.clear(1, Some("_endpoint")).await.unwrap();
        let endpoint_lines = store.read_recent(1, None, 1, 10).await.unwrap();
        assert_eq!(endpoint_lines.len(), 1);
        assert_eq!(endpoint_lines[0].message, "endpoint line");
    }

    #[tokio::test]
    async fn test_wide_window_reads_only_existing_partitions() {
        let dir = TempDir::new().unwrap();
        let store = FileLogStore::new(dir.path());

        store.append_at(1, Some("abc"), "old", at(days_ago(400), 12)).await.unwrap();
        store.append(1, Some("abc"), "now").await.unwrap();

        let entries = store.read_recent(1, Some("abc"), u32::MAX, 10).await.unwrap();
        let messages: Vec<_> = entries.iter().map(|e| e.message.as_str()).collect();
        assert_eq!(messages, vec!["now", "old"]);
    }

    #[tokio::test]
    async fn test_clear_releases_partition_lock() {
        let dir = TempDir::new().unwrap();
        let store = FileLogStore::new(dir.path());

        for id in ["a", "b", "c"] {
            store.append(1, Some(id), "x").await.unwrap();
        }
        assert_eq!(store.locks.len(), 3);

        store.clear(1, Some("a")).await.unwrap();
        store.clear(1, Some("b")).await.unwrap();
        assert_eq!(store.locks.len(), 1);
    }

    #[tokio::test]
    async fn test_cleanup_expired_and_stats() {
        let dir = TempDir::new().unwrap();
        let store = FileLogStore::new(dir.path());

        store.append_at(1, Some("a"), "old", at(days_ago(10), 12)).await.unwrap();
        store.append_at(1, Some("a"), "recent", at(days_ago(1), 12)).await.unwrap();
        store.append_at(2, None, "ancient", at(days_ago(40), 12)).await.unwrap();

        let stats = store.endpoint_stats(1).await.unwrap();
        assert_eq!(stats.files, 2);
        assert!(stats.bytes > 0);

        assert_eq!(store.cleanup_expired(7).await.unwrap(), 2);
        assert_eq!(store.endpoint_stats(1).await.unwrap().files, 1);
        assert_eq!(store.endpoint_stats(2).await.unwrap(), LogStats::default());
        assert_eq!(store.endpoint_stats(3).await.unwrap(), LogStats::default());
    }

    #[tokio::test]
    async fn test_concurrent_appends_to_one_partition() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(FileLogStore::new(dir.path()));

        let mut handles = Vec::new();
        for task in 0..8 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                for i in 0..25 {
                    store
                        .append(1, Some("abc"), &format!("{}-{}", task, i))
                        .await
                        .unwrap();
                }
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        let entries = store.read_recent(1, Some("abc"), 1, 1000).await.unwrap();
        assert_eq!(entries.len(), 200);
    }

    #[test]
    fn test_instance_dir_name_is_sanitized() {
        assert_eq!(instance_dir_name(Some("../etc")), "i_%2E%2E%2Fetc");
        assert_eq!(instance_dir_name(Some("a1-b_2")), "i_a1-b_2");
        assert_eq!(instance_dir_name(Some("50%")), "i_50%25");
        assert_ne!(instance_dir_name(Some("a.b")), instance_dir_name(Some("a_b")));
        assert_eq!(instance_dir_name(Some("_endpoint")), "i__endpoint");
        assert_eq!(instance_dir_name(None), "_endpoint");
        assert_eq!(instance_dir_name(Some("")), "_endpoint");
    }
}
