//! Ledger of issued bill numbers
//!
//! The ledger is the only place bill number uniqueness is decided. Both backends make the
//! check and the append one atomic step.

use async_trait::async_trait;
use khqr_common::{BillNumber, Error, Result};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use tokio::fs::{File, OpenOptions};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

/// Append-only set of issued bill numbers
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Record `bill` unless it is already present.
    ///
    /// # Returns
    /// * `Ok(true)` - newly recorded, and durable from now on
    /// * `Ok(false)` - already recorded earlier
    /// * `Err` - the backing store could not be read or written
    async fn record_if_absent(&self, bill: &BillNumber) -> Result<bool>;
}

/// Newline-delimited ledger file, one bill number per line.
///
/// Assumes a single writer process. All checks go through one mutex, so concurrent
/// requests inside the process can never both record the same bill number.
pub struct FileLedger {
    path: PathBuf,
    state: Mutex<FileState>,
}

struct FileState {
    seen: HashSet<String>,
    file: File,
    /// Length of the file up to the last complete line
    len: u64,
    /// Set when a failed append could not be rolled back
    poisoned: bool,
}

impl FileState {
    /// Cut the file back to its last complete line, dropping any partial append
    async fn rollback(&mut self) -> std::io::Result<()> {
        self.file.set_len(self.len).await
    }
}

impl FileLedger {
    /// Open (or create) the ledger file and load every recorded bill number
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| storage_error(&path, e))?;
        }

        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => return Err(storage_error(&path, e)),
        };

        let seen: HashSet<String> = contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect();

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await
            .map_err(|e| storage_error(&path, e))?;

        // Terminate a last line left without its newline, so the next append starts clean
        let mut len = contents.len() as u64;
        if !contents.is_empty() && !contents.ends_with('\n') {
            file.write_all(b"\n")
                .await
                .map_err(|e| storage_error(&path, e))?;
            file.sync_data()
                .await
                .map_err(|e| storage_error(&path, e))?;
            len += 1;
        }

        info!(
            "Opened ledger {} with {} recorded transactions",
            path.display(),
            seen.len()
        );

        Ok(Self {
            path,
            state: Mutex::new(FileState {
                seen,
                file,
                len,
                poisoned: false,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl Ledger for FileLedger {
    async fn record_if_absent(&self, bill: &BillNumber) -> Result<bool> {
        let mut state = self.state.lock().await;

        if state.seen.contains(bill.as_str()) {
            debug!("Bill number already in ledger: {}", bill);
            return Ok(false);
        }

        if state.poisoned {
            return Err(Error::Storage(format!(
                "{}: ledger disabled after an unrecoverable write failure",
                self.path.display()
            )));
        }

        let line = format!("{}\n", bill);
        if let Err(e) = append_line(&mut state.file, line.as_bytes()).await {
            if let Err(rollback) = state.rollback().await {
                error!(
                    "Could not roll back ledger {} to {} bytes: {}",
                    self.path.display(),
                    state.len,
                    rollback
                );
                state.poisoned = true;
            }
            return Err(storage_error(&self.path, e));
        }
        state.len += line.len() as u64;

        state.seen.insert(bill.as_str().to_string());
        debug!("Recorded bill number: {}", bill);
        Ok(true)
    }
}

async fn append_line(file: &mut File, line: &[u8]) -> std::io::Result<()> {
    file.write_all(line).await?;
    file.flush().await?;
    file.sync_data().await
}

fn storage_error(path: &Path, err: std::io::Error) -> Error {
    Error::Storage(format!("{}: {}", path.display(), err))
}

/// Ledger kept in a Redis set
pub struct RedisLedger {
    conn: ConnectionManager,
    key: String,
}

impl RedisLedger {
    pub const DEFAULT_KEY: &'static str = "khqr:transactions";

    /// Connect to Redis
    pub async fn new(redis_url: &str, key: impl Into<String>) -> Result<Self> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| Error::Storage(format!("Failed to create Redis client: {}", e)))?;

        let conn = ConnectionManager::new(client)
            .await
            .map_err(|e| Error::Storage(format!("Failed to connect to Redis: {}", e)))?;

        info!("Connected to Redis ledger at {}", redis_url);

        Ok(Self {
            conn,
            key: key.into(),
        })
    }
}

#[async_trait]
impl Ledger for RedisLedger {
    async fn record_if_absent(&self, bill: &BillNumber) -> Result<bool> {
        let mut conn = self.conn.clone();

        // SADD is atomic and replies with the number of members actually added
        let added: i64 = conn
            .sadd(&self.key, bill.as_str())
            .await
            .map_err(|e| Error::Storage(e.to_string()))?;

        if added == 0 {
            debug!("Bill number already in ledger: {}", bill);
        }

        Ok(added == 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn bill(s: &str) -> BillNumber {
        BillNumber::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_record_then_duplicate() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FileLedger::open(dir.path().join("tran.log")).await.unwrap();

        assert!(ledger.record_if_absent(&bill("NV100000000001")).await.unwrap());
        assert!(!ledger.record_if_absent(&bill("NV100000000001")).await.unwrap());
        assert!(ledger.record_if_absent(&bill("NV100000000002")).await.unwrap());

        let contents = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(contents, "NV100000000001\nNV100000000002\n");
    }

    #[tokio::test]
    async fn test_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tran.log");

        {
            let ledger = FileLedger::open(&path).await.unwrap();
            assert!(ledger.record_if_absent(&bill("NV1")).await.unwrap());
        }

        let reopened = FileLedger::open(&path).await.unwrap();
        assert!(!reopened.record_if_absent(&bill("NV1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_missing_trailing_newline_repaired() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tran.log");
        std::fs::write(&path, "NV1").unwrap();

        {
            let ledger = FileLedger::open(&path).await.unwrap();
            assert!(!ledger.record_if_absent(&bill("NV1")).await.unwrap());
            assert!(ledger.record_if_absent(&bill("NV2")).await.unwrap());
        }
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "NV1\nNV2\n");

        let reopened = FileLedger::open(&path).await.unwrap();
        assert!(!reopened.record_if_absent(&bill("NV1")).await.unwrap());
        assert!(!reopened.record_if_absent(&bill("NV2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_poisoned_ledger_refuses_writes() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = FileLedger::open(dir.path().join("tran.log")).await.unwrap();
        ledger.state.lock().await.poisoned = true;

        let err = ledger.record_if_absent(&bill("NV3")).await.unwrap_err();
        assert_eq!(err.kind(), khqr_common::ErrorKind::StorageError);
        assert_eq!(std::fs::read_to_string(ledger.path()).unwrap(), "");
    }

    #[tokio::test]
    async fn test_failed_append_rolled_back() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tran.log");
        std::fs::write(&path, "NV1\n").unwrap();
        let ledger = FileLedger::open(&path).await.unwrap();

        // A torn write leaves a fragment past the last complete line
        {
            let mut state = ledger.state.lock().await;
            state.file.write_all(b"NV2").await.unwrap();
            state.file.flush().await.unwrap();
            state.rollback().await.unwrap();
        }

        assert!(ledger.record_if_absent(&bill("NV3")).await.unwrap());
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "NV1\nNV3\n");
    }

    #[tokio::test]
    async fn test_blank_lines_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tran.log");
        std::fs::write(&path, "NV1\n\n  \nNV2\n").unwrap();

        let ledger = FileLedger::open(&path).await.unwrap();
        assert!(!ledger.record_if_absent(&bill("NV2")).await.unwrap());
        assert!(ledger.record_if_absent(&bill("NV3")).await.unwrap());
    }

    #[tokio::test]
    async fn test_creates_missing_directories() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/data/tran.log");

        let ledger = FileLedger::open(&path).await.unwrap();
        assert!(ledger.record_if_absent(&bill("NV7")).await.unwrap());
        assert!(path.exists());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_same_bill_recorded_once() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(FileLedger::open(dir.path().join("tran.log")).await.unwrap());

        let mut handles = Vec::new();
        for _ in 0..32 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                ledger.record_if_absent(&bill("NV555")).await.unwrap()
            }));
        }

        let mut accepted = 0;
        for handle in handles {
            if handle.await.unwrap() {
                accepted += 1;
            }
        }
        assert_eq!(accepted, 1);

        let contents = std::fs::read_to_string(ledger.path()).unwrap();
        assert_eq!(contents.lines().count(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_distinct_bills_all_recorded() {
        let dir = tempfile::tempdir().unwrap();
        let ledger = Arc::new(FileLedger::open(dir.path().join("tran.log")).await.unwrap());

        let mut handles = Vec::new();
        for i in 0..32u64 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move {
                let bill = BillNumber::from_parts("NV", 100_000_000_000 + i).unwrap();
                ledger.record_if_absent(&bill).await.unwrap()
            }));
        }

        for handle in handles {
            assert!(handle.await.unwrap());
        }
    }

    #[tokio::test]
    async fn test_unreadable_ledger_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        // A directory where the file should be cannot be read as a ledger
        let err = FileLedger::open(dir.path()).await.err().unwrap();
        assert_eq!(err.kind(), khqr_common::ErrorKind::StorageError);
    }

    #[tokio::test]
    #[ignore] // Requires Redis to be running
    async fn test_redis_record_if_absent() {
        let ledger = RedisLedger::new("redis://127.0.0.1:6379/15", "khqr:test:transactions")
            .await
            .unwrap();
        let fresh = BillNumber::from_parts("NV", rand::random::<u32>() as u64).unwrap();

        assert!(ledger.record_if_absent(&fresh).await.unwrap());
        assert!(!ledger.record_if_absent(&fresh).await.unwrap());
    }
}
