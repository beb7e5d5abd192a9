use std::collections::HashMap;
use std::path::PathBuf;
use tokio::sync::{watch, RwLock};
use tracing::{debug, info, warn};

use super::fingerprint::Fingerprint;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedFile {
    pub fingerprint: Fingerprint,
    pub path: PathBuf,
    pub action_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inserted {
    New(ReceivedFile),
    /// Another session stored the same content first; the ledger kept it.
    Existing(ReceivedFile),
}

impl Inserted {
    pub fn file(&self) -> &ReceivedFile {
        match self {
            Inserted::New(file) | Inserted::Existing(file) => file,
        }
    }
}

pub struct ReceivedLedger {
    files: RwLock<HashMap<Fingerprint, ReceivedFile>>,
    changed: watch::Sender<u64>,
}

impl Default for ReceivedLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl ReceivedLedger {
    pub fn new() -> Self {
        let (changed, _) = watch::channel(0);
        Self {
            files: RwLock::new(HashMap::new()),
            changed,
        }
    }

    pub async fn get(&self, fingerprint: &Fingerprint) -> Option<ReceivedFile> {
        self.files.read().await.get(fingerprint).cloned()
    }

    pub async fn contains(&self, fingerprint: &Fingerprint) -> bool {
        self.files.read().await.contains_key(fingerprint)
    }

    pub async fn len(&self) -> usize {
        self.files.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.files.read().await.is_empty()
    }

    /// Check-then-insert under one write lock.
    pub async fn insert(&self, file: ReceivedFile) -> Inserted {
        let outcome = {
            let mut files = self.files.write().await;
            match files.get(&file.fingerprint) {
                Some(existing) => Inserted::Existing(existing.clone()),
                None => {
                    files.insert(file.fingerprint.clone(), file.clone());
                    Inserted::New(file)
                }
            }
        };

        if let Inserted::New(ref file) = outcome {
            debug!("Ledger gained {} -> {:?}", file.fingerprint, file.path);
            self.changed.send_modify(|generation| *generation += 1);
        }

        outcome
    }

    /// Resolves once an entry for `fingerprint` exists.
    pub async fn wait_for(&self, fingerprint: &Fingerprint) -> Option<ReceivedFile> {
        let mut changed = self.changed.subscribe();
        loop {
            if let Some(file) = self.get(fingerprint).await {
                return Some(file);
            }
            changed.changed().await.ok()?;
        }
    }

    /// Drops every entry and deletes the received files. Returns how many
    /// files were removed from disk.
    pub async fn purge(&self) -> usize {
        let drained: Vec<ReceivedFile> = self.files.write().await.drain().map(|(_, f)| f).collect();

        let mut removed = 0;
        for file in drained {
            match tokio::fs::remove_file(&file.path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!("Failed to delete received file {:?}: {}", file.path, e),
            }
        }

        info!("Purged {} received files", removed);
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::tempdir;

    fn entry(tag: &str, path: PathBuf) -> ReceivedFile {
        ReceivedFile {
            fingerprint: Fingerprint::of_bytes(tag.as_bytes(), 1024),
            path,
            action_id: "onFile".to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_keeps_first_entry() {
        let ledger = ReceivedLedger::new();
        let first = entry("same", PathBuf::from("/tmp/first.bin"));
        let second = entry("same", PathBuf::from("/tmp/second.bin"));

        assert_eq!(ledger.insert(first.clone()).await, Inserted::New(first.clone()));
        assert_eq!(ledger.insert(second).await, Inserted::Existing(first.clone()));
        assert_eq!(ledger.len().await, 1);
        assert_eq!(ledger.get(&first.fingerprint).await, Some(first));
    }

    #[tokio::test]
    async fn test_waiter_wakes_on_insert() {
        let ledger = Arc::new(ReceivedLedger::new());
        let file = entry("late", PathBuf::from("/tmp/late.bin"));

        let waiter = {
            let ledger = ledger.clone();
            let fingerprint = file.fingerprint.clone();
            tokio::spawn(async move { ledger.wait_for(&fingerprint).await })
        };

        // unrelated inserts must not resolve the waiter
        ledger.insert(entry("other", PathBuf::from("/tmp/other.bin"))).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());

        ledger.insert(file.clone()).await;
        let resolved = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(resolved, Some(file));
    }

    #[tokio::test]
    async fn test_wait_for_existing_entry_returns_immediately() {
        let ledger = ReceivedLedger::new();
        let file = entry("known", PathBuf::from("/tmp/known.bin"));
        ledger.insert(file.clone()).await;

        assert_eq!(ledger.wait_for(&file.fingerprint).await, Some(file));
    }

    #[tokio::test]
    async fn test_purge_deletes_backing_files() {
        let dir = tempdir().unwrap();
        let kept_path = dir.path().join("a.txt");
        std::fs::write(&kept_path, b"a").unwrap();

        let ledger = ReceivedLedger::new();
        ledger.insert(entry("a", kept_path.clone())).await;
        ledger.insert(entry("gone", dir.path().join("missing.txt"))).await;

        assert_eq!(ledger.purge().await, 1);
        assert!(!kept_path.exists());
        assert!(ledger.is_empty().await);
    }
}
