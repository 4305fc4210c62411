use std::path::Path;

use bridge_common::H256;
use chrono::{DateTime, Utc};
use log::{debug, trace};
use serde::{Deserialize, Serialize};
use thiserror::Error;

// Tree names inside the single sled database
const PROCESSED_TREE: &str = "processed_events";
const CURSOR_TREE: &str = "block_cursors";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database failure: {0}")]
    Db(#[from] sled::Error),
    #[error("corrupt record under key {key}: {source}")]
    Corrupt {
        key: String,
        source: serde_json::Error,
    },
}

// Durable record that a (stream, nonce, kind) has been acted upon.
// Written exactly once; never updated or deleted in normal operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedMark {
    // empty when the destination effect happened without a transaction of
    // ours: replay-map hits and skipped governance proposals
    pub dest_tx_hash: String,
    pub created_at: DateTime<Utc>,
}

// The relayer's durable state: a dedup table and per-stream block cursors.
// sled keeps a write-ahead log; a flush after each write is the point at
// which the write is considered acknowledged.
pub struct RelayerStorage {
    db: sled::Db,
    processed: sled::Tree,
    cursors: sled::Tree,
}

impl RelayerStorage {
    pub fn open(path: &Path) -> Result<Self, StorageError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(sled::Error::Io)?;
        }
        let db = sled::open(path)?;
        let processed = db.open_tree(PROCESSED_TREE)?;
        let cursors = db.open_tree(CURSOR_TREE)?;
        debug!(
            "opened relayer store at {} ({} processed events)",
            path.display(),
            processed.len()
        );
        Ok(Self {
            db,
            processed,
            cursors,
        })
    }

    fn processed_key(stream_id: &str, nonce: u64, kind: &str) -> String {
        format!("{}:{}:{}", stream_id, nonce, kind)
    }

    pub fn is_processed(
        &self,
        stream_id: &str,
        nonce: u64,
        kind: &str,
    ) -> Result<bool, StorageError> {
        let key = Self::processed_key(stream_id, nonce, kind);
        trace!("is_processed {}", key);
        Ok(self.processed.contains_key(key.as_bytes())?)
    }

    // Insert-if-absent; a key collision means another path already marked
    // this event, which is success for the caller
    pub fn mark_processed(
        &self,
        stream_id: &str,
        nonce: u64,
        kind: &str,
        dest_tx_hash: Option<H256>,
    ) -> Result<(), StorageError> {
        let key = Self::processed_key(stream_id, nonce, kind);
        let mark = ProcessedMark {
            dest_tx_hash: dest_tx_hash
                .map(|hash| format!("{:#x}", hash))
                .unwrap_or_default(),
            created_at: Utc::now(),
        };
        let value = serde_json::to_vec(&mark).map_err(|source| StorageError::Corrupt {
            key: key.clone(),
            source,
        })?;
        let _ = self
            .processed
            .compare_and_swap(key.as_bytes(), None as Option<&[u8]>, Some(value))?;
        self.flush()?;
        trace!("marked {}", key);
        Ok(())
    }

    pub fn get_processed(
        &self,
        stream_id: &str,
        nonce: u64,
        kind: &str,
    ) -> Result<Option<ProcessedMark>, StorageError> {
        let key = Self::processed_key(stream_id, nonce, kind);
        match self.processed.get(key.as_bytes())? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|source| StorageError::Corrupt { key, source }),
            None => Ok(None),
        }
    }

    // 0 when the stream has never advanced
    pub fn get_cursor(&self, stream_id: &str) -> Result<u64, StorageError> {
        Ok(self
            .cursors
            .get(stream_id.as_bytes())?
            .map(|raw| decode_block(&raw))
            .unwrap_or(0))
    }

    // Monotonic upsert: a lower value than what is stored is a no-op,
    // the cursor never moves backwards
    pub fn set_cursor(&self, stream_id: &str, block: u64) -> Result<(), StorageError> {
        self.cursors.fetch_and_update(stream_id.as_bytes(), |old| {
            let current = old.map(decode_block).unwrap_or(0);
            Some(current.max(block).to_be_bytes().to_vec())
        })?;
        self.flush()?;
        trace!("cursor {} -> {}", stream_id, block);
        Ok(())
    }

    // All persisted cursors, for startup reporting
    pub fn cursors(&self) -> Result<Vec<(String, u64)>, StorageError> {
        let mut out = Vec::new();
        for entry in self.cursors.iter() {
            let (key, value) = entry?;
            out.push((
                String::from_utf8_lossy(&key).into_owned(),
                decode_block(&value),
            ));
        }
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), StorageError> {
        self.db.flush()?;
        Ok(())
    }

    // Flush on the way out; errors are already logged by sled
    pub async fn stop(&self) {
        let _ = self.db.flush_async().await;
    }
}

fn decode_block(raw: &[u8]) -> u64 {
    let mut bytes = [0u8; 8];
    if raw.len() == 8 {
        bytes.copy_from_slice(raw);
    }
    u64::from_be_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_temp() -> (TempDir, RelayerStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = RelayerStorage::open(&dir.path().join("relayer.db")).unwrap();
        (dir, storage)
    }

    #[test]
    fn mark_and_check() {
        let (_dir, storage) = open_temp();
        assert!(!storage.is_processed("chainA_lock", 0, "Locked").unwrap());
        storage
            .mark_processed("chainA_lock", 0, "Locked", Some(H256::repeat_byte(0xab)))
            .unwrap();
        assert!(storage.is_processed("chainA_lock", 0, "Locked").unwrap());

        let mark = storage
            .get_processed("chainA_lock", 0, "Locked")
            .unwrap()
            .unwrap();
        assert_eq!(mark.dest_tx_hash, format!("{:#x}", H256::repeat_byte(0xab)));
    }

    #[test]
    fn keys_are_scoped_per_stream_and_kind() {
        let (_dir, storage) = open_temp();
        storage
            .mark_processed("chainA_lock", 5, "Locked", None)
            .unwrap();
        assert!(!storage.is_processed("chainB_burn", 5, "Burned").unwrap());
        assert!(!storage.is_processed("chainA_lock", 5, "Burned").unwrap());
        assert!(!storage.is_processed("chainA_lock", 6, "Locked").unwrap());
    }

    #[test]
    fn double_mark_keeps_first_record() {
        let (_dir, storage) = open_temp();
        storage
            .mark_processed("chainA_lock", 1, "Locked", Some(H256::repeat_byte(0x01)))
            .unwrap();
        // concurrent caller with the same key succeeds silently
        storage
            .mark_processed("chainA_lock", 1, "Locked", Some(H256::repeat_byte(0x02)))
            .unwrap();
        let mark = storage
            .get_processed("chainA_lock", 1, "Locked")
            .unwrap()
            .unwrap();
        assert_eq!(mark.dest_tx_hash, format!("{:#x}", H256::repeat_byte(0x01)));
    }

    #[test]
    fn empty_hash_marker_for_benign_paths() {
        let (_dir, storage) = open_temp();
        storage
            .mark_processed("chainB_governance", 1, "ProposalPassed", None)
            .unwrap();
        let mark = storage
            .get_processed("chainB_governance", 1, "ProposalPassed")
            .unwrap()
            .unwrap();
        assert!(mark.dest_tx_hash.is_empty());
    }

    #[test]
    fn cursor_defaults_to_zero_and_never_decreases() {
        let (_dir, storage) = open_temp();
        assert_eq!(storage.get_cursor("chainA_lock").unwrap(), 0);

        storage.set_cursor("chainA_lock", 42).unwrap();
        assert_eq!(storage.get_cursor("chainA_lock").unwrap(), 42);

        storage.set_cursor("chainA_lock", 7).unwrap();
        assert_eq!(storage.get_cursor("chainA_lock").unwrap(), 42);

        storage.set_cursor("chainA_lock", 43).unwrap();
        assert_eq!(storage.get_cursor("chainA_lock").unwrap(), 43);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("relayer.db");
        {
            let storage = RelayerStorage::open(&path).unwrap();
            storage
                .mark_processed("chainB_burn", 9, "Burned", Some(H256::repeat_byte(0x09)))
                .unwrap();
            storage.set_cursor("chainB_burn", 120).unwrap();
        }
        let storage = RelayerStorage::open(&path).unwrap();
        assert!(storage.is_processed("chainB_burn", 9, "Burned").unwrap());
        assert_eq!(storage.get_cursor("chainB_burn").unwrap(), 120);
        let cursors = storage.cursors().unwrap();
        assert_eq!(cursors, vec![("chainB_burn".to_string(), 120)]);
    }
}
