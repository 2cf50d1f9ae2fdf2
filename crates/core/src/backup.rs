use std::path::Path;

use crate::object_store::{ChatAttachmentStore, RemoteMessage, UploadedAttachment};
use crate::{Error, Result};

/// Filenames for index-db backup attachments start with this marker so the
/// cleanup pass can recognize its own uploads among any other traffic in the
/// backup channel (spec.md §4.G).
pub const BACKUP_FILENAME_PREFIX: &str = "attachvault-index-backup-";
/// How many of the channel's most recent messages are scanned for prior
/// marker-prefixed snapshots before a new backup is uploaded.
pub const BACKUP_SCAN_WINDOW: usize = 10;

#[derive(Debug, Clone)]
pub struct BackupResult {
    pub uploaded: UploadedAttachment,
    pub pruned: Vec<String>,
}

pub fn backup_filename(now: i64) -> String {
    format!("{BACKUP_FILENAME_PREFIX}{now}.db")
}

/// Before uploading, lists the last `BACKUP_SCAN_WINDOW` messages in the
/// backup channel and deletes every one whose content starts with the
/// marker prefix, then uploads the current index database as a new
/// snapshot. The channel ends up holding only the newest snapshot
/// (spec.md §4.G).
pub async fn run_backup(
    store: &dyn ChatAttachmentStore,
    backup_channel_id: &str,
    index_db_path: &Path,
    now: i64,
) -> Result<BackupResult> {
    let pruned = prune_old_snapshots(store, backup_channel_id).await?;

    let bytes = tokio::fs::read(index_db_path)
        .await
        .map_err(|e| Error::internal(format!("reading index db for backup failed: {e}")))?;

    let filename = backup_filename(now);
    let uploaded = store.upload(backup_channel_id, &filename, bytes).await?;

    Ok(BackupResult { uploaded, pruned })
}

async fn prune_old_snapshots(
    store: &dyn ChatAttachmentStore,
    backup_channel_id: &str,
) -> Result<Vec<String>> {
    let recent = store
        .list_recent(backup_channel_id, BACKUP_SCAN_WINDOW as u32)
        .await?;

    let stale: Vec<String> = recent
        .into_iter()
        .filter(|m: &RemoteMessage| m.filename.starts_with(BACKUP_FILENAME_PREFIX))
        .map(|m| m.message_id)
        .collect();

    if stale.is_empty() {
        return Ok(Vec::new());
    }

    let failed = store.bulk_delete(backup_channel_id, &stale).await?;

    let pruned = stale
        .iter()
        .filter(|id| !failed.contains(id))
        .cloned()
        .collect();
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object_store::test_double::InMemoryChatStore;

    #[tokio::test]
    async fn backup_uploads_with_marker_prefixed_filename() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        tokio::fs::write(&db_path, b"sqlite-bytes").await.unwrap();

        let store = InMemoryChatStore::new();
        let result = run_backup(&store, "backup-chan", &db_path, 1_000).await.unwrap();

        assert!(result.uploaded.url.starts_with("https://mem.invalid/"));
        assert!(result.pruned.is_empty());
    }

    #[tokio::test]
    async fn backup_keeps_only_the_newest_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        tokio::fs::write(&db_path, b"sqlite-bytes").await.unwrap();

        let store = InMemoryChatStore::new();
        for now in 0..(BACKUP_SCAN_WINDOW as i64 + 3) {
            run_backup(&store, "backup-chan", &db_path, now).await.unwrap();
        }

        assert_eq!(store.message_count().await, 1);
    }

    #[tokio::test]
    async fn backup_prunes_every_prior_marker_prefixed_message() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("index.db");
        tokio::fs::write(&db_path, b"sqlite-bytes").await.unwrap();

        let store = InMemoryChatStore::new();
        let first = run_backup(&store, "backup-chan", &db_path, 1).await.unwrap();
        let second = run_backup(&store, "backup-chan", &db_path, 2).await.unwrap();

        assert_eq!(second.pruned, vec![first.uploaded.message_id.clone()]);
        assert_eq!(store.message_count().await, 1);
    }
}
