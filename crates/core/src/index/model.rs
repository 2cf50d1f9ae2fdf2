use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;

use crate::{Error, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileStatus {
    Pending,
    Active,
    Trashed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Active => "active",
            FileStatus::Trashed => "trashed",
        }
    }

    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "pending" => Ok(FileStatus::Pending),
            "active" => Ok(FileStatus::Active),
            "trashed" => Ok(FileStatus::Trashed),
            other => Err(Error::validation(format!("invalid status: {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct NewFile {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub iv: Option<String>,
    pub salt: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileRecord {
    pub id: String,
    pub name: String,
    pub size: i64,
    pub mime_type: Option<String>,
    pub iv: Option<String>,
    pub salt: Option<String>,
    pub status: String,
    pub created_at: i64,
}

impl FileRecord {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            size: row.try_get("size")?,
            mime_type: row.try_get("mime_type")?,
            iv: row.try_get("iv")?,
            salt: row.try_get("salt")?,
            status: row.try_get("status")?,
            created_at: row.try_get("created_at")?,
        })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChunkRecord {
    pub file_id: String,
    pub idx: i64,
    pub message_id: String,
    pub channel_id: String,
    pub size: i64,
    pub url: String,
}

impl ChunkRecord {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(Self {
            file_id: row.try_get("file_id")?,
            idx: row.try_get("idx")?,
            message_id: row.try_get("message_id")?,
            channel_id: row.try_get("channel_id")?,
            size: row.try_get("size")?,
            url: row.try_get("url")?,
        })
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IndexStats {
    pub active_files: i64,
    pub trashed_files: i64,
    pub pending_files: i64,
    pub total_chunks: i64,
    pub total_bytes: i64,
}
