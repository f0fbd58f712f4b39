//! Scan checkpoint: the timestamp the next search starts from, plus the
//! uid a capped scan stopped at.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::debug;

use crate::error::CheckpointError;

/// Durable storage for a single timestamp and an optional resume cursor.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Stored timestamp, or the current time when none exists yet.
    async fn load(&self) -> Result<DateTime<Utc>, CheckpointError>;

    async fn save(&self, at: DateTime<Utc>) -> Result<(), CheckpointError>;

    /// Uid the previous capped scan stopped after, if any.
    async fn load_cursor(&self) -> Result<Option<u32>, CheckpointError> {
        Ok(None)
    }

    /// Store or clear the resume cursor.
    async fn save_cursor(&self, _cursor: Option<u32>) -> Result<(), CheckpointError> {
        Ok(())
    }
}

/// Checkpoint kept as RFC 3339 text in a file. The cursor lives next to it
/// in `<path>.cursor` and exists only while a backlog is being worked off.
pub struct FileCheckpoint {
    path: PathBuf,
    cursor_path: PathBuf,
}

impl FileCheckpoint {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut cursor_path = path.clone().into_os_string();
        cursor_path.push(".cursor");
        Self {
            path,
            cursor_path: cursor_path.into(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn ensure_parent(&self) -> Result<(), CheckpointError> {
        if let Some(parent) = self.path.parent()
            && !parent.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }
}

#[async_trait]
impl CheckpointStore for FileCheckpoint {
    async fn load(&self) -> Result<DateTime<Utc>, CheckpointError> {
        let raw = match tokio::fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "No checkpoint yet, starting from now");
                return Ok(Utc::now());
            }
            Err(e) => return Err(e.into()),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(Utc::now());
        }

        DateTime::parse_from_rfc3339(trimmed)
            .map(|at| at.with_timezone(&Utc))
            .map_err(|e| CheckpointError::Corrupt {
                path: self.path.display().to_string(),
                reason: e.to_string(),
            })
    }

    async fn save(&self, at: DateTime<Utc>) -> Result<(), CheckpointError> {
        self.ensure_parent().await?;

        // Write then rename so a crash never leaves a half-written file.
        let tmp = self.path.with_extension("tmp");
        tokio::fs::write(&tmp, at.to_rfc3339()).await?;
        tokio::fs::rename(&tmp, &self.path).await?;

        debug!(path = %self.path.display(), checkpoint = %at.to_rfc3339(), "Checkpoint saved");
        Ok(())
    }

    async fn load_cursor(&self) -> Result<Option<u32>, CheckpointError> {
        let raw = match tokio::fs::read_to_string(&self.cursor_path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() {
            return Ok(None);
        }
        trimmed
            .parse::<u32>()
            .map(Some)
            .map_err(|e| CheckpointError::Corrupt {
                path: self.cursor_path.display().to_string(),
                reason: e.to_string(),
            })
    }

    async fn save_cursor(&self, cursor: Option<u32>) -> Result<(), CheckpointError> {
        let Some(uid) = cursor else {
            return match tokio::fs::remove_file(&self.cursor_path).await {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(e.into()),
                _ => Ok(()),
            };
        };

        self.ensure_parent().await?;
        let tmp = self.cursor_path.with_extension("cursor.tmp");
        tokio::fs::write(&tmp, uid.to_string()).await?;
        tokio::fs::rename(&tmp, &self.cursor_path).await?;

        debug!(path = %self.cursor_path.display(), resume_after = uid, "Cursor saved");
        Ok(())
    }
}
