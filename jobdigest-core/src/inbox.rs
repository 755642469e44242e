//! Inbox Source capability and the spool-directory adapter.
//!
//! `SpoolDirInbox` treats a directory as a mailbox: every `.eml`, `.html`,
//! `.htm` or `.txt` file is one message. Whatever delivers mail (fetchmail,
//! a procmail rule, an export script) drops files there; the checkpoint lives
//! in a small JSON file next to it.
//!
//! `received_at` is the file's modification time, i.e. when it landed in the
//! spool. The sender-controlled `Date` header is never used for ordering: a
//! message delivered late with an old `Date` would otherwise sort before the
//! checkpoint and be skipped forever.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::email::parse_email;
use crate::models::{Checkpoint, RawMessage};

#[derive(Error, Debug)]
pub enum InboxError {
    #[error("Inbox unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait InboxSource: Send + Sync {
    /// Current marker; the default checkpoint when nothing has been processed yet.
    async fn checkpoint(&self) -> Result<Checkpoint, InboxError>;

    /// Messages sorting strictly after `since`, in `(received_at, id)` order.
    async fn list_new_messages(&self, since: &Checkpoint) -> Result<Vec<RawMessage>, InboxError>;

    async fn advance_checkpoint(&self, to: &Checkpoint) -> Result<(), InboxError>;
}

const MESSAGE_EXTENSIONS: &[&str] = &["eml", "html", "htm", "txt"];

pub struct SpoolDirInbox {
    dir: PathBuf,
    checkpoint_path: PathBuf,
}

impl SpoolDirInbox {
    pub fn new(dir: impl Into<PathBuf>, checkpoint_path: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            checkpoint_path: checkpoint_path.into(),
        }
    }

    async fn read_message(&self, path: &Path) -> Result<RawMessage, InboxError> {
        let bytes = tokio::fs::read(path)
            .await
            .map_err(|e| unavailable(path, e))?;

        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let arrived: DateTime<Utc> = tokio::fs::metadata(path)
            .await
            .and_then(|m| m.modified())
            .map(DateTime::<Utc>::from)
            .map_err(|e| unavailable(path, e))?;

        let is_eml = path.extension().is_some_and(|ext| ext.eq_ignore_ascii_case("eml"));
        if !is_eml {
            return Ok(RawMessage {
                id: file_name,
                received_at: arrived,
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }

        let parsed = parse_email(&bytes);
        Ok(RawMessage {
            id: parsed.message_id.unwrap_or(file_name),
            received_at: arrived,
            body: parsed.body,
        })
    }
}

#[async_trait]
impl InboxSource for SpoolDirInbox {
    async fn checkpoint(&self) -> Result<Checkpoint, InboxError> {
        match tokio::fs::read(&self.checkpoint_path).await {
            Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| {
                InboxError::Unavailable(format!(
                    "corrupt checkpoint {}: {}",
                    self.checkpoint_path.display(),
                    e
                ))
            }),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Checkpoint::default()),
            Err(e) => Err(unavailable(&self.checkpoint_path, e)),
        }
    }

    async fn list_new_messages(&self, since: &Checkpoint) -> Result<Vec<RawMessage>, InboxError> {
        let mut entries = tokio::fs::read_dir(&self.dir)
            .await
            .map_err(|e| unavailable(&self.dir, e))?;

        let mut messages = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| unavailable(&self.dir, e))?
        {
            let path = entry.path();
            let wanted = path
                .extension()
                .and_then(|e| e.to_str())
                .map(|e| MESSAGE_EXTENSIONS.contains(&e.to_ascii_lowercase().as_str()))
                .unwrap_or(false);
            let is_file = entry
                .file_type()
                .await
                .map(|t| t.is_file())
                .unwrap_or(false);
            if !wanted || !is_file {
                continue;
            }

            let message = self.read_message(&path).await?;
            if message.is_after(since) {
                messages.push(message);
            }
        }

        messages.sort_by(|a, b| (a.received_at, &a.id).cmp(&(b.received_at, &b.id)));
        tracing::debug!(dir = %self.dir.display(), count = messages.len(), "Listed spool messages");
        Ok(messages)
    }

    async fn advance_checkpoint(&self, to: &Checkpoint) -> Result<(), InboxError> {
        let json = serde_json::to_vec_pretty(to)
            .map_err(|e| InboxError::Unavailable(format!("encode checkpoint: {}", e)))?;

        if let Some(parent) = self.checkpoint_path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .map_err(|e| unavailable(parent, e))?;
            }
        }

        // Write-then-rename so a crash never leaves a half-written marker.
        let tmp = self.checkpoint_path.with_extension("json.tmp");
        tokio::fs::write(&tmp, json)
            .await
            .map_err(|e| unavailable(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.checkpoint_path)
            .await
            .map_err(|e| unavailable(&self.checkpoint_path, e))?;
        Ok(())
    }
}

fn unavailable(path: &Path, e: std::io::Error) -> InboxError {
    InboxError::Unavailable(format!("{}: {}", path.display(), e))
}
