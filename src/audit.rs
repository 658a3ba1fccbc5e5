use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use ulid::Ulid;

use crate::limits::MAX_AUDIT_BODY_LEN;
use crate::model::Ms;

/// One row of the API request log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RequestLog {
    pub id: Ulid,
    pub token_id: Option<String>,
    pub organization_id: Option<Ulid>,
    pub endpoint: String,
    pub method: String,
    pub status_code: u16,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub request_body: Option<String>,
    pub response_body: Option<String>,
    pub error_message: Option<String>,
    pub duration_ms: u64,
    pub created_at: Ms,
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit encoding: {0}")]
    Encode(#[from] serde_json::Error),
}

#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn record(&self, entry: &RequestLog) -> Result<(), AuditError>;
}

/// Cut a body to at most `MAX_AUDIT_BODY_LEN` bytes on a char boundary.
pub fn truncate_body(body: &str) -> String {
    if body.len() <= MAX_AUDIT_BODY_LEN {
        return body.to_string();
    }
    let mut end = MAX_AUDIT_BODY_LEN;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}…", &body[..end])
}

/// Appends one JSON object per line.
pub struct JsonlAuditSink {
    path: PathBuf,
    file: Mutex<tokio::fs::File>,
}

impl JsonlAuditSink {
    pub async fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent()
            && !dir.as_os_str().is_empty()
        {
            tokio::fs::create_dir_all(dir).await?;
        }
        let file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .await?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[async_trait]
impl AuditSink for JsonlAuditSink {
    async fn record(&self, entry: &RequestLog) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');
        let mut file = self.file.lock().await;
        file.write_all(&line).await?;
        file.flush().await?;
        Ok(())
    }
}

/// Keeps rows in memory. Used by tests and when auditing is disabled.
#[derive(Default)]
pub struct MemoryAuditSink {
    entries: Mutex<Vec<RequestLog>>,
    keep: bool,
}

impl MemoryAuditSink {
    pub fn new() -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            keep: true,
        }
    }

    /// Accepts and drops every row.
    pub fn discard() -> Self {
        Self::default()
    }

    pub async fn entries(&self) -> Vec<RequestLog> {
        self.entries.lock().await.clone()
    }
}

#[async_trait]
impl AuditSink for MemoryAuditSink {
    async fn record(&self, entry: &RequestLog) -> Result<(), AuditError> {
        if self.keep {
            self.entries.lock().await.push(entry.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(status: u16) -> RequestLog {
        RequestLog {
            id: Ulid::new(),
            token_id: Some("tok_1".into()),
            organization_id: Some(Ulid::new()),
            endpoint: "/v1/public/appointments".into(),
            method: "POST".into(),
            status_code: status,
            ip_address: Some("203.0.113.9".into()),
            user_agent: Some("curl/8.5".into()),
            request_body: Some("{}".into()),
            response_body: None,
            error_message: Some("existing schedule conflict".into()),
            duration_ms: 3,
            created_at: 0,
        }
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        let short = "olá";
        assert_eq!(truncate_body(short), short);

        let long = "é".repeat(MAX_AUDIT_BODY_LEN);
        let cut = truncate_body(&long);
        assert!(cut.len() <= MAX_AUDIT_BODY_LEN + '…'.len_utf8());
        assert!(cut.ends_with('…'));
    }

    #[tokio::test]
    async fn jsonl_sink_appends_lines() {
        let dir = std::env::temp_dir().join("agendad_test_audit");
        let _ = std::fs::remove_dir_all(&dir);
        let path = dir.join("nested").join("requests.jsonl");

        let sink = JsonlAuditSink::open(&path).await.unwrap();
        let first = entry(201);
        let second = entry(409);
        sink.record(&first).await.unwrap();
        sink.record(&second).await.unwrap();

        let text = std::fs::read_to_string(sink.path()).unwrap();
        let rows: Vec<RequestLog> = text
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(rows, vec![first, second]);
    }

    #[tokio::test]
    async fn memory_sink_keeps_or_discards() {
        let kept = MemoryAuditSink::new();
        kept.record(&entry(201)).await.unwrap();
        assert_eq!(kept.entries().await.len(), 1);

        let dropped = MemoryAuditSink::discard();
        dropped.record(&entry(201)).await.unwrap();
        assert!(dropped.entries().await.is_empty());
    }
}
