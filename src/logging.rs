use anyhow::{Context, Result};
use serde_json::json;
use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::error;
use uuid::Uuid;

/// Target value that sends access log lines to stdout.
pub const STDOUT_TARGET: &str = "-";

pub struct AccessLogger {
    file: Option<Arc<Mutex<std::fs::File>>>,
    format: AccessLogFormat,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccessLogFormat {
    Json,
    CommonLog,
    Combined,
}

impl AccessLogFormat {
    pub fn parse(name: &str) -> Self {
        match name {
            "json" => AccessLogFormat::Json,
            "common" => AccessLogFormat::CommonLog,
            _ => AccessLogFormat::Combined,
        }
    }
}

#[derive(Debug)]
pub struct LogEntry {
    pub request_id: Uuid,
    pub remote_addr: String,
    pub method: String,
    pub uri: String,
    pub status: u16,
    pub response_size: usize,
    pub duration_ms: f64,
    pub route: &'static str,
    pub user_agent: Option<String>,
    pub referer: Option<String>,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl AccessLogger {
    /// `target` is a file path, or [`STDOUT_TARGET`].
    pub fn new(target: &str, format: AccessLogFormat) -> Result<Self> {
        let file = if target == STDOUT_TARGET {
            None
        } else {
            let file = OpenOptions::new()
                .create(true)
                .append(true)
                .open(target)
                .with_context(|| format!("Failed to open access log: {}", target))?;
            Some(Arc::new(Mutex::new(file)))
        };

        Ok(Self { file, format })
    }

    pub async fn log(&self, entry: LogEntry) {
        let log_line = self.format_entry(&entry);

        if let Some(ref file) = self.file {
            let mut file_guard = file.lock().await;
            if let Err(e) = writeln!(file_guard, "{}", log_line) {
                error!("Failed to write access log: {}", e);
            }
            if let Err(e) = file_guard.flush() {
                error!("Failed to flush access log: {}", e);
            }
        } else {
            println!("{}", log_line);
        }
    }

    fn format_entry(&self, entry: &LogEntry) -> String {
        match self.format {
            AccessLogFormat::Json => json!({
                "timestamp": entry.timestamp.to_rfc3339(),
                "request_id": entry.request_id.to_string(),
                "remote_addr": entry.remote_addr,
                "method": entry.method,
                "uri": entry.uri,
                "status": entry.status,
                "response_size": entry.response_size,
                "duration_ms": entry.duration_ms,
                "route": entry.route,
                "user_agent": entry.user_agent,
                "referer": entry.referer
            })
            .to_string(),
            AccessLogFormat::CommonLog => {
                format!(
                    "{} - - [{}] \"{} {} HTTP/1.1\" {} {}",
                    entry.remote_addr,
                    entry.timestamp.format("%d/%b/%Y:%H:%M:%S %z"),
                    entry.method,
                    entry.uri,
                    entry.status,
                    entry.response_size
                )
            }
            AccessLogFormat::Combined => {
                format!(
                    "{} - - [{}] \"{} {} HTTP/1.1\" {} {} \"{}\" \"{}\"",
                    entry.remote_addr,
                    entry.timestamp.format("%d/%b/%Y:%H:%M:%S %z"),
                    entry.method,
                    entry.uri,
                    entry.status,
                    entry.response_size,
                    entry.referer.as_deref().unwrap_or("-"),
                    entry.user_agent.as_deref().unwrap_or("-")
                )
            }
        }
    }
}
