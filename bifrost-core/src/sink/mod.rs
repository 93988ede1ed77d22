//! Log sinks: fan out log-stash records to zero or more destinations.
//! Mirrors the reference daemon's `Handler`/`HandlerList` pattern, narrowed
//! to the single event type a hook-engine log record carries.
use std::sync::Arc;

use async_trait::async_trait;
use tokio::fs::OpenOptions;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

use bifrost_common::LogLevel;

#[derive(Clone, Debug, serde::Serialize)]
pub struct LogRecord {
    pub level: LogLevel,
    pub module: String,
    pub message: String,
}

#[async_trait]
pub trait LogSink: Send + Sync {
    fn name(&self) -> &'static str;
    async fn on_record(&self, record: &LogRecord);
}

pub struct SinkList {
    sinks: Vec<Arc<dyn LogSink>>,
}

impl Default for SinkList {
    fn default() -> Self {
        Self::new()
    }
}

impl SinkList {
    pub fn new() -> Self {
        Self { sinks: Vec::new() }
    }

    pub fn register<S: LogSink + 'static>(&mut self, sink: S) {
        self.sinks.push(Arc::new(sink));
    }

    pub async fn on_record(&self, record: &LogRecord) {
        for sink in &self.sinks {
            sink.on_record(record).await;
        }
    }
}

/// Appends one JSON object per line, matching the reference daemon's
/// `JsonlHandler`.
pub struct JsonlSink {
    file: Arc<Mutex<tokio::fs::File>>,
}

impl JsonlSink {
    pub async fn new(path: &str) -> std::io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path).await?;
        Ok(Self {
            file: Arc::new(Mutex::new(file)),
        })
    }
}

#[async_trait]
impl LogSink for JsonlSink {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    async fn on_record(&self, record: &LogRecord) {
        if let Ok(json) = serde_json::to_string(record) {
            let mut f = self.file.lock().await;
            let _ = f.write_all(json.as_bytes()).await;
            let _ = f.write_all(b"\n").await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn jsonl_sink_writes_one_line_per_record() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let sink = JsonlSink::new(file.path().to_str().unwrap()).await.unwrap();
        let mut list = SinkList::new();
        list.register(sink);

        list.on_record(&LogRecord {
            level: LogLevel::Info,
            module: "demo".to_string(),
            message: "hello".to_string(),
        })
        .await;
        list.on_record(&LogRecord {
            level: LogLevel::Warn,
            module: "demo".to_string(),
            message: "world".to_string(),
        })
        .await;

        let content = tokio::fs::read_to_string(file.path()).await.unwrap();
        assert_eq!(content.lines().count(), 2);
    }
}
