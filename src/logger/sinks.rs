//! Built-in loggers: in-memory collector and an append-only JSON-lines file.

use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::{Arc, Mutex};

use super::records::LogRecord;
use super::Logger;

/// 内存收集器：测试与交互式检查用。
///
/// 记录存放在共享 `Arc<Mutex<Vec<_>>>` 中，挂接给 LogManager 之后
/// 仍可通过 `handle()` 读取。
pub struct MemoryLogger {
    records: Arc<Mutex<Vec<LogRecord>>>,
    filter: Option<fn(&LogRecord) -> bool>,
}

impl MemoryLogger {
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            filter: None,
        }
    }

    /// 只收集谓词选中的记录。
    pub fn with_filter(filter: fn(&LogRecord) -> bool) -> Self {
        Self {
            records: Arc::new(Mutex::new(Vec::new())),
            filter: Some(filter),
        }
    }

    pub fn handle(&self) -> Arc<Mutex<Vec<LogRecord>>> {
        Arc::clone(&self.records)
    }
}

impl Default for MemoryLogger {
    fn default() -> Self {
        Self::new()
    }
}

impl Logger for MemoryLogger {
    fn log(&mut self, rec: &LogRecord) {
        if let Some(f) = self.filter {
            if !f(rec) {
                return;
            }
        }
        self.records.lock().expect("log lock").push(rec.clone());
    }
}

/// 追加式 JSON-lines 文件写出器（每条记录一行）。
pub struct JsonLinesLogger {
    out: BufWriter<File>,
}

impl JsonLinesLogger {
    pub fn create(path: impl AsRef<Path>) -> std::io::Result<Self> {
        Ok(Self {
            out: BufWriter::new(File::create(path)?),
        })
    }
}

impl Logger for JsonLinesLogger {
    fn log(&mut self, rec: &LogRecord) {
        if let Ok(line) = serde_json::to_string(rec) {
            let _ = writeln!(self.out, "{line}");
        }
    }
}
