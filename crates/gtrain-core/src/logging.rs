use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::Path;
use std::sync::Mutex;

/// パス・fold ごとの結果を 1 行 1 JSON で書き出すヘルパ。
pub struct StructuredLogger {
    to_stdout: bool,
    file: Option<Mutex<BufWriter<File>>>,
}

impl StructuredLogger {
    /// `-` なら stdout、それ以外はファイルへ追記する
    pub fn new<P: AsRef<Path>>(path: P) -> std::io::Result<Self> {
        let path = path.as_ref();
        if path.to_string_lossy() == "-" {
            return Ok(Self {
                to_stdout: true,
                file: None,
            });
        }
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let f = fs::OpenOptions::new().create(true).append(true).open(path)?;
        Ok(Self {
            to_stdout: false,
            file: Some(Mutex::new(BufWriter::with_capacity(1 << 16, f))),
        })
    }

    pub fn write_json(&self, v: &serde_json::Value) {
        if self.to_stdout {
            println!("{v}");
        } else if let Some(ref file) = self.file {
            let mut w = file.lock().unwrap_or_else(|e| e.into_inner());
            if let Err(e) = writeln!(w, "{v}").and_then(|_| w.flush()) {
                log::warn!("Failed to write metrics log: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn appends_one_object_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs/metrics.jsonl");
        {
            let logger = StructuredLogger::new(&path).unwrap();
            logger.write_json(&json!({"pass": 0}));
        }
        let logger = StructuredLogger::new(&path).unwrap();
        logger.write_json(&json!({"pass": 1}));

        let text = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> =
            text.lines().map(|l| serde_json::from_str(l).unwrap()).collect();
        assert_eq!(lines, vec![json!({"pass": 0}), json!({"pass": 1})]);
    }
}
