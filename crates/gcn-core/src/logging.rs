use std::fs::{self, File};
use std::io::Write;
use std::path::Path;
use std::sync::Mutex;

/// 構造化JSONログを扱うヘルパ。
///
/// 1 レコード 1 行。`path == "-"` のときは stdout に書く。
pub struct StructuredLogger {
    pub to_stdout: bool,
    file: Option<Mutex<std::io::BufWriter<File>>>,
}

impl StructuredLogger {
    pub fn new(path: &str) -> std::io::Result<Self> {
        if path == "-" {
            Ok(Self {
                to_stdout: true,
                file: None,
            })
        } else {
            if let Some(parent) = Path::new(path).parent() {
                fs::create_dir_all(parent)?;
            }
            let f = fs::OpenOptions::new().create(true).append(true).open(path)?;
            let bw = std::io::BufWriter::with_capacity(1 << 16, f);
            Ok(Self {
                to_stdout: false,
                file: Some(Mutex::new(bw)),
            })
        }
    }

    /// `ts` と `phase` を付けて 1 レコード書き出す
    pub fn write_record(&self, phase: &str, fields: serde_json::Value) {
        let mut rec = serde_json::json!({
            "ts": chrono::Utc::now().to_rfc3339(),
            "phase": phase,
        });
        if let (Some(obj), serde_json::Value::Object(extra)) = (rec.as_object_mut(), fields) {
            obj.extend(extra);
        }
        self.write_json(&rec);
    }

    pub fn write_json(&self, v: &serde_json::Value) {
        if self.to_stdout {
            println!("{}", v);
        } else if let Some(ref file) = self.file {
            if let Ok(mut w) = file.lock() {
                let _ = writeln!(w, "{}", v);
            }
        }
    }

    /// 明示的に内部バッファを flush する。stdout モードの場合は何もしない。
    pub fn flush(&self) -> std::io::Result<()> {
        match self.file {
            Some(ref file) => match file.lock() {
                Ok(mut w) => w.flush(),
                Err(_) => Ok(()),
            },
            None => Ok(()),
        }
    }
}

impl Drop for StructuredLogger {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}
