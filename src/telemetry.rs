//! Outcome log: one JSON line per quota-gated advice request.
//!
//! This is the side channel for fallback causes, which the HTTP response
//! deliberately hides.  Records never include user-supplied free text.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use flate2::write::GzEncoder;
use flate2::Compression;
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RotationConfig {
    pub max_bytes: Option<u64>,
    pub keep: usize,
    pub compress: bool,
}

impl Default for RotationConfig {
    fn default() -> Self {
        Self {
            max_bytes: None,
            keep: 1,
            compress: false,
        }
    }
}

/// Append-only line writer that rolls `<path>` to `<path>.1 .. <path>.N`
/// once it reaches `max_bytes`.
pub struct RotatingFile {
    path: PathBuf,
    file: File,
    rotation: RotationConfig,
}

impl RotatingFile {
    pub fn open(path: impl AsRef<Path>, rotation: RotationConfig) -> io::Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file,
            rotation,
        })
    }

    pub fn write_line(&mut self, line: &str) -> io::Result<()> {
        if self.is_full() {
            self.rotate()?;
        }
        writeln!(self.file, "{}", line)
    }

    fn is_full(&self) -> bool {
        match self.rotation.max_bytes {
            Some(limit) => fs::metadata(&self.path)
                .map(|m| m.len() >= limit)
                .unwrap_or(false),
            None => false,
        }
    }

    fn backup(&self, n: usize) -> PathBuf {
        let mut name = self.path.clone().into_os_string();
        name.push(format!(".{}", n));
        PathBuf::from(name)
    }

    fn rotate(&mut self) -> io::Result<()> {
        if self.rotation.keep > 0 {
            for n in (1..self.rotation.keep).rev() {
                for suffix in ["", ".gz"] {
                    let from = PathBuf::from(format!("{}{}", self.backup(n).display(), suffix));
                    if from.exists() {
                        let to = format!("{}{}", self.backup(n + 1).display(), suffix);
                        fs::rename(&from, to)?;
                    }
                }
            }
            let first = self.backup(1);
            fs::rename(&self.path, &first)?;
            if self.rotation.compress {
                gzip_in_place(&first)?;
            }
        }
        self.file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(&self.path)?;
        Ok(())
    }
}

fn gzip_in_place(path: &Path) -> io::Result<()> {
    let data = fs::read(path)?;
    let mut gz = GzEncoder::new(Vec::new(), Compression::default());
    gz.write_all(&data)?;
    let compressed = gz.finish()?;
    fs::write(format!("{}.gz", path.display()), compressed)?;
    fs::remove_file(path)
}

/// Final state of a quota-gated request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Succeeded,
    FellBack,
    QuotaExceeded,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OutcomeRecord<'a> {
    pub outcome: Outcome,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cause: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stage: Option<&'a str>,
    pub remaining: u32,
    pub latency_ms: u128,
    pub mbti_type: &'a str,
    pub has_deep_dive: bool,
}

#[derive(Clone, Default)]
pub struct OutcomeLog {
    writer: Option<Arc<Mutex<RotatingFile>>>,
    log_stdout: bool,
}

impl OutcomeLog {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(writer: Option<RotatingFile>, log_stdout: bool) -> Self {
        Self {
            writer: writer.map(|w| Arc::new(Mutex::new(w))),
            log_stdout,
        }
    }

    pub fn record(&self, record: &OutcomeRecord<'_>) {
        if let Some(writer) = &self.writer {
            let mut line = match serde_json::to_value(record) {
                Ok(v) => v,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to encode outcome record");
                    return;
                }
            };
            line["schemaVersion"] = 1.into();
            line["ts"] = chrono::Utc::now().to_rfc3339().into();
            if let Ok(mut guard) = writer.lock() {
                if let Err(e) = guard.write_line(&line.to_string()) {
                    tracing::warn!(error = %e, "failed to write outcome line");
                }
            }
        }
        if self.log_stdout {
            let latency_ms = u64::try_from(record.latency_ms).unwrap_or(u64::MAX);
            tracing::info!(
                target: "outcome",
                outcome = ?record.outcome,
                cause = ?record.cause,
                stage = ?record.stage,
                remaining = record.remaining,
                latency_ms,
                mbti = record.mbti_type,
                has_deep_dive = record.has_deep_dive
            );
        }
    }
}
