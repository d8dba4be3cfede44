use super::{EventSink, SinkError};
use async_trait::async_trait;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

/// Line-delimited JSON file with size-based rotation.
///
/// When the active file reaches `max_size_mb` it becomes `<name>.jsonl.1`,
/// older rotations shift up by one and anything past `max_rotations` is
/// removed.
pub struct JsonlSink {
    file: BufWriter<File>,
    current_size: u64,
    max_size: u64,
    base_path: PathBuf,
    rotation_count: u32,
    max_rotations: u32,
}

impl JsonlSink {
    pub fn new(path: impl AsRef<Path>, max_size_mb: u64, max_rotations: u32) -> Result<Self, SinkError> {
        let path = path.as_ref();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let current_size = file.metadata()?.len();

        Ok(Self {
            file: BufWriter::new(file),
            current_size,
            max_size: max_size_mb.saturating_mul(1024 * 1024),
            base_path: path.to_path_buf(),
            rotation_count: 0,
            max_rotations,
        })
    }

    pub fn path(&self) -> &Path {
        &self.base_path
    }

    pub fn rotation_count(&self) -> u32 {
        self.rotation_count
    }

    pub fn write_line<T: Serialize + ?Sized>(&mut self, item: &T) -> Result<(), SinkError> {
        let json = serde_json::to_string(item)?;
        writeln!(self.file, "{}", json)?;

        self.current_size += (json.len() + 1) as u64;

        if self.current_size >= self.max_size {
            self.rotate()?;
        }

        Ok(())
    }

    fn rotated_path(&self, n: u32) -> PathBuf {
        self.base_path.with_extension(format!("jsonl.{}", n))
    }

    fn rotate(&mut self) -> Result<(), SinkError> {
        self.file.flush()?;

        if self.max_rotations == 0 {
            // no history kept: truncate in place
            let file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.base_path)?;
            self.file = BufWriter::new(file);
            self.current_size = 0;
            self.rotation_count += 1;
            log::info!("📄 Rotated output file (rotation #{})", self.rotation_count);
            return Ok(());
        }

        let oldest = self.rotated_path(self.max_rotations);
        if oldest.exists() {
            std::fs::remove_file(&oldest)?;
        }
        for i in (1..self.max_rotations).rev() {
            let old_path = self.rotated_path(i);
            if old_path.exists() {
                std::fs::rename(&old_path, self.rotated_path(i + 1))?;
            }
        }
        if self.base_path.exists() {
            std::fs::rename(&self.base_path, self.rotated_path(1))?;
        }

        let file = OpenOptions::new().create(true).append(true).open(&self.base_path)?;

        self.file = BufWriter::new(file);
        self.current_size = 0;
        self.rotation_count += 1;

        log::info!("📄 Rotated output file (rotation #{})", self.rotation_count);

        Ok(())
    }
}

#[async_trait]
impl<T: Serialize + Send + Sync> EventSink<T> for JsonlSink {
    async fn publish(&mut self, item: &T) -> Result<(), SinkError> {
        self.write_line(item)
    }

    async fn flush(&mut self) -> Result<(), SinkError> {
        self.file.flush()?;
        Ok(())
    }

    fn sink_type(&self) -> &'static str {
        "JSONL"
    }
}

impl Drop for JsonlSink {
    fn drop(&mut self) {
        if let Err(e) = self.file.flush() {
            log::error!("❌ Failed to flush {}: {}", self.base_path.display(), e);
        }
    }
}
