//! Sequence counter for numbering outgoing forms

use parking_lot::Mutex;
use std::fs;
use std::path::PathBuf;

use tracing::warn;

use crate::error::FormsResult;

pub trait SequenceCounter: Send + Sync {
    fn current(&self) -> FormsResult<i64>;
    /// Advance and return the new value.
    fn next(&self) -> FormsResult<i64>;
    fn set(&self, value: i64) -> FormsResult<i64>;
}

/// Counter kept as a single decimal number in a file.
pub struct FileSequence {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileSequence {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Mutex::new(()),
        }
    }

    fn load(&self) -> FormsResult<i64> {
        match fs::read_to_string(&self.path) {
            Ok(s) => Ok(s.trim().parse().unwrap_or_else(|_| {
                warn!("corrupt sequence file {}, restarting at 0", self.path.display());
                0
            })),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(e.into()),
        }
    }

    fn store(&self, value: i64) -> FormsResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, value.to_string())?;
        Ok(())
    }
}

impl SequenceCounter for FileSequence {
    fn current(&self) -> FormsResult<i64> {
        let _guard = self.lock.lock();
        self.load()
    }

    fn next(&self) -> FormsResult<i64> {
        let _guard = self.lock.lock();
        let value = self.load()? + 1;
        self.store(value)?;
        Ok(value)
    }

    fn set(&self, value: i64) -> FormsResult<i64> {
        let _guard = self.lock.lock();
        self.store(value)?;
        Ok(value)
    }
}

#[derive(Default)]
pub struct MemorySequence {
    value: Mutex<i64>,
}

impl MemorySequence {
    pub fn starting_at(value: i64) -> Self {
        Self { value: Mutex::new(value) }
    }
}

impl SequenceCounter for MemorySequence {
    fn current(&self) -> FormsResult<i64> {
        Ok(*self.value.lock())
    }

    fn next(&self) -> FormsResult<i64> {
        let mut value = self.value.lock();
        *value += 1;
        Ok(*value)
    }

    fn set(&self, value: i64) -> FormsResult<i64> {
        *self.value.lock() = value;
        Ok(value)
    }
}

/// printf-style integer format: literal text around one `%d`, `%Nd` or `%0Nd`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SequenceFormat {
    prefix: String,
    suffix: String,
    width: usize,
    zero_pad: bool,
}

impl SequenceFormat {
    pub fn parse(pattern: &str) -> Option<Self> {
        let start = pattern.find('%')?;
        let rest = &pattern[start + 1..];
        let end = rest.find('d')?;
        let flags = &rest[..end];
        if !flags.chars().all(|c| c.is_ascii_digit()) {
            return None;
        }
        let suffix = &rest[end + 1..];
        if suffix.contains('%') {
            return None;
        }
        Some(Self {
            prefix: pattern[..start].to_string(),
            suffix: suffix.to_string(),
            width: flags.parse().unwrap_or(0),
            zero_pad: flags.starts_with('0'),
        })
    }

    /// Parse, falling back to a plain `%d` for unsupported formats.
    pub fn parse_or_default(pattern: &str) -> Self {
        Self::parse(pattern).unwrap_or_else(|| {
            warn!("unsupported sequence format {:?}, using %d", pattern);
            Self::plain()
        })
    }

    pub fn plain() -> Self {
        Self {
            prefix: String::new(),
            suffix: String::new(),
            width: 0,
            zero_pad: false,
        }
    }

    pub fn format(&self, value: i64) -> String {
        let number = match (self.zero_pad, value < 0) {
            (true, false) => format!("{:0width$}", value, width = self.width),
            (true, true) => format!(
                "-{:0width$}",
                value.unsigned_abs(),
                width = self.width.saturating_sub(1)
            ),
            (false, _) => format!("{:>width$}", value, width = self.width),
        };
        format!("{}{}{}", self.prefix, number, self.suffix)
    }
}
