//! Manifest
//!
//! The ordered list of run ids the engine must open on restart, oldest run
//! first. Stored as one decimal id per line in `MANIFEST`.
//!
//! Every change writes `MANIFEST.tmp`, syncs it, renames it over `MANIFEST`
//! and syncs the directory, so a reader never sees a partial run set.
//! A failure after the rename is reported apart from one before it: at that
//! point the new manifest is already what the next `open` will read.

use std::fs::{self, File, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::error::Result;
use crate::StrataError;

/// File name of the manifest inside the data directory
pub const MANIFEST_FILENAME: &str = "MANIFEST";

/// A failed publish, split by whether `MANIFEST` was already replaced
#[derive(Debug)]
pub enum PublishError {
    /// The previous manifest is still in place
    NotReplaced(StrataError),
    /// The new manifest was renamed into place but the directory sync failed
    Unsynced(StrataError),
}

impl From<PublishError> for StrataError {
    fn from(e: PublishError) -> Self {
        match e {
            PublishError::NotReplaced(e) | PublishError::Unsynced(e) => e,
        }
    }
}

/// Ordered run ids, oldest first
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Manifest {
    runs: Vec<u64>,
}

impl Manifest {
    pub fn new(runs: Vec<u64>) -> Self {
        Self { runs }
    }

    /// Load the manifest from `dir`; a missing file is an empty manifest
    pub fn load(dir: &Path) -> Result<Self> {
        let contents = match fs::read_to_string(Self::path(dir)) {
            Ok(contents) => contents,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => return Err(e.into()),
        };

        Self::parse(&contents)
    }

    /// Parse newline-delimited run ids
    pub fn parse(contents: &str) -> Result<Self> {
        let mut runs = Vec::new();

        for (line_no, line) in contents.lines().enumerate() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            let id = line.parse::<u64>().map_err(|_| {
                StrataError::Corruption(format!(
                    "Manifest line {} is not a run id: {:?}",
                    line_no + 1,
                    line
                ))
            })?;
            if runs.contains(&id) {
                return Err(StrataError::Corruption(format!(
                    "Manifest lists run {} twice",
                    id
                )));
            }
            runs.push(id);
        }

        Ok(Self { runs })
    }

    /// Serialize as newline-delimited run ids
    pub fn encode(&self) -> String {
        let mut out = String::new();
        for id in &self.runs {
            out.push_str(&id.to_string());
            out.push('\n');
        }
        out
    }

    /// Atomically replace the manifest in `dir` with this one
    pub fn publish(&self, dir: &Path) -> std::result::Result<(), PublishError> {
        self.write_and_rename(dir)
            .map_err(PublishError::NotReplaced)?;
        sync_dir(dir).map_err(PublishError::Unsynced)?;

        tracing::debug!(runs = ?self.runs, "Published manifest");
        Ok(())
    }

    fn write_and_rename(&self, dir: &Path) -> Result<()> {
        let tmp_path = Self::temp_path(dir);

        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&tmp_path)?;
            file.write_all(self.encode().as_bytes())?;
            file.sync_all()?;
        }

        fs::rename(&tmp_path, Self::path(dir))?;
        Ok(())
    }

    pub fn runs(&self) -> &[u64] {
        &self.runs
    }

    pub fn contains(&self, id: u64) -> bool {
        self.runs.contains(&id)
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    pub fn path(dir: &Path) -> PathBuf {
        dir.join(MANIFEST_FILENAME)
    }

    pub fn temp_path(dir: &Path) -> PathBuf {
        dir.join(format!("{}.tmp", MANIFEST_FILENAME))
    }
}

#[cfg(test)]
thread_local! {
    /// Makes the next directory sync on this thread fail
    pub(crate) static FAIL_NEXT_DIR_SYNC: std::cell::Cell<bool> = const { std::cell::Cell::new(false) };
}

/// Make renames inside `dir` durable
#[cfg(unix)]
pub(crate) fn sync_dir(dir: &Path) -> Result<()> {
    #[cfg(test)]
    {
        if FAIL_NEXT_DIR_SYNC.with(|fail| fail.replace(false)) {
            return Err(std::io::Error::other("injected directory sync failure").into());
        }
    }
    File::open(dir)?.sync_all()?;
    Ok(())
}

/// Directory handles cannot be synced on this platform
#[cfg(not(unix))]
pub(crate) fn sync_dir(_dir: &Path) -> Result<()> {
    Ok(())
}
