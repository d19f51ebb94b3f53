//! On-disk layout of pair log files.
//!
//! ```text
//! <root>/
//!   results.json
//!   validators/<validator>/<client>/client.log
//!   validators/<validator>/<client>/validator.log
//! ```

use std::collections::HashMap;
use std::io;
use std::path::{Path, PathBuf};

/// Log file locations for one pair.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PairLogs {
    pub dir: PathBuf,
    pub client_log: PathBuf,
    pub validator_log: PathBuf,
}

impl PairLogs {
    /// Log files inside an existing pair directory.
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            client_log: dir.join("client.log"),
            validator_log: dir.join("validator.log"),
            dir,
        }
    }
}

/// Root of a sweep's log tree.
#[derive(Debug, Clone)]
pub struct LogLayout {
    root: PathBuf,
}

impl LogLayout {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn validators_root(&self) -> PathBuf {
        self.root.join("validators")
    }

    /// Directory holding every pair run against `validator`.
    pub fn validator_dir(&self, validator: &str) -> PathBuf {
        self.validators_root().join(sanitize(validator))
    }

    /// Create the validator directory.
    pub fn prepare_validator(&self, validator: &str) -> io::Result<PathBuf> {
        let dir = self.validators_root().join(component(validator)?);
        std::fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    /// Create the pair directory under an already prepared validator directory.
    pub fn prepare_pair(&self, validator: &str, client: &str) -> io::Result<PairLogs> {
        let dir = self
            .validators_root()
            .join(component(validator)?)
            .join(component(client)?);
        std::fs::create_dir_all(&dir)?;
        Ok(PairLogs::in_dir(dir))
    }

    /// Where the sweep report is written.
    pub fn results_path(&self) -> PathBuf {
        self.root.join("results.json")
    }
}

/// Flatten an identifier into a single path component.
///
/// Identifiers like `devp2p/discv4` would otherwise nest directories.
pub fn sanitize(name: &str) -> String {
    name.chars()
        .map(|c| if c == '/' || c == '\\' { '_' } else { c })
        .collect()
}

/// Sanitized identifier that stays a child of its parent directory.
fn component(name: &str) -> io::Result<String> {
    let flat = sanitize(name);
    if flat.is_empty() || flat == "." || flat == ".." {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("'{}' cannot be used as a log directory name", name),
        ));
    }
    Ok(flat)
}

/// Fail if two identifiers would share one log directory.
pub fn ensure_distinct<'a>(ids: impl IntoIterator<Item = &'a String>) -> io::Result<()> {
    let mut seen: HashMap<String, &str> = HashMap::new();
    for id in ids {
        let flat = component(id)?;
        if let Some(other) = seen.insert(flat.clone(), id) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("'{}' and '{}' both log to '{}'", other, id, flat),
            ));
        }
    }
    Ok(())
}
