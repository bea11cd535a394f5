use log::{debug, info};
use std::path::{Path, PathBuf};

/// Root directory under which every pipeline run creates its own directories.
///
/// Directories are created fresh per call and are never removed by the stage
/// that created them; `clear` empties the root.
#[derive(Debug, Clone)]
pub struct Workspace {
    root: PathBuf,
}

impl Workspace {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create a new, empty, uniquely named directory, e.g. `<root>/source-a1b2c3`.
    pub fn create(&self, prefix: &str) -> Result<PathBuf, std::io::Error> {
        std::fs::create_dir_all(&self.root)?;
        let dir = tempfile::Builder::new()
            .prefix(&format!("{prefix}-"))
            .tempdir_in(&self.root)?
            .keep();
        debug!("Created workspace directory {}", dir.display());
        Ok(dir)
    }

    /// Remove everything below the root. A missing root is not an error.
    pub fn clear(&self) -> Result<usize, std::io::Error> {
        if !self.root.exists() {
            info!("Workspace {} does not exist", self.root.display());
            return Ok(0);
        }
        let mut removed = 0;
        for entry in std::fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.is_dir() {
                std::fs::remove_dir_all(&path)?;
            } else {
                std::fs::remove_file(&path)?;
            }
            removed += 1;
        }
        info!("Removed {removed} entries from {}", self.root.display());
        Ok(removed)
    }
}
