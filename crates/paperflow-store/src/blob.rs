//! Filesystem blob store for downloaded content.
//!
//! Layout: `{root}/{prefix}/{paper-id}.{ext}`. Locations handed back to
//! callers are relative to `root`, so the tree can be moved as a whole.

use std::fs;
use std::io::Write;
use std::path::{Component, Path, PathBuf};

use paperflow_core::{BlobStore, CollaboratorError, ErrorKind};

/// Writes each blob to a `.tmp` sibling and renames it into place, so a
/// location either resolves to complete content or does not exist.
#[derive(Debug, Clone)]
pub struct FsBlobStore {
    root: PathBuf,
    prefix: String,
    extension: String,
}

impl FsBlobStore {
    /// `prefix` groups blobs by source, e.g. `papers/arxiv`.
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into().trim_matches('/').to_string(),
            extension: "pdf".to_string(),
        }
    }

    pub fn with_extension(mut self, extension: impl Into<String>) -> Self {
        self.extension = extension.into();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Relative location a paper's blob is stored under.
    pub fn location_for(&self, paper_id: &str) -> String {
        // Old-style arXiv ids contain '/' (hep-th/9901001)
        let name = paper_id.replace(['/', '\\'], "_");
        if self.prefix.is_empty() {
            format!("{name}.{}", self.extension)
        } else {
            format!("{}/{name}.{}", self.prefix, self.extension)
        }
    }

    /// Absolute path of a location, rejecting anything that escapes `root`.
    pub fn resolve(&self, location: &str) -> Result<PathBuf, CollaboratorError> {
        let rel = Path::new(location);
        let safe = !location.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(CollaboratorError::new(
                ErrorKind::Malformed,
                format!("invalid blob location {location:?}"),
            ));
        }
        Ok(self.root.join(rel))
    }
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> CollaboratorError {
    let kind = match e.kind() {
        std::io::ErrorKind::NotFound => ErrorKind::NotFound,
        std::io::ErrorKind::PermissionDenied => ErrorKind::Unauthorized,
        std::io::ErrorKind::StorageFull => ErrorKind::Unsupported,
        _ => ErrorKind::Unavailable,
    };
    CollaboratorError::new(kind, format!("failed to {action} {}: {e}", path.display()))
}

/// Create `tmp_path`, fill and sync it. Any failure after the file exists
/// removes it again.
fn write_staged(
    tmp_path: &Path,
    fill: impl FnOnce(&mut fs::File) -> std::io::Result<()>,
) -> Result<(), CollaboratorError> {
    let mut file = fs::File::create(tmp_path).map_err(|e| io_error("create", tmp_path, e))?;
    let written = fill(&mut file).and_then(|()| file.sync_all());
    drop(file);
    written.map_err(|e| {
        let _ = fs::remove_file(tmp_path);
        io_error("write", tmp_path, e)
    })
}

impl BlobStore for FsBlobStore {
    fn put(&self, paper_id: &str, bytes: &[u8]) -> Result<String, CollaboratorError> {
        let location = self.location_for(paper_id);
        let final_path = self.resolve(&location)?;
        if let Some(parent) = final_path.parent() {
            fs::create_dir_all(parent).map_err(|e| io_error("create", parent, e))?;
        }

        let tmp_path = final_path.with_extension(format!("{}.tmp", self.extension));
        write_staged(&tmp_path, |file| file.write_all(bytes))?;

        fs::rename(&tmp_path, &final_path).map_err(|e| {
            let _ = fs::remove_file(&tmp_path);
            io_error("rename", &final_path, e)
        })?;
        log::debug!("stored {} bytes at {location}", bytes.len());
        Ok(location)
    }

    fn get(&self, location: &str) -> Result<Vec<u8>, CollaboratorError> {
        let path = self.resolve(location)?;
        fs::read(&path).map_err(|e| io_error("read", &path, e))
    }
}
