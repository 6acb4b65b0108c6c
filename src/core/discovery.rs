use std::collections::HashSet;
use std::path::{Path, PathBuf};
use thiserror::Error;
use walkdir::WalkDir;

pub const DEFAULT_IMAGE_EXTENSIONS: [&str; 9] =
    ["png", "jpg", "jpeg", "gif", "bmp", "webp", "tif", "tiff", "ico"];

#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Invalid path: {path}")]
    InvalidPath { path: String },
}

/// Finds candidate images under one or more directories.
pub struct CandidateDiscovery {
    extensions: HashSet<String>,
    follow_links: bool,
}

impl CandidateDiscovery {
    pub fn new() -> Self {
        Self {
            extensions: DEFAULT_IMAGE_EXTENSIONS
                .iter()
                .map(|ext| ext.to_string())
                .collect(),
            follow_links: false,
        }
    }

    pub fn with_extensions<I, S>(mut self, extensions: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.extensions = extensions
            .into_iter()
            .map(|ext| ext.as_ref().trim_start_matches('.').to_lowercase())
            .collect();
        self
    }

    pub fn follow_links(mut self, follow: bool) -> Self {
        self.follow_links = follow;
        self
    }

    pub fn is_supported_format(&self, file_path: &Path) -> bool {
        file_path
            .extension()
            .map(|ext| self.extensions.contains(&ext.to_string_lossy().to_lowercase()))
            .unwrap_or(false)
    }

    /// Recursively collect matching files, sorted by path so the candidate
    /// order is stable between runs. Unreadable entries are skipped.
    pub fn discover(&self, root: &Path) -> Result<Vec<PathBuf>, DiscoveryError> {
        if !root.is_dir() {
            return Err(DiscoveryError::InvalidPath {
                path: root.to_string_lossy().to_string(),
            });
        }

        let mut files: Vec<PathBuf> = WalkDir::new(root)
            .follow_links(self.follow_links)
            .into_iter()
            .filter_map(|entry| match entry {
                Ok(entry) => Some(entry),
                Err(e) => {
                    log::warn!("Skipping unreadable entry: {}", e);
                    None
                }
            })
            .filter(|entry| entry.file_type().is_file())
            .map(|entry| entry.into_path())
            .filter(|path| self.is_supported_format(path))
            .collect();

        files.sort();
        Ok(files)
    }
}

impl Default for CandidateDiscovery {
    fn default() -> Self {
        Self::new()
    }
}
