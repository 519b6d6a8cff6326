//! Lazy enumeration of the input files a dispatch run hands out.

use std::path::{Path, PathBuf};

use tracing::warn;
use walkdir::WalkDir;

/// Walks the input tree and yields the `.gz` files to be processed.
///
/// The walk is recursive and lazy; paths come out in traversal order, each
/// exactly once. Single consumer: the server serializes access behind a
/// mutex, so a path is never handed to two clients.
pub struct DirectorySource {
    input_root: PathBuf,
    output_root: PathBuf,
    filter_text: Option<String>,
    resume: bool,
    walker: walkdir::IntoIter,
}

impl DirectorySource {
    /// `filter_text`, when non-empty, keeps only files whose containing
    /// directory path contains the substring. `resume` skips files whose
    /// mirrored output already exists.
    pub fn new(
        input_root: impl Into<PathBuf>,
        output_root: impl Into<PathBuf>,
        filter_text: Option<String>,
        resume: bool,
    ) -> Self {
        let input_root = input_root.into();
        let walker = WalkDir::new(&input_root).follow_links(false).into_iter();
        Self {
            input_root,
            output_root: output_root.into(),
            filter_text: filter_text.filter(|f| !f.is_empty()),
            resume,
            walker,
        }
    }

    /// Next input path, or `None` once the tree is exhausted.
    pub fn next_path(&mut self) -> Option<PathBuf> {
        loop {
            let entry = match self.walker.next()? {
                Ok(entry) => entry,
                Err(err) => {
                    warn!(%err, "skipping unreadable directory entry");
                    continue;
                }
            };
            if !entry.file_type().is_file() {
                continue;
            }
            if !entry.file_name().to_string_lossy().ends_with(".gz") {
                continue;
            }
            let path = entry.path();
            if let Some(filter) = &self.filter_text {
                let dir = path.parent().unwrap_or_else(|| Path::new(""));
                if !dir.to_string_lossy().contains(filter.as_str()) {
                    continue;
                }
            }
            if self.resume && self.already_done(path) {
                continue;
            }
            return Some(path.to_path_buf());
        }
    }

    /// Take up to `n` paths. An empty result means the source is exhausted.
    pub fn take(&mut self, n: usize) -> Vec<PathBuf> {
        let mut chunk = Vec::with_capacity(n);
        while chunk.len() < n {
            match self.next_path() {
                Some(path) => chunk.push(path),
                None => break,
            }
        }
        chunk
    }

    fn already_done(&self, input: &Path) -> bool {
        input
            .strip_prefix(&self.input_root)
            .map(|rel| self.output_root.join(rel).exists())
            .unwrap_or(false)
    }
}
