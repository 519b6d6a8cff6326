//! Materializes returned artifacts into a tree mirroring the input layout.

use std::path::{Path, PathBuf};

use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum SinkError {
    #[error("{0} is not under the input root")]
    NotUnderInputRoot(PathBuf),

    #[error("unable to write {0}: {1}")]
    Write(PathBuf, std::io::Error),
}

/// Writes processed files to `output_root/<relative>` where the input was
/// `input_root/<relative>`.
pub struct OutputSink {
    input_root: PathBuf,
    output_root: PathBuf,
}

impl OutputSink {
    pub fn new(input_root: impl Into<PathBuf>, output_root: impl Into<PathBuf>) -> Self {
        Self {
            input_root: input_root.into(),
            output_root: output_root.into(),
        }
    }

    /// Mirrored output location for an input path.
    pub fn target(&self, input: &Path) -> Result<PathBuf, SinkError> {
        let relative = input
            .strip_prefix(&self.input_root)
            .map_err(|_| SinkError::NotUnderInputRoot(input.to_path_buf()))?;
        Ok(self.output_root.join(relative))
    }

    /// Write one returned artifact, creating intermediate directories.
    ///
    /// Empty bytes mean the client gave up on this file: nothing is created
    /// and the input stays unprocessed (a resumed run will pick it up again).
    pub async fn persist(&self, input: &Path, bytes: &[u8]) -> Result<(), SinkError> {
        if bytes.is_empty() {
            warn!(path = %input.display(), "client returned no output, leaving file unprocessed");
            return Ok(());
        }
        let target = self.target(input)?;
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|err| SinkError::Write(target.clone(), err))?;
        }
        tokio::fs::write(&target, bytes)
            .await
            .map_err(|err| SinkError::Write(target.clone(), err))
    }
}
