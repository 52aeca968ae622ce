//! External resize transform.
//!
//! The transform is an opaque executable with file-in/file-out semantics:
//! given a directory of inputs and a target geometry, it writes resized
//! copies to an output directory, preserving filenames. Filename
//! preservation is the contract the result correlation depends on; the
//! consumer enforces it when mapping outputs back to request keys.

use std::path::Path;
use std::process::Stdio;

use async_trait::async_trait;
use thiserror::Error;
use tokio::process::Command;
use tracing::debug;

/// Errors that can occur while invoking the transform.
#[derive(Debug, Error)]
pub enum TransformError {
    /// The transform process could not be spawned.
    #[error("failed to spawn transform '{program}': {source}")]
    SpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    /// The transform exited with a nonzero status.
    #[error("transform exited with code {code}: {stderr}")]
    NonZeroExit { code: i32, stderr: String },

    /// Reading the input directory failed.
    #[error("failed to read transform input directory: {0}")]
    Io(#[from] std::io::Error),
}

/// Resizes every file in `input_dir` into `output_dir`.
#[async_trait]
pub trait Transform: Send + Sync {
    async fn run(&self, input_dir: &Path, output_dir: &Path) -> Result<(), TransformError>;
}

/// Default program used to resize images.
pub const DEFAULT_PROGRAM: &str = "mogrify";

/// Default target geometry.
pub const DEFAULT_GEOMETRY: &str = "800x600";

/// Transform backed by an ImageMagick-style resizer.
///
/// Invoked as `{program} -path {output_dir} -resize {geometry} {files...}`
/// with the input files passed explicitly rather than through a shell glob.
pub struct MogrifyTransform {
    program: String,
    geometry: String,
}

impl MogrifyTransform {
    /// Creates a transform with the default program and geometry.
    pub fn new() -> Self {
        Self {
            program: DEFAULT_PROGRAM.to_string(),
            geometry: DEFAULT_GEOMETRY.to_string(),
        }
    }

    /// Sets the program to invoke.
    pub fn with_program(mut self, program: impl Into<String>) -> Self {
        self.program = program.into();
        self
    }

    /// Sets the target geometry (e.g. "800x600").
    pub fn with_geometry(mut self, geometry: impl Into<String>) -> Self {
        self.geometry = geometry.into();
        self
    }
}

impl Default for MogrifyTransform {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Transform for MogrifyTransform {
    async fn run(&self, input_dir: &Path, output_dir: &Path) -> Result<(), TransformError> {
        tokio::fs::create_dir_all(output_dir).await?;

        let mut inputs = Vec::new();
        let mut entries = tokio::fs::read_dir(input_dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if entry.file_type().await?.is_file() {
                inputs.push(entry.path());
            }
        }

        if inputs.is_empty() {
            debug!(input_dir = %input_dir.display(), "No files to transform");
            return Ok(());
        }

        let mut cmd = Command::new(&self.program);
        cmd.arg("-path")
            .arg(output_dir)
            .arg("-resize")
            .arg(&self.geometry)
            .args(&inputs)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            program = %self.program,
            geometry = %self.geometry,
            files = inputs.len(),
            "Invoking transform"
        );

        let output = cmd
            .output()
            .await
            .map_err(|source| TransformError::SpawnFailed {
                program: self.program.clone(),
                source,
            })?;

        if output.status.success() {
            Ok(())
        } else {
            Err(TransformError::NonZeroExit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            })
        }
    }
}
