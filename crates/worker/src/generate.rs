//! The generation seam.
//!
//! The actual image generation is an external, opaque, long-running
//! operation behind the [`Generator`] trait. [`CommandGenerator`]
//! shells out to the configured program and treats its stdout lines as
//! progress signals; [`StubGenerator`] is the test-mode stand-in that
//! writes a placeholder artifact. Neither supports mid-flight
//! cancellation: once started, a generation runs to completion.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use async_trait::async_trait;
use easel_core::prompt::{self, ParsedPrompt};
use easel_core::task::TaskRecord;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::sync::mpsc::UnboundedSender;

/// An artifact smaller than this counts as a failed generation.
pub const MIN_ARTIFACT_BYTES: u64 = 100;

#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    #[error("failed to spawn generator: {0}")]
    Spawn(std::io::Error),

    #[error("generator exited with code {exit_code:?}")]
    Failed { exit_code: Option<i32> },

    #[error("input image download failed: {0}")]
    Download(String),

    #[error("artifact missing or too small ({size} bytes)")]
    ArtifactTooSmall { size: u64 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// One generation request: the validated task plus local file paths.
#[derive(Debug, Clone)]
pub struct GenerateRequest {
    pub record: TaskRecord,
    pub out_path: PathBuf,
    pub init_image: Option<PathBuf>,
    pub mask_image: Option<PathBuf>,
    /// Where the print-format output goes; `Some` iff the task is
    /// marked `to_print`, and then the generator must fill it.
    pub print_path: Option<PathBuf>,
}

/// The black-box generation collaborator.
///
/// Implementations emit their raw progress lines through `progress`;
/// the caller decides which lines are signals.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(
        &self,
        request: &GenerateRequest,
        progress: UnboundedSender<String>,
    ) -> Result<(), GenerateError>;
}

/// Check the generated artifact is present and plausibly an image.
pub async fn validate_artifact(path: &Path) -> Result<(), GenerateError> {
    let size = tokio::fs::metadata(path).await.map(|m| m.len()).unwrap_or(0);
    if size < MIN_ARTIFACT_BYTES {
        return Err(GenerateError::ArtifactTooSmall { size });
    }
    Ok(())
}

// ---------------------------------------------------------------------------
// External-command generator
// ---------------------------------------------------------------------------

/// Runs the configured external generator program.
pub struct CommandGenerator {
    program: String,
}

impl CommandGenerator {
    pub fn new(program: String) -> Self {
        Self { program }
    }

    /// Build the argument list for one request.
    ///
    /// Weighted prompts become one `--prompt text::weight` pair per
    /// segment; a simple prompt is passed through as-is.
    fn build_args(request: &GenerateRequest) -> Vec<String> {
        let record = &request.record;
        let mut args = Vec::new();

        match prompt::parse(&record.prompt) {
            ParsedPrompt::Simple(text) => {
                args.push("--prompt".to_string());
                args.push(text);
            }
            ParsedPrompt::Weighted(segments) => {
                for (text, weight) in segments {
                    args.push("--prompt".to_string());
                    args.push(format!("{text}::{weight}"));
                }
            }
        }

        args.push("--strength".to_string());
        args.push(record.strength.to_string());
        args.push("--steps".to_string());
        args.push(record.steps.to_string());
        args.push("--seed".to_string());
        args.push(record.seed.to_string());
        args.push("--width".to_string());
        args.push(record.width.to_string());
        args.push("--height".to_string());
        args.push(record.height.to_string());
        args.push("--outfile".to_string());
        args.push(request.out_path.to_string_lossy().into_owned());

        if record.upscale {
            args.push("--upscale".to_string());
        }
        if record.fix_faces {
            args.push("--fix-faces".to_string());
        }
        if record.tileable {
            args.push("--tileable".to_string());
        }
        if let Some(init) = &request.init_image {
            args.push("--init-image".to_string());
            args.push(init.to_string_lossy().into_owned());
        }
        if let Some(mask) = &request.mask_image {
            args.push("--mask-image".to_string());
            args.push(mask.to_string_lossy().into_owned());
        }
        if let Some(print) = &request.print_path {
            args.push("--to-print".to_string());
            args.push("--print-outfile".to_string());
            args.push(print.to_string_lossy().into_owned());
        }

        args
    }
}

#[async_trait]
impl Generator for CommandGenerator {
    async fn generate(
        &self,
        request: &GenerateRequest,
        progress: UnboundedSender<String>,
    ) -> Result<(), GenerateError> {
        let args = Self::build_args(request);
        tracing::info!(
            task_id = request.record.task_id,
            program = %self.program,
            "Starting generation (this might take a while)",
        );

        let mut child = tokio::process::Command::new(&self.program)
            .args(&args)
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()
            .map_err(GenerateError::Spawn)?;

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Some(line) = lines.next_line().await? {
                // Receiver gone means the worker is shutting down;
                // the generation still runs to completion.
                let _ = progress.send(line);
            }
        }

        let status = child.wait().await?;
        if !status.success() {
            return Err(GenerateError::Failed {
                exit_code: status.code(),
            });
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Dry-run generator
// ---------------------------------------------------------------------------

/// Test-mode generator: emits synthetic step signals and writes a
/// placeholder artifact large enough to pass validation.
#[derive(Debug, Default)]
pub struct StubGenerator;

#[async_trait]
impl Generator for StubGenerator {
    async fn generate(
        &self,
        request: &GenerateRequest,
        progress: UnboundedSender<String>,
    ) -> Result<(), GenerateError> {
        let steps = request.record.steps.max(1);
        for step in 1..=steps {
            tokio::time::sleep(std::time::Duration::from_millis(10)).await;
            let _ = progress.send(format!("{step}/{steps}"));
        }
        tokio::fs::write(&request.out_path, vec![0u8; 1024]).await?;
        if let Some(print) = &request.print_path {
            tokio::fs::write(print, vec![0u8; 1024]).await?;
        }
        Ok(())
    }
}
