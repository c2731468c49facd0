use crate::error::ProcessError;
use std::ffi::OsString;
use std::future::Future;
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Runs one external command to completion.
pub trait CommandRunner: Send + Sync + 'static {
    fn run(
        &self,
        program: &Path,
        subcommand: &str,
        args: &[OsString],
    ) -> impl Future<Output = Result<(), ProcessError>> + Send;
}

/// Launches real child processes with stdio discarded.
///
/// Exit code 0 is success; anything else, including death by signal, is a failure.
/// There is no timeout: a hung child blocks the caller until it exits.
#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessRunner;

impl CommandRunner for ProcessRunner {
    async fn run(
        &self,
        program: &Path,
        subcommand: &str,
        args: &[OsString],
    ) -> Result<(), ProcessError> {
        tracing::debug!(program = %program.display(), subcommand, ?args, "spawning");
        let status = Command::new(program)
            .arg(subcommand)
            .args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            // Cancelling the workflow task must not leave the child running.
            .kill_on_drop(true)
            .status()
            .await
            .map_err(|source| ProcessError::Spawn {
                program: program.to_path_buf(),
                source,
            })?;

        if status.success() {
            Ok(())
        } else {
            tracing::warn!(subcommand, code = ?status.code(), "command failed");
            Err(ProcessError::Failed {
                subcommand: subcommand.to_string(),
                code: status.code(),
            })
        }
    }
}
