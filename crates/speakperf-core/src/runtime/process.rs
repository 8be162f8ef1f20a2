use std::path::Path;
use std::time::Instant;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

#[derive(Clone, Debug, Default)]
pub struct CommandOutput {
    pub success: bool,
    pub exit_code: Option<i32>,
    /// stdout followed by stderr.
    pub combined: String,
    pub duration_ms: u64,
}

impl CommandOutput {
    pub fn status_text(&self) -> String {
        match self.exit_code {
            Some(code) => format!("exit status {code}"),
            None => "terminated by signal".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("failed to spawn '{program}': {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },
    #[error("process cancelled")]
    Cancelled,
}

/// Runs a program to completion, capturing both output streams.
///
/// The child is killed if the token fires before it exits.
pub async fn run_command(
    program: &str,
    args: &[String],
    workdir: Option<&Path>,
    cancel: &CancellationToken,
) -> Result<CommandOutput, ProcessError> {
    let started = Instant::now();
    let mut command = tokio::process::Command::new(program);
    command.kill_on_drop(true);
    command.args(args);
    if let Some(dir) = workdir {
        command.current_dir(dir);
    }
    command.stdin(std::process::Stdio::null());
    command.stdout(std::process::Stdio::piped());
    command.stderr(std::process::Stdio::piped());

    let child = command.spawn().map_err(|source| ProcessError::Spawn {
        program: program.to_string(),
        source,
    })?;

    // dropping wait_with_output on cancel drops the child, which kills it
    let output = tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(ProcessError::Cancelled),
        out = child.wait_with_output() => out.map_err(|source| ProcessError::Spawn {
            program: program.to_string(),
            source,
        })?,
    };

    let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr);
    if !stderr.is_empty() {
        if !combined.is_empty() && !combined.ends_with('\n') {
            combined.push('\n');
        }
        combined.push_str(&stderr);
    }

    Ok(CommandOutput {
        success: output.status.success(),
        exit_code: output.status.code(),
        combined,
        duration_ms: started.elapsed().as_millis() as u64,
    })
}
