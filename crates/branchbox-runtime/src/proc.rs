use crate::RuntimeError;
use std::path::Path;
use std::process::Command;
use tracing::debug;

/// Captured output of a successful command.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub stdout: String,
    pub stderr: String,
}

impl RunOutput {
    /// Stdout with trailing whitespace trimmed, the common case for
    /// single-value commands like `git rev-parse`.
    pub fn stdout_trimmed(&self) -> &str {
        self.stdout.trim_end()
    }
}

/// Run an external command to completion, capturing stdout and stderr.
///
/// A non-zero exit becomes [`RuntimeError::CommandFailed`] carrying the
/// command line and both streams; spawn failures surface as I/O errors.
pub fn run(program: &str, args: &[&str]) -> Result<RunOutput, RuntimeError> {
    exec(Command::new(program).args(args), program, args)
}

/// Like [`run`], with the working directory set.
pub fn run_in(workdir: &Path, program: &str, args: &[&str]) -> Result<RunOutput, RuntimeError> {
    exec(
        Command::new(program).args(args).current_dir(workdir),
        program,
        args,
    )
}

/// Like [`run_in`], with additional environment variables.
pub fn run_with_env(
    workdir: &Path,
    envs: &[(&str, &str)],
    program: &str,
    args: &[&str],
) -> Result<RunOutput, RuntimeError> {
    let mut cmd = Command::new(program);
    cmd.args(args).current_dir(workdir);
    for (k, v) in envs {
        cmd.env(k, v);
    }
    exec(&mut cmd, program, args)
}

fn exec(cmd: &mut Command, program: &str, args: &[&str]) -> Result<RunOutput, RuntimeError> {
    let command_line = format!("{program} {}", args.join(" "));
    debug!("+ {command_line}");

    let output = cmd.output()?;
    let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
    let stderr = String::from_utf8_lossy(&output.stderr).into_owned();

    if output.status.success() {
        Ok(RunOutput { stdout, stderr })
    } else {
        Err(RuntimeError::CommandFailed {
            command: command_line,
            code: output.status.code().unwrap_or(-1),
            stdout,
            stderr,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_captures_stdout() {
        let out = run("echo", &["hello"]).unwrap();
        assert_eq!(out.stdout_trimmed(), "hello");
    }

    #[test]
    fn run_in_respects_workdir() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("marker.txt"), "x").unwrap();
        let out = run_in(dir.path(), "ls", &[]).unwrap();
        assert!(out.stdout.contains("marker.txt"));
    }

    #[test]
    fn run_with_env_passes_variables() {
        let dir = tempfile::tempdir().unwrap();
        let out = run_with_env(
            dir.path(),
            &[("PREVIEW_PORT", "8123")],
            "sh",
            &["-c", "echo $PREVIEW_PORT"],
        )
        .unwrap();
        assert_eq!(out.stdout_trimmed(), "8123");
    }

    #[test]
    fn nonzero_exit_is_command_failed() {
        let err = run("sh", &["-c", "echo oops >&2; exit 3"]).unwrap_err();
        match err {
            RuntimeError::CommandFailed {
                command,
                code,
                stderr,
                ..
            } => {
                assert!(command.starts_with("sh "));
                assert_eq!(code, 3);
                assert!(stderr.contains("oops"));
            }
            other => panic!("expected CommandFailed, got {other}"),
        }
    }

    #[test]
    fn missing_binary_is_io_error() {
        assert!(matches!(
            run("definitely-not-a-binary-7f3a", &[]),
            Err(RuntimeError::Io(_))
        ));
    }
}
