use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::debug;

use crate::{Error, Result};

/// Captured result of a finished external command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub status: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.status == 0
    }
}

/// Runs external programs (kubectl, helm, dependency probes) without
/// blocking the runtime.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner;

impl ShellRunner {
    pub fn new() -> Self {
        Self
    }

    /// Run to completion and return whatever it produced, regardless of the
    /// exit code. A program that cannot be spawned is `Error::NotFound`.
    pub async fn output(&self, program: &str, args: &[&str], stdin: Option<&str>) -> Result<CommandOutput> {
        debug!("Executing command: {} {}", program, args.join(" "));

        let mut command = Command::new(program);
        command
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .kill_on_drop(true);

        let mut child = command.spawn().map_err(|e| match e.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound {
                resource: format!("program `{program}`"),
            },
            _ => Error::Io(e),
        })?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            // closing stdin lets the child see EOF
            drop(pipe);
        }

        let output = child.wait_with_output().await?;
        let result = CommandOutput {
            status: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        };
        debug!("`{}` exited with {}", program, result.status);
        Ok(result)
    }

    /// Run and require a zero exit code, returning stdout.
    pub async fn run(&self, program: &str, args: &[&str]) -> Result<String> {
        self.run_with_input(program, args, None).await
    }

    pub async fn run_with_input(
        &self,
        program: &str,
        args: &[&str],
        stdin: Option<&str>,
    ) -> Result<String> {
        let output = self.output(program, args, stdin).await?;
        if !output.success() {
            return Err(Error::Command {
                program: program.to_string(),
                status: output.status,
                stderr: output.stderr,
            });
        }
        Ok(output.stdout)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_captures_stdout() {
        let out = ShellRunner::new().run("echo", &["hello"]).await.unwrap();
        assert_eq!(out.trim(), "hello");
    }

    #[tokio::test]
    async fn test_missing_program_is_not_found() {
        let err = ShellRunner::new()
            .run("definitely-not-a-real-binary-4711", &[])
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound { .. }));
    }

    #[tokio::test]
    async fn test_non_zero_exit_is_command_error() {
        let err = ShellRunner::new().run("false", &[]).await.unwrap_err();
        assert!(matches!(err, Error::Command { status: 1, .. }));
    }

    #[tokio::test]
    async fn test_stdin_is_forwarded() {
        let out = ShellRunner::new()
            .run_with_input("cat", &[], Some("piped"))
            .await
            .unwrap();
        assert_eq!(out, "piped");
    }
}
