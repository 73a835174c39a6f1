//! Process execution behind an injectable seam.
//!
//! The pipeline only talks to [`ProcessRunner`], so tests can substitute a fake
//! that returns canned output and seeds the filesystem instead of invoking
//! xcodebuild.

use std::process::Command;

use tracing::{debug, info, warn};

use crate::command::ShellCommand;
use crate::types::BuildError;
use crate::validate::fail;

/// Captured result of one command.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunOutput {
    /// Exit code, `None` if the process was terminated by a signal.
    pub status: Option<i32>,
    /// Combined stdout and stderr.
    pub output: String,
}

impl RunOutput {
    pub fn success(&self) -> bool {
        self.status == Some(0)
    }
}

/// Runs a synthesized command to completion.
///
/// Implementations must block until the process exits and must not retry.
/// A non-zero exit is not an error here: callers judge success by the
/// artifacts left on disk.
pub trait ProcessRunner {
    fn run(&self, command: &ShellCommand) -> Result<RunOutput, BuildError>;
}

impl<F> ProcessRunner for F
where
    F: Fn(&ShellCommand) -> Result<RunOutput, BuildError>,
{
    fn run(&self, command: &ShellCommand) -> Result<RunOutput, BuildError> {
        self(command)
    }
}

/// Runs commands through `sh -c`, logging their output.
#[derive(Debug, Clone, Default)]
pub struct ShellRunner {
    debug: bool,
}

impl ShellRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Echo every raw command line before running it.
    pub fn debug(mut self, debug: bool) -> Self {
        self.debug = debug;
        self
    }
}

impl ProcessRunner for ShellRunner {
    fn run(&self, command: &ShellCommand) -> Result<RunOutput, BuildError> {
        let line = command.to_string();
        if self.debug {
            info!("{}", line);
        } else {
            debug!("Running: {}", line);
        }

        let mut cmd = Command::new("sh");
        cmd.arg("-c").arg(&line);
        if let Some(dir) = command.working_dir() {
            cmd.current_dir(dir);
        }

        let output = cmd.output().map_err(|e| {
            fail(BuildError::Precondition(format!(
                "Failed to start {}.\n\n\
                 Error: {}\n\n\
                 Ensure the tool is installed and available on PATH.",
                command.program(),
                e
            )))
        })?;

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));
        for text in combined.lines().filter(|l| !l.trim().is_empty()) {
            info!("{}", text);
        }

        let result = RunOutput {
            status: output.status.code(),
            output: combined,
        };
        if !result.success() {
            warn!(
                "{} exited with status {:?}; checking for its output anyway",
                command.program(),
                result.status
            );
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};
    use tracing_subscriber::fmt::MakeWriter;

    /// Collects formatted log output in memory.
    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Captured {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl<'a> MakeWriter<'a> for Captured {
        type Writer = Captured;

        fn make_writer(&'a self) -> Self::Writer {
            self.clone()
        }
    }

    fn capture_logs(f: impl FnOnce()) -> Vec<String> {
        let captured = Captured::default();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(captured.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::DEBUG)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = captured.0.lock().unwrap().clone();
        String::from_utf8(bytes)
            .unwrap()
            .lines()
            .map(str::to_owned)
            .collect()
    }

    fn echo_ran() -> ShellCommand {
        let mut cmd = ShellCommand::new("echo");
        cmd.value("ran");
        cmd
    }

    #[test]
    fn debug_mode_echoes_command_before_running() {
        let lines = capture_logs(|| {
            ShellRunner::new().debug(true).run(&echo_ran()).unwrap();
        });

        let echoed = lines
            .iter()
            .position(|l| l.contains("INFO") && l.ends_with("echo 'ran'"))
            .expect("command echoed at info");
        let output = lines
            .iter()
            .position(|l| l.contains("INFO") && l.ends_with(": ran"))
            .expect("output logged at info");
        assert!(echoed < output, "{:?}", lines);
    }

    #[test]
    fn command_logged_at_debug_outside_debug_mode() {
        let lines = capture_logs(|| {
            ShellRunner::new().run(&echo_ran()).unwrap();
        });

        assert!(
            !lines
                .iter()
                .any(|l| l.contains("INFO") && l.ends_with("echo 'ran'"))
        );
        assert!(
            lines
                .iter()
                .any(|l| l.contains("DEBUG") && l.ends_with("Running: echo 'ran'"))
        );
    }

    #[test]
    fn captures_combined_output() {
        let mut cmd = ShellCommand::new("echo");
        cmd.value("out").arg(";").arg("echo").value("err").arg(">&2");
        cmd.merge_stderr();
        let result = ShellRunner::new().run(&cmd).unwrap();
        assert!(result.success());
        assert!(result.output.contains("out"));
        assert!(result.output.contains("err"));
    }

    #[test]
    fn nonzero_exit_is_not_an_error() {
        let mut cmd = ShellCommand::new("exit");
        cmd.arg("3");
        let result = ShellRunner::new().debug(true).run(&cmd).unwrap();
        assert_eq!(result.status, Some(3));
        assert!(!result.success());
    }

    #[test]
    fn honours_working_dir() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut cmd = ShellCommand::new("pwd");
        cmd.current_dir(dir.path());
        let result = ShellRunner::new().run(&cmd).unwrap();
        let reported = std::path::PathBuf::from(result.output.trim());
        assert_eq!(
            reported.canonicalize().unwrap(),
            dir.path().canonicalize().unwrap()
        );
    }
}
