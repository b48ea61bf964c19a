use serde::Serialize;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::{Command, ExitStatus, Stdio};
use tracing::debug;

/// Raw child exit status. The value is propagated, not interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitOutcome {
    Code(i32),
    Signal(i32),
}

impl ExitOutcome {
    pub fn success(&self) -> bool {
        matches!(self, ExitOutcome::Code(0))
    }

    pub(crate) fn from_status(status: ExitStatus) -> Self {
        if let Some(code) = status.code() {
            return ExitOutcome::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(signal) = status.signal() {
                return ExitOutcome::Signal(signal);
            }
        }
        ExitOutcome::Code(-1)
    }
}

impl fmt::Display for ExitOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExitOutcome::Code(code) => write!(f, "{}", code),
            ExitOutcome::Signal(signal) => write!(f, "signal {}", signal),
        }
    }
}

/// Launches the executable with stdout/stderr captured to files in its cwd.
#[derive(Debug, Clone)]
pub struct ProcessRunner {
    stdout_name: String,
    stderr_name: String,
}

impl ProcessRunner {
    pub fn new(stdout_name: impl Into<String>, stderr_name: impl Into<String>) -> Self {
        Self {
            stdout_name: stdout_name.into(),
            stderr_name: stderr_name.into(),
        }
    }

    pub fn stdout_path(&self, cwd: &Path) -> PathBuf {
        cwd.join(&self.stdout_name)
    }

    pub fn stderr_path(&self, cwd: &Path) -> PathBuf {
        cwd.join(&self.stderr_name)
    }

    /// Runs to completion. Capture files left empty are removed afterwards,
    /// including when the launch itself fails.
    pub fn run_sync(&self, executable: &Path, args: &[String], cwd: &Path) -> io::Result<ExitOutcome> {
        let mut cmd = self.command(executable, args, cwd)?;
        let status = cmd.status();
        drop(cmd);
        self.prune_empty(cwd);
        let outcome = ExitOutcome::from_status(status?);
        debug!(cwd = %cwd.display(), status = %outcome, "child exited");
        Ok(outcome)
    }

    /// Spawns in a new process group and returns the child pid without waiting.
    pub fn run_detached(&self, executable: &Path, args: &[String], cwd: &Path) -> io::Result<u32> {
        let mut cmd = self.command(executable, args, cwd)?;
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            cmd.process_group(0);
        }
        let child = cmd.spawn();
        drop(cmd);
        let child = match child {
            Ok(child) => child,
            Err(err) => {
                self.prune_empty(cwd);
                return Err(err);
            }
        };
        debug!(cwd = %cwd.display(), pid = child.id(), "child detached");
        Ok(child.id())
    }

    fn command(&self, executable: &Path, args: &[String], cwd: &Path) -> io::Result<Command> {
        let stdout = fs::File::create(self.stdout_path(cwd))?;
        let stderr = fs::File::create(self.stderr_path(cwd))?;
        let mut cmd = Command::new(executable);
        cmd.args(args)
            .current_dir(cwd)
            .stdin(Stdio::null())
            .stdout(stdout)
            .stderr(stderr);
        Ok(cmd)
    }

    fn prune_empty(&self, cwd: &Path) {
        for path in [self.stdout_path(cwd), self.stderr_path(cwd)] {
            if fs::metadata(&path).is_ok_and(|m| m.is_file() && m.len() == 0) {
                let _ = fs::remove_file(&path);
            }
        }
    }
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use std::os::unix::fs::PermissionsExt;
    use std::time::{Duration, Instant};
    use tempfile::tempdir;

    fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
        let path = dir.join(name);
        fs::write(&path, format!("#!/bin/sh\n{}\n", body)).expect("write script");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).expect("chmod");
        path
    }

    fn runner() -> ProcessRunner {
        ProcessRunner::new("out.txt", "err.txt")
    }

    #[test]
    fn exit_code_is_propagated() {
        let tmp = tempdir().expect("tempdir");
        let exe = script(tmp.path(), "seven", "exit 7");
        let cwd = tmp.path().join("wd");
        fs::create_dir(&cwd).expect("cwd");
        let status = runner().run_sync(&exe, &[], &cwd).expect("run");
        assert_eq!(status, ExitOutcome::Code(7));
        assert!(!status.success());
    }

    #[test]
    fn quiet_executable_leaves_no_capture_files() {
        let tmp = tempdir().expect("tempdir");
        let exe = script(tmp.path(), "quiet", "exit 0");
        let cwd = tmp.path().join("wd");
        fs::create_dir(&cwd).expect("cwd");
        runner().run_sync(&exe, &["-".to_string()], &cwd).expect("run");
        assert!(!cwd.join("out.txt").exists());
        assert!(!cwd.join("err.txt").exists());
    }

    #[test]
    fn only_written_stream_is_kept() {
        let tmp = tempdir().expect("tempdir");
        let exe = script(tmp.path(), "chatty", "echo frame 1\necho frame 2");
        let cwd = tmp.path().join("wd");
        fs::create_dir(&cwd).expect("cwd");
        runner().run_sync(&exe, &[], &cwd).expect("run");
        assert_eq!(
            fs::read_to_string(cwd.join("out.txt")).expect("out"),
            "frame 1\nframe 2\n"
        );
        assert!(!cwd.join("err.txt").exists());

        let noisy = script(tmp.path(), "noisy", "echo oops >&2");
        let cwd2 = tmp.path().join("wd2");
        fs::create_dir(&cwd2).expect("cwd2");
        runner().run_sync(&noisy, &[], &cwd2).expect("run");
        assert!(!cwd2.join("out.txt").exists());
        assert_eq!(fs::read_to_string(cwd2.join("err.txt")).expect("err"), "oops\n");
    }

    #[test]
    fn child_runs_in_given_directory_with_args() {
        let tmp = tempdir().expect("tempdir");
        let exe = script(tmp.path(), "where", "pwd\necho \"$@\"");
        let cwd = tmp.path().join("wd");
        fs::create_dir(&cwd).expect("cwd");
        runner()
            .run_sync(&exe, &["-".to_string(), "x".to_string()], &cwd)
            .expect("run");
        let out = fs::read_to_string(cwd.join("out.txt")).expect("out");
        let mut lines = out.lines();
        let printed = PathBuf::from(lines.next().expect("pwd line"));
        assert_eq!(
            printed.canonicalize().expect("canon"),
            cwd.canonicalize().expect("canon")
        );
        assert_eq!(lines.next(), Some("- x"));
    }

    #[test]
    fn launch_failure_is_an_error_and_cleans_up() {
        let tmp = tempdir().expect("tempdir");
        let cwd = tmp.path().join("wd");
        fs::create_dir(&cwd).expect("cwd");
        let err = runner()
            .run_sync(&tmp.path().join("missing-exe"), &[], &cwd)
            .expect_err("launch must fail");
        assert_eq!(err.kind(), io::ErrorKind::NotFound);
        assert!(fs::read_dir(&cwd).expect("read").next().is_none());
    }

    #[test]
    fn detached_child_outlives_the_call() {
        let tmp = tempdir().expect("tempdir");
        let exe = script(tmp.path(), "slow", "sleep 0.2\necho done");
        let cwd = tmp.path().join("wd");
        fs::create_dir(&cwd).expect("cwd");
        let pid = runner().run_detached(&exe, &[], &cwd).expect("spawn");
        assert!(pid > 0);
        let deadline = Instant::now() + Duration::from_secs(10);
        loop {
            let out = fs::read_to_string(cwd.join("out.txt")).unwrap_or_default();
            if out == "done\n" {
                break;
            }
            assert!(Instant::now() < deadline, "detached child never finished");
            std::thread::sleep(Duration::from_millis(50));
        }
    }
}
