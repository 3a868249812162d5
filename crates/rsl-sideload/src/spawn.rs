use std::{
    fmt, io,
    os::unix::process::{CommandExt, ExitStatusExt},
    path::PathBuf,
    process::{Command, ExitStatus},
};

use tracing::{error, info};

/// Exit status reported when the child image could not be started, the same
/// value `_exit(-1)` leaves behind.
pub const EXEC_FAILURE_STATUS: i32 = 255;

/// A child invocation: the binary plus its `argv[0]` and mode flag.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChildCommand {
    pub program: PathBuf,
    pub argv0: String,
    pub mode: String,
}

impl ChildCommand {
    /// The restricted adb daemon shipped inside the recovery binary.
    pub fn recovery_adbd() -> Self {
        Self {
            program: PathBuf::from("/sbin/recovery"),
            argv0: "recovery".into(),
            mode: "--adbd".into(),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ChildExit {
    Code(i32),
    Signal(i32),
}

impl ChildExit {
    pub fn success(&self) -> bool {
        matches!(self, ChildExit::Code(0))
    }
}

impl From<ExitStatus> for ChildExit {
    fn from(status: ExitStatus) -> Self {
        match (status.code(), status.signal()) {
            (Some(code), _) => ChildExit::Code(code),
            (None, Some(signal)) => ChildExit::Signal(signal),
            (None, None) => ChildExit::Code(EXEC_FAILURE_STATUS),
        }
    }
}

impl fmt::Display for ChildExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChildExit::Code(code) => write!(f, "status {code}"),
            ChildExit::Signal(signal) => write!(f, "terminated by signal {signal}"),
        }
    }
}

/// Runs one child to completion. The only error is a failed wait; a child
/// that cannot be started still yields an exit status.
pub trait ProcessSpawner {
    fn run(&self, command: &ChildCommand) -> io::Result<ChildExit>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemSpawner;

impl ProcessSpawner for SystemSpawner {
    fn run(&self, command: &ChildCommand) -> io::Result<ChildExit> {
        let mut child = match Command::new(&command.program)
            .arg0(&command.argv0)
            .arg(&command.mode)
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                error!("failed to exec {}: {err}", command.program.display());
                return Ok(ChildExit::Code(EXEC_FAILURE_STATUS));
            }
        };
        info!(pid = child.id(), "spawned {}", command.program.display());
        let status = child.wait()?;
        Ok(ChildExit::from(status))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(dir: &tempfile::TempDir, script: &str) -> ChildCommand {
        // The mode slot carries the script path, so `sh` reads it as a file.
        let path = dir.path().join("child.sh");
        std::fs::write(&path, format!("{script}\n")).unwrap();
        ChildCommand {
            program: PathBuf::from("/bin/sh"),
            argv0: "sh".into(),
            mode: path.display().to_string(),
        }
    }

    #[test]
    fn exit_code_is_captured() {
        let dir = tempfile::tempdir().unwrap();
        let exit = SystemSpawner.run(&sh(&dir, "exit 3")).unwrap();
        assert_eq!(exit, ChildExit::Code(3));
        assert!(!exit.success());
        assert_eq!(exit.to_string(), "status 3");
    }

    #[test]
    fn clean_exit_is_success() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SystemSpawner.run(&sh(&dir, "true")).unwrap().success());
    }

    #[test]
    fn signal_is_distinguished_from_exit() {
        let dir = tempfile::tempdir().unwrap();
        let exit = SystemSpawner.run(&sh(&dir, "kill -9 $$")).unwrap();
        assert_eq!(exit, ChildExit::Signal(9));
        assert_eq!(exit.to_string(), "terminated by signal 9");
    }

    #[test]
    fn missing_binary_maps_to_exec_failure_status() {
        let command = ChildCommand {
            program: PathBuf::from("/nonexistent/recovery"),
            argv0: "recovery".into(),
            mode: "--adbd".into(),
        };
        assert_eq!(
            SystemSpawner.run(&command).unwrap(),
            ChildExit::Code(EXEC_FAILURE_STATUS)
        );
    }

    #[test]
    fn recovery_adbd_defaults() {
        let command = ChildCommand::recovery_adbd();
        assert_eq!(command.program, PathBuf::from("/sbin/recovery"));
        assert_eq!(command.argv0, "recovery");
        assert_eq!(command.mode, "--adbd");
    }
}
