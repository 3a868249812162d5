use std::{
    cell::RefCell,
    fmt,
    io::{self, BufRead, BufReader},
    path::{Path, PathBuf},
    process::{Command, Stdio},
};

use rsl_util::{now_millis, write_json_atomic};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

use crate::sink::{ConsoleSink, OutputSink};

pub const DEFAULT_INSTALL_LOG: &str = "/cache/recovery/last_install";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InstallResult {
    Success,
    Error,
}

impl InstallResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstallResult::Success => "success",
            InstallResult::Error => "error",
        }
    }
}

/// Applies a received package. `Context` is carried through the sideload
/// untouched; only the installer interprets it.
pub trait Installer {
    type Context;

    fn install(
        &self,
        package: &Path,
        wipe_cache: &mut bool,
        context: &Self::Context,
    ) -> InstallResult;
}

#[derive(Clone, Debug, Default)]
pub struct InstallContext {
    pub install_log: Option<PathBuf>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct LastInstall {
    pub package: PathBuf,
    pub succeeded: bool,
    pub wipe_cache: bool,
    pub at_unix_millis: i64,
}

#[derive(Debug, PartialEq, Eq)]
enum UpdaterLine<'a> {
    UiPrint(&'a str),
    WipeCache,
    Other(&'a str),
}

fn parse_updater_line(line: &str) -> UpdaterLine<'_> {
    let line = line.trim_end();
    match line.split_once(' ') {
        Some(("ui_print", text)) => UpdaterLine::UiPrint(text),
        None if line == "ui_print" => UpdaterLine::UiPrint(""),
        None if line == "wipe_cache" => UpdaterLine::WipeCache,
        _ => UpdaterLine::Other(line),
    }
}

/// Runs an external updater as `program args... <package>`. Its stdout is a
/// line protocol: `ui_print <text>` goes to the console sink and
/// `wipe_cache` raises the wipe-cache flag. Output need not be UTF-8.
pub struct CommandInstaller {
    pub program: PathBuf,
    pub args: Vec<String>,
    console: RefCell<Box<dyn OutputSink>>,
}

impl fmt::Debug for CommandInstaller {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CommandInstaller")
            .field("program", &self.program)
            .field("args", &self.args)
            .finish_non_exhaustive()
    }
}

impl CommandInstaller {
    pub fn new(program: impl Into<PathBuf>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            console: RefCell::new(Box::new(ConsoleSink)),
        }
    }

    pub fn with_args(mut self, args: impl IntoIterator<Item = impl Into<String>>) -> Self {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Where `ui_print` text goes; defaults to [`ConsoleSink`].
    pub fn with_console(mut self, console: impl OutputSink + 'static) -> Self {
        self.console = RefCell::new(Box::new(console));
        self
    }

    fn handle_line(&self, raw: &[u8], wipe_cache: &mut bool) {
        let line = String::from_utf8_lossy(raw);
        match parse_updater_line(&line) {
            UpdaterLine::UiPrint(text) => self.console.borrow_mut().print(&format!("{text}\n")),
            UpdaterLine::WipeCache => *wipe_cache = true,
            UpdaterLine::Other(text) => debug!(target: "installer", "{text}"),
        }
    }

    /// Consumes the updater's stdout to EOF so it never sees a closed pipe.
    fn read_updater_output(&self, stdout: impl io::Read, wipe_cache: &mut bool) {
        let mut reader = BufReader::new(stdout);
        let mut line = Vec::new();
        loop {
            line.clear();
            match reader.read_until(b'\n', &mut line) {
                Ok(0) => return,
                Ok(_) => self.handle_line(&line, wipe_cache),
                Err(err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => {
                    warn!("installer output unreadable: {err}");
                    if let Err(err) = io::copy(&mut reader, &mut io::sink()) {
                        warn!("failed to drain installer output: {err}");
                    }
                    return;
                }
            }
        }
    }

    fn run(&self, package: &Path, wipe_cache: &mut bool) -> InstallResult {
        let mut child = match Command::new(&self.program)
            .args(&self.args)
            .arg(package)
            .stdout(Stdio::piped())
            .spawn()
        {
            Ok(child) => child,
            Err(err) => {
                error!("failed to start installer {}: {err}", self.program.display());
                return InstallResult::Error;
            }
        };

        if let Some(stdout) = child.stdout.take() {
            self.read_updater_output(stdout, wipe_cache);
        }

        match child.wait() {
            Ok(status) if status.success() => InstallResult::Success,
            Ok(status) => {
                warn!("installer {} exited with {status}", self.program.display());
                InstallResult::Error
            }
            Err(err) => {
                error!("failed to wait for installer: {err}");
                InstallResult::Error
            }
        }
    }
}

impl Installer for CommandInstaller {
    type Context = InstallContext;

    fn install(
        &self,
        package: &Path,
        wipe_cache: &mut bool,
        context: &InstallContext,
    ) -> InstallResult {
        info!("installing {}", package.display());
        let result = self.run(package, wipe_cache);
        info!(result = result.as_str(), wipe_cache = *wipe_cache, "install finished");

        if let Some(log) = context.install_log.as_deref() {
            let record = LastInstall {
                package: package.to_path_buf(),
                succeeded: result == InstallResult::Success,
                wipe_cache: *wipe_cache,
                at_unix_millis: now_millis(),
            };
            if let Err(err) = write_json_atomic(log, &record) {
                warn!("failed to write {}: {err}", log.display());
            }
        }
        result
    }
}
