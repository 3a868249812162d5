use std::{io, path::PathBuf, process::Command};

use tracing::{debug, info};

use crate::{
    error::{best_effort, SideloadError},
    sink::OutputSink,
};

pub const CTL_STOP: &str = "ctl.stop";
pub const CTL_START: &str = "ctl.start";
pub const DEFAULT_DEBUGGABLE_PROP: &str = "ro.debuggable";

/// The system property store. `get` returns `None` for an unset property.
pub trait PropertyService {
    fn get(&self, key: &str) -> io::Result<Option<String>>;
    fn set(&self, key: &str, value: &str) -> io::Result<()>;
}

/// Property access through the toolbox `getprop`/`setprop` binaries.
#[derive(Clone, Debug)]
pub struct ToolboxProperties {
    pub getprop: PathBuf,
    pub setprop: PathBuf,
}

impl Default for ToolboxProperties {
    fn default() -> Self {
        Self {
            getprop: PathBuf::from("getprop"),
            setprop: PathBuf::from("setprop"),
        }
    }
}

impl PropertyService for ToolboxProperties {
    fn get(&self, key: &str) -> io::Result<Option<String>> {
        let output = Command::new(&self.getprop).arg(key).output()?;
        if !output.status.success() {
            return Err(io::Error::other(format!(
                "{} exited with {}",
                self.getprop.display(),
                output.status
            )));
        }
        Ok(parse_getprop_output(&output.stdout))
    }

    fn set(&self, key: &str, value: &str) -> io::Result<()> {
        let status = Command::new(&self.setprop).args([key, value]).status()?;
        if status.success() {
            Ok(())
        } else {
            Err(io::Error::other(format!(
                "{} exited with {status}",
                self.setprop.display()
            )))
        }
    }
}

/// `getprop` prints the value followed by a newline, or just a newline when
/// the property is unset. Only that newline is stripped.
pub fn parse_getprop_output(stdout: &[u8]) -> Option<String> {
    let text = String::from_utf8_lossy(stdout);
    let text: &str = &text;
    let value = text
        .strip_suffix('\n')
        .map(|rest| rest.strip_suffix('\r').unwrap_or(rest))
        .unwrap_or(text);
    if value.is_empty() {
        None
    } else {
        Some(value.to_string())
    }
}

fn set_property(props: &dyn PropertyService, sink: &mut dyn OutputSink, key: &str, value: &str) {
    let result = props.set(key, value).map_err(|source| SideloadError::PropertySet {
        key: key.to_string(),
        value: value.to_string(),
        source,
    });
    best_effort(sink, result);
}

pub fn stop_service(props: &dyn PropertyService, sink: &mut dyn OutputSink, service: &str) {
    info!(service, "stopping service");
    set_property(props, sink, CTL_STOP, service);
}

pub fn start_service(props: &dyn PropertyService, sink: &mut dyn OutputSink, service: &str) {
    info!(service, "starting service");
    set_property(props, sink, CTL_START, service);
}

/// True only when the property reads exactly `1`. Unset, unreadable or any
/// other value counts as false.
pub fn is_debuggable(props: &dyn PropertyService, sink: &mut dyn OutputSink, key: &str) -> bool {
    let result = props.get(key).map_err(|source| SideloadError::PropertyGet {
        key: key.to_string(),
        source,
    });
    let value = best_effort(sink, result).flatten();
    debug!(key, ?value, "read debuggable property");
    value.as_deref() == Some("1")
}
