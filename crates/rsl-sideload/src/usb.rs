use std::{
    fs::{File, OpenOptions},
    io::{self, Write},
    os::fd::IntoRawFd,
    path::PathBuf,
};

use tracing::debug;

use crate::{
    error::{best_effort, SideloadError},
    sink::OutputSink,
};

pub const DEFAULT_USB_CONTROL_PATH: &str = "/sys/class/android_usb/android0/enable";

/// The USB gadget enable switch. Open, write and close fail independently.
pub trait UsbControl {
    fn open(&self) -> io::Result<Box<dyn ControlHandle>>;
}

pub trait ControlHandle {
    fn write(&mut self, data: &[u8]) -> io::Result<()>;
    fn close(self: Box<Self>) -> io::Result<()>;
}

#[derive(Clone, Debug)]
pub struct SysfsUsbControl {
    pub path: PathBuf,
}

impl SysfsUsbControl {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }
}

impl Default for SysfsUsbControl {
    fn default() -> Self {
        Self::new(DEFAULT_USB_CONTROL_PATH)
    }
}

impl UsbControl for SysfsUsbControl {
    fn open(&self) -> io::Result<Box<dyn ControlHandle>> {
        let file = OpenOptions::new().write(true).open(&self.path)?;
        Ok(Box::new(SysfsHandle { file }))
    }
}

struct SysfsHandle {
    file: File,
}

impl ControlHandle for SysfsHandle {
    fn write(&mut self, data: &[u8]) -> io::Result<()> {
        self.file.write_all(data)
    }

    fn close(self: Box<Self>) -> io::Result<()> {
        // Dropping a File discards the close(2) result; sysfs stores can
        // report errors there.
        let fd = self.file.into_raw_fd();
        if unsafe { libc::close(fd) } < 0 {
            Err(io::Error::last_os_error())
        } else {
            Ok(())
        }
    }
}

/// Writes `1` or `0` to the control node. Every failure is reported on the
/// sink; a failed write still attempts the close.
pub fn set_usb_driver(control: &dyn UsbControl, sink: &mut dyn OutputSink, enabled: bool) {
    debug!(enabled, "setting usb driver");
    let Some(mut handle) = best_effort(sink, control.open().map_err(SideloadError::DriverOpen))
    else {
        return;
    };
    let value: &[u8] = if enabled { b"1" } else { b"0" };
    best_effort(sink, handle.write(value).map_err(SideloadError::DriverWrite));
    best_effort(sink, handle.close().map_err(SideloadError::DriverClose));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[derive(Default)]
    struct Lines(Vec<String>);

    impl OutputSink for Lines {
        fn print(&mut self, text: &str) {
            self.0.push(text.to_string());
        }
    }

    #[test]
    fn writes_single_byte_to_node() {
        let dir = tempfile::tempdir().unwrap();
        let node = dir.path().join("enable");
        fs::write(&node, "").unwrap();
        let control = SysfsUsbControl::new(&node);
        let mut sink = Lines::default();

        set_usb_driver(&control, &mut sink, true);
        assert_eq!(fs::read(&node).unwrap(), b"1");

        set_usb_driver(&control, &mut sink, false);
        assert_eq!(fs::read(&node).unwrap(), b"0");
        assert!(sink.0.is_empty());
    }

    #[test]
    fn missing_node_reports_open_failure() {
        let dir = tempfile::tempdir().unwrap();
        let control = SysfsUsbControl::new(dir.path().join("absent").join("enable"));
        let mut sink = Lines::default();

        set_usb_driver(&control, &mut sink, true);

        assert_eq!(sink.0.len(), 1);
        assert!(sink.0[0].starts_with("failed to open driver control:"));
    }

    #[test]
    fn default_points_at_android_gadget() {
        assert_eq!(
            SysfsUsbControl::default().path,
            PathBuf::from("/sys/class/android_usb/android0/enable")
        );
    }
}
