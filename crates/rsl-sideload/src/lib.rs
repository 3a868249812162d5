//! Recovery-mode `adb sideload`: lend the USB port to a restricted adb
//! daemon for one package, then put everything back and install it.

mod coordinator;
mod error;
mod install;
mod props;
mod sink;
mod spawn;
mod usb;

pub use coordinator::{
    Sideload, SideloadSettings, DEFAULT_ADBD_SERVICE, DEFAULT_SIDELOAD_PATH, SIDELOAD_PROMPT,
};
pub use error::{best_effort, SideloadError};
pub use install::{
    CommandInstaller, InstallContext, InstallResult, Installer, LastInstall, DEFAULT_INSTALL_LOG,
};
pub use props::{
    is_debuggable, parse_getprop_output, start_service, stop_service, PropertyService,
    ToolboxProperties, CTL_START, CTL_STOP, DEFAULT_DEBUGGABLE_PROP,
};
pub use sink::{ConsoleSink, OutputSink};
pub use spawn::{ChildCommand, ChildExit, ProcessSpawner, SystemSpawner, EXEC_FAILURE_STATUS};
pub use usb::{
    set_usb_driver, ControlHandle, SysfsUsbControl, UsbControl, DEFAULT_USB_CONTROL_PATH,
};
