use std::{fs, io, path::PathBuf};

use tracing::{info, warn};

use crate::{
    error::{best_effort, os_error_text, SideloadError},
    install::{InstallResult, Installer},
    props::{
        is_debuggable, start_service, stop_service, PropertyService, DEFAULT_DEBUGGABLE_PROP,
    },
    sink::OutputSink,
    spawn::{ChildCommand, ProcessSpawner},
    usb::{set_usb_driver, UsbControl},
};

pub const DEFAULT_ADBD_SERVICE: &str = "adbd";
pub const DEFAULT_SIDELOAD_PATH: &str = "/tmp/update.zip";

pub const SIDELOAD_PROMPT: &str = "\n\nNow send the package you want to apply\n\
                                   to the device with \"adb sideload <filename>\"...\n";

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SideloadSettings {
    /// init service name of the normal adb daemon.
    pub adbd_service: String,
    pub debuggable_property: String,
    /// The restricted daemon that receives exactly one package.
    pub adbd: ChildCommand,
    /// Where the restricted daemon leaves the package.
    pub package_path: PathBuf,
}

impl Default for SideloadSettings {
    fn default() -> Self {
        Self {
            adbd_service: DEFAULT_ADBD_SERVICE.into(),
            debuggable_property: DEFAULT_DEBUGGABLE_PROP.into(),
            adbd: ChildCommand::recovery_adbd(),
            package_path: PathBuf::from(DEFAULT_SIDELOAD_PATH),
        }
    }
}

/// One sideload attempt over adb. The caller guarantees no other attempt
/// touches the USB control node or the adbd service concurrently.
pub struct Sideload<'a, I: Installer> {
    settings: &'a SideloadSettings,
    usb: &'a dyn UsbControl,
    properties: &'a dyn PropertyService,
    spawner: &'a dyn ProcessSpawner,
    installer: &'a I,
}

impl<'a, I: Installer> Sideload<'a, I> {
    pub fn new(
        settings: &'a SideloadSettings,
        usb: &'a dyn UsbControl,
        properties: &'a dyn PropertyService,
        spawner: &'a dyn ProcessSpawner,
        installer: &'a I,
    ) -> Self {
        Self {
            settings,
            usb,
            properties,
            spawner,
            installer,
        }
    }

    /// Hands the USB port to the restricted adb daemon, waits for it to
    /// receive one package, restores the port and installs what arrived.
    ///
    /// Driver, property and child failures are printed on `sink` and the
    /// sequence carries on. Only a missing or unreadable package ends the
    /// attempt early, as `InstallResult::Error`, without calling the
    /// installer. `wipe_cache` is written by the installer alone.
    pub fn apply_from_adb(
        &self,
        sink: &mut dyn OutputSink,
        wipe_cache: &mut bool,
        context: &I::Context,
    ) -> InstallResult {
        self.stop_adbd(sink);
        set_usb_driver(self.usb, sink, true);

        sink.print(SIDELOAD_PROMPT);
        self.run_restricted_adbd(sink);

        set_usb_driver(self.usb, sink, false);
        self.maybe_restart_adbd(sink);

        self.install_received(sink, wipe_cache, context)
    }

    fn stop_adbd(&self, sink: &mut dyn OutputSink) {
        stop_service(self.properties, sink, &self.settings.adbd_service);
        set_usb_driver(self.usb, sink, false);
    }

    fn run_restricted_adbd(&self, sink: &mut dyn OutputSink) {
        let command = &self.settings.adbd;
        info!("waiting for {} {}", command.program.display(), command.mode);
        let result = self
            .spawner
            .run(command)
            .map_err(|source| SideloadError::Wait {
                program: command.program.display().to_string(),
                source,
            });
        if let Some(exit) = best_effort(sink, result) {
            info!("restricted adbd finished: {exit}");
            if !exit.success() {
                sink.print(&format!("{exit}\n"));
            }
        }
    }

    fn maybe_restart_adbd(&self, sink: &mut dyn OutputSink) {
        if is_debuggable(self.properties, sink, &self.settings.debuggable_property) {
            sink.print("Restarting adbd...\n");
            set_usb_driver(self.usb, sink, true);
            start_service(self.properties, sink, &self.settings.adbd_service);
        }
    }

    fn install_received(
        &self,
        sink: &mut dyn OutputSink,
        wipe_cache: &mut bool,
        context: &I::Context,
    ) -> InstallResult {
        let package = &self.settings.package_path;
        if let Err(err) = fs::metadata(package) {
            if err.kind() == io::ErrorKind::NotFound {
                sink.print("No package received.\n");
            } else {
                warn!("cannot stat {}: {err}", package.display());
                sink.print(&format!("Error reading package:\n  {}\n", os_error_text(&err)));
            }
            return InstallResult::Error;
        }
        self.installer.install(package, wipe_cache, context)
    }
}
