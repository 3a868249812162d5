use std::{
    fs, io,
    path::{Path, PathBuf},
};

use rsl_sideload::{
    ChildCommand, CommandInstaller, InstallContext, SideloadSettings, SysfsUsbControl,
    ToolboxProperties, DEFAULT_ADBD_SERVICE, DEFAULT_DEBUGGABLE_PROP, DEFAULT_INSTALL_LOG,
    DEFAULT_SIDELOAD_PATH, DEFAULT_USB_CONTROL_PATH,
};
use rsl_util::{env_value, state_file_path, write_json_atomic};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

const CONFIG_FILE: &str = "sideload-config.json";

#[derive(Debug, Error)]
pub(crate) enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("failed to write {path}: {source}")]
    Write {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("{0} already exists (use --force to overwrite)")]
    Exists(PathBuf),
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub(crate) struct SideloadConfig {
    pub(crate) usb_control: String,
    pub(crate) adbd_service: String,
    pub(crate) adbd_binary: String,
    pub(crate) adbd_argv0: String,
    pub(crate) adbd_mode: String,
    pub(crate) debuggable_property: String,
    pub(crate) package_path: String,
    pub(crate) installer: String,
    pub(crate) installer_args: Vec<String>,
    /// Empty disables the last-install record.
    pub(crate) install_log: String,
    pub(crate) getprop: String,
    pub(crate) setprop: String,
}

impl Default for SideloadConfig {
    fn default() -> Self {
        let adbd = ChildCommand::recovery_adbd();
        Self {
            usb_control: DEFAULT_USB_CONTROL_PATH.into(),
            adbd_service: DEFAULT_ADBD_SERVICE.into(),
            adbd_binary: adbd.program.display().to_string(),
            adbd_argv0: adbd.argv0,
            adbd_mode: adbd.mode,
            debuggable_property: DEFAULT_DEBUGGABLE_PROP.into(),
            package_path: DEFAULT_SIDELOAD_PATH.into(),
            installer: "/sbin/update_binary".into(),
            installer_args: Vec::new(),
            install_log: DEFAULT_INSTALL_LOG.into(),
            getprop: "getprop".into(),
            setprop: "setprop".into(),
        }
    }
}

/// Environment overrides, in `fields_mut` order.
const ENV_KEYS: [&str; 11] = [
    "RSL_USB_CONTROL",
    "RSL_ADBD_SERVICE",
    "RSL_ADBD_BINARY",
    "RSL_ADBD_ARGV0",
    "RSL_ADBD_MODE",
    "RSL_DEBUGGABLE_PROP",
    "RSL_PACKAGE_PATH",
    "RSL_INSTALLER",
    "RSL_INSTALL_LOG",
    "RSL_GETPROP",
    "RSL_SETPROP",
];

impl SideloadConfig {
    fn fields_mut(&mut self) -> [&mut String; 11] {
        [
            &mut self.usb_control,
            &mut self.adbd_service,
            &mut self.adbd_binary,
            &mut self.adbd_argv0,
            &mut self.adbd_mode,
            &mut self.debuggable_property,
            &mut self.package_path,
            &mut self.installer,
            &mut self.install_log,
            &mut self.getprop,
            &mut self.setprop,
        ]
    }

    /// Built-in defaults with environment overrides applied.
    pub(crate) fn from_env() -> Self {
        let mut cfg = SideloadConfig::default();
        for (key, field) in ENV_KEYS.iter().zip(cfg.fields_mut()) {
            let value = env_value(key, field);
            *field = value;
        }
        cfg
    }

    /// Environment wins over the file, the file wins over the built-in
    /// defaults. A missing file is not an error; a broken one is logged and
    /// ignored.
    pub(crate) fn load() -> Self {
        let mut cfg = SideloadConfig::from_env();
        match SideloadConfig::load_from(&config_path()) {
            Ok(Some(file_cfg)) => cfg.apply_file(file_cfg, |key| std::env::var(key).is_ok()),
            Ok(None) => {}
            Err(err) => warn!("{err}"),
        }
        cfg
    }

    pub(crate) fn load_from(path: &Path) -> Result<Option<Self>, ConfigError> {
        let data = match fs::read_to_string(path) {
            Ok(data) => data,
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => {
                return Err(ConfigError::Read {
                    path: path.to_path_buf(),
                    source,
                })
            }
        };
        serde_json::from_str(&data)
            .map(Some)
            .map_err(|source| ConfigError::Parse {
                path: path.to_path_buf(),
                source,
            })
    }

    /// Takes each non-empty string from `file` unless its environment
    /// variable is set. `install_log` may be emptied by the file.
    pub(crate) fn apply_file(
        &mut self,
        mut file: SideloadConfig,
        env_is_set: impl Fn(&str) -> bool,
    ) {
        let install_log_env = env_is_set("RSL_INSTALL_LOG");
        let file_install_log = file.install_log.clone();
        for ((key, field), value) in ENV_KEYS
            .iter()
            .zip(self.fields_mut())
            .zip(file.fields_mut())
        {
            if !env_is_set(key) && !value.is_empty() {
                *field = std::mem::take(value);
            }
        }
        if !install_log_env {
            self.install_log = file_install_log;
        }
        self.installer_args = file.installer_args;
    }

    pub(crate) fn save(&self, path: &Path, force: bool) -> Result<(), ConfigError> {
        if !force && path.exists() {
            return Err(ConfigError::Exists(path.to_path_buf()));
        }
        write_json_atomic(path, self).map_err(|source| ConfigError::Write {
            path: path.to_path_buf(),
            source,
        })
    }

    pub(crate) fn settings(&self) -> SideloadSettings {
        SideloadSettings {
            adbd_service: self.adbd_service.clone(),
            debuggable_property: self.debuggable_property.clone(),
            adbd: ChildCommand {
                program: PathBuf::from(&self.adbd_binary),
                argv0: self.adbd_argv0.clone(),
                mode: self.adbd_mode.clone(),
            },
            package_path: PathBuf::from(&self.package_path),
        }
    }

    pub(crate) fn usb_control(&self) -> SysfsUsbControl {
        SysfsUsbControl::new(&self.usb_control)
    }

    pub(crate) fn properties(&self) -> ToolboxProperties {
        ToolboxProperties {
            getprop: PathBuf::from(&self.getprop),
            setprop: PathBuf::from(&self.setprop),
        }
    }

    pub(crate) fn installer(&self) -> CommandInstaller {
        CommandInstaller::new(&self.installer).with_args(self.installer_args.iter().cloned())
    }

    pub(crate) fn install_context(&self) -> InstallContext {
        InstallContext {
            install_log: (!self.install_log.trim().is_empty())
                .then(|| PathBuf::from(&self.install_log)),
        }
    }
}

pub(crate) fn config_path() -> PathBuf {
    state_file_path(CONFIG_FILE)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_recovery_layout() {
        let cfg = SideloadConfig::default();
        assert_eq!(cfg.usb_control, "/sys/class/android_usb/android0/enable");
        assert_eq!(cfg.package_path, "/tmp/update.zip");

        let settings = cfg.settings();
        assert_eq!(settings, SideloadSettings::default());
        assert_eq!(
            cfg.install_context().install_log,
            Some(PathBuf::from("/cache/recovery/last_install"))
        );
    }

    #[test]
    fn file_values_apply_unless_env_is_set() {
        let mut cfg = SideloadConfig::default();
        let file = SideloadConfig {
            package_path: "/data/sideload.zip".into(),
            adbd_service: "adbd-file".into(),
            adbd_mode: String::new(),
            installer_args: vec!["--verify".into()],
            ..SideloadConfig::default()
        };

        cfg.apply_file(file, |key| key == "RSL_ADBD_SERVICE");

        assert_eq!(cfg.package_path, "/data/sideload.zip");
        assert_eq!(cfg.adbd_service, "adbd");
        assert_eq!(cfg.adbd_mode, "--adbd", "empty file values are ignored");
        assert_eq!(cfg.installer_args, vec!["--verify".to_string()]);
    }

    #[test]
    fn file_can_disable_install_log() {
        let mut cfg = SideloadConfig::default();
        let file = SideloadConfig {
            install_log: String::new(),
            ..SideloadConfig::default()
        };

        cfg.apply_file(file, |_| false);

        assert_eq!(cfg.install_context().install_log, None);
    }

    #[test]
    fn missing_file_loads_as_none() {
        let dir = tempfile::tempdir().unwrap();
        assert!(SideloadConfig::load_from(&dir.path().join("absent.json"))
            .unwrap()
            .is_none());
    }

    #[test]
    fn partial_file_fills_in_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, r#"{"usb_control": "/tmp/enable"}"#).unwrap();

        let cfg = SideloadConfig::load_from(&path).unwrap().unwrap();

        assert_eq!(cfg.usb_control, "/tmp/enable");
        assert_eq!(cfg.adbd_binary, "/sbin/recovery");
    }

    #[test]
    fn broken_file_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(CONFIG_FILE);
        fs::write(&path, "{not json").unwrap();

        let err = SideloadConfig::load_from(&path).unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
        assert!(err.to_string().starts_with("failed to parse "));
    }

    #[test]
    fn save_refuses_to_clobber_without_force() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state").join(CONFIG_FILE);
        let cfg = SideloadConfig::default();

        cfg.save(&path, false).unwrap();
        assert!(matches!(cfg.save(&path, false), Err(ConfigError::Exists(_))));
        cfg.save(&path, true).unwrap();

        assert_eq!(SideloadConfig::load_from(&path).unwrap(), Some(cfg));
    }
}
