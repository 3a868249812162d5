use std::{
    fs, io,
    path::{Path, PathBuf},
};

use rsl_telemetry as telemetry;
use serde::Serialize;
use tracing::debug;

pub const DEFAULT_DATA_DIR: &str = "/tmp/rsl";

pub fn env_value(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Recovery images rarely have a usable `$HOME`, so everything lives under
/// `RSL_DATA_DIR` (or `/tmp/rsl`).
pub fn data_dir() -> PathBuf {
    match std::env::var("RSL_DATA_DIR") {
        Ok(dir) if !dir.trim().is_empty() => PathBuf::from(dir),
        _ => PathBuf::from(DEFAULT_DATA_DIR),
    }
}

pub fn state_dir() -> PathBuf {
    data_dir().join("state")
}

pub fn state_file_path(file_name: &str) -> PathBuf {
    state_dir().join(file_name)
}

pub fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> io::Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    let data = serde_json::to_vec_pretty(value).map_err(io::Error::other)?;
    fs::write(&tmp, data)?;
    fs::rename(&tmp, path)?;
    debug!("wrote {}", path.display());
    Ok(())
}

pub fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}

/// Logs go to stderr; stdout belongs to the operator-facing console text.
pub fn init_tracing() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_writer(io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive("info".parse()?),
        )
        .init();
    Ok(())
}

pub fn init_cli_telemetry(app_name: &'static str, app_version: &'static str, command: &str) {
    telemetry::init_with_env(app_name, app_version, data_dir());
    telemetry::event("cli.start", &[("command", command)]);
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Serialize, Deserialize, PartialEq, Debug)]
    struct Record {
        package: String,
        succeeded: bool,
    }

    #[test]
    fn write_json_atomic_creates_parent_and_leaves_no_tmp() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("last_install");
        let record = Record {
            package: "/tmp/update.zip".into(),
            succeeded: true,
        };

        write_json_atomic(&path, &record).unwrap();

        let data = fs::read_to_string(&path).unwrap();
        let back: Record = serde_json::from_str(&data).unwrap();
        assert_eq!(back, record);
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn write_json_atomic_replaces_existing_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, "stale").unwrap();

        write_json_atomic(&path, &vec![1, 2, 3]).unwrap();

        assert_eq!(
            serde_json::from_str::<Vec<i32>>(&fs::read_to_string(&path).unwrap()).unwrap(),
            vec![1, 2, 3]
        );
    }

    #[test]
    fn env_value_falls_back_to_default() {
        assert_eq!(
            env_value("RSL_UTIL_TEST_SURELY_UNSET", "fallback"),
            "fallback"
        );
    }

    #[test]
    fn state_file_lives_under_state_dir() {
        let path = state_file_path("sideload-config.json");
        assert!(path.starts_with(state_dir()));
        assert!(path.ends_with("state/sideload-config.json"));
    }
}
