mod config;

use std::{process::ExitCode, time::Duration};

use clap::{Args, Parser, Subcommand};
use config::{config_path, SideloadConfig};
use rsl_sideload::{ConsoleSink, InstallResult, Sideload, SystemSpawner};
use rsl_telemetry as telemetry;
use tracing::info;

#[derive(Parser)]
#[command(name = "rsl", version, about = "Recovery adb sideload")]
struct Cli {
    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand)]
enum Cmd {
    /// Wait for one package over `adb sideload` and install it
    Sideload(SideloadArgs),
    /// Inspect or create the configuration file
    Config {
        #[command(subcommand)]
        cmd: ConfigCmd,
    },
}

#[derive(Args, Default)]
struct SideloadArgs {
    /// USB gadget enable node
    #[arg(long)]
    usb_control: Option<String>,
    /// Binary providing the restricted adb daemon
    #[arg(long)]
    adbd_binary: Option<String>,
    /// Flag that puts the binary in sideload-only mode
    #[arg(long, allow_hyphen_values = true)]
    adbd_mode: Option<String>,
    /// Where the received package lands
    #[arg(long)]
    package_path: Option<String>,
    /// Updater run as `<installer> <package>`
    #[arg(long)]
    installer: Option<String>,
    /// Where to record the last install
    #[arg(long, conflicts_with = "no_install_log")]
    install_log: Option<String>,
    /// Do not record the last install
    #[arg(long)]
    no_install_log: bool,
}

#[derive(Subcommand)]
enum ConfigCmd {
    /// Print the effective configuration
    Show,
    /// Write the built-in defaults to the configuration file
    Init {
        #[arg(long)]
        force: bool,
    },
}

impl SideloadArgs {
    fn apply(self, cfg: &mut SideloadConfig) {
        let overrides = [
            (self.usb_control, &mut cfg.usb_control),
            (self.adbd_binary, &mut cfg.adbd_binary),
            (self.adbd_mode, &mut cfg.adbd_mode),
            (self.package_path, &mut cfg.package_path),
            (self.installer, &mut cfg.installer),
            (self.install_log, &mut cfg.install_log),
        ];
        for (value, field) in overrides {
            if let Some(value) = value {
                *field = value;
            }
        }
        if self.no_install_log {
            cfg.install_log.clear();
        }
    }
}

fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    rsl_util::init_tracing()?;

    match cli.cmd {
        Cmd::Sideload(args) => {
            rsl_util::init_cli_telemetry("rsl", env!("CARGO_PKG_VERSION"), "sideload");
            let mut cfg = SideloadConfig::load();
            args.apply(&mut cfg);
            let code = run_sideload(&cfg);
            telemetry::flush(Duration::from_secs(2));
            Ok(code)
        }
        Cmd::Config { cmd } => {
            match cmd {
                ConfigCmd::Show => {
                    let cfg = SideloadConfig::load();
                    println!("# {}", config_path().display());
                    println!("{}", serde_json::to_string_pretty(&cfg)?);
                }
                ConfigCmd::Init { force } => {
                    let path = config_path();
                    SideloadConfig::default().save(&path, force)?;
                    println!("wrote {}", path.display());
                }
            }
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn run_sideload(cfg: &SideloadConfig) -> ExitCode {
    let settings = cfg.settings();
    let usb = cfg.usb_control();
    let properties = cfg.properties();
    let installer = cfg.installer();
    let context = cfg.install_context();
    let package = settings.package_path.display().to_string();

    telemetry::event("sideload.start", &[("package", package.as_str())]);
    info!(package = %package, "starting adb sideload");

    let mut sink = ConsoleSink;
    let mut wipe_cache = false;
    let result = Sideload::new(&settings, &usb, &properties, &SystemSpawner, &installer)
        .apply_from_adb(&mut sink, &mut wipe_cache, &context);

    let wipe_cache_str = if wipe_cache { "true" } else { "false" };
    telemetry::event(
        "sideload.finish",
        &[("result", result.as_str()), ("wipe_cache", wipe_cache_str)],
    );
    info!(result = result.as_str(), wipe_cache, "adb sideload finished");

    match result {
        InstallResult::Success => {
            if wipe_cache {
                println!("Package requested a cache wipe.");
            }
            println!("Install from ADB complete.");
            ExitCode::SUCCESS
        }
        InstallResult::Error => {
            println!("Installation aborted.");
            ExitCode::FAILURE
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn flags_override_config() {
        let cli = Cli::try_parse_from([
            "rsl",
            "sideload",
            "--usb-control",
            "/tmp/enable",
            "--package-path",
            "/data/update.zip",
            "--no-install-log",
        ])
        .unwrap();
        let Cmd::Sideload(args) = cli.cmd else {
            panic!("expected sideload");
        };
        let mut cfg = SideloadConfig::default();

        args.apply(&mut cfg);

        assert_eq!(cfg.usb_control, "/tmp/enable");
        assert_eq!(cfg.package_path, "/data/update.zip");
        assert_eq!(cfg.adbd_mode, "--adbd");
        assert_eq!(cfg.install_context().install_log, None);
    }

    #[test]
    fn install_log_flags_conflict() {
        assert!(Cli::try_parse_from([
            "rsl",
            "sideload",
            "--install-log",
            "/tmp/last_install",
            "--no-install-log",
        ])
        .is_err());
    }

    #[test]
    fn no_flags_leave_config_alone() {
        let mut cfg = SideloadConfig::default();
        SideloadArgs::default().apply(&mut cfg);
        assert_eq!(cfg, SideloadConfig::default());
    }
}
