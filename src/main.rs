use bt_keysync::config::BTHPORT_KEYS_PATH;
use bt_keysync::store::DEFAULT_STORAGE_DIR;
use bt_keysync::{
    DumpSource, FsPairingStore, Reged, RegistryDump, Session, SyncConfig, SyncError, UpdatePlan,
};
use clap::Parser;
use env_logger::Env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;
use std::process::ExitCode;

#[derive(Parser)]
#[command(
    name = "bt-keysync",
    version,
    about = "Update Linux Bluetooth keys from Windows-paired devices"
)]
struct Cli {
    /// Path to the root of the mounted Windows partition
    #[arg(short = 'w', long, value_name = "DIR", conflicts_with = "registery_file")]
    windows_dir: Option<PathBuf>,

    /// Path to a registry file exported with regedit
    #[arg(short = 'r', long, value_name = "FILE", visible_alias = "registry-file")]
    registery_file: Option<PathBuf>,

    /// BlueZ storage directory
    #[arg(long, value_name = "DIR", default_value = DEFAULT_STORAGE_DIR)]
    bluetooth_dir: PathBuf,

    /// Key to export, relative to the SYSTEM hive
    #[arg(long, value_name = "KEY", default_value = BTHPORT_KEYS_PATH)]
    key_path: String,

    /// Registry export program
    #[arg(long, value_name = "PROGRAM", default_value = "reged")]
    reged: PathBuf,
}

fn init_logging() {
    let mut builder = env_logger::Builder::from_env(Env::default().default_filter_or("warn"));
    builder.format_timestamp_millis();
    let _ = builder.try_init();
}

#[cfg(unix)]
fn is_root() -> bool {
    // SAFETY: geteuid has no preconditions and cannot fail.
    unsafe { libc::geteuid() == 0 }
}

#[cfg(not(unix))]
fn is_root() -> bool {
    false
}

fn prompt(question: &str, _plan: &UpdatePlan) -> bool {
    print!("    > {question} (y/N): ");
    if io::stdout().flush().is_err() {
        return false;
    }
    let mut answer = String::new();
    match io::stdin().lock().read_line(&mut answer) {
        Ok(_) => answer.trim().eq_ignore_ascii_case("y"),
        Err(_) => false,
    }
}

fn run(source: DumpSource, config: SyncConfig) -> Result<(), SyncError> {
    let text = source.read(&config, &Reged::new(&config.exporter))?;
    let dump = RegistryDump::parse(&text)?;

    let store = FsPairingStore::new(&config.storage_dir);
    let mut session = Session::new(store, prompt, io::stdout());
    let summary = session.run(&dump)?;

    tracing::info!(
        "{} device(s) checked, {} updated, {} with errors",
        summary.devices.len(),
        summary.updated(),
        summary.errors()
    );
    Ok(())
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    if !is_root() {
        eprintln!("ERROR: You need to be root to be able to run this tool.");
        return ExitCode::from(1);
    }

    let source = match (cli.registery_file, cli.windows_dir) {
        (Some(file), _) => {
            println!("Reading from Registery file {}", file.display());
            DumpSource::RegistryFile(file)
        }
        (None, Some(dir)) => {
            println!("Using Windows root {}", dir.display());
            DumpSource::WindowsDir(dir)
        }
        (None, None) => {
            eprintln!(
                "ERROR: You must specify either a Windows directory (-w) or a Registery file (-r)"
            );
            return ExitCode::from(1);
        }
    };

    let config = SyncConfig {
        storage_dir: cli.bluetooth_dir,
        key_path: cli.key_path,
        exporter: cli.reged,
    };

    match run(source, config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("ERROR: {e}");
            ExitCode::from(1)
        }
    }
}
