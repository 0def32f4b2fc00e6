use std::env;
use std::path::PathBuf;

use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt};

use drivesync::remote::DriveRemote;
use drivesync::settings::EffectiveSettings;
use drivesync::sheets::CsvDirSource;
use drivesync::AppResult;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--settings <file>] sync\n  {program} [--settings <file>] update-expiry\n\nCommands:\n  sync            create or complete district and group folders, shares and template files\n  update-expiry   set the configured expiry on every external share under the root folder\n\nFlags:\n  --settings <file>   JSON settings file (default: $DRIVESYNC_SETTINGS when set)\n  -h, --help          Show this help\n\nEnvironment:\n  DRIVESYNC_ACCESS_TOKEN   OAuth bearer token for the Drive, Sheets and Forms APIs\n  DRIVESYNC_SHEETS_DIR     directory holding Config.csv, Districts.csv, Groups.csv, Templates.csv\n  RUST_LOG                 log filter (default: info)"
    );
}

enum Command {
    Sync,
    UpdateExpiry,
}

async fn run(command: Command, settings_path: Option<PathBuf>) -> AppResult<()> {
    let settings = EffectiveSettings::resolve(settings_path.as_deref())?;
    info!(target: "drivesync", "settings: {:?}", settings);
    let sheets = CsvDirSource::new(settings.sheets_dir.clone());
    let remote = DriveRemote::new(&settings)?;
    let names = settings.sheet_names();
    match command {
        Command::Sync => {
            drivesync::sync(&remote, &sheets, &names).await?;
        }
        Command::UpdateExpiry => {
            drivesync::update_external_share_expiry(&remote, &sheets, &names).await?;
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    fmt().with_env_filter(filter).init();

    let mut args: Vec<String> = env::args().collect();
    let program = if args.is_empty() { "drivesync".to_string() } else { args.remove(0) };

    let mut settings_path: Option<PathBuf> = None;
    let mut command: Option<Command> = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "--settings" => {
                if i + 1 >= args.len() { eprintln!("--settings requires a path"); print_usage(&program); std::process::exit(2); }
                settings_path = Some(PathBuf::from(&args[i + 1]));
                i += 2;
                continue;
            }
            "-h" | "--help" => {
                print_usage(&program);
                return;
            }
            "sync" if command.is_none() => command = Some(Command::Sync),
            "update-expiry" if command.is_none() => command = Some(Command::UpdateExpiry),
            unk => {
                eprintln!("Unrecognized argument: {}", unk);
                print_usage(&program);
                std::process::exit(2);
            }
        }
        i += 1;
    }
    let Some(command) = command else {
        print_usage(&program);
        std::process::exit(2);
    };

    let rust_log = env::var("RUST_LOG").unwrap_or_else(|_| "<unset>".to_string());
    info!(target: "drivesync", "drivesync {} starting: RUST_LOG='{}'", env!("CARGO_PKG_VERSION"), rust_log);

    if let Err(e) = run(command, settings_path).await {
        error!(target: "drivesync", "{}", e);
        std::process::exit(e.exit_code());
    }
}
