use clap::error::ErrorKind;
use clap::{Arg, ArgAction, Command};
use klipper_backup::{
    create_sample_config, install_handler, load_config, logging, BackendKind, BackupContext,
    BackupDaemon, BackupError, LOG_TARGET,
};
use std::process;
use tracing::{error, info};

fn main() {
    if let Err(e) = logging::init(logging::DEFAULT_LEVEL) {
        eprintln!("Error: {e}");
    }

    match run() {
        Ok(exit_code) => process::exit(exit_code),
        Err(error) => {
            error!(target: LOG_TARGET, "{error}");
            for suggestion in error.suggestions() {
                info!(target: LOG_TARGET, "suggestion: {suggestion}");
            }
            process::exit(error.exit_code());
        }
    }
}

fn cli() -> Command {
    Command::new("klipper-backup")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Watches Klipper configuration directories and backs them up on every change")
        .long_about(
            "klipper-backup archives the monitored configuration directories whenever a file\n\
             changes and delivers the backup to a local store, an rclone remote or a git\n\
             repository. It runs until the monitored directories can no longer be watched.",
        )
        .arg(
            Arg::new("method")
                .help("Where backups are delivered")
                .value_name("METHOD")
                .value_parser(BackendKind::NAMES)
                .required_unless_present("sample-config"),
        )
        .arg(
            Arg::new("sample-config")
                .long("sample-config")
                .help("Print an example configuration file and exit")
                .action(ArgAction::SetTrue),
        )
}

fn run() -> Result<i32, BackupError> {
    let matches = match cli().try_get_matches() {
        Ok(matches) => matches,
        Err(e) if matches!(e.kind(), ErrorKind::DisplayHelp | ErrorKind::DisplayVersion) => {
            let _ = e.print();
            return Ok(0);
        }
        Err(e) => {
            let message = e.render().to_string();
            let first_line = message.lines().next().unwrap_or("invalid arguments");
            return Err(BackupError::config(first_line.trim_start_matches("error: ")));
        }
    };

    if matches.get_flag("sample-config") {
        print!("{}", create_sample_config());
        return Ok(0);
    }

    let backend: BackendKind = matches
        .get_one::<String>("method")
        .ok_or_else(|| BackupError::config("No backup method given"))?
        .parse()?;

    let config = load_config(backend)?;
    info!(
        target: LOG_TARGET,
        %backend,
        directories = ?config.monitored.paths(),
        "configuration loaded"
    );

    let context = BackupContext::new();
    install_handler(context.clone())?;

    let mut daemon = BackupDaemon::from_config(config, context);
    daemon.run()?;

    // run() only returns once watching has failed
    Ok(1)
}
