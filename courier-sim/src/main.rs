use std::process;

use clap::{Arg, ArgAction, ArgMatches, Command};
use log::{error, info};

mod commands;
mod config;
mod render;
mod simulator;

use commands::*;
use config::Config;

const DEFAULT_CONFIG: &str = "courier.toml";

fn cli() -> Command {
    Command::new("courier-sim")
        .version("0.1.0")
        .about("Courier - drive a transfer progress controller against a simulated manager")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value(DEFAULT_CONFIG)
                .global(true),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Verbose output")
                .action(ArgAction::SetTrue)
                .global(true),
        )
        .subcommand(
            Command::new("run")
                .about("Simulate one transfer with scripted taps")
                .arg(
                    Arg::new("kind")
                        .short('k')
                        .long("kind")
                        .value_name("KIND")
                        .help("photo, video, animation, voice, audio or document")
                        .default_value("document"),
                )
                .arg(
                    Arg::new("send")
                        .short('s')
                        .long("send")
                        .help("Upload instead of download")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("local")
                        .short('l')
                        .long("local")
                        .help("Start from a provisional message id that is promoted mid-transfer")
                        .action(ArgAction::SetTrue),
                )
                .arg(
                    Arg::new("cancel-at")
                        .long("cancel-at")
                        .value_name("FRACTION")
                        .help("Tap cancel once raw progress reaches this fraction"),
                )
                .arg(
                    Arg::new("retries")
                        .short('r')
                        .long("retries")
                        .value_name("COUNT")
                        .help("Tap retry after a failure up to COUNT times (default: 0)")
                        .default_value("0"),
                )
                .arg(
                    Arg::new("quiet")
                        .short('q')
                        .long("quiet")
                        .help("Hide the progress bar")
                        .action(ArgAction::SetTrue),
                ),
        )
        .subcommand(
            Command::new("blend")
                .about("Print the visual progress curve")
                .arg(
                    Arg::new("boundary")
                        .short('b')
                        .long("boundary")
                        .value_name("FRACTION")
                        .help("Generation boundary (default: from config)"),
                )
                .arg(
                    Arg::new("steps")
                        .long("steps")
                        .value_name("N")
                        .help("Samples per phase (default: 10)")
                        .default_value("10"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Print the default configuration as TOML")
                .arg(
                    Arg::new("write")
                        .short('w')
                        .long("write")
                        .help("Write it to the configuration file path instead")
                        .action(ArgAction::SetTrue),
                ),
        )
}

#[tokio::main]
async fn main() {
    let matches = cli().get_matches();
    let config_path = matches
        .get_one::<String>("config")
        .cloned()
        .unwrap_or_else(|| DEFAULT_CONFIG.to_string());

    let config = match Config::load(&config_path) {
        Ok(config) => config,
        Err(e) => {
            env_logger::init();
            error!("Failed to load configuration from {}: {}", config_path, e);
            process::exit(1);
        }
    };

    let level = if matches.get_flag("verbose") {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    courier_core::init();
    courier_progress::init();
    info!("Using configuration {}", config_path);

    if let Err(e) = run_command(&matches, &config, &config_path).await {
        error!("Command failed: {}", e);
        process::exit(1);
    }
}

async fn run_command(
    matches: &ArgMatches,
    config: &Config,
    config_path: &str,
) -> anyhow::Result<()> {
    match matches.subcommand() {
        Some(("run", sub_matches)) => handle_run_command(sub_matches, config).await,
        Some(("blend", sub_matches)) => handle_blend_command(sub_matches, config).await,
        Some(("config", sub_matches)) => handle_config_command(sub_matches, config_path).await,
        _ => {
            println!("No command specified. Use --help for usage information.");
            Ok(())
        }
    }
}
