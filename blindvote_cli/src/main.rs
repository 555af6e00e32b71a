use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use log::LevelFilter;
use log4rs::append::console::{ConsoleAppender, Target};
use log4rs::config::{Appender, Config as LogConfig, Deserializers, Root};
use log4rs::encode::pattern::PatternEncoder;
use std::path::PathBuf;

mod command_keygen;
mod command_results;
mod command_simulate;
mod command_voted;
mod file_store;

use command_keygen::*;
use command_results::*;
use command_simulate::*;
use command_voted::*;
use file_store::FileStore;

const PROGRAM_NAME: &str = "blindvote";

const ABOUT_TEXT: &str = "Run and inspect blind-signature elections.

Election parameters are read from BLINDVOTE_PRIME, BLINDVOTE_GENERATOR,
BLINDVOTE_SCHEME, BLINDVOTE_RSA_BITS and BLINDVOTE_SESSION_TTL_SECS.";

const DATA_DIR_ENV: &str = "BLINDVOTE_DATA_DIR";
const DEFAULT_DATA_DIR: &str = "data";

/// Construct the CLI configuration.
fn cli() -> Command {
    // Make the build dirty when the toml changes.
    include_str!("../Cargo.toml");

    clap::command!(PROGRAM_NAME)
        .about(ABOUT_TEXT)
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .global(true)
                .help("Increase log verbosity (-v info, -vv debug, -vvv trace)"),
        )
        .arg(
            Arg::new("log-config")
                .long("log-config")
                .value_name("FILE")
                .global(true)
                .help("Configure logging from a log4rs YAML file instead"),
        )
        .arg(
            Arg::new("data-dir")
                .long("data-dir")
                .value_name("DIR")
                .value_parser(value_parser!(PathBuf))
                .global(true)
                .help("Election data directory - can also be set with BLINDVOTE_DATA_DIR"),
        )
        .subcommand(
            Command::new("keygen")
                .about("Generate the signer's keys if absent and print the public parameters"),
        )
        .subcommand(
            Command::new("simulate")
                .about("Run a complete election with simulated voters")
                .arg(
                    Arg::new("voters")
                        .long("voters")
                        .value_name("N")
                        .value_parser(value_parser!(usize))
                        .required(true)
                        .help("Number of voters on the roster"),
                )
                .arg(
                    Arg::new("candidates")
                        .long("candidates")
                        .value_name("LABELS")
                        .value_delimiter(',')
                        .required(true)
                        .help("Comma-separated candidate labels"),
                )
                .arg(
                    Arg::new("scheme")
                        .long("scheme")
                        .value_name("SCHEME")
                        .help("Signing scheme for new keys: schnorr or rsa"),
                )
                .arg(
                    Arg::new("seed")
                        .long("seed")
                        .value_name("SEED")
                        .value_parser(value_parser!(u64))
                        .help("Seed the simulation for a reproducible run"),
                ),
        )
        .subcommand(Command::new("results").about("Print the current tally"))
        .subcommand(
            Command::new("voted").about("List voters who have received a signature"),
        )
}

/// Print an error for `command` and exit
pub fn fail(command: &str, e: impl std::fmt::Display) -> ! {
    eprintln!("blindvote {}: {}", command, e);
    std::process::exit(1);
}

fn init_logging(matches: &ArgMatches) {
    if let Some(path) = matches.get_one::<String>("log-config") {
        if let Err(e) = log4rs::init_file(path, Deserializers::default()) {
            fail("logging", format!("unable to load {}: {}", path, e));
        }
        return;
    }

    let level = match matches.get_count("verbose") {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    let stderr = ConsoleAppender::builder()
        .target(Target::Stderr)
        .encoder(Box::new(PatternEncoder::new("{d(%H:%M:%S)} {h({l})} {t} - {m}{n}")))
        .build();
    let config = LogConfig::builder()
        .appender(Appender::builder().build("stderr", Box::new(stderr)))
        .build(Root::builder().appender("stderr").build(level));

    match config {
        Ok(config) => {
            if let Err(e) = log4rs::init_config(config) {
                fail("logging", e);
            }
        }
        Err(e) => fail("logging", e),
    }
}

fn data_dir(matches: &ArgMatches, env_value: Option<String>) -> PathBuf {
    match matches.get_one::<PathBuf>("data-dir") {
        Some(dir) => dir.clone(),
        None => PathBuf::from(env_value.unwrap_or_else(|| DEFAULT_DATA_DIR.to_owned())),
    }
}

fn main() {
    let matches = cli().get_matches();
    init_logging(&matches);

    let config = blindvote::Config::from_env().unwrap_or_else(|e| fail("config", e));
    let data_dir = data_dir(&matches, std::env::var(DATA_DIR_ENV).ok());

    match matches.subcommand() {
        Some(("keygen", matches)) => command_keygen(matches, &data_dir, &config),
        Some(("simulate", matches)) => command_simulate(matches, &data_dir, config),
        Some(("results", matches)) => command_results(matches, &data_dir),
        Some(("voted", matches)) => command_voted(matches, &data_dir),
        _ => unreachable!("subcommand_required prevents this"),
    }
}
