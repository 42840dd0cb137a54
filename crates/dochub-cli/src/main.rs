//! `dochub` command line
//!
//! Drives the document pipeline and the team chat with the canned services.

mod commands;

use anyhow::{Context, Result};
use clap::{value_parser, Arg, ArgAction, ArgMatches, Command};
use dochub_core::HubConfig;
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

fn cli() -> Command {
    Command::new("dochub")
        .version(dochub_core::VERSION)
        .about("Document pipeline and assistant-backed team chat")
        .arg(
            Arg::new("config")
                .long("config")
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("TOML configuration file"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON lines on stderr"),
        )
        .arg(
            Arg::new("latency-ms")
                .long("latency-ms")
                .global(true)
                .default_value("300")
                .value_parser(value_parser!(u64))
                .help("Artificial latency of the canned analysis and responder"),
        )
        .subcommand(
            Command::new("demo")
                .about("Ingest sample documents, hold a sample conversation, print every event")
                .arg(
                    Arg::new("documents")
                        .long("documents")
                        .default_value("4")
                        .value_parser(value_parser!(usize))
                        .help("Number of sample documents to ingest"),
                )
                .arg(
                    Arg::new("messages")
                        .long("messages")
                        .default_value("3")
                        .value_parser(value_parser!(usize))
                        .help("Number of sample chat messages to post"),
                ),
        )
        .subcommand(
            Command::new("ingest")
                .about("Ingest one file, wait for its analysis, print it as JSON")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("File to ingest"),
                )
                .arg(
                    Arg::new("content-type")
                        .long("content-type")
                        .help("MIME type; inferred from the file name when absent"),
                ),
        )
        .subcommand(
            Command::new("chat")
                .about("Post messages to a fresh session and print the transcript")
                .arg(
                    Arg::new("message")
                        .required(true)
                        .num_args(1..)
                        .help("Messages to post, in order"),
                ),
        )
}

fn init_tracing(json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let registry = tracing_subscriber::registry().with(filter);
    if json {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

fn load_config(matches: &ArgMatches) -> Result<HubConfig> {
    match matches.get_one::<PathBuf>("config") {
        Some(path) => HubConfig::load(path)
            .with_context(|| format!("loading configuration from {}", path.display())),
        None => Ok(HubConfig::default()),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let mut command = cli();
    let matches = command.clone().get_matches();
    init_tracing(matches.get_flag("log-json"));

    let config = load_config(&matches)?;
    let latency = Duration::from_millis(*matches.get_one::<u64>("latency-ms").unwrap_or(&300));
    tracing::info!(
        version = dochub_core::VERSION,
        turn_policy = ?config.chat.turn_policy,
        latency_ms = u64::try_from(latency.as_millis()).unwrap_or(u64::MAX),
        "dochub starting"
    );
    let env = commands::Env::new(config, latency);

    match matches.subcommand() {
        Some(("demo", args)) => {
            let documents = *args.get_one::<usize>("documents").unwrap_or(&4);
            let messages = *args.get_one::<usize>("messages").unwrap_or(&3);
            commands::demo(&env, documents, messages).await
        }
        Some(("ingest", args)) => {
            let file = args
                .get_one::<PathBuf>("file")
                .context("missing file argument")?;
            let content_type = args.get_one::<String>("content-type").map(String::as_str);
            commands::ingest(&env, file, content_type).await
        }
        Some(("chat", args)) => {
            let messages: Vec<String> = args
                .get_many::<String>("message")
                .map(|values| values.cloned().collect())
                .unwrap_or_default();
            commands::chat(&env, &messages).await
        }
        _ => {
            command.print_help()?;
            Ok(())
        }
    }
}
