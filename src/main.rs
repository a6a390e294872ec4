use std::io;
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{anyhow, Context};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use hc::cli;
use hc::client::XrpcClient;
use hc::config::Config;
use hc::constellation::ConstellationClient;
use hc::context::ContextOptions;
use hc::error::HcError;
use hc::model::RecordKind;
use hc::prompt::TextPrompt;
use hc::session::{login_or_load, SessionStore};

#[derive(Parser, Debug)]
#[clap(name = "hc", author, version, about = "Hypercerts CLI - manage impact claims on ATProto", long_about = None)]
struct Args {
    /// Log verbosity (error, warn, info, debug)
    #[clap(long, global = true, env = "HYPER_LOG_LEVEL")]
    log_level: Option<String>,

    /// PDS host used for login
    #[clap(long, global = true, env = "ATP_PDS_HOST")]
    pds_host: Option<String>,

    /// Backlink index base URL
    #[clap(long, global = true, env = "HC_CONSTELLATION_URL")]
    constellation_url: Option<String>,

    /// Handle or DID (ephemeral auth)
    #[clap(short, long, global = true, env = "HYPER_USERNAME")]
    username: Option<String>,

    /// App password (ephemeral auth)
    #[clap(short, long, global = true, env = "HYPER_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Where the login session is kept
    #[clap(long, global = true, env = "HC_SESSION_FILE")]
    session_file: Option<PathBuf>,

    #[clap(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Log in, log out, show the current session
    Account {
        #[clap(subcommand)]
        action: AccountCommand,
    },

    /// Work with activity claims
    Activity {
        #[clap(subcommand)]
        action: ActivityCommand,
    },

    /// Work with any record kind
    Record {
        #[clap(subcommand)]
        action: RecordCommand,
    },

    /// Show what links to a record
    Backlinks {
        uri: String,

        /// Collection NSID of the linking records
        #[clap(long)]
        collection: Option<String>,

        /// Field path holding the reference, e.g. `subject` or `.subjects[].uri`
        #[clap(long)]
        path: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum AccountCommand {
    Login,
    Logout,
    Status,
}

#[derive(Subcommand, Debug)]
enum ActivityCommand {
    #[clap(alias = "list")]
    Ls {
        #[clap(long)]
        json: bool,
    },

    Get {
        id: String,

        #[clap(short, long)]
        measurements: bool,

        #[clap(short, long)]
        attachments: bool,

        #[clap(short, long)]
        evaluations: bool,

        /// Collections that include the activity
        #[clap(short, long)]
        collections: bool,

        #[clap(long)]
        all: bool,

        #[clap(long)]
        json: bool,
    },

    /// Delete activities and every record linked to them
    #[clap(alias = "rm")]
    Delete {
        #[clap(required = true)]
        ids: Vec<String>,

        /// Skip confirmation
        #[clap(short, long)]
        force: bool,
    },
}

#[derive(Subcommand, Debug)]
enum RecordCommand {
    Get {
        uri: String,
    },

    #[clap(alias = "list")]
    Ls {
        kind: String,

        #[clap(long)]
        json: bool,
    },

    #[clap(alias = "rm")]
    Delete {
        kind: String,

        #[clap(required = true)]
        ids: Vec<String>,

        #[clap(short, long)]
        force: bool,
    },
}

impl Args {
    fn config(&self) -> Config {
        let defaults = Config::default();
        Config {
            pds_host: self.pds_host.clone().unwrap_or(defaults.pds_host),
            constellation_url: self.constellation_url.clone().unwrap_or(defaults.constellation_url),
            log_level: self
                .log_level
                .clone()
                .or_else(|| std::env::var("LOG_LEVEL").ok())
                .unwrap_or(defaults.log_level),
            username: self.username.clone().or_else(|| std::env::var("ATP_USERNAME").ok()),
            password: self.password.clone().or_else(|| std::env::var("ATP_PASSWORD").ok()),
            session_file: self.session_file.clone().unwrap_or(defaults.session_file),
            index_timeout: defaults.index_timeout,
        }
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    let config = args.config();

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true)
        .with_writer(io::stderr)
        .init();

    let result = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("failed to start async runtime")
        .and_then(|rt| rt.block_on(async_main(args.command, config)));

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

async fn async_main(command: Command, config: Config) -> anyhow::Result<()> {
    let store = SessionStore::new(&config.session_file);
    let mut out = io::stdout();

    match command {
        Command::Account { action } => match action {
            AccountCommand::Login => {
                let (username, password) = config
                    .credentials()
                    .ok_or_else(|| anyhow!("usage: hc account login --username <handle> --password <app-password>"))?;
                cli::perform_login(&config, &store, &mut out, username, password).await?;
            }
            AccountCommand::Logout => cli::perform_logout(&store, &mut out)?,
            AccountCommand::Status => {
                let client = login_or_load(&config, &store).await?;
                cli::perform_status(&client, &mut out).await?;
            }
        },

        Command::Activity { action } => {
            let client = login_or_load(&config, &store).await?;
            let owner = client.account_did()?.to_string();

            match action {
                ActivityCommand::Ls { json } => cli::perform_activity_list(&client, &owner, &mut out, json).await?,
                ActivityCommand::Get {
                    id,
                    measurements,
                    attachments,
                    evaluations,
                    collections,
                    all,
                    json,
                } => {
                    let options = if all {
                        ContextOptions::all()
                    } else {
                        ContextOptions {
                            measurements,
                            attachments,
                            evaluations,
                            collections,
                            include_records: true,
                        }
                    };
                    let index = link_index(&config)?;
                    cli::perform_activity_get(&client, &index, &owner, &id, &options, json, &mut out).await?;
                }
                ActivityCommand::Delete { ids, force } => {
                    let prompt = TextPrompt::stdio();
                    cli::perform_activity_delete(&client, &prompt, &mut out, &owner, &ids, force).await?;
                }
            }
        }

        Command::Record { action } => match action {
            RecordCommand::Get { uri } => {
                let client = match login_or_load(&config, &store).await {
                    Ok(client) => client,
                    Err(HcError::NotLoggedIn) => XrpcClient::new(&config.pds_host, &config.user_agent())?,
                    Err(e) => return Err(e.into()),
                };
                cli::perform_record_get(&client, &uri, &mut out).await?;
            }
            RecordCommand::Ls { kind, json } => {
                let kind = parse_kind(&kind)?;
                let client = login_or_load(&config, &store).await?;
                let owner = client.account_did()?.to_string();
                cli::perform_record_list(&client, &owner, kind, json, &mut out).await?;
            }
            RecordCommand::Delete { kind, ids, force } => {
                let kind = parse_kind(&kind)?;
                let client = login_or_load(&config, &store).await?;
                let owner = client.account_did()?.to_string();
                let prompt = TextPrompt::stdio();
                cli::perform_record_delete(&client, &prompt, &mut out, &owner, kind, &ids, force).await?;
            }
        },

        Command::Backlinks { uri, collection, path } => {
            let index = link_index(&config)?;
            cli::perform_backlinks(&index, &uri, collection.as_deref(), path.as_deref(), &mut out).await?;
        }
    }
    Ok(())
}

fn link_index(config: &Config) -> anyhow::Result<ConstellationClient> {
    ConstellationClient::new(&config.constellation_url, &config.user_agent(), config.index_timeout)
        .context("failed to build backlink index client")
}

fn parse_kind(kind: &str) -> anyhow::Result<RecordKind> {
    RecordKind::from_label(kind).ok_or_else(|| {
        let known: Vec<&str> = RecordKind::ALL.iter().map(|k| k.label()).collect();
        anyhow!("unknown record kind: {kind} (expected one of: {})", known.join(", "))
    })
}
