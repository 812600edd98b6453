//! `callbridge`: run call scenarios through the coordinator against a
//! simulated telephony authority.

mod authority;
mod console;
mod logging;
mod scenario;
mod settings;

use anyhow::Result;
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing::debug;

use crate::scenario::{IncomingScenario, OutgoingScenario, RunOptions};
use crate::settings::Settings;

#[derive(Parser)]
#[command(name = "callbridge")]
#[command(about = "Drive the call-session bridge against a simulated telephony authority")]
#[command(version)]
struct Cli {
    /// Config file (TOML)
    #[arg(short, long, global = true, env = "CALLBRIDGE_CONFIG")]
    config: Option<PathBuf>,

    /// Log level override
    #[arg(short, long, global = true, env = "CALLBRIDGE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Log as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    /// Provider name shown by the authority
    #[arg(long, global = true)]
    provider_name: Option<String>,

    /// Region code of the simulated device
    #[arg(long, global = true)]
    region: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a scripted call
    Simulate {
        #[command(flatten)]
        output: OutputArgs,

        #[command(subcommand)]
        scenario: ScenarioCommand,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Args)]
struct OutputArgs {
    /// Print bridge events as JSON
    #[arg(long, global = true)]
    json_events: bool,

    /// Record the held call as WAV tracks under <DIR>/records
    #[arg(long, global = true, value_name = "DIR")]
    record: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ScenarioCommand {
    /// Place a call from the app, hold it, hang up
    Outgoing {
        #[arg(long, default_value_t = 1)]
        peer: i64,
        #[arg(long, default_value = "Remote Peer")]
        title: String,
        /// Dial a phone number handle instead of the peer id
        #[arg(long)]
        phone: Option<String>,
        #[arg(long)]
        video: bool,
        /// Signaling layer refuses to start the call
        #[arg(long)]
        decline: bool,
        /// Mute once connected
        #[arg(long)]
        mute: bool,
        /// Ask for the speaker route before the call starts
        #[arg(long)]
        speaker: bool,
    },
    /// Surface a call from the network, answer it, hang up
    Incoming {
        #[arg(long, default_value = "remote")]
        handle: String,
        #[arg(long, default_value = "Remote Peer")]
        title: String,
        #[arg(long)]
        stable_id: Option<i64>,
        #[arg(long)]
        video: bool,
        /// Authority refuses to surface the call
        #[arg(long)]
        reject: bool,
        /// The remote side hangs up instead of the app
        #[arg(long)]
        remote_hangup: bool,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective settings
    Show,
    /// Print the default config file location
    Path,
}

impl Cli {
    fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref())?;
        if let Some(level) = &self.log_level {
            settings.log.level = level.clone();
        }
        if self.json_logs {
            settings.log.json = true;
        }
        if let Some(name) = &self.provider_name {
            settings.bridge.provider.localized_name = name.clone();
        }
        if let Some(region) = &self.region {
            settings.bridge.availability.region_code = Some(region.clone());
        }
        Ok(settings)
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = cli.settings()?;

    match cli.command {
        Commands::Config { action } => match action {
            ConfigAction::Show => print!("{}", settings.to_toml()?),
            ConfigAction::Path => match settings::default_path() {
                Some(path) => println!("{}", path.display()),
                None => println!("no config directory on this platform"),
            },
        },
        Commands::Simulate { output, scenario } => {
            logging::init(&settings.log)?;
            debug!("Running with {:?}", settings);

            let options = RunOptions {
                json_events: output.json_events,
                record_dir: output.record,
            };
            match scenario {
                ScenarioCommand::Outgoing {
                    peer,
                    title,
                    phone,
                    video,
                    decline,
                    mute,
                    speaker,
                } => {
                    let scenario = OutgoingScenario {
                        peer,
                        title,
                        phone_number: phone,
                        video,
                        decline,
                        mute,
                        speaker,
                    };
                    scenario::run_outgoing(&settings, scenario, options).await?;
                }
                ScenarioCommand::Incoming {
                    handle,
                    title,
                    stable_id,
                    video,
                    reject,
                    remote_hangup,
                } => {
                    let scenario = IncomingScenario {
                        handle,
                        title,
                        stable_id,
                        video,
                        reject,
                        remote_hangup,
                    };
                    scenario::run_incoming(&settings, scenario, options).await?;
                }
            }
        }
    }

    Ok(())
}
