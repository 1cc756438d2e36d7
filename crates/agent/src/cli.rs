use clap::{Parser, Subcommand};
use infrastructure::config::{LogFormat, LogLevel};
use infrastructure::constants::{DEFAULT_BATCH_SIZE, DEFAULT_CONFIG_PATH};

#[derive(Parser, Debug)]
#[command(
    name = "mmb-agent",
    about = "mmb middlebox rule engine",
    version = env!("CARGO_PKG_VERSION"),
)]
pub struct Cli {
    /// Path to the YAML configuration file
    #[arg(short, long, default_value = DEFAULT_CONFIG_PATH, env = "MMB_CONFIG")]
    pub config: String,

    /// Log level override (takes precedence over config file)
    #[arg(short, long)]
    pub log_level: Option<LogLevel>,

    /// Log format: json (default, production) or text (development)
    #[arg(long)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Display version and build information
    Version,

    /// Load the rules and process hex-encoded packets read from stdin
    /// (default)
    Run {
        /// Packets evaluated per snapshot load
        #[arg(long, default_value_t = DEFAULT_BATCH_SIZE)]
        batch_size: usize,

        /// Print the metrics registry to stderr on exit
        #[arg(long)]
        dump_metrics: bool,
    },

    /// Validate the config, install the rules and print the rule list and
    /// table chain
    Check,

    /// Evaluate a single hex-encoded packet and print the verdict
    Eval {
        /// Raw IPv4/IPv6 packet as hex
        #[arg(long)]
        packet: String,

        /// Ingress interface id
        #[arg(long)]
        ingress: Option<u32>,
    },
}

impl Command {
    pub fn default_run() -> Self {
        Self::Run {
            batch_size: DEFAULT_BATCH_SIZE,
            dump_metrics: false,
        }
    }
}

pub fn parse() -> Cli {
    Cli::parse()
}
