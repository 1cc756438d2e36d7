#![forbid(unsafe_code)]

mod cli;
mod commands;
mod packet_io;
mod reload;
mod shutdown;
mod startup;

use anyhow::Result;

use cli::Command;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = cli::parse();

    match cli.command.clone().unwrap_or_else(Command::default_run) {
        Command::Version => {
            println!("mmb-agent {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }

        Command::Run {
            batch_size,
            dump_metrics,
        } => startup::run(&cli, batch_size, dump_metrics).await,

        Command::Check => {
            let config = startup::load_config(&cli)?;
            commands::cmd_check(&config).await
        }

        Command::Eval { packet, ingress } => {
            let config = startup::load_config(&cli)?;
            commands::cmd_eval(&config, &packet, ingress)
        }
    }
}
