//! zmq-replayer: replay a recording with its original timing.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use zmq_bag::cli::{init_logging, parse_args, print_config, print_usage_error, ReplayerArgs};
use zmq_bag::{ReplayConfig, Replayer, Result, ZmqTransport};

#[tokio::main]
async fn main() -> ExitCode {
    let Some(args) = parse_args::<ReplayerArgs>() else {
        return ExitCode::SUCCESS;
    };
    init_logging(&args.log_level);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            print_usage_error::<ReplayerArgs>(&e);
            return ExitCode::SUCCESS;
        }
    };

    if let Err(e) = run(config).await {
        error!(error = %e, "Replayer failed");
    }
    ExitCode::SUCCESS
}

async fn run(config: ReplayConfig) -> Result<()> {
    print_config("zmq replayer", &config)?;
    let exit_at_eof = config.exit_at_eof;

    let mut replayer = Replayer::new(config, Arc::new(ZmqTransport::new()));
    replayer.init().await?;
    replayer.run()?;

    if exit_at_eof {
        tokio::select! {
            signal = tokio::signal::ctrl_c() => {
                signal?;
                info!("Shutdown requested");
            }
            _ = replayer.finished() => {}
        }
    } else {
        tokio::signal::ctrl_c().await?;
        info!("Shutdown requested");
    }

    let stats = replayer.stop().await?;
    info!(
        dispatched = stats.dispatched,
        endpoints = stats.endpoints,
        "Exiting gracefully"
    );
    Ok(())
}
