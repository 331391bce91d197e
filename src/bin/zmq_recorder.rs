//! zmq-recorder: capture ZeroMQ traffic into a recording until Ctrl-C.

use std::process::ExitCode;
use std::sync::Arc;

use tracing::{error, info};
use zmq_bag::cli::{init_logging, parse_args, print_config, print_usage_error, RecorderArgs};
use zmq_bag::{Recorder, RecorderConfig, Result, ZmqTransport};

#[tokio::main]
async fn main() -> ExitCode {
    let Some(args) = parse_args::<RecorderArgs>() else {
        return ExitCode::SUCCESS;
    };
    init_logging(&args.log_level);

    let config = match args.into_config() {
        Ok(config) => config,
        Err(e) => {
            print_usage_error::<RecorderArgs>(&e);
            return ExitCode::SUCCESS;
        }
    };

    if let Err(e) = run(config).await {
        error!(error = %e, "Recorder failed");
    }
    ExitCode::SUCCESS
}

async fn run(config: RecorderConfig) -> Result<()> {
    print_config("zmq recorder", &config)?;

    let mut recorder = Recorder::new(config, Arc::new(ZmqTransport::new()));
    recorder.init().await?;
    recorder.run()?;
    if let Some(path) = recorder.recording_path() {
        info!(path = %path.display(), "Recording");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutdown requested");

    let stats = recorder.stop().await?;
    info!(
        frames = stats.frames,
        bytes = stats.writer.bytes_written,
        "Exiting gracefully"
    );
    Ok(())
}
