use anyhow::{Context, Result};
use clap::Parser;
use lib_studio::configs::{StudioConfig, load_config_from};
use lib_studio::ingestors::{DataSource, Recording, ReplaySource};
use lib_studio::loggers::{LoggingOptions, setup_logging};
use lib_studio::panels::{LatestValueConfig, LatestValuePanel};
use lib_studio::{MessagePipeline, PlayerPresence, StructuredValue};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser, Debug)]
#[command(
    name = "studio-replay",
    version,
    about = "Replay a recording through the message pipeline and follow one message path"
)]
struct Args {
    /// Recording file (JSON/JSON5)
    #[arg(required = true)]
    recording: PathBuf,

    /// Message path to follow, e.g. `/battery.voltage`
    #[arg(short, long)]
    path: String,

    /// Lower bound of the displayed range
    #[arg(long, default_value_t = 0.0)]
    min: f64,

    /// Upper bound of the displayed range
    #[arg(long, default_value_t = 1.0)]
    max: f64,

    /// Deliver as fast as possible instead of in recorded time
    #[arg(long)]
    unpaced: bool,

    #[command(flatten)]
    studio: StudioConfig,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    let config = load_config_from(args.studio.clone()).context("Failed to load configuration")?;
    let log_file = setup_logging(
        &LoggingOptions::new("studio-replay", config.log_level()).with_log_dir(config.log_dir.clone()),
    )?;
    if let Some(log_file) = log_file {
        log::info!("Logging to {}", log_file.display());
    }

    let recording = Recording::load(&args.recording)
        .context(format!("Failed to load recording: {:?}", args.recording))?;
    let source = Arc::new(if args.unpaced {
        ReplaySource::unpaced("replay", recording)
    } else {
        ReplaySource::new("replay", recording)
    });
    source.set_speed(config.playback_speed()?)?;

    let pipeline = MessagePipeline::new(config.pipeline_config()?);
    let panel = LatestValuePanel::mount(
        pipeline.panel_context(),
        LatestValueConfig {
            path: args.path.clone(),
            min_value: args.min,
            max_value: args.max,
        },
    );
    if let Some(error) = panel.state().path_error() {
        anyhow::bail!("invalid message path: {}", error);
    }

    let replay: Arc<dyn DataSource> = source.clone();
    pipeline.connect(replay).await;

    let poll = config
        .player_config()?
        .frame_interval
        .max(Duration::from_millis(10));
    let mut last_value: Option<StructuredValue> = None;
    let mut draining = false;
    let mut ticker = tokio::time::interval(poll);
    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                log::info!("Interrupted");
                break;
            }
            _ = ticker.tick() => {}
        }

        let state = panel.state();
        if let Some(error) = state.error() {
            log::warn!("{}: {}", args.path, error);
        }
        if state.value() != last_value.as_ref() {
            last_value = state.value().cloned();
            match (&last_value, panel.reading()) {
                (Some(value), Some(reading)) => println!(
                    "{} = {} ({:.1}%)",
                    args.path,
                    value,
                    reading.percent()
                ),
                (Some(value), None) => println!("{} = {}", args.path, value),
                (None, _) => println!("{} = (no value)", args.path),
            }
        }

        let snapshot = pipeline.snapshot();
        if snapshot.presence == PlayerPresence::Error {
            let reason = snapshot.error.as_deref().unwrap_or("unknown error").to_string();
            pipeline.disconnect().await;
            anyhow::bail!("replay failed: {}", reason);
        }
        if source.position().is_none() {
            // One more tick so the last buffered frame is dispatched.
            if draining {
                log::info!("Recording finished");
                break;
            }
            draining = true;
        }
    }

    pipeline.disconnect().await;
    Ok(())
}
