use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use fallwatch::alert::{AlertDispatcher, WebhookNotifier};
use fallwatch::api::{self, AppState, DynExtractor};
use fallwatch::config::{AlertConfig, Config};
use fallwatch::inference::{build_alert, FallLabel, VideoDetector};
use fallwatch::model::FallClassifier;
use fallwatch::pose::OnnxPoseExtractor;
use fallwatch::training::{FallDataset, Trainer};

/// Exit status for a video from which no frame could be read.
const EXIT_EMPTY_INPUT: u8 = 2;

#[derive(Parser, Debug)]
#[command(name = "fallwatch", version, about = "Fall detection from video")]
struct Cli {
    /// TOML configuration file (default: ./fallwatch.toml if present).
    #[arg(short, long, value_name = "FILE", global = true)]
    config: Option<PathBuf>,

    /// Log at debug level.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use CUDA when available.
    #[arg(long, global = true)]
    cuda: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Fit the classifier to labelled pose sequences.
    Train {
        /// Directory with sequences.npy and labels.npy.
        #[arg(long, value_name = "DIR")]
        data: PathBuf,
        /// Separate validation directory; otherwise `data` is split.
        #[arg(long, value_name = "DIR")]
        val_data: Option<PathBuf>,
        #[arg(long, value_name = "PATH")]
        checkpoint: Option<PathBuf>,
        #[arg(long)]
        epochs: Option<usize>,
        #[arg(long)]
        seed: Option<u64>,
    },
    /// Classify one video and print the verdict.
    Detect {
        #[arg(long, value_name = "PATH")]
        video: PathBuf,
        #[arg(long, value_name = "PATH")]
        checkpoint: Option<PathBuf>,
        #[arg(long)]
        frame_skip: Option<usize>,
        /// Print the verdict as JSON.
        #[arg(long)]
        json: bool,
        /// Do not notify the configured webhook.
        #[arg(long)]
        no_alert: bool,
    },
    /// Serve the detection HTTP API.
    Serve {
        #[arg(long, value_name = "PATH")]
        checkpoint: Option<PathBuf>,
        #[arg(long)]
        port: Option<u16>,
    },
}

#[tokio::main]
async fn main() -> Result<ExitCode, Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    let directive = if cli.verbose {
        "fallwatch=debug"
    } else {
        "fallwatch=info"
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(directive.parse()?))
        .init();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if cli.cuda {
        config.device.cuda = true;
    }

    match cli.command {
        Command::Train {
            data,
            val_data,
            checkpoint,
            epochs,
            seed,
        } => {
            if let Some(path) = checkpoint {
                config.training.checkpoint = path;
            }
            if let Some(epochs) = epochs {
                config.training.epochs = epochs;
            }
            if let Some(seed) = seed {
                config.training.seed = seed;
            }
            config.validate()?;
            tokio::task::spawn_blocking(move || train(&config, &data, val_data.as_deref()))
                .await??;
            Ok(ExitCode::SUCCESS)
        }
        Command::Detect {
            video,
            checkpoint,
            frame_skip,
            json,
            no_alert,
        } => {
            if let Some(skip) = frame_skip {
                config.inference.frame_skip = skip;
            }
            config.validate()?;
            let checkpoint = checkpoint.unwrap_or_else(|| config.training.checkpoint.clone());
            detect(config, checkpoint, video, json, no_alert).await
        }
        Command::Serve { checkpoint, port } => {
            if let Some(port) = port {
                config.http.port = port;
            }
            config.validate()?;
            let checkpoint = checkpoint.unwrap_or_else(|| config.training.checkpoint.clone());
            serve(config, checkpoint).await?;
            Ok(ExitCode::SUCCESS)
        }
    }
}

fn train(config: &Config, data: &Path, val_data: Option<&Path>) -> fallwatch::Result<()> {
    tch::manual_seed(config.training.seed as i64);

    let dataset = FallDataset::from_dir(data)?;
    let (train_set, val_set) = match val_data {
        Some(dir) => (dataset, FallDataset::from_dir(dir)?),
        None => dataset.split(config.training.val_fraction, config.training.seed),
    };

    let model = FallClassifier::new(config.model.spec(), config.device.device())?;
    let mut trainer = Trainer::new(model, config.training.clone(), train_set, val_set)?;
    let reports = trainer.fit()?;

    if let Some(last) = reports.last() {
        tracing::info!(
            epochs = reports.len(),
            loss = last.train_loss,
            val_accuracy = ?last.val_accuracy,
            checkpoint = %config.training.checkpoint.display(),
            "training complete"
        );
    }
    Ok(())
}

fn load_detector(config: &Config, checkpoint: &Path) -> fallwatch::Result<VideoDetector<DynExtractor>> {
    let classifier = FallClassifier::from_checkpoint(checkpoint, config.device.device())?;
    if *classifier.spec() != config.model.spec() {
        tracing::warn!(
            checkpoint = %checkpoint.display(),
            "checkpoint architecture differs from [model] config, using the checkpoint's"
        );
    }

    let extractor = OnnxPoseExtractor::new(
        &config.pose.model,
        config.pose.confidence_threshold,
        config.pose.intra_threads,
        classifier.spec().num_joints,
    )?;
    let extractor: DynExtractor = Box::new(extractor);
    VideoDetector::new(classifier, extractor, config.inference.clone())
}

fn alert_dispatcher(config: &AlertConfig) -> Option<AlertDispatcher<WebhookNotifier>> {
    let url = config.webhook_url.as_ref()?;
    Some(AlertDispatcher::new(
        WebhookNotifier::new(url.clone()),
        config.notify_on_negative,
    ))
}

async fn detect(
    config: Config,
    checkpoint: PathBuf,
    video: PathBuf,
    json: bool,
    no_alert: bool,
) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let dispatcher = if no_alert {
        None
    } else {
        alert_dispatcher(&config.alert)
    };
    let source = video.display().to_string();

    let blocking_source = source.clone();
    let (alert, missing_poses) = tokio::task::spawn_blocking(move || -> fallwatch::Result<_> {
        let mut detector = load_detector(&config, &checkpoint)?;
        let detection = detector.detect_file(&video)?;
        Ok((build_alert(&blocking_source, &detection), detection.missing_poses))
    })
    .await??;

    let verdict = &alert.verdict;
    if json {
        println!("{}", serde_json::to_string_pretty(verdict)?);
    } else {
        for (frame, label) in verdict.segments() {
            let label = match label {
                FallLabel::Fallen => "fallen",
                FallLabel::NotFallen => "not fallen",
            };
            println!("frame {frame:>8}: {label}");
        }
        if verdict.is_empty_input() {
            println!("{source}: no frames could be read");
        } else if verdict.fall_detected() {
            println!("{source}: fall detected");
        } else {
            println!("{source}: no fall detected");
        }
    }

    if verdict.is_empty_input() {
        tracing::warn!(video = %source, "empty input, verdict is not a negative classification");
        return Ok(ExitCode::from(EXIT_EMPTY_INPUT));
    }
    if missing_poses > 0 {
        tracing::info!(video = %source, missing_poses, "frames without a detected pose");
    }

    if let Some(dispatcher) = dispatcher {
        dispatcher.dispatch(&alert).await?;
    }
    Ok(ExitCode::SUCCESS)
}

async fn serve(config: Config, checkpoint: PathBuf) -> Result<(), Box<dyn std::error::Error>> {
    let alerts = alert_dispatcher(&config.alert);
    let port = config.http.port;
    let detector = tokio::task::spawn_blocking(move || load_detector(&config, &checkpoint)).await??;
    tracing::info!(
        parameters = detector.classifier().num_parameters(),
        alerts = alerts.is_some(),
        "detector ready"
    );

    let state = AppState::new(detector, alerts);
    tokio::select! {
        result = api::start_server(state, port) => result?,
        _ = tokio::signal::ctrl_c() => {
            tracing::info!("shutdown signal received");
        }
    }
    tracing::info!("shutdown complete");
    Ok(())
}
