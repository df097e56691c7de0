use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mien_core::{DetectorVariant, FaceAnalyzer, PipelineConfig, Thresholds};
use std::collections::HashMap;
use std::path::{Path, PathBuf};

#[zbus::proxy(
    interface = "org.mien.Analyzer1",
    default_service = "org.mien.Analyzer1",
    default_path = "/org/mien/Analyzer1"
)]
trait Analyzer {
    async fn analyze(
        &self,
        filename: &str,
        image: &[u8],
        options: HashMap<&str, f64>,
    ) -> zbus::Result<String>;
    async fn health(&self) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

#[derive(Parser)]
#[command(name = "mien", about = "mien face analysis CLI")]
struct Cli {
    /// Talk to a daemon on the system bus instead of the session bus
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Detect faces in an image and report gender, age bucket and emotion
    Analyze {
        /// Image file to analyze
        image: PathBuf,
        /// Minimum detector confidence (0-1)
        #[arg(long)]
        score_threshold: Option<f32>,
        /// Suppression IoU threshold (0-1)
        #[arg(long)]
        nms_threshold: Option<f32>,
        /// Run the models in-process instead of calling miend
        #[arg(long)]
        local: bool,
        /// Model directory for --local
        #[arg(long, requires = "local")]
        model_dir: Option<PathBuf>,
        /// Use the 256px back-camera detector for --local
        #[arg(long, requires = "local")]
        back_model: bool,
    },
    /// Check that the daemon is answering
    Health,
    /// Show daemon status
    Status,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Analyze {
            image,
            score_threshold,
            nms_threshold,
            local,
            model_dir,
            back_model,
        } => {
            let thresholds = Thresholds {
                score: score_threshold,
                nms: nms_threshold,
            };
            let report = if local {
                analyze_local(&image, thresholds, model_dir, back_model)?
            } else {
                let proxy = connect(cli.system).await?;
                analyze_remote(&proxy, &image, thresholds).await?
            };
            println!("{report}");
        }
        Commands::Health => {
            let proxy = connect(cli.system).await?;
            println!("{}", proxy.health().await.context("miend health check failed")?);
        }
        Commands::Status => {
            let proxy = connect(cli.system).await?;
            let status = proxy.status().await.context("miend status failed")?;
            let value: serde_json::Value = serde_json::from_str(&status)?;
            println!("{}", serde_json::to_string_pretty(&value)?);
        }
    }

    Ok(())
}

async fn connect(system: bool) -> Result<AnalyzerProxy<'static>> {
    let conn = if system {
        zbus::Connection::system().await
    } else {
        zbus::Connection::session().await
    }
    .context("connecting to D-Bus")?;
    AnalyzerProxy::new(&conn)
        .await
        .context("miend is not reachable")
}

async fn analyze_remote(
    proxy: &AnalyzerProxy<'_>,
    image: &Path,
    thresholds: Thresholds,
) -> Result<String> {
    let bytes = std::fs::read(image).with_context(|| format!("reading {}", image.display()))?;
    let mut options = HashMap::new();
    if let Some(score) = thresholds.score {
        options.insert("score_threshold", f64::from(score));
    }
    if let Some(nms) = thresholds.nms {
        options.insert("nms_threshold", f64::from(nms));
    }
    let response = proxy
        .analyze(&file_name(image), &bytes, options)
        .await
        .context("miend analyze failed")?;
    let value: serde_json::Value = serde_json::from_str(&response)?;
    Ok(serde_json::to_string_pretty(&value)?)
}

fn analyze_local(
    image: &Path,
    thresholds: Thresholds,
    model_dir: Option<PathBuf>,
    back_model: bool,
) -> Result<String> {
    let mut config = PipelineConfig::default();
    if let Some(dir) = model_dir {
        config = config.with_model_dir(dir);
    }
    if back_model {
        config.variant = DetectorVariant::Back;
    }

    let frame = image::open(image)
        .with_context(|| format!("decoding {}", image.display()))?
        .to_rgb8();
    let mut analyzer = FaceAnalyzer::load(&config).context("loading models")?;
    tracing::debug!(width = frame.width(), height = frame.height(), "analyzing locally");
    let report = analyzer.analyze(&frame, thresholds)?.into_report(file_name(image));
    Ok(serde_json::to_string_pretty(&report)?)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default()
}
