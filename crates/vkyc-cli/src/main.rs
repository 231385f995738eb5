use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;
use vkyc_core::{VerificationResult, VerifyOptions};

#[derive(Parser)]
#[command(name = "vkyc", about = "vkyc face verification CLI")]
struct Cli {
    /// Talk to a daemon on the session bus instead of the system bus
    #[arg(long, global = true)]
    session: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check whether a customer's stored verification is still valid
    Check {
        /// First document number (e.g. national ID)
        doc_id_1: String,
        /// Second document number (e.g. tax ID)
        doc_id_2: String,
    },
    /// Verify a document photo against a video via the daemon
    Verify {
        reference: PathBuf,
        /// Video file or directory of frames
        video: PathBuf,
    },
    /// Record a verifier's decision from a JSON request file
    Finalize {
        request: PathBuf,
    },
    /// Show the verification history for a customer
    History {
        doc_id_1: String,
        doc_id_2: String,
    },
    /// Show daemon status
    Status,
    /// Run the verification locally without the daemon (diagnostics)
    Analyze {
        reference: PathBuf,
        /// Video file or directory of frames
        video: PathBuf,
        /// Directory containing the ONNX model files
        #[arg(long)]
        model_dir: Option<PathBuf>,
        /// Frames to read before stopping
        #[arg(long, default_value_t = vkyc_core::pipeline::DEFAULT_MAX_FRAMES)]
        max_frames: usize,
        /// Print the raw JSON result instead of a summary
        #[arg(long)]
        json: bool,
    },
}

#[zbus::proxy(
    interface = "org.vkyc.Verifier1",
    default_service = "org.vkyc.Verifier1",
    default_path = "/org/vkyc/Verifier1"
)]
trait Verifier {
    async fn check_revalidation(&self, doc_id_1: &str, doc_id_2: &str) -> zbus::Result<String>;
    async fn verify(&self, reference: &str, video: &str) -> zbus::Result<String>;
    async fn finalize(&self, request: &str) -> zbus::Result<String>;
    async fn history(&self, doc_id_1: &str, doc_id_2: &str) -> zbus::Result<String>;
    async fn status(&self) -> zbus::Result<String>;
}

async fn proxy(session: bool) -> Result<VerifierProxy<'static>> {
    let builder = if session {
        zbus::connection::Builder::session()?
    } else {
        zbus::connection::Builder::system()?
    };
    // Verify runs for as long as the daemon's own timeout allows.
    let conn = builder
        .method_timeout(Duration::from_secs(300))
        .build()
        .await
        .context("connecting to D-Bus (is vkycd running?)")?;
    Ok(VerifierProxy::new(&conn).await?)
}

/// Load the models in-process and run one verification.
async fn analyze(
    reference: PathBuf,
    video: PathBuf,
    model_dir: Option<PathBuf>,
    max_frames: usize,
    json: bool,
) -> Result<()> {
    let model_dir = model_dir.unwrap_or_else(vkyc_models::default_model_dir);
    let options = VerifyOptions {
        max_frames,
        ..VerifyOptions::default()
    };
    let result = tokio::task::spawn_blocking(move || -> Result<VerificationResult> {
        let models = vkyc_models::load_models(&model_dir, vkyc_models::DEFAULT_SMILE_RATIO)
            .with_context(|| format!("loading models from {}", model_dir.display()))?;
        Ok(vkyc_media::verify_files(&models, &reference, &video, &options))
    })
    .await??;

    if json {
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!("{}", summary(&result));
    }
    Ok(())
}

/// Pretty-print a JSON reply, falling back to the raw text.
fn print_json(reply: &str) {
    match serde_json::from_str::<serde_json::Value>(reply)
        .and_then(|value| serde_json::to_string_pretty(&value))
    {
        Ok(pretty) => println!("{pretty}"),
        Err(_) => println!("{reply}"),
    }
}

fn summary(result: &VerificationResult) -> String {
    let mut lines = vec![
        format!("Face match:   {} (score {:.3})", result.match_label, result.score),
        format!("Liveness:     {}", result.liveness_label),
        format!("Head angle:   {:.2}°", result.max_angle),
        format!("Smile:        {}", result.smile_text()),
        format!("Frames read:  {}", result.frames_processed),
    ];
    if let Some(error) = &result.error {
        lines.push(format!("Error:        {error}"));
    }
    lines.join("\n")
}

/// Absolute path for the daemon, which does not share our working directory.
fn path_arg(path: &std::path::Path) -> Result<String> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()?.join(path)
    };
    absolute
        .to_str()
        .map(str::to_string)
        .with_context(|| format!("path is not valid UTF-8: {}", absolute.display()))
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    let reply = match cli.command {
        Commands::Analyze {
            reference,
            video,
            model_dir,
            max_frames,
            json,
        } => return analyze(reference, video, model_dir, max_frames, json).await,
        Commands::Check { doc_id_1, doc_id_2 } => {
            proxy(cli.session).await?.check_revalidation(&doc_id_1, &doc_id_2).await?
        }
        Commands::Verify { reference, video } => {
            println!("Verifying {}...", video.display());
            proxy(cli.session)
                .await?
                .verify(&path_arg(&reference)?, &path_arg(&video)?)
                .await?
        }
        Commands::Finalize { request } => {
            let body = std::fs::read_to_string(&request)
                .with_context(|| format!("reading {}", request.display()))?;
            proxy(cli.session).await?.finalize(&body).await?
        }
        Commands::History { doc_id_1, doc_id_2 } => {
            proxy(cli.session).await?.history(&doc_id_1, &doc_id_2).await?
        }
        Commands::Status => proxy(cli.session).await?.status().await?,
    };
    print_json(&reply);

    Ok(())
}
