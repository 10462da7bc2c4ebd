//! One quota-gated emotion analysis of a still image.
//! Run with: cargo run --bin portfolio-emotion -- <image>
//!
//! Usage is recorded in `PORTFOLIO_QUOTA_FILE` (default `portfolio_quota.json`).

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, bail};
use portfolio_client::capture::{AnalysisResult, StillImageCamera};
use portfolio_client::start_portfolio_client::{self, PortfolioClient};

fn print_result(result: &AnalysisResult, used: u32, max: u32) {
    match result.dominant() {
        Some(dominant) => println!(
            "{} {} ({:.1}%)",
            dominant.emoji, dominant.kind, dominant.confidence
        ),
        None => println!("Aucune émotion dominante"),
    }
    for emotion in result.ranked_emotions() {
        println!("  {:<10} {:>5.1}%", emotion.kind, emotion.confidence);
    }

    let face = &result.face_info;
    if let (Some(low), Some(high)) = (face.age_range.low, face.age_range.high) {
        println!("Âge estimé : {low}-{high} ans");
    }
    if let Some(gender) = &face.gender {
        println!("Genre : {gender} ({:.1}%)", face.gender_confidence);
    }
    println!(
        "Sourire : {} | Lunettes : {} | Visages : {}",
        if face.smile { "oui" } else { "non" },
        if face.eyeglasses { "oui" } else { "non" },
        result.faces_detected
    );
    println!("Analyses utilisées aujourd'hui : {used}/{max}");
}

async fn analyse(client: PortfolioClient, image: String) -> anyhow::Result<()> {
    let capture = client.emotion_capture_with_file(Arc::new(StillImageCamera::new(image)));

    if let Err(reason) = capture.request_start().await {
        let message = capture
            .snapshot()
            .error
            .unwrap_or_else(|| reason.to_string());
        bail!("{message}");
    }

    let outcome = capture.capture().await;
    let snapshot = capture.snapshot();
    let _ = capture.stop();

    match outcome {
        Ok(result) => {
            print_result(&result, snapshot.daily_usage, snapshot.max_daily_uses);
            Ok(())
        }
        Err(err) => bail!("{}", err.user_message()),
    }
}

fn main() -> ExitCode {
    start_portfolio_client::init_tracing();

    let Some(image) = std::env::args().nth(1) else {
        eprintln!("usage: portfolio-emotion <image>");
        return ExitCode::from(2);
    };

    let client = match start_portfolio_client::load_config()
        .context("invalid configuration")
        .and_then(|config| PortfolioClient::new(config).context("failed to build client"))
    {
        Ok(client) => client,
        Err(e) => {
            tracing::error!("{e:#}");
            return ExitCode::from(1);
        }
    };

    let rt = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!("Failed to create runtime: {e}");
            return ExitCode::from(1);
        }
    };

    if let Err(e) = rt.block_on(analyse(client, image)) {
        eprintln!("{e}");
        return ExitCode::from(1);
    }

    ExitCode::SUCCESS
}
