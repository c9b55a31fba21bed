use std::{io::Read, path::PathBuf};

use anyhow::Context;
use judge_engine::{Judge, JudgeConfig, LogFormat, Submission};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = JudgeConfig::from_env();
    init_tracing(&config);

    let submission = read_submission(std::env::args_os().nth(1).map(PathBuf::from))?;
    let judge = Judge::from_config(config).context("failed to initialise judge")?;

    let shutdown = {
        let judge = judge.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                tracing::warn!("interrupt received, cancelling");
                judge.cancel_all();
            }
        })
    };

    let report = judge.evaluate(submission).await;
    shutdown.abort();

    let rendered =
        serde_json::to_string_pretty(&report).context("failed to serialize judge report")?;
    println!("{rendered}");
    tracing::debug!(metrics = %judge.metrics().render_prometheus(), "final metrics");
    Ok(())
}

fn read_submission(path: Option<PathBuf>) -> anyhow::Result<Submission> {
    let raw = match &path {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?,
        None => {
            let mut raw = String::new();
            std::io::stdin()
                .read_to_string(&mut raw)
                .context("failed to read submission from stdin")?;
            raw
        }
    };
    serde_json::from_str(&raw).context("invalid submission json")
}

fn init_tracing(config: &JudgeConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(config.log_level.clone()));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match config.log_format {
        LogFormat::Json => builder
            .json()
            .with_current_span(false)
            .with_span_list(false)
            .init(),
        LogFormat::Compact => builder.with_target(false).compact().init(),
    }
}
