// src/main.rs

use std::process::ExitCode;

use tracing::error;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

mod config;
mod error;
mod handoff;
mod orchestrator;
mod sys;

use crate::config::{Paths, SetupConfig};
use crate::error::SetupError;
use crate::handoff::Handoff;
use crate::orchestrator::Orchestrator;
use crate::sys::secrets::Environment;

// ==============================================================================
// 1. Logging
// ==============================================================================

/// `RUST_LOG` wins; otherwise `DEBUG_MODE=true` raises the default to debug.
/// `LOG_FORMAT=json` switches to one JSON object per line.
fn init_tracing(env: &Environment) {
    let level = if env.flag("DEBUG_MODE") { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let result = if env.get("LOG_FORMAT") == Some("json") {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(false))
            .try_init()
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(false))
            .try_init()
    };
    if let Err(e) = result {
        eprintln!("failed to install tracing subscriber: {e}");
    }
}

// ==============================================================================
// 2. Setup Pipeline & Handoff
// ==============================================================================

async fn prepare(env: Environment, paths: Paths) -> Result<Environment, SetupError> {
    let config = SetupConfig::resolve(env, paths)?;
    let prepared = Orchestrator::new(config).run().await?;
    Ok(prepared.env)
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let env = Environment::capture();
    init_tracing(&env);

    let args: Vec<String> = std::env::args().skip(1).collect();
    let paths = Paths::default();
    let handoff = Handoff::decide(&args, &paths);

    let env = match prepare(env, paths).await {
        Ok(env) => env,
        Err(e) => {
            error!("**** {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Only returns if the exec itself failed.
    let err = handoff.execute(&env);
    error!("**** {}", err);
    ExitCode::FAILURE
}
