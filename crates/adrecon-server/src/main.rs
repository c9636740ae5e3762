use std::sync::Arc;

use anyhow::Result;
use tracing::info;

use adrecon_core::config::Config;
use adrecon_core::rules::RuleSet;
use adrecon_server::state::AppState;

/// `adrecon health`: liveness check for Docker HEALTHCHECK.
///
/// Calls `GET http://localhost:$ADRECON_PORT/health`.
/// Exits 0 if the server responds with HTTP 200, exits 1 otherwise.
fn run_health_check() -> ! {
    let port = std::env::var("ADRECON_PORT").unwrap_or_else(|_| "3000".to_string());
    let url = format!("http://localhost:{}/health", port);
    match ureq::get(&url).call() {
        Ok(resp) if resp.status() == 200 => std::process::exit(0),
        _ => std::process::exit(1),
    }
}

fn load_rules(cfg: &Config) -> Result<RuleSet> {
    match &cfg.attribution_rules_path {
        Some(path) => {
            let rules = RuleSet::load(path)
                .map_err(|e| anyhow::anyhow!("failed to load attribution rules from {path}: {e}"))?;
            info!(path = %path, rules = rules.rules().len(), "Attribution rules loaded");
            Ok(rules)
        }
        None => {
            info!("ADRECON_ATTRIBUTION_RULES not set, using built-in attribution rules");
            Ok(RuleSet::builtin())
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args: Vec<String> = std::env::args().collect();
    if args.get(1).map(|s| s.as_str()) == Some("health") {
        run_health_check();
    }
    // Structured JSON logging. Level controlled via RUST_LOG.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("adrecon=info".parse()?),
        )
        .json()
        .init();

    let cfg = Config::from_env().map_err(|e| anyhow::anyhow!(e))?;
    let rules = load_rules(&cfg)?;

    let state = Arc::new(AppState::new(cfg.clone(), rules));
    let addr = format!("0.0.0.0:{}", cfg.port);
    let app = adrecon_server::app::build_app(Arc::clone(&state));

    info!(
        port = cfg.port,
        timezone = %cfg.timezone,
        week_start = %cfg.engine.week_start,
        "adrecon listening on {}",
        addr
    );

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            tokio::signal::ctrl_c().await.ok();
        })
        .await?;

    Ok(())
}
