// Runner binary: executes one configured transfer action

use anyhow::Result;
use ftp_actions::action::build_action;
use ftp_actions::config::Settings;
use ftp_actions::context::ActionContext;
use ftp_actions::session::DefaultSessionFactory;
use ftp_actions::store::LocalFileStore;
use ftp_actions::telemetry;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};

#[tokio::main]
async fn main() -> Result<()> {
    // Optional explicit config file, layered above config/default.toml and config/local.toml
    let explicit_file = std::env::args().nth(1).map(PathBuf::from);

    let settings = Settings::load_from_path("config", explicit_file.as_deref())
        .map_err(|e| anyhow::anyhow!("Configuration error: {}", e))?;
    settings
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    telemetry::init_logging(&settings.observability.log_level)?;
    if let Some(port) = settings.observability.metrics_port {
        telemetry::init_metrics(port)?;
    }

    info!(action = settings.action.name(), "Starting FTP action runner");

    let action = build_action(
        settings.action,
        Arc::new(DefaultSessionFactory),
        Arc::new(LocalFileStore::new()),
        settings.connection.connect_timeout_seconds,
    );
    let mut ctx = ActionContext::with_variables(settings.variables);

    // Transfers are blocking I/O; keep them off the async workers.
    let (ctx, result) = tokio::task::spawn_blocking(move || {
        let result = action.run(&mut ctx);
        (ctx, result)
    })
    .await?;

    for outcome in &ctx.outcomes {
        info!(outcome = %serde_json::to_string(outcome)?, "Action outcome");
    }

    match result {
        Ok(()) => {
            info!(
                execution_id = %ctx.execution_id,
                variables = %serde_json::to_string(&ctx.variables)?,
                "Action finished successfully"
            );
            Ok(())
        }
        Err(e) => {
            error!(execution_id = %ctx.execution_id, error = %e, kind = e.kind(), "Action failed");
            Err(e.into())
        }
    }
}
