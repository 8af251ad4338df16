use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{error, info, Level};
use tracing_subscriber::EnvFilter;

use clustercheck::config::Args;
use clustercheck::health::{HealthEvaluator, MySqlStatusSource};
use clustercheck::pool::{StatelessPool, StatelessPoolConfig};
use clustercheck::server;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(Level::INFO.into())
                .from_env_lossy(),
        )
        .init();

    let config = match Args::parse_args().into_config() {
        Ok(config) => config,
        Err(e) => {
            error!(error = %e, "Invalid configuration");
            return Err(e.into());
        }
    };

    let endpoint = config.backend.endpoint()?;
    let pool_config = StatelessPoolConfig::from(&config.pool);

    info!(
        endpoint = %endpoint,
        user = %config.backend.user,
        timeout_ms = config.backend.connect_timeout_ms,
        cleartext = config.backend.allow_cleartext_password,
        max_open = pool_config.max_open,
        max_idle = pool_config.max_idle,
        "Backend configured"
    );
    info!(
        donor = config.check.available_when_donor,
        readonly = config.check.available_when_readonly,
        failfile = %config.check.force_fail_file.display(),
        upfile = %config.check.force_up_file.display(),
        "Check policy configured"
    );

    let pool = StatelessPool::new(Arc::new(config.backend.clone()), endpoint, pool_config);
    let source = Arc::new(MySqlStatusSource::new(pool.clone()));
    let evaluator = Arc::new(HealthEvaluator::new(config.check.clone(), source));

    let listener = server::bind(&config.server).await?;

    info!(addr = %listener.local_addr()?, "Listening...");

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    tokio::spawn(async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
            return;
        }
        info!("Received shutdown signal");
        signal_token.cancel();
    });

    server::serve(listener, evaluator, shutdown).await?;
    pool.close_all().await;
    Ok(())
}
