use std::{path::PathBuf, sync::Arc, time::Duration};

use anyhow::Context as _;
use golubsmtpd::{gate, server};
use golubsmtpd_common::{aliases::AliasMap, auth, config::Config, logging, Signal};
use golubsmtpd_delivery::LogOnlyRelay;
use golubsmtpd_queue::{queue::QueueLimits, MessageQueue, Processor};
use golubsmtpd_smtp::{EmailValidator, RcptValidator, SessionContext};
use golubsmtpd_spool::Spool;
use tokio::{net::TcpListener, sync::broadcast};
use tracing::{error, info, warn};

const SHUTDOWN_DEADLINE: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::args().nth(1).map(PathBuf::from);
    let config = Arc::new(
        Config::load(config_path.as_deref()).context("failed to load configuration")?,
    );
    logging::init(&config.logging);

    let spool = Spool::new(&config.server.spool_dir);
    spool.init().context("failed to initialise spool")?;

    let aliases = load_aliases(&config);
    let authenticator =
        auth::from_config(&config.auth).context("failed to initialise authenticator")?;

    let (shutdown, _) = broadcast::channel::<Signal>(16);

    let processor = Processor::new(
        Arc::clone(&config),
        spool.clone(),
        Arc::new(LogOnlyRelay),
        shutdown.clone(),
    );
    let queue = Arc::new(MessageQueue::new(
        QueueLimits::from(&config.queue),
        processor,
    ));
    queue.start_consumer();

    let validator = Arc::new(RcptValidator::new(
        Arc::clone(&config),
        Arc::clone(&authenticator),
        aliases,
    ));

    let context = Arc::new(SessionContext {
        config: Arc::clone(&config),
        spool,
        queue: Arc::clone(&queue),
        validator: Arc::clone(&validator),
        email: EmailValidator::new(Arc::clone(&config)),
        authenticator: Arc::clone(&authenticator),
    });

    let address = format!("{}:{}", config.server.bind, config.server.port);
    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind {address}"))?;

    let server = Arc::new(server::Server::new(
        context,
        Arc::new(gate::AllowAllGate),
        shutdown.clone(),
    ));
    let server_task = tokio::spawn(Arc::clone(&server).serve(listener));

    wait_for_termination().await;
    info!("shutdown signal received");

    // Sessions and the listener stop first so no new work arrives, then
    // the queue drains, then the long-lived collaborators close.
    let _ = shutdown.send(Signal::Shutdown);

    if let Err(err) = queue.stop(SHUTDOWN_DEADLINE).await {
        error!(%err, "queue shutdown incomplete");
    }

    validator.close().await;
    authenticator.close().await;

    match tokio::time::timeout(SHUTDOWN_DEADLINE, server_task).await {
        Ok(joined) => {
            joined.context("server task panicked")??;
        }
        Err(_) => warn!("server shutdown timeout"),
    }

    info!("golubsmtpd stopped");
    Ok(())
}

fn load_aliases(config: &Config) -> Arc<AliasMap> {
    let path = &config.server.local_aliases_file;
    if path.is_empty() {
        info!("no local aliases file configured");
        return Arc::new(AliasMap::default());
    }

    match AliasMap::load(std::path::Path::new(path)) {
        Ok(aliases) => {
            info!(path, count = aliases.len(), "local aliases loaded");
            Arc::new(aliases)
        }
        Err(err) => {
            // Alias loading is non-critical; start without them.
            warn!(path, %err, "failed to load aliases file");
            Arc::new(AliasMap::default())
        }
    }
}

async fn wait_for_termination() {
    let mut terminate = match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
        Ok(terminate) => terminate,
        Err(err) => {
            error!(%err, "failed to install SIGTERM handler");
            let _ = tokio::signal::ctrl_c().await;
            return;
        }
    };

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {}
        _ = terminate.recv() => {}
    }
}
