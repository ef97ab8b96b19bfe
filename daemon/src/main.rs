use anyhow::Result;
use aura_daemon::{
    advisory::{AdvisoryCache, CachedAdvisor, ThresholdAdvisor},
    audit::AuditLog,
    classifier::Classifier,
    collector::LinuxProcTable,
    config::Config,
    daemon::{decision_loop, DaemonState, ReviewSettings},
    executor::Terminator,
    notifier::Notifier,
    safety::SafetyManager,
    scanner::Scanner,
    socket::{handle_client, SocketServer},
};
use std::sync::Arc;
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

/// Audit entries older than this are dropped at startup.
const AUDIT_RETENTION_DAYS: u32 = 30;

fn open_audit(config: &Config) -> Option<AuditLog> {
    let path = config.audit_path();
    let audit = AuditLog::open(&path).and_then(|audit| {
        audit.init_schema()?;
        Ok(audit)
    });
    match audit {
        Ok(audit) => {
            match audit.cleanup_older_than(AUDIT_RETENTION_DAYS) {
                Ok(0) => {}
                Ok(n) => info!("Pruned {} old audit entries", n),
                Err(e) => warn!("Audit cleanup failed: {}", e),
            }
            Some(audit)
        }
        Err(e) => {
            warn!("Audit log unavailable at {:?}: {}", path, e);
            None
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
    info!("Aura daemon starting...");

    let config_path = Config::config_path();
    let config = if config_path.exists() {
        Config::load(&config_path).unwrap_or_else(|e| {
            warn!("Failed to load config: {}, using defaults", e);
            Config::default()
        })
    } else {
        info!("No config file found, using defaults");
        Config::default()
    };

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let safety = Arc::new(SafetyManager::new(
        config.safety.protected_processes.iter().cloned(),
        config.safety.never_terminate.iter().cloned(),
        config.safety.consent_level,
    ));
    info!("Consent level: {}", safety.consent_level());

    let classifier = Classifier::with_protected(safety.protected_set());
    let scanner = Scanner::new(LinuxProcTable::new(), classifier);
    let snapshots = scanner.subscribe();

    let cache = Arc::new(AdvisoryCache::new(
        config.advisory.cache_size,
        config.advisory.cache_ttl(),
    ));
    let advisor = CachedAdvisor::new(
        Arc::new(ThresholdAdvisor::new(
            config.monitoring.cpu_threshold,
            config.monitoring.memory_threshold,
        )),
        cache,
    );
    let terminator = Terminator::new(Arc::clone(&safety), config.safety.terminate_timeout())
        .with_shutdown(shutdown_rx.clone());

    let audit = open_audit(&config);
    if let Some(audit) = &audit {
        if let Err(e) = audit.record_event("daemon_start", "daemon started") {
            warn!("Failed to record start: {}", e);
        }
    }

    let socket_path = SocketServer::socket_path();
    let server = SocketServer::bind(&socket_path).await?;

    let state = Arc::new(DaemonState::new(
        ReviewSettings::from_config(&config),
        snapshots.clone(),
        safety,
        terminator,
        advisor,
        audit,
        Notifier::new(config.notifications.desktop),
        server.broadcast_sender(),
    ));

    let scanner_task = tokio::spawn(scanner.run(
        config.monitoring.scan_interval(),
        shutdown_rx.clone(),
    ));
    let decision_task = tokio::spawn(decision_loop(Arc::clone(&state), snapshots, shutdown_rx));

    let mut sigterm = signal(SignalKind::terminate())?;

    info!("Daemon ready, listening for connections...");

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                info!("Interrupt received, shutting down");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, shutting down");
                break;
            }
            accepted = server.accept() => match accepted {
                Ok(stream) => {
                    let state = Arc::clone(&state);
                    let broadcast_rx = server.broadcast_sender().subscribe();
                    tokio::spawn(async move {
                        handle_client(stream, broadcast_rx, state).await;
                    });
                }
                Err(e) => {
                    error!("Failed to accept connection: {}", e);
                }
            }
        }
    }

    let _ = shutdown_tx.send(true);
    if let Err(e) = scanner_task.await {
        error!("Scanner task failed: {}", e);
    }
    if let Err(e) = decision_task.await {
        error!("Decision task failed: {}", e);
    }

    state.record_event("daemon_stop", "daemon stopped").await;
    info!("Aura daemon stopped");
    Ok(())
}
