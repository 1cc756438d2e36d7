use std::path::Path;
use std::sync::Arc;

use application::rule_set_service_impl::RuleSetAppService;
use infrastructure::config::AgentConfig;
use tokio::sync::RwLock;
use tokio_util::sync::CancellationToken;

/// Spawn a background task that reloads the config file on SIGHUP.
///
/// Returns the `JoinHandle` so the caller can await cleanup on shutdown.
pub fn spawn_reload_task(
    config_path: String,
    rule_set: Arc<RwLock<RuleSetAppService>>,
    cancel_token: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        #[cfg(unix)]
        {
            let mut sighup =
                match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::hangup()) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!(error = %e, "failed to install SIGHUP handler, reload disabled");
                        cancel_token.cancelled().await;
                        return;
                    }
                };

            loop {
                tokio::select! {
                    () = cancel_token.cancelled() => break,
                    _ = sighup.recv() => {
                        tracing::info!("SIGHUP received, reloading configuration");
                    }
                }
                perform_reload(&config_path, &rule_set).await;
            }
        }

        #[cfg(not(unix))]
        {
            let _ = (&config_path, &rule_set);
            cancel_token.cancelled().await;
        }

        tracing::info!("config reload task stopped");
    })
}

/// Load the config file and apply it. Failures keep the running rule set.
async fn perform_reload(config_path: &str, rule_set: &RwLock<RuleSetAppService>) {
    // Parse and validate outside the lock.
    let config = match AgentConfig::load(Path::new(config_path)) {
        Ok(c) => c,
        Err(e) => {
            tracing::warn!(path = %config_path, error = %e, "config reload rejected");
            return;
        }
    };

    let mut guard = rule_set.write().await;
    match apply_config(&mut guard, &config) {
        Ok(()) => tracing::info!(
            rules = guard.rule_count(),
            generation = guard.generation(),
            "configuration reloaded"
        ),
        Err(e) => tracing::warn!(error = %e, "config reload failed, previous rules kept"),
    }
}

/// Replace the rule list and bring the enabled interfaces in line with
/// `config`.
///
/// Chain settings (capacity, growth, empty-table policy) only apply at
/// startup.
pub fn apply_config(rule_set: &mut RuleSetAppService, config: &AgentConfig) -> anyhow::Result<()> {
    rule_set.reload_rules(config.domain_rules()?)?;

    let current = rule_set.interfaces().to_vec();
    for interface in current
        .iter()
        .filter(|i| !config.agent.interfaces.contains(i))
    {
        rule_set.disable_interface(*interface)?;
    }
    for interface in config
        .agent
        .interfaces
        .iter()
        .filter(|i| !current.contains(i))
    {
        rule_set.enable_interface(*interface)?;
    }
    Ok(())
}
