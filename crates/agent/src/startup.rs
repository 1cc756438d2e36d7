use std::path::Path;
use std::sync::Arc;

use adapters::classifier::{InMemoryClassifier, InterfaceRegistry};
use application::packet_pipeline::PacketPipeline;
use application::rule_set_service_impl::RuleSetAppService;
use application::table_chain::TableChain;
use infrastructure::config::AgentConfig;
use infrastructure::constants::{
    GRACEFUL_SHUTDOWN_TIMEOUT, OUTPUT_CHANNEL_CAPACITY, PACKET_CHANNEL_CAPACITY,
};
use infrastructure::logging::init_logging;
use infrastructure::metrics::EngineMetrics;
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::{RwLock, mpsc};
use tracing::{info, warn};

use crate::cli::Cli;
use crate::packet_io;
use crate::reload::spawn_reload_task;
use crate::shutdown::create_shutdown_token;

/// Everything a command needs to evaluate packets against the configured
/// rules.
pub struct Engine {
    pub rule_set: Arc<RwLock<RuleSetAppService>>,
    pub pipeline: PacketPipeline,
    pub metrics: Arc<EngineMetrics>,
}

/// Load the config and install the logging subscriber.
///
/// CLI flags take precedence over the config file.
pub fn load_config(cli: &Cli) -> anyhow::Result<AgentConfig> {
    let config = AgentConfig::load(Path::new(&cli.config))?;
    let log_level = cli.log_level.unwrap_or(config.agent.log_level);
    let log_format = cli.log_format.unwrap_or(config.agent.log_format);
    init_logging(log_level, log_format)?;

    info!(
        config_path = %cli.config,
        log_level = log_level.as_str(),
        log_format = log_format.as_str(),
        rule_count = config.rules.len(),
        "configuration loaded"
    );
    Ok(config)
}

/// Build the classifier, the table chain and the rule set, install the
/// configured rules and enable the configured interfaces.
pub fn build_engine(config: &AgentConfig) -> anyhow::Result<Engine> {
    let metrics = Arc::new(EngineMetrics::new());

    let chain = TableChain::new(
        Box::new(InMemoryClassifier::new()),
        Box::new(InterfaceRegistry::new()),
        config.chain_settings(),
    );
    let mut rule_set = RuleSetAppService::new(chain, Arc::clone(&metrics) as Arc<dyn MetricsPort>);

    rule_set.reload_rules(config.domain_rules()?)?;
    for &interface in &config.agent.interfaces {
        rule_set.enable_interface(interface)?;
    }
    info!(
        rule_count = rule_set.rule_count(),
        tables = rule_set.tables().len(),
        interfaces = rule_set.interfaces().len(),
        active = rule_set.is_active(),
        generation = rule_set.generation(),
        "rule engine initialized"
    );

    let pipeline = PacketPipeline::new(rule_set.reader(), Arc::clone(&metrics) as Arc<dyn MetricsPort>);
    Ok(Engine {
        rule_set: Arc::new(RwLock::new(rule_set)),
        pipeline,
        metrics,
    })
}

/// Run the agent: process packets from stdin until EOF or a shutdown
/// signal.
pub async fn run(cli: &Cli, batch_size: usize, dump_metrics: bool) -> anyhow::Result<()> {
    // ── 1. Config, logging, engine ──────────────────────────────────
    let config = load_config(cli)?;

    let _root_span = tracing::span!(
        tracing::Level::INFO,
        "service",
        service.name = "mmb",
        service.version = env!("CARGO_PKG_VERSION"),
    )
    .entered();

    let engine = build_engine(&config)?;
    let cancel_token = create_shutdown_token();

    // ── 2. Config reload on SIGHUP ──────────────────────────────────
    let reload_handle = spawn_reload_task(
        cli.config.clone(),
        Arc::clone(&engine.rule_set),
        cancel_token.clone(),
    );

    // ── 3. Packet worker ────────────────────────────────────────────
    let (job_tx, job_rx) = mpsc::channel(PACKET_CHANNEL_CAPACITY);
    let (out_tx, out_rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
    let worker_handle = tokio::spawn(engine.pipeline.clone().run(job_rx, out_tx, cancel_token.clone()));
    let writer_handle = tokio::spawn(packet_io::write_verdicts(out_rx, tokio::io::stdout()));

    info!(batch_size, "mmb agent started, reading packets from stdin");

    // ── 4. Feed stdin until EOF or shutdown ─────────────────────────
    packet_io::read_packets(tokio::io::stdin(), job_tx, batch_size.max(1), cancel_token.clone()).await;

    // ── 5. Graceful shutdown ────────────────────────────────────────
    let drained = tokio::time::timeout(GRACEFUL_SHUTDOWN_TIMEOUT, async {
        let _ = worker_handle.await;
        let _ = writer_handle.await;
    })
    .await;
    if drained.is_err() {
        warn!(
            timeout_secs = GRACEFUL_SHUTDOWN_TIMEOUT.as_secs(),
            "packet pipeline did not drain in time"
        );
    }
    cancel_token.cancel();
    let _ = reload_handle.await;

    if dump_metrics {
        eprint!("{}", engine.metrics.encode()?);
    }
    info!("mmb agent stopped");
    Ok(())
}
