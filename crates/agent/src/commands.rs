use application::packet_pipeline::ProcessedPacket;
use application::rule_set_service_impl::RuleSetAppService;
use infrastructure::config::AgentConfig;

use crate::packet_io::{format_processed, parse_packet_line};
use crate::startup::build_engine;

/// Render the installed rules and the table chain.
pub fn render_rule_set(rule_set: &RuleSetAppService) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "rules: {} (generation {}, {})\n",
        rule_set.rule_count(),
        rule_set.generation(),
        if rule_set.is_active() { "active" } else { "inactive" },
    ));
    for line in rule_set.describe_rules() {
        out.push_str("  ");
        out.push_str(&line);
        out.push('\n');
    }

    out.push_str(&format!("tables: {}\n", rule_set.tables().len()));
    for table in rule_set.tables() {
        let next = table
            .next
            .map_or_else(|| "-".to_string(), |h| h.to_string());
        out.push_str(&format!(
            "  {} skip={} match={} entries={}/{} next={} mask={}\n",
            table.handle,
            table.skip,
            table.match_len,
            table.entry_count,
            table.capacity,
            next,
            hex::encode(&table.mask),
        ));
    }

    let interfaces: Vec<String> = rule_set.interfaces().iter().map(ToString::to_string).collect();
    out.push_str(&format!("interfaces: [{}]\n", interfaces.join(", ")));
    if rule_set.any_rule_uses_tcp_options() {
        out.push_str("tcp options: in use\n");
    }
    out
}

/// `check`: build the engine from `config` and describe the result.
pub async fn cmd_check(config: &AgentConfig) -> anyhow::Result<()> {
    let engine = build_engine(config)?;
    print!("{}", render_rule_set(&*engine.rule_set.read().await));
    Ok(())
}

/// Evaluate one packet against the rules in `config`.
pub fn eval_packet(
    config: &AgentConfig,
    packet_hex: &str,
    ingress: Option<u32>,
) -> anyhow::Result<ProcessedPacket> {
    let engine = build_engine(config)?;
    let mut job = parse_packet_line(packet_hex).map_err(anyhow::Error::msg)?;
    job.ingress = ingress;
    let outcome = engine.pipeline.process(job.ingress, &mut job.packet);
    Ok(ProcessedPacket { job, outcome })
}

/// `eval`: print the verdict line for one packet.
pub fn cmd_eval(config: &AgentConfig, packet_hex: &str, ingress: Option<u32>) -> anyhow::Result<()> {
    let processed = eval_packet(config, packet_hex, ingress)?;
    println!("{}", format_processed(&processed));
    Ok(())
}
