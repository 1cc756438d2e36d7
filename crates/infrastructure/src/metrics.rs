use ports::secondary::metrics_port::{PacketMetrics, RuleMetrics};
use prometheus_client::encoding::EncodeLabelSet;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

// ── Label types ─────────────────────────────────────────────────────

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct PacketLabels {
    pub verdict: String,
    pub matched: String,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq, EncodeLabelSet)]
pub struct ReasonLabels {
    pub reason: String,
}

// ── Engine metrics registry ─────────────────────────────────────────

/// Prometheus metrics registry for the rule engine.
///
/// All metric families use interior mutability (atomics), so recording
/// metrics only requires `&self`. Wrap in `Arc` to share between the
/// control plane and packet workers.
pub struct EngineMetrics {
    registry: Registry,
    pub packets_total: Family<PacketLabels, Counter>,
    pub packet_errors_total: Counter,
    pub rules_loaded: Gauge,
    pub tables: Gauge,
    pub table_growth_total: Counter,
    pub rules_rejected_total: Family<ReasonLabels, Counter>,
}

impl EngineMetrics {
    /// Create a registry with every metric under the `mmb` prefix.
    pub fn new() -> Self {
        let mut registry = Registry::with_prefix("mmb");

        let packets_total = Family::<PacketLabels, Counter>::default();
        registry.register(
            "packets",
            "Packets evaluated, by verdict and whether a rule matched",
            packets_total.clone(),
        );

        let packet_errors_total = Counter::default();
        registry.register(
            "packet_errors",
            "Packets that could not be parsed as IPv4 or IPv6",
            packet_errors_total.clone(),
        );

        let rules_loaded = Gauge::default();
        registry.register(
            "rules_loaded",
            "Number of installed rules",
            rules_loaded.clone(),
        );

        let tables = Gauge::default();
        registry.register(
            "tables",
            "Number of classifier tables in the chain",
            tables.clone(),
        );

        let table_growth_total = Counter::default();
        registry.register(
            "table_growth",
            "Full tables replaced by larger ones",
            table_growth_total.clone(),
        );

        let rules_rejected_total = Family::<ReasonLabels, Counter>::default();
        registry.register(
            "rules_rejected",
            "Rules rejected at compilation or placement",
            rules_rejected_total.clone(),
        );

        Self {
            registry,
            packets_total,
            packet_errors_total,
            rules_loaded,
            tables,
            table_growth_total,
            rules_rejected_total,
        }
    }

    /// Encode all registered metrics to `OpenMetrics` text format.
    pub fn encode(&self) -> Result<String, std::fmt::Error> {
        let mut buffer = String::new();
        prometheus_client::encoding::text::encode(&mut buffer, &self.registry)?;
        Ok(buffer)
    }
}

impl Default for EngineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

// ── Sub-trait implementations ──────────────────────────────────────

impl PacketMetrics for EngineMetrics {
    fn record_packet(&self, verdict: &str, matched: bool) {
        self.packets_total
            .get_or_create(&PacketLabels {
                verdict: verdict.to_string(),
                matched: matched.to_string(),
            })
            .inc();
    }

    fn record_packet_error(&self) {
        self.packet_errors_total.inc();
    }
}

#[allow(clippy::cast_possible_wrap)] // counts stay far below i64::MAX
impl RuleMetrics for EngineMetrics {
    fn set_rules_loaded(&self, count: u64) {
        self.rules_loaded.set(count as i64);
    }

    fn set_tables(&self, count: u64) {
        self.tables.set(count as i64);
    }

    fn record_table_growth(&self) {
        self.table_growth_total.inc();
    }

    fn record_rule_rejected(&self, reason: &str) {
        self.rules_rejected_total
            .get_or_create(&ReasonLabels {
                reason: reason.to_string(),
            })
            .inc();
    }
}

// MetricsPort is automatically implemented via the blanket impl
// since EngineMetrics implements all sub-traits.

#[cfg(test)]
mod tests {
    use super::*;
    use ports::secondary::metrics_port::MetricsPort;

    #[test]
    fn new_creates_valid_registry() {
        let metrics = EngineMetrics::new();
        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("# EOF"));
    }

    #[test]
    fn packet_counter_carries_labels() {
        let metrics = EngineMetrics::new();
        metrics.record_packet("drop", true);
        metrics.record_packet("forward", false);
        metrics.record_packet("forward", false);

        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("mmb_packets_total"));
        assert!(encoded.contains("verdict=\"drop\""));
        assert!(encoded.contains("matched=\"false\""));
    }

    #[test]
    fn gauges_appear_in_output() {
        let metrics = EngineMetrics::new();
        metrics.set_rules_loaded(42);
        metrics.set_tables(3);

        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("mmb_rules_loaded 42"));
        assert!(encoded.contains("mmb_tables 3"));
    }

    #[test]
    fn rejections_by_reason() {
        let metrics = EngineMetrics::new();
        metrics.record_rule_rejected("duplicate");
        metrics.record_table_growth();

        let encoded = metrics.encode().unwrap();
        assert!(encoded.contains("reason=\"duplicate\""));
        assert!(encoded.contains("mmb_table_growth_total 1"));
    }

    #[test]
    fn metrics_port_trait_impl() {
        let metrics = EngineMetrics::new();
        let port: &dyn MetricsPort = &metrics;
        port.record_packet("forward", true);
        port.record_packet_error();
        port.set_rules_loaded(5);
        port.set_tables(1);
        port.record_table_growth();
        port.record_rule_rejected("compile");
        assert_eq!(metrics.packet_errors_total.get(), 1);
    }
}
