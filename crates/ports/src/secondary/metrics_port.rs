// Focused sub-traits for recording Prometheus metrics.
//
// All methods take `&self` because the underlying implementation uses
// atomic operations (interior mutability via `prometheus-client`).
//
// Default implementations are no-ops, allowing test mocks to implement
// only the sub-traits relevant to the service under test.

// ── Packet path metrics ────────────────────────────────────────────

pub trait PacketMetrics: Send + Sync {
    /// Record a processed packet with its verdict (`forward` / `drop`) and
    /// whether a rule matched.
    fn record_packet(&self, _verdict: &str, _matched: bool) {}

    /// Record a packet that could not be parsed as IPv4/IPv6.
    fn record_packet_error(&self) {}
}

// ── Rule set / table chain metrics ─────────────────────────────────

pub trait RuleMetrics: Send + Sync {
    /// Set the number of installed rules.
    fn set_rules_loaded(&self, _count: u64) {}

    /// Set the number of classifier tables in the chain.
    fn set_tables(&self, _count: u64) {}

    /// Record a table replaced by a larger one.
    fn record_table_growth(&self) {}

    /// Record a rule rejected at validation, compilation or placement.
    fn record_rule_rejected(&self, _reason: &str) {}
}

// ── Composite super-trait ──────────────────────────────────────────

/// Unified metrics port composing the sub-traits.
///
/// Services accept `Arc<dyn MetricsPort>`.
pub trait MetricsPort: PacketMetrics + RuleMetrics {}

/// Blanket implementation: any type implementing all sub-traits automatically
/// implements `MetricsPort`.
impl<T> MetricsPort for T where T: PacketMetrics + RuleMetrics {}
