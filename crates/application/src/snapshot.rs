use std::sync::Arc;

use arc_swap::ArcSwap;
use domain::compiler::CompiledRule;
use domain::rule::Rule;

/// Immutable view of the rule set handed to packet workers.
///
/// Every successful control-plane mutation publishes a new snapshot with
/// a higher generation. Workers load one snapshot per packet batch and
/// keep using it until the batch is done, so a concurrent table growth or
/// rule deletion never changes the rules a batch is evaluated against.
#[derive(Debug, Clone, Default)]
pub struct RuleSnapshot {
    pub generation: u64,
    /// Whether at least one rule is installed.
    pub active: bool,
    pub rules: Vec<Arc<CompiledRule>>,
    pub any_rule_uses_tcp_options: bool,
}

impl RuleSnapshot {
    pub fn new(generation: u64, rules: Vec<Arc<CompiledRule>>) -> Self {
        Self {
            generation,
            active: !rules.is_empty(),
            any_rule_uses_tcp_options: rules.iter().any(|r| r.rule.uses_tcp_options()),
            rules,
        }
    }

    /// Rules in evaluation order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> + Clone {
        self.rules.iter().map(|r| &r.rule)
    }
}

/// Shared handle workers read snapshots from.
pub type SnapshotReader = Arc<ArcSwap<RuleSnapshot>>;

pub fn empty_reader() -> SnapshotReader {
    Arc::new(ArcSwap::from_pointee(RuleSnapshot::default()))
}
