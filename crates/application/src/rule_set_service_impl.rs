use std::collections::HashSet;
use std::sync::Arc;

use domain::common::error::DomainError;
use domain::compiler::error::CompileError;
use domain::compiler::{CompiledRule, compile};
use domain::rule::Rule;
use domain::table::{ChainError, ClassifierError, Table};
use ports::secondary::metrics_port::MetricsPort;
use tracing::{debug, error, info, warn};

use crate::snapshot::{RuleSnapshot, SnapshotReader, empty_reader};
use crate::table_chain::TableChain;

/// Control plane of the rule engine.
///
/// Owns the ordered rule list and the table chain, and is the only writer
/// of the published [`RuleSnapshot`]. Designed to be wrapped in `RwLock`
/// and driven from a single control task; packet workers only hold the
/// [`SnapshotReader`].
pub struct RuleSetAppService {
    chain: TableChain,
    rules: Vec<Arc<CompiledRule>>,
    generation: u64,
    snapshot: SnapshotReader,
    metrics: Arc<dyn MetricsPort>,
}

impl RuleSetAppService {
    pub fn new(chain: TableChain, metrics: Arc<dyn MetricsPort>) -> Self {
        Self {
            chain,
            rules: Vec::new(),
            generation: 0,
            snapshot: empty_reader(),
            metrics,
        }
    }

    /// Handle for packet workers.
    pub fn reader(&self) -> SnapshotReader {
        Arc::clone(&self.snapshot)
    }

    pub fn snapshot(&self) -> Arc<RuleSnapshot> {
        self.snapshot.load_full()
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The engine is active while at least one rule is installed.
    pub fn is_active(&self) -> bool {
        !self.rules.is_empty()
    }

    pub fn any_rule_uses_tcp_options(&self) -> bool {
        self.rules.iter().any(|r| r.rule.uses_tcp_options())
    }

    pub fn list_rules(&self) -> &[Arc<CompiledRule>] {
        &self.rules
    }

    /// One line per rule, numbered from 1.
    pub fn describe_rules(&self) -> Vec<String> {
        self.rules
            .iter()
            .enumerate()
            .map(|(i, r)| format!("{}: {}", i + 1, r.rule))
            .collect()
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }

    pub fn tables(&self) -> &[Table] {
        self.chain.tables()
    }

    pub fn interfaces(&self) -> &[u32] {
        self.chain.interfaces()
    }

    /// Append a rule. Returns its 1-based position.
    pub fn add_rule(&mut self, rule: Rule) -> Result<usize, DomainError> {
        self.insert_rule(self.rules.len() + 1, rule)
    }

    /// Insert a rule at a 1-based position, clamped into `[1, len + 1]`.
    /// Returns the position it was installed at.
    pub fn insert_rule(&mut self, position: usize, rule: Rule) -> Result<usize, DomainError> {
        let index = position.clamp(1, self.rules.len() + 1) - 1;
        let compiled = self.compile_rule(rule)?;
        self.install_at(index, compiled)?;
        info!(position = index + 1, rules = self.rules.len(), "rule installed");
        self.publish();
        Ok(index + 1)
    }

    /// Delete the rule at a 1-based position.
    pub fn delete_rule(&mut self, position: usize) -> Result<Rule, DomainError> {
        let Some(index) = position
            .checked_sub(1)
            .filter(|i| *i < self.rules.len())
        else {
            return Err(DomainError::RuleNotFound(position.to_string()));
        };
        let reclaimed = self.chain.remove(index)?;
        let removed = self.rules.remove(index);
        info!(position, reclaimed = ?reclaimed, rules = self.rules.len(), "rule deleted");
        self.publish();
        Ok(removed.rule.clone())
    }

    /// Remove every rule and table.
    pub fn flush(&mut self) -> Result<(), DomainError> {
        self.chain.flush()?;
        let count = self.rules.len();
        self.rules.clear();
        info!(count, "rules flushed");
        self.publish();
        Ok(())
    }

    /// Replace the whole rule list. Every rule is compiled and checked for
    /// duplicate classify keys before the current set is touched; if the
    /// backend still fails mid-install, the previous set is restored.
    pub fn reload_rules(&mut self, rules: Vec<Rule>) -> Result<(), DomainError> {
        let compiled = rules
            .into_iter()
            .map(|r| self.compile_rule(r))
            .collect::<Result<Vec<_>, _>>()?;

        if let Some(position) = first_duplicate(&compiled) {
            self.metrics.record_rule_rejected("duplicate");
            return Err(DomainError::DuplicateRule(format!(
                "rule {position} repeats an earlier classify key"
            )));
        }

        let previous = std::mem::take(&mut self.rules);
        self.chain.flush()?;
        if let Err(err) = self.install_all(compiled) {
            warn!(%err, "reload failed, restoring previous rules");
            self.chain.flush()?;
            self.rules.clear();
            if let Err(restore) = self.install_all(previous) {
                error!(%restore, "restoring previous rules failed");
            }
            self.publish();
            return Err(err);
        }
        info!(rules = self.rules.len(), "rules reloaded");
        self.publish();
        Ok(())
    }

    pub fn enable_interface(&mut self, interface: u32) -> Result<(), DomainError> {
        self.chain.enable_interface(interface)?;
        Ok(())
    }

    pub fn disable_interface(&mut self, interface: u32) -> Result<(), DomainError> {
        self.chain.disable_interface(interface)?;
        Ok(())
    }

    fn compile_rule(&self, rule: Rule) -> Result<Arc<CompiledRule>, DomainError> {
        match compile(rule) {
            Ok(compiled) => Ok(Arc::new(compiled)),
            Err(err @ CompileError::EmptyKey { .. }) => {
                error!(%err, "BUG: empty classify key");
                self.metrics.record_rule_rejected("compile");
                Err(err.into())
            }
        }
    }

    fn install_all(&mut self, rules: Vec<Arc<CompiledRule>>) -> Result<(), DomainError> {
        for rule in rules {
            self.install_at(self.rules.len(), rule)?;
        }
        Ok(())
    }

    fn install_at(&mut self, index: usize, rule: Arc<CompiledRule>) -> Result<(), DomainError> {
        match self.chain.place(index, &rule.classify) {
            Ok(report) => {
                if report.grown {
                    self.metrics.record_table_growth();
                }
                self.rules.insert(index, rule);
                Ok(())
            }
            Err(err) => {
                let reason = match &err {
                    ChainError::Classifier(ClassifierError::DuplicateSession { .. }) => "duplicate",
                    _ => "placement",
                };
                warn!(%err, rule = %rule.rule, "rule placement failed");
                self.metrics.record_rule_rejected(reason);
                Err(err.into())
            }
        }
    }

    fn publish(&mut self) {
        self.generation += 1;
        let snapshot = RuleSnapshot::new(self.generation, self.rules.clone());
        self.snapshot.store(Arc::new(snapshot));
        self.metrics.set_rules_loaded(self.rules.len() as u64);
        self.metrics.set_tables(self.chain.tables().len() as u64);
        debug!(generation = self.generation, "rule snapshot published");
    }
}

/// 1-based position of the first rule whose classify key repeats.
fn first_duplicate(rules: &[Arc<CompiledRule>]) -> Option<usize> {
    let mut seen = HashSet::with_capacity(rules.len());
    rules
        .iter()
        .position(|r| !seen.insert(&r.classify))
        .map(|i| i + 1)
}
