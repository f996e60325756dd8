use serde::Serialize;
use std::collections::BTreeMap;
use std::ops::AddAssign;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RuleStats {
    pub rule_name: String,
    pub matches: u64,
    pub deletes: u64,
}

/// Counters for one pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PassStats {
    pub processed: u64,
    pub matched: u64,
    /// Unmatched messages that raised phishing indicators.
    pub flagged: u64,
    pub deleted: u64,
    /// Safe-listed messages returned to the inbox.
    pub restored: u64,
    pub failed: u64,
}

impl AddAssign for PassStats {
    fn add_assign(&mut self, other: PassStats) {
        self.processed += other.processed;
        self.matched += other.matched;
        self.flagged += other.flagged;
        self.deleted += other.deleted;
        self.restored += other.restored;
        self.failed += other.failed;
    }
}

#[derive(Debug, Clone)]
pub enum StatEvent {
    Processed,
    RuleMatch { rule_name: String, deleted: bool },
    Flagged,
    Deleted,
    Restored,
    Failed,
}

/// Collects counters for a single pass.
#[derive(Debug, Default)]
pub struct StatisticsCollector {
    pass: PassStats,
    rules: BTreeMap<String, RuleStats>,
}

impl StatisticsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_event(&mut self, event: StatEvent) {
        match event {
            StatEvent::Processed => self.pass.processed += 1,
            StatEvent::RuleMatch { rule_name, deleted } => {
                let stats = self
                    .rules
                    .entry(rule_name.clone())
                    .or_insert_with(|| RuleStats {
                        rule_name,
                        ..Default::default()
                    });
                stats.matches += 1;
                if deleted {
                    stats.deletes += 1;
                }
            }
            StatEvent::Flagged => self.pass.flagged += 1,
            StatEvent::Deleted => self.pass.deleted += 1,
            StatEvent::Restored => self.pass.restored += 1,
            StatEvent::Failed => self.pass.failed += 1,
        }
    }

    /// Count a message that matched at least one rule.
    pub fn record_matched(&mut self) {
        self.pass.matched += 1;
    }

    pub fn pass_stats(&self) -> PassStats {
        self.pass
    }

    /// Per-rule counters, ordered by rule name.
    pub fn rule_stats(&self) -> Vec<RuleStats> {
        self.rules.values().cloned().collect()
    }

    /// Names from `all_rule_names` that matched nothing this pass.
    pub fn unmatched_rules(&self, all_rule_names: &[String]) -> Vec<String> {
        all_rule_names
            .iter()
            .filter(|name| !self.rules.contains_key(*name))
            .cloned()
            .collect()
    }
}

/// Counters for both passes of a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub first_pass: PassStats,
    pub second_pass: PassStats,
}

impl RunSummary {
    pub fn total(&self) -> PassStats {
        let mut total = self.first_pass;
        total += self.second_pass;
        total
    }

    pub fn log(&self) {
        for (label, stats) in [
            ("Pass 1", self.first_pass),
            ("Pass 2", self.second_pass),
            ("Total", self.total()),
        ] {
            log::info!(
                "{label}: processed {}, flagged {}, deleted {}, restored {}, failed {}",
                stats.processed,
                stats.flagged,
                stats.deleted,
                stats.restored,
                stats.failed
            );
        }
    }
}
