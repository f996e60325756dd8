//! Two-pass sweep over the configured bulk folders.
//!
//! Pass 1 classifies and acts on a fresh enumeration, reports what was left
//! over and optionally lets a [`CorpusEditor`] change the corpus. Pass 2 is
//! unconditional: it enumerates every folder again and recompiles the corpus,
//! so edits made in between reach messages pass 1 left alone. Message
//! snapshots from pass 1 are never reused because a mutating call may have
//! invalidated them.

use crate::config::SweepConfig;
use crate::corpus::CorpusStore;
use crate::engine::{ClassificationEngine, EngineOptions};
use crate::error::{MailboxError, Result, SweepError};
use crate::indicators;
use crate::mailbox::{Mailbox, Message};
use crate::report::{self, MatchInfo};
use crate::retry::with_retry_if;
use crate::review::{review_unmatched, CorpusEditor};
use crate::rules::{RuleSet, SafeSenderList};
use crate::statistics::{PassStats, RuleStats, RunSummary, StatEvent, StatisticsCollector};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    First,
    Second,
}

impl Pass {
    fn number(self) -> u8 {
        match self {
            Pass::First => 1,
            Pass::Second => 2,
        }
    }
}

/// Everything one pass produced.
#[derive(Debug, Clone)]
pub struct PassReport {
    pub pass: Pass,
    pub infos: Vec<MatchInfo>,
    pub stats: PassStats,
    pub rule_stats: Vec<RuleStats>,
}

impl PassReport {
    pub fn log(&self) {
        let pass = self.pass.number();
        for line in report::from_domain_report(&self.infos) {
            log::info!("[pass {pass}] {line}");
        }
        for line in report::url_report(&self.infos) {
            log::info!("[pass {pass}] {line}");
        }
        log::info!(
            "Pass {pass}: {} unique from-domains, {} unique URL stubs",
            report::unique_from_domains(&self.infos).len(),
            report::unique_url_stubs(&self.infos).len()
        );
        for stats in &self.rule_stats {
            log::info!(
                "Pass {pass}: rule '{}' matched {} messages, deleted {}",
                stats.rule_name,
                stats.matches,
                stats.deletes
            );
        }
    }
}

pub struct Orchestrator<'a> {
    config: &'a SweepConfig,
}

impl<'a> Orchestrator<'a> {
    pub fn new(config: &'a SweepConfig) -> Self {
        Orchestrator { config }
    }

    /// Run both passes. `editor` is consulted between them; accepted edits
    /// are persisted through `store` as they happen.
    pub fn run<M: Mailbox + ?Sized>(
        &self,
        mailbox: &mut M,
        rules: &mut RuleSet,
        safe: &mut SafeSenderList,
        editor: Option<&mut dyn CorpusEditor>,
        store: Option<&CorpusStore>,
    ) -> Result<RunSummary> {
        let first = self.run_pass(Pass::First, mailbox, rules, safe)?;
        first.log();

        if let Some(editor) = editor {
            review_unmatched(&first.infos, rules, safe, self.config, editor, store);
        }

        let second = self.run_pass(Pass::Second, mailbox, rules, safe)?;
        second.log();

        let summary = RunSummary {
            first_pass: first.stats,
            second_pass: second.stats,
        };
        summary.log();
        Ok(summary)
    }

    /// Enumerate every target folder, then classify and act on each message.
    pub fn run_pass<M: Mailbox + ?Sized>(
        &self,
        pass: Pass,
        mailbox: &mut M,
        rules: &RuleSet,
        safe: &SafeSenderList,
    ) -> Result<PassReport> {
        log::info!("Starting pass {}", pass.number());
        let engine = ClassificationEngine::new(
            rules,
            safe,
            EngineOptions {
                inbox_folder: self.config.inbox_folder.clone(),
                retry: self.config.retry.clone(),
            },
        );

        let messages = self.enumerate_targets(pass, mailbox)?;
        let mut collector = StatisticsCollector::new();
        let mut infos = Vec::with_capacity(messages.len());

        for message in &messages {
            let info = self.process_message(&engine, mailbox, message, &mut collector);
            infos.push(info);
        }

        let all_rules: Vec<String> = rules.rules().map(|r| r.name.clone()).collect();
        let idle = collector.unmatched_rules(&all_rules);
        if !idle.is_empty() {
            log::debug!("Rules with no matches in pass {}: {idle:?}", pass.number());
        }

        Ok(PassReport {
            pass,
            infos,
            stats: collector.pass_stats(),
            rule_stats: collector.rule_stats(),
        })
    }

    fn process_message<M: Mailbox + ?Sized>(
        &self,
        engine: &ClassificationEngine,
        mailbox: &mut M,
        message: &Message,
        collector: &mut StatisticsCollector,
    ) -> MatchInfo {
        let mut info = MatchInfo::new(message);
        log::info!(
            "Processing {} | from: {} | subject: {}",
            info.message,
            info.sender,
            info.subject
        );
        collector.record_event(StatEvent::Processed);

        let decision = engine.evaluate(message);
        info.record_decision(&decision);

        match engine.apply(mailbox, &info.message, &decision) {
            Ok(applied) => {
                info.record_applied(&applied);
                if applied.restored {
                    collector.record_event(StatEvent::Restored);
                }
                if applied.deleted {
                    collector.record_event(StatEvent::Deleted);
                }
            }
            Err(e) => {
                log::error!("Failed to act on {}: {e}", info.message);
                info.error = Some(e.to_string());
                collector.record_event(StatEvent::Failed);
            }
        }

        if info.matched {
            collector.record_matched();
            for rule_name in &info.matched_rules {
                collector.record_event(StatEvent::RuleMatch {
                    rule_name: rule_name.clone(),
                    deleted: info.deleted && info.rule.as_ref() == Some(rule_name),
                });
            }
        }

        if !info.matched && !info.safe && !info.deleted {
            info.phishing_indicators = indicators::check(message);
            if info.is_flagged() {
                log::info!("Phishing indicators: {:?}", info.phishing_indicators);
                collector.record_event(StatEvent::Flagged);
            }
        }

        info.processed = true;
        info
    }

    /// Fresh enumeration of all target folders, flattened in folder order
    /// with each folder most recent first. A missing folder is fatal in
    /// pass 1 unless `test_mode` is set; pass 2 always skips it.
    fn enumerate_targets<M: Mailbox + ?Sized>(
        &self,
        pass: Pass,
        mailbox: &mut M,
    ) -> Result<Vec<Message>> {
        let since = self.config.since();
        let mut messages = Vec::new();

        for folder in &self.config.target_folders {
            let label = format!("enumerate {folder}");
            let found = with_retry_if(
                &label,
                &self.config.retry,
                MailboxError::is_transient,
                || mailbox.enumerate(folder, since),
            );
            match found {
                Ok(found) => {
                    log::info!("Found {} messages in '{folder}'", found.len());
                    messages.extend(found);
                }
                Err(e) if pass == Pass::Second || self.config.test_mode => {
                    log::warn!("Skipping folder '{folder}': {e}");
                }
                Err(MailboxError::FolderNotFound(name)) => {
                    return Err(SweepError::FolderNotFound(name));
                }
                Err(e) => return Err(e.into()),
            }
        }

        if let Some(cap) = self.config.max_messages_per_pass {
            if messages.len() > cap {
                log::info!("Limiting pass {} to {cap} messages", pass.number());
                messages.truncate(cap);
            }
        }
        Ok(messages)
    }
}
