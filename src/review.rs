//! Between-pass corpus review.
//!
//! Unmatched messages from pass 1 are offered to a [`CorpusEditor`], which
//! decides whether the sender should be blocked or trusted. Each accepted
//! edit is validated, applied to the in-memory corpus and persisted right
//! away so an interrupted session loses nothing.

use crate::config::SweepConfig;
use crate::corpus::CorpusStore;
use crate::domain_utils::DomainUtils;
use crate::patterns::{compile_many, glob_to_regex, match_any_candidate, CompiledPattern};
use crate::report::MatchInfo;
use crate::rules::{Rule, RuleEntry, RuleSet, SafeSenderList};

/// A change to the corpus chosen for one message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CorpusEdit {
    /// Add a header pattern to the suggestion rule.
    Block(String),
    /// Add a pattern to the safe list.
    Safe(String),
    Skip,
}

/// Ready-made patterns for one sender.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Suggestions {
    pub sender: String,
    pub from_domain: String,
    pub free_mail: bool,
    /// `d`: block the sender's organization. Same as `block_address` for
    /// free-mail senders.
    pub block_domain: String,
    /// `e`: block this exact address.
    pub block_address: String,
    /// `s`: trust the literal address (free mail) or `@domain`.
    pub safe_literal: String,
    /// `sd`: trust the registrable domain and all its subdomains.
    pub safe_domain: String,
}

impl Suggestions {
    pub fn for_sender(sender: &str, from_domain: &str, free_mail_domains: &[String]) -> Self {
        let sender = sender.trim().to_lowercase();
        let from_domain = from_domain.trim().to_lowercase();
        let domain_source = if from_domain.is_empty() {
            sender.as_str()
        } else {
            from_domain.as_str()
        };
        let free_mail = DomainUtils::extract_domain(domain_source)
            .map(|d| DomainUtils::matches_domain_list(&d, free_mail_domains))
            .unwrap_or(false);

        let block_address = format!("^{}$", regex::escape(&sender));
        let block_domain = if free_mail {
            block_address.clone()
        } else {
            DomainUtils::anchor_regex(domain_source)
        };
        let safe_literal = if free_mail || from_domain.is_empty() {
            glob_to_regex(&sender)
        } else {
            glob_to_regex(&from_domain)
        };

        Suggestions {
            block_domain,
            block_address,
            safe_literal,
            safe_domain: DomainUtils::sender_domain_safe_regex(domain_source),
            sender,
            from_domain,
            free_mail,
        }
    }

    /// Edit for one of the interactive keys `d`, `e`, `s`, `sd`.
    pub fn edit_for_key(&self, key: &str) -> Option<CorpusEdit> {
        match key {
            "d" => Some(CorpusEdit::Block(self.block_domain.clone())),
            "e" => Some(CorpusEdit::Block(self.block_address.clone())),
            "s" => Some(CorpusEdit::Safe(self.safe_literal.clone())),
            "sd" => Some(CorpusEdit::Safe(self.safe_domain.clone())),
            "" => Some(CorpusEdit::Skip),
            _ => None,
        }
    }
}

/// Decides what to do with each unmatched message.
pub trait CorpusEditor {
    fn review(&mut self, info: &MatchInfo, suggestions: &Suggestions) -> CorpusEdit;
}

/// Offer every reviewable message to `editor`. Returns the number of
/// edits applied.
pub fn review_unmatched(
    infos: &[MatchInfo],
    rules: &mut RuleSet,
    safe: &mut SafeSenderList,
    config: &SweepConfig,
    editor: &mut dyn CorpusEditor,
    store: Option<&CorpusStore>,
) -> usize {
    let reviewable: Vec<&MatchInfo> = infos.iter().filter(|i| i.needs_review()).collect();
    if reviewable.is_empty() {
        log::info!("No unmatched messages to review");
        return 0;
    }
    log::info!("Reviewing {} unmatched messages", reviewable.len());

    let mut safe_patterns = compile_many(&safe.safe_senders);
    let mut header_patterns: Vec<CompiledPattern> = rules
        .rules()
        .flat_map(|rule| compile_many(&rule.conditions.header))
        .collect();
    let mut edits = 0;

    for info in reviewable {
        let candidates = [info.header_from.as_str(), info.sender.as_str()];
        if let Some(pattern) = match_any_candidate(&safe_patterns, &candidates) {
            log::info!("Skipping {} (safe via '{pattern}')", info.sender);
            continue;
        }
        if let Some(pattern) = match_any_candidate(&header_patterns, &candidates) {
            log::info!("Skipping {} (already covered by '{pattern}')", info.sender);
            continue;
        }

        let suggestions =
            Suggestions::for_sender(&info.sender, &info.header_from, &config.free_mail_domains);
        match editor.review(info, &suggestions) {
            CorpusEdit::Skip => {}
            CorpusEdit::Block(pattern) => {
                let Some(compiled) = validate(&pattern) else {
                    continue;
                };
                if add_block_pattern(rules, &config.suggestion_rule, &pattern) {
                    header_patterns.push(compiled);
                    edits += 1;
                    if let Some(store) = store {
                        if let Err(e) = store.export_rules(rules) {
                            log::warn!("Could not persist rules after edit: {e}");
                        }
                    }
                }
            }
            CorpusEdit::Safe(pattern) => {
                let Some(compiled) = validate(&pattern) else {
                    continue;
                };
                if !safe.safe_senders.contains(&pattern) {
                    log::info!("Added '{pattern}' to safe senders");
                    safe.safe_senders.push(pattern);
                    safe_patterns.push(compiled);
                    edits += 1;
                    if let Some(store) = store {
                        if let Err(e) = store.export_safe_senders(safe) {
                            log::warn!("Could not persist safe senders after edit: {e}");
                        }
                    }
                }
            }
        }
    }

    log::info!("Applied {edits} corpus edits");
    edits
}

fn validate(pattern: &str) -> Option<CompiledPattern> {
    match CompiledPattern::new(pattern) {
        Ok(compiled) => Some(compiled),
        Err(e) => {
            log::warn!("Rejected edit: {e}");
            None
        }
    }
}

/// Append `pattern` to the header conditions of `rule_name`, creating a
/// delete rule of that name if needed. Returns false if already present.
fn add_block_pattern(rules: &mut RuleSet, rule_name: &str, pattern: &str) -> bool {
    if rules.find(rule_name).is_none() {
        log::info!("Creating rule '{rule_name}'");
        let mut rule = Rule::new(rule_name);
        rule.actions.delete = Some(true);
        rules.rules.push(RuleEntry::Rule(rule));
    }
    let Some(rule) = rules.find_mut(rule_name) else {
        return false;
    };
    if rule.conditions.header.iter().any(|p| p == pattern) {
        return false;
    }
    rule.conditions.header.push(pattern.to_string());
    log::info!("Added '{pattern}' to rule '{rule_name}'");
    true
}
