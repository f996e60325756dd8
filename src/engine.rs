//! Classification engine: safe-list short-circuit, ordered rule evaluation
//! and action application.

use crate::error::MailboxError;
use crate::mailbox::{Mailbox, Message, MessageRef};
use crate::normalization::header_from;
use crate::patterns::{compile_many, match_any, match_any_candidate, CompiledPattern};
use crate::retry::{with_retry_if, RetryPolicy};
use crate::rules::{FieldKind, PatternLists, PlannedAction, RuleSet, SafeSenderList};

/// Message attributes rules are evaluated against, extracted once.
#[derive(Debug, Clone, Default)]
pub struct MessageFields {
    pub sender: String,
    pub subject: String,
    pub body: String,
    /// `@domain` token from the folded `From:` header line.
    pub header_from: String,
}

impl MessageFields {
    pub fn from_message(message: &Message) -> Self {
        MessageFields {
            sender: message.sender_lower(),
            subject: message.subject.clone(),
            body: message.body.clone(),
            header_from: header_from(&message.header_text()),
        }
    }

    /// The two canonical tokens header patterns and the safe list see.
    /// The raw header blob is never searched.
    fn header_candidates(&self) -> [&str; 2] {
        [self.header_from.as_str(), self.sender.as_str()]
    }
}

#[derive(Debug, Default)]
struct CompiledLists {
    from: Vec<CompiledPattern>,
    subject: Vec<CompiledPattern>,
    body: Vec<CompiledPattern>,
    header: Vec<CompiledPattern>,
}

impl CompiledLists {
    fn compile(lists: &PatternLists) -> Self {
        CompiledLists {
            from: compile_many(&lists.from),
            subject: compile_many(&lists.subject),
            body: compile_many(&lists.body),
            header: compile_many(&lists.header),
        }
    }

    /// First field kind with a matching pattern, and that pattern.
    fn hit(&self, fields: &MessageFields) -> Option<(FieldKind, String)> {
        FieldKind::ALL.iter().find_map(|kind| {
            let found = match kind {
                FieldKind::From => match_any(&self.from, &fields.sender),
                FieldKind::Subject => match_any(&self.subject, &fields.subject),
                FieldKind::Body => match_any(&self.body, &fields.body),
                FieldKind::Header => match_any_candidate(&self.header, &fields.header_candidates()),
            };
            found.map(|pattern| (*kind, pattern.to_string()))
        })
    }
}

struct CompiledRule {
    name: String,
    conditions: CompiledLists,
    exceptions: CompiledLists,
    actions: Vec<PlannedAction>,
}

impl CompiledRule {
    fn deletes(&self) -> bool {
        self.actions.contains(&PlannedAction::Delete)
    }
}

/// A rule whose conditions matched and whose exceptions did not.
#[derive(Debug, Clone, PartialEq)]
pub struct RuleMatch {
    pub rule: String,
    pub field: FieldKind,
    pub pattern: String,
    pub actions: Vec<PlannedAction>,
}

/// Outcome of evaluating one message. Pure; nothing has been applied yet.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Decision {
    /// Safe-list pattern that spared the message. When set, `matches` is empty.
    pub safe_pattern: Option<String>,
    /// Matching rules in evaluation order. A delete rule, if any, is last.
    pub matches: Vec<RuleMatch>,
}

impl Decision {
    pub fn is_safe(&self) -> bool {
        self.safe_pattern.is_some()
    }

    pub fn is_matched(&self) -> bool {
        !self.matches.is_empty()
    }

    pub fn deletes(&self) -> bool {
        self.matches
            .last()
            .map_or(false, |m| m.actions.contains(&PlannedAction::Delete))
    }

    /// The rule that decided the message's fate: the last one that matched.
    pub fn last_match(&self) -> Option<&RuleMatch> {
        self.matches.last()
    }
}

/// What actually happened to a message once its decision was applied.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Applied {
    pub deleted: bool,
    pub restored: bool,
    pub location: Option<MessageRef>,
    pub actions: Vec<String>,
}

/// Where a safe-listed message is restored to.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub inbox_folder: String,
    pub retry: RetryPolicy,
}

impl Default for EngineOptions {
    fn default() -> Self {
        EngineOptions {
            inbox_folder: "Inbox".to_string(),
            retry: RetryPolicy::default(),
        }
    }
}

/// Rules and safe list compiled for one pass.
pub struct ClassificationEngine {
    safe: Vec<CompiledPattern>,
    rules: Vec<CompiledRule>,
    options: EngineOptions,
}

impl ClassificationEngine {
    /// Compile `rules` and `safe` once. Disabled and unnamed rules are left
    /// out; rules with a delete action are moved after all others, keeping
    /// their relative order.
    pub fn new(rules: &RuleSet, safe: &SafeSenderList, options: EngineOptions) -> Self {
        let mut compiled: Vec<CompiledRule> = rules
            .rules()
            .filter(|rule| {
                if !rule.enabled {
                    log::debug!("Skipping disabled rule '{}'", rule.name);
                }
                rule.enabled && rule.is_named()
            })
            .map(|rule| CompiledRule {
                name: rule.name.clone(),
                conditions: CompiledLists::compile(&rule.conditions),
                exceptions: CompiledLists::compile(&rule.exceptions),
                actions: rule.actions.planned(),
            })
            .collect();
        compiled.sort_by_key(CompiledRule::deletes);

        log::info!(
            "Compiled {} active rules and {} safe sender patterns",
            compiled.len(),
            safe.safe_senders.len()
        );

        ClassificationEngine {
            safe: compile_many(&safe.safe_senders),
            rules: compiled,
            options,
        }
    }

    /// Rule names in evaluation order.
    pub fn rule_order(&self) -> Vec<&str> {
        self.rules.iter().map(|r| r.name.as_str()).collect()
    }

    pub fn evaluate(&self, message: &Message) -> Decision {
        self.evaluate_fields(&MessageFields::from_message(message))
    }

    pub fn evaluate_fields(&self, fields: &MessageFields) -> Decision {
        if let Some(pattern) = match_any_candidate(&self.safe, &fields.header_candidates()) {
            log::debug!("Sender '{}' is safe via '{pattern}'", fields.sender);
            return Decision {
                safe_pattern: Some(pattern.to_string()),
                matches: Vec::new(),
            };
        }

        let mut decision = Decision::default();
        for rule in &self.rules {
            let Some((field, pattern)) = rule.conditions.hit(fields) else {
                continue;
            };
            if let Some((exception_field, exception)) = rule.exceptions.hit(fields) {
                log::debug!(
                    "Rule '{}' matched {field} but exception {exception_field} '{exception}' applies",
                    rule.name
                );
                continue;
            }

            log::debug!("Rule '{}' matched {field} pattern '{pattern}'", rule.name);
            decision.matches.push(RuleMatch {
                rule: rule.name.clone(),
                field,
                pattern,
                actions: rule.actions.clone(),
            });
            if rule.deletes() {
                break;
            }
        }
        decision
    }

    /// Carry out `decision` against the mailbox. Each mutation goes through
    /// the retrier; the first one that still fails aborts the message.
    pub fn apply<M: Mailbox + ?Sized>(
        &self,
        mailbox: &mut M,
        message: &MessageRef,
        decision: &Decision,
    ) -> Result<Applied, MailboxError> {
        let mut applied = Applied {
            location: Some(message.clone()),
            ..Default::default()
        };

        if decision.is_safe() {
            let inbox = self.options.inbox_folder.as_str();
            let copy = self.retry("copy to inbox", || mailbox.copy_to(message, inbox))?;
            self.retry("delete original", || mailbox.delete(message))?;
            log::info!("Restored safe sender message to {copy}");
            applied.restored = true;
            applied.location = Some(copy);
            applied.actions.push(format!("restore to {inbox}"));
            return Ok(applied);
        }

        let mut current = message.clone();
        for rule_match in &decision.matches {
            for action in &rule_match.actions {
                match action {
                    PlannedAction::AssignCategory(category) => {
                        self.retry("set category", || mailbox.set_category(&current, category))?;
                    }
                    PlannedAction::MarkRead => {
                        self.retry("mark read", || mailbox.mark_read(&current))?;
                    }
                    PlannedAction::ClearFlag => {
                        self.retry("clear flag", || mailbox.clear_flag(&current))?;
                    }
                    PlannedAction::CopyToFolder(folder) => {
                        self.retry("copy", || mailbox.copy_to(&current, folder))?;
                    }
                    PlannedAction::Forward(recipients) => {
                        self.retry("forward", || mailbox.forward(&current, recipients))?;
                    }
                    PlannedAction::MoveToFolder(folder) => {
                        current = self.retry("move", || mailbox.move_to(&current, folder))?;
                    }
                    PlannedAction::Delete => {
                        if let Err(e) = mailbox.mark_read(&current) {
                            log::debug!("Could not mark {current} read before delete: {e}");
                        }
                        if let Err(e) = mailbox.clear_flag(&current) {
                            log::debug!("Could not clear flag on {current} before delete: {e}");
                        }
                        self.retry("delete", || mailbox.delete(&current))?;
                        applied.deleted = true;
                        applied.location = None;
                    }
                }
                log::info!("Rule '{}': {action}", rule_match.rule);
                applied.actions.push(action.to_string());
            }
            if applied.deleted {
                return Ok(applied);
            }
        }

        applied.location = Some(current);
        Ok(applied)
    }

    fn retry<T, F>(&self, label: &str, operation: F) -> Result<T, MailboxError>
    where
        F: FnMut() -> Result<T, MailboxError>,
    {
        with_retry_if(label, &self.options.retry, MailboxError::is_transient, operation)
    }
}
