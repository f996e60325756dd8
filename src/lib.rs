pub mod config;
pub mod corpus;
pub mod domain_utils;
pub mod engine;
pub mod error;
pub mod indicators;
pub mod mailbox;
pub mod normalization;
pub mod orchestrator;
pub mod patterns;
pub mod report;
pub mod retry;
pub mod review;
pub mod rules;
pub mod statistics;

pub use config::SweepConfig;
pub use corpus::{compare_rules, CorpusStore, RuleDiff};
pub use engine::{ClassificationEngine, Decision, EngineOptions};
pub use error::{MailboxError, Result, SweepError};
pub use mailbox::{Mailbox, MemoryMailbox, Message, MessageRef};
pub use orchestrator::{Orchestrator, Pass, PassReport};
pub use report::MatchInfo;
pub use rules::{Rule, RuleSet, SafeSenderList};
pub use statistics::{PassStats, RunSummary};
