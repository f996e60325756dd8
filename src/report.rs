use crate::engine::{Applied, Decision};
use crate::mailbox::{Message, MessageRef};
use crate::normalization::{header_from, url_stubs};
use std::collections::HashSet;

/// What happened to one message in one pass. Built fresh every pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MatchInfo {
    pub message: MessageRef,
    pub source_folder: String,
    pub sender: String,
    pub subject: String,
    /// `@domain` token from the `From:` header, or empty.
    pub header_from: String,
    pub url_stubs: Vec<String>,
    pub matched: bool,
    /// The last rule that matched, which decided the message's fate.
    pub rule: Option<String>,
    pub matched_pattern: Option<String>,
    pub matched_rules: Vec<String>,
    pub safe: bool,
    pub deleted: bool,
    pub restored: bool,
    pub processed: bool,
    pub phishing_indicators: Vec<String>,
    pub error: Option<String>,
}

impl MatchInfo {
    pub fn new(message: &Message) -> Self {
        MatchInfo {
            message: message.reference(),
            source_folder: message.folder.clone(),
            sender: message.sender_lower(),
            subject: message.subject.clone(),
            header_from: header_from(&message.header_text()),
            url_stubs: url_stubs(&message.body),
            ..Default::default()
        }
    }

    pub fn record_decision(&mut self, decision: &Decision) {
        self.safe = decision.is_safe();
        self.matched = decision.is_matched();
        self.matched_rules = decision.matches.iter().map(|m| m.rule.clone()).collect();
        if let Some(last) = decision.last_match() {
            self.rule = Some(last.rule.clone());
            self.matched_pattern = Some(last.pattern.clone());
        } else if let Some(pattern) = &decision.safe_pattern {
            self.matched_pattern = Some(pattern.clone());
        }
    }

    pub fn record_applied(&mut self, applied: &Applied) {
        self.deleted = applied.deleted;
        self.restored = applied.restored;
    }

    pub fn is_flagged(&self) -> bool {
        !self.phishing_indicators.is_empty()
    }

    /// Unmatched, not safe-listed and still in place.
    pub fn needs_review(&self) -> bool {
        self.processed && !self.matched && !self.safe && !self.deleted
    }

    fn reportable(&self) -> bool {
        !self.deleted && !self.safe && (!self.matched || self.is_flagged())
    }
}

/// `<from-domain>| Email   n | ...` lines for unmatched or flagged messages,
/// numbered by position in the pass.
pub fn from_domain_report(infos: &[MatchInfo]) -> Vec<String> {
    let mut lines = Vec::new();
    for (index, info) in infos.iter().enumerate() {
        if !info.reportable() {
            continue;
        }
        let number = index + 1;
        if info.is_flagged() {
            lines.push(format!(
                "{:<20}| Email {:>3} | Phishing indicators: {:?}",
                info.header_from, number, info.phishing_indicators
            ));
        }
        if !info.matched {
            lines.push(format!(
                "{:<20}| Email {:>3} | Matched no rules",
                info.header_from, number
            ));
        }
    }
    lines
}

/// One line per URL stub of each unmatched or flagged message.
pub fn url_report(infos: &[MatchInfo]) -> Vec<String> {
    let mut lines = Vec::new();
    for (index, info) in infos.iter().enumerate() {
        if !info.reportable() {
            continue;
        }
        for stub in &info.url_stubs {
            lines.push(format!(
                "{:<30}| Email {:>3} | From: {}",
                stub,
                index + 1,
                info.sender
            ));
        }
    }
    lines
}

/// Unique from-domains of unmatched or flagged messages, in first-seen order.
pub fn unique_from_domains(infos: &[MatchInfo]) -> Vec<String> {
    let mut seen = HashSet::new();
    infos
        .iter()
        .filter(|info| info.reportable() && !info.header_from.is_empty())
        .filter(|info| seen.insert(info.header_from.clone()))
        .map(|info| info.header_from.clone())
        .collect()
}

/// Unique URL stubs of unmatched or flagged messages, in first-seen order.
pub fn unique_url_stubs(infos: &[MatchInfo]) -> Vec<String> {
    let mut seen = HashSet::new();
    infos
        .iter()
        .filter(|info| info.reportable())
        .flat_map(|info| info.url_stubs.iter())
        .filter(|stub| seen.insert(stub.to_string()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn info(sender: &str, body: &str) -> MatchInfo {
        let message = Message {
            id: "1".to_string(),
            folder: "Bulk".to_string(),
            sender_address: sender.to_string(),
            headers: format!("From: X <{sender}>"),
            body: body.to_string(),
            ..Default::default()
        };
        let mut info = MatchInfo::new(&message);
        info.processed = true;
        info
    }

    #[test]
    fn test_from_domain_report_format() {
        let mut flagged = info("a@phish.test", "");
        flagged.phishing_indicators = vec!["Urgent language in subject".to_string()];
        let mut deleted = info("b@spam.test", "");
        deleted.matched = true;
        deleted.deleted = true;
        let infos = vec![info("c@news.example.com", ""), deleted, flagged];

        let lines = from_domain_report(&infos);
        assert_eq!(
            lines,
            vec![
                "@news.example.com   | Email   1 | Matched no rules",
                "@phish.test         | Email   3 | Phishing indicators: [\"Urgent language in subject\"]",
                "@phish.test         | Email   3 | Matched no rules",
            ]
        );
    }

    #[test]
    fn test_url_report_and_unique_lists() {
        let infos = vec![
            info("a@x.test", "see www.deals.test today"),
            info("b@x.test", "see www.deals.test again"),
        ];
        let lines = url_report(&infos);
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("/deals.test "));
        assert!(lines[0].ends_with("| Email   1 | From: a@x.test"));

        assert_eq!(unique_from_domains(&infos), vec!["@x.test"]);
        assert_eq!(unique_url_stubs(&infos), vec!["/deals.test", ".deals.test"]);
    }

    #[test]
    fn test_safe_and_deleted_messages_need_no_review() {
        let mut safe = info("a@x.test", "");
        safe.safe = true;
        assert!(!safe.needs_review());
        assert!(info("b@x.test", "").needs_review());
    }
}
