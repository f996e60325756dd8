//! Lightweight phishing heuristics for the human-facing report.
//!
//! Indicators never trigger an action. They are only computed for messages
//! that matched no rule and were not deleted.

use crate::mailbox::Message;
use lazy_static::lazy_static;
use regex::Regex;
use url::Url;

pub const SENDER_MISMATCH: &str = "Sender name/email mismatch";
pub const URGENT_SUBJECT: &str = "Urgent language in subject";
pub const MISMATCHED_LINK: &str = "Mismatched URL display text";
pub const SENSITIVE_REQUEST: &str = "Request for sensitive information";

const URGENT_WORDS: &[&str] = &["urgent", "immediate", "action required", "account suspended"];
const SENSITIVE_WORDS: &[&str] = &["password", "login", "credential", "verify account"];

lazy_static! {
    static ref ANCHOR: Regex =
        Regex::new(r#"(?is)<a\s[^>]*href\s*=\s*["']?([^"'\s>]+)["']?[^>]*>(.*?)</a>"#).unwrap();
    static ref TAG: Regex = Regex::new(r"<[^>]*>").unwrap();
    static ref DISPLAYED_HOST: Regex =
        Regex::new(r"(?i)^(?:https?://)?((?:[a-z0-9-]+\.)+[a-z]{2,})(?:[/:?#]\S*)?$").unwrap();
}

/// All indicators raised by `message`, in a stable order.
pub fn check(message: &Message) -> Vec<String> {
    let mut indicators = Vec::new();

    let sender = message.sender_lower();
    let display_name = message.sender_name.trim().to_lowercase();
    if display_name.contains('@') && display_name != sender {
        log::debug!("Display name '{display_name}' does not match sender '{sender}'");
        indicators.push(SENDER_MISMATCH.to_string());
    }

    let subject = message.subject.to_lowercase();
    let urgent = found_words(&subject, URGENT_WORDS);
    if !urgent.is_empty() {
        log::debug!("Urgent language in subject: {urgent:?}");
        indicators.push(URGENT_SUBJECT.to_string());
    }

    if let Some(html) = &message.html_body {
        if let Some((href, text)) = mismatched_link(html) {
            log::debug!("Link text '{text}' points to '{href}'");
            indicators.push(MISMATCHED_LINK.to_string());
        }
    }

    let body = message.body.to_lowercase();
    let sensitive = found_words(&body, SENSITIVE_WORDS);
    if !sensitive.is_empty() {
        log::debug!("Sensitive terms in body: {sensitive:?}");
        indicators.push(SENSITIVE_REQUEST.to_string());
    }

    indicators
}

fn found_words<'a>(text: &str, words: &[&'a str]) -> Vec<&'a str> {
    words.iter().copied().filter(|w| text.contains(w)).collect()
}

/// First `<a>` whose visible text names a host different from the one its
/// `href` points to.
fn mismatched_link(html: &str) -> Option<(String, String)> {
    for caps in ANCHOR.captures_iter(html) {
        let href = caps.get(1).map(|m| m.as_str()).unwrap_or_default();
        if !href.to_lowercase().starts_with("http") {
            continue;
        }
        let Some(actual) = Url::parse(href)
            .ok()
            .and_then(|u| u.host_str().map(str::to_lowercase))
        else {
            continue;
        };

        let raw_text = caps.get(2).map(|m| m.as_str()).unwrap_or_default();
        let text = TAG.replace_all(raw_text, "").trim().to_string();
        let Some(shown) = DISPLAYED_HOST
            .captures(&text)
            .and_then(|c| c.get(1))
            .map(|m| m.as_str().to_lowercase())
        else {
            continue;
        };

        let shown = shown.trim_start_matches("www.");
        let same_site = actual == shown || actual.ends_with(&format!(".{shown}"));
        if !same_site {
            return Some((href.to_string(), text));
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_message_has_no_indicators() {
        let message = Message {
            sender_address: "news@shop.example.com".to_string(),
            sender_name: "Example Shop".to_string(),
            subject: "Weekly deals".to_string(),
            body: "New arrivals this week.".to_string(),
            html_body: Some(
                r#"<a href="https://shop.example.com/deals">shop.example.com</a>"#.to_string(),
            ),
            ..Default::default()
        };
        assert!(check(&message).is_empty());
    }

    #[test]
    fn test_all_indicators_in_order() {
        let message = Message {
            sender_address: "x@evil.test".to_string(),
            sender_name: "security@bank.com".to_string(),
            subject: "URGENT: Account Suspended".to_string(),
            body: "Please verify account and enter your password".to_string(),
            html_body: Some(
                r#"<p><a href="http://evil.test/login"><b>www.bank.com</b></a></p>"#.to_string(),
            ),
            ..Default::default()
        };
        assert_eq!(
            check(&message),
            vec![
                SENDER_MISMATCH,
                URGENT_SUBJECT,
                MISMATCHED_LINK,
                SENSITIVE_REQUEST
            ]
        );
    }

    #[test]
    fn test_link_with_plain_text_is_not_a_mismatch() {
        let html = r#"<a href="https://tracker.example.net/c/123">Click here</a>"#;
        assert!(mismatched_link(html).is_none());
    }

    #[test]
    fn test_subdomain_link_is_not_a_mismatch() {
        let html = r#"<a href='https://email.bank.com/x'>bank.com</a>"#;
        assert!(mismatched_link(html).is_none());
    }

    #[test]
    fn test_display_name_equal_to_sender_is_fine() {
        let message = Message {
            sender_address: "Me@Example.com".to_string(),
            sender_name: "me@example.com".to_string(),
            ..Default::default()
        };
        assert!(check(&message).is_empty());
    }
}
