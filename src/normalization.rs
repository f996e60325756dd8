use lazy_static::lazy_static;
use regex::Regex;
use std::collections::HashSet;

lazy_static! {
    static ref FROM_DOMAIN: Regex = Regex::new(r"@[\w.-]+").unwrap();
    static ref URL_STUB: Regex = Regex::new(r"(\.[\w-]+\.[\w-]+)|(/[\w-]+\.[\w-]+)").unwrap();
}

/// Drop non-ASCII and control characters, keeping line structure.
pub fn sanitize(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_ascii() && (!c.is_ascii_control() || *c == '\n' || *c == '\t'))
        .collect()
}

/// Fold continuation lines into their header line, sanitize and lowercase.
pub fn combine_header_lines(raw: &str) -> String {
    let mut lines: Vec<String> = Vec::new();
    for line in raw.lines() {
        if line.starts_with([' ', '\t']) {
            match lines.last_mut() {
                Some(previous) => {
                    previous.push(' ');
                    previous.push_str(line.trim());
                }
                None => lines.push(line.trim().to_string()),
            }
        } else {
            lines.push(line.trim().to_string());
        }
    }
    sanitize(&lines.join("\n")).to_lowercase()
}

/// The `@domain` token from the first `From:` line, or an empty string.
pub fn header_from(header_text: &str) -> String {
    header_text
        .lines()
        .find(|line| line.to_lowercase().starts_with("from:"))
        .and_then(|line| FROM_DOMAIN.find(line))
        .map(|m| m.as_str().to_lowercase())
        .unwrap_or_default()
}

/// Unique `/<a>.<b>` and `.<a>.<b>` stubs found in a body, in order of
/// first appearance.
pub fn url_stubs(body: &str) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut stubs = Vec::new();

    for line in body.lines() {
        for caps in URL_STUB.captures_iter(line) {
            let Some(stub) = caps.get(1).or_else(|| caps.get(2)) else {
                continue;
            };
            let cleaned = stub.as_str().trim_start_matches(['/', '.']);
            for candidate in [format!("/{cleaned}"), format!(".{cleaned}")] {
                if seen.insert(candidate.clone()) {
                    stubs.push(candidate);
                }
            }
        }
    }

    stubs
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_combine_header_lines_folds_continuations() {
        let raw = "From: \"Deals\"\r\n\t<offers@Mail.Example.com>\r\nSubject: Hi\r\n  there\r\n";
        let combined = combine_header_lines(raw);
        assert_eq!(
            combined,
            "from: \"deals\" <offers@mail.example.com>\nsubject: hi there"
        );
    }

    #[test]
    fn test_sanitize_strips_non_ascii() {
        assert_eq!(sanitize("caf\u{e9} \u{1F600}ok\r"), "caf ok");
    }

    #[test]
    fn test_header_from_extracts_domain_token() {
        let header = "received: from relay.other.net\nfrom: deals <offers@mail.example.com>\n";
        assert_eq!(header_from(header), "@mail.example.com");
        assert_eq!(header_from("subject: nothing here"), "");
    }

    #[test]
    fn test_url_stubs_are_unique_and_ordered() {
        let body = "Visit https://www.shop.example.com/promo.html now\nor www.shop.example.com";
        let stubs = url_stubs(body);
        assert_eq!(stubs[0], "/www.shop");
        assert_eq!(stubs[1], ".www.shop");
        let unique: HashSet<&String> = stubs.iter().collect();
        assert_eq!(unique.len(), stubs.len());
        assert!(stubs.contains(&"/promo.html".to_string()));
    }
}
