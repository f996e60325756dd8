use lazy_static::lazy_static;
use regex::Regex;

/// Labels that name infrastructure or generic suffixes rather than an
/// organization. Never chosen as an anchor.
const SKIP_LABELS: &[&str] = &[
    "www", "mail", "smtp", "mx", "ns", "cdn", "img", "static", "assets", "api", "dev", "test",
    "stg", "stage", "beta", "co", "com", "net", "org", "gov", "edu", "mil", "biz", "info", "news",
    "shop", "store", "support",
];

/// Two-label public suffixes whose registrable domain needs a third label.
const MULTI_PART_SUFFIXES: &[&str] = &[
    "co.uk", "ac.uk", "gov.uk", "org.uk", "com.au", "net.au", "org.au", "com.br", "com.cn",
    "co.jp",
];

lazy_static! {
    static ref ANCHOR_CANDIDATE: Regex = Regex::new(r"^[a-z0-9-]{3,}$").unwrap();
}

pub struct DomainUtils;

impl DomainUtils {
    /// Extract domain from email address
    pub fn extract_domain(email: &str) -> Option<String> {
        email
            .rsplit_once('@')
            .map(|(_, domain)| domain.trim().to_lowercase())
            .filter(|domain| !domain.is_empty())
    }

    /// Domain part of an address, a `@domain` token, or a bare domain.
    fn domain_part(addr_or_domain: &str) -> String {
        let s = addr_or_domain.trim().to_lowercase();
        let domain = if let Some(stripped) = s.strip_prefix('@') {
            stripped.to_string()
        } else if let Some((_, domain)) = s.rsplit_once('@') {
            domain.to_string()
        } else {
            s
        };
        domain.trim_matches('.').to_string()
    }

    fn labels(domain: &str) -> Vec<&str> {
        domain.split('.').filter(|label| !label.is_empty()).collect()
    }

    /// Build `@(?:[a-z0-9-]+\.)*<anchor>\.[a-z0-9.-]+$`, anchored on the
    /// right-most label below the TLD that names an organization.
    ///
    /// Returns the input unchanged when no label can be found.
    pub fn anchor_regex(addr_or_domain: &str) -> String {
        let domain = Self::domain_part(addr_or_domain);
        let labels = Self::labels(&domain);

        let anchor = match labels.len() {
            0 => {
                log::warn!("Could not find any specific sub-domain in: {addr_or_domain}");
                return addr_or_domain.to_string();
            }
            1 => labels[0],
            n => labels[..n - 1]
                .iter()
                .rev()
                .find(|label| !SKIP_LABELS.contains(*label) && ANCHOR_CANDIDATE.is_match(label))
                .copied()
                .unwrap_or(labels[n - 2]),
        };

        log::debug!("Selected anchor label '{anchor}' from: {addr_or_domain}");
        format!(r"@(?:[a-z0-9-]+\.)*{}\.[a-z0-9.-]+$", regex::escape(anchor))
    }

    /// Registrable form of a domain: last two labels, or last three under a
    /// known multi-part public suffix.
    pub fn registrable_domain(domain: &str) -> String {
        let labels = Self::labels(domain);
        if labels.len() < 2 {
            return domain.to_string();
        }
        let last_two = labels[labels.len() - 2..].join(".");
        if MULTI_PART_SUFFIXES.contains(&last_two.as_str()) && labels.len() >= 3 {
            labels[labels.len() - 3..].join(".")
        } else {
            last_two
        }
    }

    /// Build `^[^@\s]+@(?:[a-z0-9-]+\.)*<registrable-domain>$`, matching any
    /// address at the sender's organization. Empty when there is no domain.
    pub fn sender_domain_safe_regex(addr_or_domain: &str) -> String {
        let domain = Self::domain_part(addr_or_domain);
        if domain.is_empty() {
            return String::new();
        }
        let base = Self::registrable_domain(&domain);
        format!(r"^[^@\s]+@(?:[a-z0-9-]+\.)*{}$", regex::escape(&base))
    }

    /// Check if domain matches any in list (with hierarchy support)
    pub fn matches_domain_list(domain: &str, domain_list: &[String]) -> bool {
        let domain_lower = domain.trim_start_matches('@').to_lowercase();

        domain_list.iter().any(|pattern| {
            let pattern_lower = pattern.trim_start_matches('@').to_lowercase();
            domain_lower == pattern_lower || domain_lower.ends_with(&format!(".{pattern_lower}"))
        })
    }
}
