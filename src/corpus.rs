//! Loading, canonicalizing and persisting the rule and safe-sender corpus.
//!
//! Exports are deterministic: condition lists and the safe list are
//! lowercased, trimmed, de-duplicated and sorted, and every string scalar is
//! written single-quoted so regex patterns survive without escape churn.
//! The file being replaced is first copied to the archive directory.

use crate::config::SweepConfig;
use crate::error::{Result, SweepError};
use crate::rules::{FieldKind, Rule, RuleEntry, RuleSet, SafeSenderList};
use chrono::Local;
use serde_yaml::{Mapping, Value};
use std::collections::{BTreeMap, HashSet};
use std::fs;
use std::path::{Path, PathBuf};

pub struct CorpusStore {
    rules_file: PathBuf,
    safe_senders_file: PathBuf,
    archive_dir: PathBuf,
}

impl CorpusStore {
    pub fn new<P: Into<PathBuf>>(rules_file: P, safe_senders_file: P, archive_dir: P) -> Self {
        CorpusStore {
            rules_file: rules_file.into(),
            safe_senders_file: safe_senders_file.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub fn from_config(config: &SweepConfig) -> Self {
        CorpusStore {
            rules_file: config.rules_file.clone(),
            safe_senders_file: config.safe_senders_file.clone(),
            archive_dir: config.archive_dir.clone(),
        }
    }

    pub fn rules_file(&self) -> &Path {
        &self.rules_file
    }

    pub fn safe_senders_file(&self) -> &Path {
        &self.safe_senders_file
    }

    /// Load the rule corpus. A missing or unreadable file yields an empty
    /// rule set so the run can continue.
    pub fn load_rules(&self) -> RuleSet {
        if !self.rules_file.exists() {
            log::warn!(
                "Rules file {} not found, starting with no rules",
                self.rules_file.display()
            );
            return RuleSet::default();
        }
        match read_rules(&self.rules_file) {
            Ok(rules) => {
                log::info!(
                    "Loaded {} rules from {}",
                    rules.len(),
                    self.rules_file.display()
                );
                rules
            }
            Err(e) => {
                log::error!("{e}; continuing with no rules");
                RuleSet::default()
            }
        }
    }

    pub fn load_safe_senders(&self) -> SafeSenderList {
        if !self.safe_senders_file.exists() {
            log::warn!(
                "Safe senders file {} not found, starting with an empty list",
                self.safe_senders_file.display()
            );
            return SafeSenderList::default();
        }
        match read_safe_senders(&self.safe_senders_file) {
            Ok(safe) => {
                log::info!(
                    "Loaded {} safe sender patterns from {}",
                    safe.len(),
                    self.safe_senders_file.display()
                );
                safe
            }
            Err(e) => {
                log::error!("{e}; continuing with no safe senders");
                SafeSenderList::default()
            }
        }
    }

    /// Canonicalize `rules` in place, stamp `metadata.last_modified`, back up
    /// the current file and write the new one. The written file is read
    /// back and compared; a mismatch is only logged.
    pub fn export_rules(&self, rules: &mut RuleSet) -> Result<()> {
        canonicalize_rules(rules);
        let timestamp = export_timestamp();
        for rule in rules.rules_mut() {
            rule.metadata.last_modified = Some(timestamp.clone());
        }

        let document = serde_yaml::to_value(&*rules)?;
        self.write_with_backup(&self.rules_file, &to_yaml_string(&document))?;
        log::info!(
            "Exported {} rules to {}",
            rules.len(),
            self.rules_file.display()
        );

        match read_rules(&self.rules_file) {
            Ok(written) => {
                let diff = compare_rules(rules, &written);
                if !diff.is_empty() {
                    log::warn!(
                        "Re-imported rules differ from exported rules: {}",
                        diff.summary()
                    );
                }
            }
            Err(e) => log::warn!("Could not re-import exported rules: {e}"),
        }
        Ok(())
    }

    pub fn export_safe_senders(&self, safe: &mut SafeSenderList) -> Result<()> {
        canonicalize_patterns(&mut safe.safe_senders);
        let document = serde_yaml::to_value(&*safe)?;
        self.write_with_backup(&self.safe_senders_file, &to_yaml_string(&document))?;
        log::info!(
            "Exported {} safe senders to {}",
            safe.len(),
            self.safe_senders_file.display()
        );
        Ok(())
    }

    fn write_with_backup(&self, path: &Path, content: &str) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        if path.exists() {
            match self.backup(path) {
                Ok(backup) => log::info!("Backed up {} to {}", path.display(), backup.display()),
                Err(e) => log::warn!("Could not back up {}: {e}", path.display()),
            }
        }
        fs::write(path, content)?;
        Ok(())
    }

    /// Copy `path` to `<archive>/<stem>_backup_<YYYYMMDD_HHMMSS>.yaml`.
    fn backup(&self, path: &Path) -> std::io::Result<PathBuf> {
        fs::create_dir_all(&self.archive_dir)?;
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "corpus".to_string());
        let stamp = Local::now().format("%Y%m%d_%H%M%S").to_string();

        let mut target = self.archive_dir.join(format!("{stem}_backup_{stamp}.yaml"));
        let mut counter = 1;
        while target.exists() {
            target = self
                .archive_dir
                .join(format!("{stem}_backup_{stamp}_{counter}.yaml"));
            counter += 1;
        }
        fs::copy(path, &target)?;
        Ok(target)
    }
}

/// Strictly parse a rules file.
pub fn read_rules(path: &Path) -> Result<RuleSet> {
    let value = read_document(path)?;
    RuleSet::from_value(value).map_err(|e| parse_error(path, e))
}

/// Strictly parse a safe senders file.
pub fn read_safe_senders(path: &Path) -> Result<SafeSenderList> {
    let value = read_document(path)?;
    SafeSenderList::from_value(value).map_err(|e| parse_error(path, e))
}

fn read_document(path: &Path) -> Result<Value> {
    let content = fs::read_to_string(path)?;
    serde_yaml::from_str(&content).map_err(|e| parse_error(path, e))
}

fn parse_error(path: &Path, e: serde_yaml::Error) -> SweepError {
    SweepError::CorpusParse {
        path: path.display().to_string(),
        message: e.to_string(),
    }
}

fn export_timestamp() -> String {
    Local::now().format("%Y-%m-%dT%H:%M:%S%.6f").to_string()
}

/// Lowercase, trim, drop empties and duplicates (first occurrence wins),
/// then sort ascending.
pub fn canonicalize_patterns(patterns: &mut Vec<String>) {
    let mut seen = HashSet::new();
    let mut canonical: Vec<String> = patterns
        .iter()
        .map(|p| p.trim().to_lowercase())
        .filter(|p| !p.is_empty() && seen.insert(p.clone()))
        .collect();
    canonical.sort();
    *patterns = canonical;
}

/// Canonicalize every condition list. Exceptions are left as authored.
pub fn canonicalize_rules(rules: &mut RuleSet) {
    for rule in rules.rules_mut() {
        for kind in FieldKind::ALL {
            canonicalize_patterns(rule.conditions.get_mut(kind));
        }
    }
}

/// Differences between two rule sets, keyed by rule name.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RuleDiff {
    pub only_in_first: Vec<String>,
    pub only_in_second: Vec<String>,
    /// Rule name to the paths that differ, e.g. `conditions.from[2]`.
    pub modified: BTreeMap<String, Vec<String>>,
}

impl RuleDiff {
    pub fn is_empty(&self) -> bool {
        self.only_in_first.is_empty() && self.only_in_second.is_empty() && self.modified.is_empty()
    }

    pub fn summary(&self) -> String {
        format!(
            "{} only in first, {} only in second, {} modified",
            self.only_in_first.len(),
            self.only_in_second.len(),
            self.modified.len()
        )
    }
}

pub fn compare_rules(first: &RuleSet, second: &RuleSet) -> RuleDiff {
    let a = named_rules(first, "first");
    let b = named_rules(second, "second");

    let mut diff = RuleDiff {
        only_in_first: a.keys().filter(|k| !b.contains_key(*k)).cloned().collect(),
        only_in_second: b.keys().filter(|k| !a.contains_key(*k)).cloned().collect(),
        ..Default::default()
    };

    for (name, rule_a) in &a {
        let Some(rule_b) = b.get(name) else {
            continue;
        };
        let (Ok(va), Ok(vb)) = (serde_yaml::to_value(rule_a), serde_yaml::to_value(rule_b)) else {
            log::warn!("Could not serialize rule '{name}' for comparison");
            continue;
        };
        let mut paths = Vec::new();
        diff_values("", &va, &vb, &mut paths);
        if !paths.is_empty() {
            log::debug!(
                "Rule '{name}' differs:\n{}\n{}",
                serde_json::to_string_pretty(rule_a).unwrap_or_default(),
                serde_json::to_string_pretty(rule_b).unwrap_or_default()
            );
            diff.modified.insert(name.clone(), paths);
        }
    }
    diff
}

fn named_rules<'a>(set: &'a RuleSet, label: &str) -> BTreeMap<String, &'a Rule> {
    let mut named = BTreeMap::new();
    for (index, entry) in set.rules.iter().enumerate() {
        match entry {
            RuleEntry::Rule(rule) if rule.is_named() => {
                if named.insert(rule.name.clone(), rule).is_some() {
                    log::warn!("Duplicate rule name '{}' in {label} set", rule.name);
                }
            }
            _ => log::warn!("Ignoring invalid rule at index {index} in {label} set"),
        }
    }
    named
}

fn diff_values(path: &str, a: &Value, b: &Value, out: &mut Vec<String>) {
    match (a, b) {
        (Value::Mapping(ma), Value::Mapping(mb)) => {
            for (key, va) in ma {
                let child = join_path(path, &key_label(key));
                match mb.get(key) {
                    Some(vb) => diff_values(&child, va, vb, out),
                    None => out.push(child),
                }
            }
            for key in mb.keys().filter(|k| !ma.contains_key(*k)) {
                out.push(join_path(path, &key_label(key)));
            }
        }
        (Value::Sequence(sa), Value::Sequence(sb)) => {
            for index in 0..sa.len().max(sb.len()) {
                let child = format!("{path}[{index}]");
                match (sa.get(index), sb.get(index)) {
                    (Some(va), Some(vb)) => diff_values(&child, va, vb, out),
                    _ => out.push(child),
                }
            }
        }
        _ if a != b => out.push(if path.is_empty() { ".".to_string() } else { path.to_string() }),
        _ => {}
    }
}

fn join_path(path: &str, key: &str) -> String {
    if path.is_empty() {
        key.to_string()
    } else {
        format!("{path}.{key}")
    }
}

fn key_label(key: &Value) -> String {
    match key {
        Value::String(s) => s.clone(),
        other => scalar_text(other),
    }
}

/// Render a YAML document in block style with single-quoted strings.
pub fn to_yaml_string(document: &Value) -> String {
    let mut out = String::new();
    match document {
        Value::Mapping(map) if !map.is_empty() => write_mapping(&mut out, map, 0, true),
        Value::Sequence(seq) if !seq.is_empty() => write_sequence(&mut out, seq, 0),
        other => {
            out.push_str(&scalar_text(other));
            out.push('\n');
        }
    }
    out
}

fn write_mapping(out: &mut String, map: &Mapping, indent: usize, mut pad_first: bool) {
    for (key, value) in map {
        if pad_first {
            out.push_str(&" ".repeat(indent));
        }
        pad_first = true;
        out.push_str(&key_text(key));
        out.push(':');
        write_child(out, value, indent);
    }
}

fn write_child(out: &mut String, value: &Value, indent: usize) {
    match value {
        Value::Mapping(map) if !map.is_empty() => {
            out.push('\n');
            write_mapping(out, map, indent + 2, true);
        }
        Value::Sequence(seq) if !seq.is_empty() => {
            out.push('\n');
            write_sequence(out, seq, indent);
        }
        Value::Tagged(tagged) => write_child(out, &tagged.value, indent),
        other => {
            out.push(' ');
            out.push_str(&scalar_text(other));
            out.push('\n');
        }
    }
}

fn write_sequence(out: &mut String, seq: &[Value], indent: usize) {
    for item in seq {
        out.push_str(&" ".repeat(indent));
        out.push('-');
        match item {
            Value::Mapping(map) if !map.is_empty() => {
                out.push(' ');
                write_mapping(out, map, indent + 2, false);
            }
            Value::Sequence(inner) if !inner.is_empty() => {
                out.push('\n');
                write_sequence(out, inner, indent + 2);
            }
            other => {
                out.push(' ');
                out.push_str(&scalar_text(other));
                out.push('\n');
            }
        }
    }
}

fn scalar_text(value: &Value) -> String {
    match value {
        Value::Null => "null".to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => quote(s),
        Value::Sequence(_) => "[]".to_string(),
        Value::Mapping(_) => "{}".to_string(),
        Value::Tagged(tagged) => scalar_text(&tagged.value),
    }
}

fn quote(s: &str) -> String {
    if s.chars().any(|c| c.is_control() && c != '\t') {
        // JSON strings are valid YAML double-quoted scalars.
        serde_json::to_string(s).unwrap_or_else(|_| format!("'{}'", s.replace('\'', "''")))
    } else {
        format!("'{}'", s.replace('\'', "''"))
    }
}

fn key_text(key: &Value) -> String {
    match key {
        Value::String(s) if is_plain_key(s) => s.clone(),
        other => scalar_text(other),
    }
}

fn is_plain_key(s: &str) -> bool {
    const RESERVED: &[&str] = &["true", "false", "yes", "no", "on", "off", "null", "y", "n"];
    let mut chars = s.chars();
    matches!(chars.next(), Some(c) if c.is_ascii_alphabetic() || c == '_')
        && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
        && !RESERVED.contains(&s.to_lowercase().as_str())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rules::Rule;

    fn store(dir: &Path) -> CorpusStore {
        CorpusStore::new(
            dir.join("rules.yaml"),
            dir.join("rules_safe_senders.yaml"),
            dir.join("archive"),
        )
    }

    fn sample_rules() -> RuleSet {
        let mut spam = Rule::new("SpamAutoDeleteHeader");
        spam.conditions.header = vec![
            " @(?:[a-z0-9-]+\\.)*Widgets\\.[a-z0-9.-]+$".to_string(),
            "@bad\\.com$".to_string(),
            "@(?:[a-z0-9-]+\\.)*widgets\\.[a-z0-9.-]+$".to_string(),
        ];
        spam.exceptions.subject = vec!["Don't Delete".to_string()];
        spam.actions.delete = Some(true);
        RuleSet::new(vec![spam])
    }

    #[test]
    fn test_missing_files_load_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        assert!(store.load_rules().is_empty());
        assert!(store.load_safe_senders().is_empty());
    }

    #[test]
    fn test_unparseable_file_loads_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::write(store.rules_file(), "rules: [unclosed").unwrap();
        assert!(store.load_rules().is_empty());
        assert!(matches!(
            read_rules(store.rules_file()),
            Err(SweepError::CorpusParse { .. })
        ));
    }

    #[test]
    fn test_canonicalize_patterns() {
        let mut patterns = vec![
            "B@x.com ".to_string(),
            "a@x.com".to_string(),
            "b@x.com".to_string(),
            "  ".to_string(),
        ];
        canonicalize_patterns(&mut patterns);
        assert_eq!(patterns, vec!["a@x.com", "b@x.com"]);
    }

    #[test]
    fn test_export_round_trip_is_canonical() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let mut rules = sample_rules();
        store.export_rules(&mut rules).unwrap();

        let mut reloaded = store.load_rules();
        assert_eq!(compare_rules(&rules, &reloaded), RuleDiff::default());

        let rule = reloaded.find("SpamAutoDeleteHeader").unwrap();
        assert_eq!(rule.conditions.header.len(), 2);
        assert_eq!(rule.exceptions.subject, vec!["Don't Delete"]);
        assert!(rule.metadata.last_modified.is_some());

        let mut expected = sample_rules();
        canonicalize_rules(&mut expected);
        for rule in reloaded.rules_mut() {
            rule.metadata.last_modified = None;
        }
        assert_eq!(reloaded, expected);
    }

    #[test]
    fn test_patterns_are_written_single_quoted() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        store.export_rules(&mut sample_rules()).unwrap();

        let written = fs::read_to_string(store.rules_file()).unwrap();
        assert!(written.starts_with("rules:\n- name: 'SpamAutoDeleteHeader'\n"));
        assert!(written.contains("    - '@bad\\.com$'\n"));
        assert!(written.contains("'don''t delete'") || written.contains("'Don''t Delete'"));
        assert!(written.contains("    delete: true\n"));
    }

    #[test]
    fn test_safe_sender_export_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let patterns = vec![
            "Zed@Example.com".to_string(),
            "^[^@\\s]+@(?:[a-z0-9-]+\\.)*example\\.com$".to_string(),
            "zed@example.com".to_string(),
        ];

        store
            .export_safe_senders(&mut SafeSenderList::new(patterns.clone()))
            .unwrap();
        let first = fs::read_to_string(store.safe_senders_file()).unwrap();
        store
            .export_safe_senders(&mut SafeSenderList::new(patterns))
            .unwrap();
        let second = fs::read_to_string(store.safe_senders_file()).unwrap();

        assert_eq!(first, second);
        assert_eq!(
            store.load_safe_senders().safe_senders,
            vec![
                "^[^@\\s]+@(?:[a-z0-9-]+\\.)*example\\.com$",
                "zed@example.com"
            ]
        );
    }

    #[test]
    fn test_export_backs_up_previous_file() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::write(store.safe_senders_file(), "safe_senders:\n- old@x.com\n").unwrap();

        store
            .export_safe_senders(&mut SafeSenderList::new(vec!["new@x.com".to_string()]))
            .unwrap();

        let backups: Vec<_> = fs::read_dir(dir.path().join("archive"))
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        assert_eq!(backups.len(), 1);
        assert!(backups[0].starts_with("rules_safe_senders_backup_"));
        let backup = fs::read_to_string(dir.path().join("archive").join(&backups[0])).unwrap();
        assert!(backup.contains("old@x.com"));
    }

    #[test]
    fn test_compare_rules_reports_paths() {
        let first = sample_rules();
        let mut second = sample_rules();
        second.find_mut("SpamAutoDeleteHeader").unwrap().conditions.header[1] =
            "@worse\\.com$".to_string();
        second.rules.push(RuleEntry::Rule(Rule::new("Extra")));

        let diff = compare_rules(&first, &second);
        assert_eq!(diff.only_in_second, vec!["Extra"]);
        assert_eq!(
            diff.modified["SpamAutoDeleteHeader"],
            vec!["conditions.header[1]"]
        );
    }

    #[test]
    fn test_yaml_writer_quotes_and_escapes() {
        let document: Value =
            serde_yaml::from_str("a: \"it's\"\nb:\n  c: [1, 'x']\nd: {}\ne: \"two\\nlines\"\n")
                .unwrap();
        let text = to_yaml_string(&document);
        assert_eq!(
            text,
            "a: 'it''s'\nb:\n  c:\n  - 1\n  - 'x'\nd: {}\ne: \"two\\nlines\"\n"
        );
        let reparsed: Value = serde_yaml::from_str(&text).unwrap();
        assert_eq!(reparsed, document);
    }

    #[test]
    fn test_export_keeps_forward_recipient_name() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        let yaml = r#"rules:
- name: Fwd
  conditions:
    from: ['x']
  actions:
    forward:
    - address: 'a@b.com'
      name: 'Alice'
"#;
        fs::write(store.rules_file(), yaml).unwrap();

        let mut rules = store.load_rules();
        store.export_rules(&mut rules).unwrap();

        let written = fs::read_to_string(store.rules_file()).unwrap();
        assert!(written.contains("'Alice'"));
        let reloaded = read_rules(store.rules_file()).unwrap();
        let recipients = reloaded.find("Fwd").unwrap().actions.forward.clone().unwrap();
        assert_eq!(recipients[0].address, "a@b.com");
        assert!(recipients[0].extra.contains_key("name"));
    }

    #[test]
    fn test_emptied_rules_file_exports_no_rules() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::write(store.rules_file(), "version: '1.0'\n").unwrap();

        let mut rules = store.load_rules();
        assert!(rules.rules.is_empty());
        store.export_rules(&mut rules).unwrap();

        let reloaded = read_rules(store.rules_file()).unwrap();
        assert!(reloaded.rules.is_empty());
        assert!(reloaded.extra.contains_key("version"));
    }

    #[test]
    fn test_export_proceeds_when_backup_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = store(dir.path());
        fs::write(dir.path().join("archive"), "not a directory").unwrap();
        fs::write(store.safe_senders_file(), "safe_senders:\n- old@x.com\n").unwrap();

        store
            .export_safe_senders(&mut SafeSenderList::new(vec!["new@x.com".to_string()]))
            .unwrap();

        assert_eq!(store.load_safe_senders().safe_senders, vec!["new@x.com"]);
        assert!(dir.path().join("archive").is_file());
    }
}
