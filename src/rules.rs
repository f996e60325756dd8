//! Typed rule and safe-sender documents.
//!
//! Rule files are user-edited YAML that has accumulated several shapes over
//! time (bare lists, stringly booleans, single patterns instead of lists).
//! Everything is validated into typed structures at load time; keys this
//! crate does not understand are kept in `extra` so they survive an export.

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};
use serde_yaml::{Mapping, Value};
use std::fmt;

/// Message attribute a pattern list is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum FieldKind {
    From,
    Subject,
    Body,
    Header,
}

impl FieldKind {
    pub const ALL: [FieldKind; 4] = [
        FieldKind::From,
        FieldKind::Subject,
        FieldKind::Body,
        FieldKind::Header,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::From => "from",
            FieldKind::Subject => "subject",
            FieldKind::Body => "body",
            FieldKind::Header => "header",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Field-kind to pattern-list mapping, used for both conditions and exceptions.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternLists {
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "string_or_seq"
    )]
    pub from: Vec<String>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "string_or_seq"
    )]
    pub subject: Vec<String>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "string_or_seq"
    )]
    pub body: Vec<String>,
    #[serde(
        default,
        skip_serializing_if = "Vec::is_empty",
        deserialize_with = "string_or_seq"
    )]
    pub header: Vec<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl PatternLists {
    pub fn get(&self, kind: FieldKind) -> &[String] {
        match kind {
            FieldKind::From => &self.from,
            FieldKind::Subject => &self.subject,
            FieldKind::Body => &self.body,
            FieldKind::Header => &self.header,
        }
    }

    pub fn get_mut(&mut self, kind: FieldKind) -> &mut Vec<String> {
        match kind {
            FieldKind::From => &mut self.from,
            FieldKind::Subject => &mut self.subject,
            FieldKind::Body => &mut self.body,
            FieldKind::Header => &mut self.header,
        }
    }

    pub fn is_empty(&self) -> bool {
        FieldKind::ALL.iter().all(|kind| self.get(*kind).is_empty())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FolderAction {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub folder_name: String,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CategoryAction {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub category_name: String,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Recipient {
    #[serde(default, deserialize_with = "null_as_empty")]
    pub address: String,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleActions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assign_to_category: Option<CategoryAction>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "flexible_opt_bool"
    )]
    pub mark_as_read: Option<bool>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "flexible_opt_bool"
    )]
    pub clear_flag: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copy_to_folder: Option<FolderAction>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub forward: Option<Vec<Recipient>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub move_to_folder: Option<FolderAction>,
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        deserialize_with = "flexible_opt_bool"
    )]
    pub delete: Option<bool>,
    #[serde(flatten)]
    pub extra: Mapping,
}

/// One concrete mailbox mutation requested by a matched rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlannedAction {
    AssignCategory(String),
    MarkRead,
    ClearFlag,
    CopyToFolder(String),
    Forward(Vec<String>),
    MoveToFolder(String),
    Delete,
}

impl fmt::Display for PlannedAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PlannedAction::AssignCategory(name) => write!(f, "assign_to_category({name})"),
            PlannedAction::MarkRead => f.write_str("mark_as_read"),
            PlannedAction::ClearFlag => f.write_str("clear_flag"),
            PlannedAction::CopyToFolder(folder) => write!(f, "copy_to_folder({folder})"),
            PlannedAction::Forward(to) => write!(f, "forward({})", to.join(", ")),
            PlannedAction::MoveToFolder(folder) => write!(f, "move_to_folder({folder})"),
            PlannedAction::Delete => f.write_str("delete"),
        }
    }
}

impl RuleActions {
    pub fn deletes(&self) -> bool {
        self.delete.unwrap_or(false)
    }

    /// Actions in application order. Delete is always last.
    pub fn planned(&self) -> Vec<PlannedAction> {
        let mut planned = Vec::new();

        if let Some(category) = &self.assign_to_category {
            if !category.category_name.trim().is_empty() {
                planned.push(PlannedAction::AssignCategory(category.category_name.clone()));
            }
        }
        if self.mark_as_read.unwrap_or(false) {
            planned.push(PlannedAction::MarkRead);
        }
        if self.clear_flag.unwrap_or(false) {
            planned.push(PlannedAction::ClearFlag);
        }
        if let Some(copy) = &self.copy_to_folder {
            if !copy.folder_name.trim().is_empty() {
                planned.push(PlannedAction::CopyToFolder(copy.folder_name.clone()));
            }
        }
        if let Some(recipients) = &self.forward {
            let addresses: Vec<String> = recipients
                .iter()
                .map(|r| r.address.trim().to_string())
                .filter(|a| !a.is_empty())
                .collect();
            if !addresses.is_empty() {
                planned.push(PlannedAction::Forward(addresses));
            }
        }
        if let Some(target) = &self.move_to_folder {
            if !target.folder_name.trim().is_empty() {
                planned.push(PlannedAction::MoveToFolder(target.folder_name.clone()));
            }
        }
        if self.deletes() {
            planned.push(PlannedAction::Delete);
        }

        planned
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Rule {
    pub name: String,
    #[serde(default = "default_enabled", deserialize_with = "flexible_bool")]
    pub enabled: bool,
    #[serde(default)]
    pub conditions: PatternLists,
    #[serde(default)]
    pub exceptions: PatternLists,
    #[serde(default)]
    pub actions: RuleActions,
    #[serde(default)]
    pub metadata: RuleMetadata,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl Rule {
    pub fn new(name: &str) -> Self {
        Rule {
            name: name.to_string(),
            enabled: true,
            conditions: PatternLists::default(),
            exceptions: PatternLists::default(),
            actions: RuleActions::default(),
            metadata: RuleMetadata::default(),
            extra: Mapping::new(),
        }
    }

    pub fn is_named(&self) -> bool {
        !self.name.trim().is_empty()
    }
}

/// A rule document entry. Entries that do not validate as a [`Rule`] are
/// kept verbatim so an export never loses user data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RuleEntry {
    Rule(Rule),
    Malformed(Value),
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RuleSet {
    #[serde(default)]
    pub rules: Vec<RuleEntry>,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl RuleSet {
    pub fn new(rules: Vec<Rule>) -> Self {
        RuleSet {
            rules: rules.into_iter().map(RuleEntry::Rule).collect(),
            extra: Mapping::new(),
        }
    }

    /// Accepts the canonical `{rules: [...]}` document, a bare list of rules,
    /// or a single rule mapping. A mapping that is neither is read as a
    /// document with no rules.
    pub fn from_value(value: Value) -> Result<Self, serde_yaml::Error> {
        let rule_set: RuleSet = match value {
            Value::Null => RuleSet::default(),
            Value::Sequence(seq) => {
                let mut doc = Mapping::new();
                doc.insert(Value::from("rules"), Value::Sequence(seq));
                serde_yaml::from_value(Value::Mapping(doc))?
            }
            Value::Mapping(map) if !map.contains_key("rules") && looks_like_rule(&map) => {
                let mut doc = Mapping::new();
                doc.insert(
                    Value::from("rules"),
                    Value::Sequence(vec![Value::Mapping(map)]),
                );
                serde_yaml::from_value(Value::Mapping(doc))?
            }
            other => serde_yaml::from_value(other)?,
        };

        for (index, entry) in rule_set.rules.iter().enumerate() {
            match entry {
                RuleEntry::Malformed(value) => {
                    log::warn!("Skipping malformed rule at index {index}: {value:?}");
                }
                RuleEntry::Rule(rule) if !rule.is_named() => {
                    log::warn!("Skipping unnamed rule at index {index}");
                }
                RuleEntry::Rule(_) => {}
            }
        }

        Ok(rule_set)
    }

    /// Named, well-formed rules in document order.
    pub fn rules(&self) -> impl Iterator<Item = &Rule> {
        self.rules.iter().filter_map(|entry| match entry {
            RuleEntry::Rule(rule) if rule.is_named() => Some(rule),
            _ => None,
        })
    }

    pub fn rules_mut(&mut self) -> impl Iterator<Item = &mut Rule> {
        self.rules.iter_mut().filter_map(|entry| match entry {
            RuleEntry::Rule(rule) if rule.is_named() => Some(rule),
            _ => None,
        })
    }

    pub fn find(&self, name: &str) -> Option<&Rule> {
        self.rules().find(|rule| rule.name == name)
    }

    pub fn find_mut(&mut self, name: &str) -> Option<&mut Rule> {
        self.rules_mut().find(|rule| rule.name == name)
    }

    pub fn len(&self) -> usize {
        self.rules().count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SafeSenderList {
    #[serde(default, deserialize_with = "string_or_seq")]
    pub safe_senders: Vec<String>,
    #[serde(flatten)]
    pub extra: Mapping,
}

impl SafeSenderList {
    pub fn new(patterns: Vec<String>) -> Self {
        SafeSenderList {
            safe_senders: patterns,
            extra: Mapping::new(),
        }
    }

    /// Accepts `{safe_senders: [...]}` or a bare list of patterns.
    pub fn from_value(value: Value) -> Result<Self, serde_yaml::Error> {
        match value {
            Value::Null => Ok(SafeSenderList::default()),
            Value::Sequence(seq) => {
                log::warn!("Safe senders document is a bare list, normalizing");
                let mut doc = Mapping::new();
                doc.insert(Value::from("safe_senders"), Value::Sequence(seq));
                serde_yaml::from_value(Value::Mapping(doc))
            }
            other => serde_yaml::from_value(other),
        }
    }

    pub fn len(&self) -> usize {
        self.safe_senders.len()
    }

    pub fn is_empty(&self) -> bool {
        self.safe_senders.is_empty()
    }
}

fn default_enabled() -> bool {
    true
}

fn scalar_to_string(value: Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn looks_like_rule(map: &Mapping) -> bool {
    ["name", "conditions", "actions"]
        .iter()
        .any(|key| map.contains_key(*key))
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(String::new()),
        other => scalar_to_string(other).ok_or_else(|| de::Error::custom("expected a string")),
    }
}

/// Blank entries are dropped; an empty pattern would match every message.
fn string_or_seq<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let patterns: Vec<String> = match Value::deserialize(deserializer)? {
        Value::Null => Vec::new(),
        Value::Sequence(seq) => seq
            .into_iter()
            .filter(|item| !item.is_null())
            .map(|item| {
                scalar_to_string(item)
                    .ok_or_else(|| de::Error::custom("pattern list entries must be scalars"))
            })
            .collect::<Result<_, _>>()?,
        other => scalar_to_string(other)
            .map(|s| vec![s])
            .ok_or_else(|| de::Error::custom("expected a pattern or a list of patterns"))?,
    };
    Ok(patterns
        .into_iter()
        .filter(|p| !p.trim().is_empty())
        .collect())
}

fn parse_flexible_bool(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Null => Some(false),
        Value::Number(n) => n.as_i64().map(|i| i != 0),
        Value::String(s) => match s.trim().to_lowercase().as_str() {
            "true" | "yes" | "on" | "1" => Some(true),
            "false" | "no" | "off" | "0" | "" | "none" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

fn flexible_bool<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    parse_flexible_bool(&value).ok_or_else(|| de::Error::custom("expected a boolean"))
}

fn flexible_opt_bool<'de, D>(deserializer: D) -> Result<Option<bool>, D::Error>
where
    D: Deserializer<'de>,
{
    flexible_bool(deserializer).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;

    const RULES_YAML: &str = r#"
version: '1.0'
rules:
- name: SpamAutoDeleteHeader
  enabled: 'True'
  conditions:
    header:
    - '@(?:[a-z0-9-]+\.)*spam\.[a-z0-9.-]+$'
    to: ['me@example.com']
  exceptions:
    from: '^boss@work\.com$'
  actions:
    delete: 'True'
    play_sound:
      sound_file: ding.wav
  metadata:
    last_modified: '2025-01-01T00:00:00'
- name: CategorizeNews
  enabled: true
  conditions:
    subject: ['newsletter']
  actions:
    assign_to_category:
      category_name: News
    mark_as_read: true
- enabled: true
  conditions: {}
"#;

    fn load() -> RuleSet {
        let value: Value = serde_yaml::from_str(RULES_YAML).unwrap();
        RuleSet::from_value(value).unwrap()
    }

    #[test]
    fn test_loads_legacy_stringly_values() {
        let rules = load();
        let header_rule = rules.find("SpamAutoDeleteHeader").unwrap();
        assert!(header_rule.enabled);
        assert!(header_rule.actions.deletes());
        assert_eq!(header_rule.exceptions.from, vec![r"^boss@work\.com$"]);
        assert_eq!(header_rule.conditions.header.len(), 1);
    }

    #[test]
    fn test_unknown_keys_are_preserved() {
        let rules = load();
        let header_rule = rules.find("SpamAutoDeleteHeader").unwrap();
        assert!(header_rule.conditions.extra.contains_key("to"));
        assert!(header_rule.actions.extra.contains_key("play_sound"));
        assert!(rules.extra.contains_key("version"));
    }

    #[test]
    fn test_unnamed_rule_is_kept_but_not_listed() {
        let rules = load();
        assert_eq!(rules.rules.len(), 3);
        assert_eq!(rules.len(), 2);
        assert!(matches!(rules.rules[2], RuleEntry::Malformed(_)));
    }

    #[test]
    fn test_bare_list_is_normalized() {
        let value: Value =
            serde_yaml::from_str("- name: A\n  conditions:\n    from: ['x']\n").unwrap();
        let rules = RuleSet::from_value(value).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(rules.find("A").unwrap().conditions.from, vec!["x"]);

        let value: Value = serde_yaml::from_str("- 'a@b\\.com'\n- 'c'\n").unwrap();
        let safe = SafeSenderList::from_value(value).unwrap();
        assert_eq!(safe.safe_senders, vec![r"a@b\.com", "c"]);
    }

    #[test]
    fn test_planned_actions_put_delete_last() {
        let mut rule = Rule::new("all");
        rule.actions.delete = Some(true);
        rule.actions.move_to_folder = Some(FolderAction {
            folder_name: "Junk".to_string(),
            extra: Mapping::new(),
        });
        rule.actions.assign_to_category = Some(CategoryAction {
            category_name: "Spam".to_string(),
            extra: Mapping::new(),
        });
        rule.actions.mark_as_read = Some(true);

        let planned = rule.actions.planned();
        assert_eq!(
            planned,
            vec![
                PlannedAction::AssignCategory("Spam".to_string()),
                PlannedAction::MarkRead,
                PlannedAction::MoveToFolder("Junk".to_string()),
                PlannedAction::Delete,
            ]
        );
    }

    #[test]
    fn test_false_string_disables_delete() {
        let value: Value =
            serde_yaml::from_str("rules:\n- name: A\n  actions:\n    delete: 'False'\n").unwrap();
        let rules = RuleSet::from_value(value).unwrap();
        assert!(!rules.find("A").unwrap().actions.deletes());
    }

    #[test]
    fn test_blank_patterns_are_dropped() {
        let value: Value = serde_yaml::from_str(
            "rules:\n- name: A\n  conditions:\n    from: ''\n    subject: ['', '  ', 'sale']\n",
        )
        .unwrap();
        let rules = RuleSet::from_value(value).unwrap();
        let rule = rules.find("A").unwrap();
        assert!(rule.conditions.from.is_empty());
        assert_eq!(rule.conditions.subject, vec!["sale"]);
    }

    #[test]
    fn test_null_folder_and_category_names_load() {
        let yaml = r#"
rules:
- name: Spam
  conditions:
    from: ['x']
  actions:
    assign_to_category:
      category_name: null
    move_to_folder:
      folder_name:
    delete: true
"#;
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        let rules = RuleSet::from_value(value).unwrap();
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules.find("Spam").unwrap().actions.planned(),
            vec![PlannedAction::Delete]
        );
    }

    #[test]
    fn test_forward_recipient_keeps_extra_keys() {
        let yaml = r#"
rules:
- name: Fwd
  actions:
    forward:
    - address: 'a@b.com'
      name: Alice
    - address: null
"#;
        let value: Value = serde_yaml::from_str(yaml).unwrap();
        let rules = RuleSet::from_value(value).unwrap();
        let recipients = rules.find("Fwd").unwrap().actions.forward.clone().unwrap();
        assert_eq!(recipients.len(), 2);
        assert_eq!(recipients[0].extra.get("name"), Some(&Value::from("Alice")));
        assert_eq!(
            rules.find("Fwd").unwrap().actions.planned(),
            vec![PlannedAction::Forward(vec!["a@b.com".to_string()])]
        );
    }

    #[test]
    fn test_mapping_without_rules_is_an_empty_document() {
        let rules = RuleSet::from_value(serde_yaml::from_str("{}").unwrap()).unwrap();
        assert!(rules.rules.is_empty());

        let rules = RuleSet::from_value(serde_yaml::from_str("version: '1.0'").unwrap()).unwrap();
        assert!(rules.rules.is_empty());
        assert!(rules.extra.contains_key("version"));

        let single = RuleSet::from_value(serde_yaml::from_str("name: Solo").unwrap()).unwrap();
        assert_eq!(single.len(), 1);
    }
}
