use crate::error::{Result, SweepError};
use crate::retry::RetryPolicy;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Run configuration. Passed explicitly to the engine, the orchestrator and
/// the corpus store; nothing reads process-wide settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SweepConfig {
    pub rules_file: PathBuf,
    pub safe_senders_file: PathBuf,
    /// Where timestamped backups of overwritten corpus files go.
    pub archive_dir: PathBuf,
    /// Bulk folders scanned in both passes.
    pub target_folders: Vec<String>,
    /// Where safe-listed messages are restored to.
    pub inbox_folder: String,
    pub days_back: i64,
    pub retry: RetryPolicy,
    /// Debug cap on messages evaluated per pass.
    pub max_messages_per_pass: Option<usize>,
    /// Tolerate missing folders instead of failing the run.
    pub test_mode: bool,
    /// Rule that receives header patterns added interactively.
    pub suggestion_rule: String,
    /// Domains hosting individual mailboxes; suggestions there use the full
    /// address instead of a domain pattern.
    pub free_mail_domains: Vec<String>,
}

impl Default for SweepConfig {
    fn default() -> Self {
        SweepConfig {
            rules_file: PathBuf::from("rules.yaml"),
            safe_senders_file: PathBuf::from("rules_safe_senders.yaml"),
            archive_dir: PathBuf::from("archive"),
            target_folders: vec!["Bulk Mail".to_string(), "bulk".to_string()],
            inbox_folder: "Inbox".to_string(),
            days_back: 365,
            retry: RetryPolicy::default(),
            max_messages_per_pass: None,
            test_mode: false,
            suggestion_rule: "SpamAutoDeleteHeader".to_string(),
            free_mail_domains: [
                "gmail.com",
                "yahoo.com",
                "hotmail.com",
                "outlook.com",
                "aol.com",
                "protonmail.com",
            ]
            .iter()
            .map(|d| d.to_string())
            .collect(),
        }
    }
}

impl SweepConfig {
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: SweepConfig = serde_yaml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let content = serde_yaml::to_string(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.target_folders.is_empty() {
            return Err(SweepError::Config(
                "at least one target folder is required".to_string(),
            ));
        }
        if self.inbox_folder.trim().is_empty() {
            return Err(SweepError::Config("inbox_folder must not be empty".to_string()));
        }
        if self.days_back < 0 {
            return Err(SweepError::Config(format!(
                "days_back must not be negative (got {})",
                self.days_back
            )));
        }
        Ok(())
    }

    /// Oldest received time considered by an enumeration.
    pub fn since(&self) -> DateTime<Utc> {
        Utc::now() - Duration::days(self.days_back)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: SweepConfig =
            serde_yaml::from_str("target_folders: ['Junk']\nretry:\n  max_attempts: 3\n").unwrap();
        assert_eq!(config.target_folders, vec!["Junk"]);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.delay_ms, 1000);
        assert_eq!(config.inbox_folder, "Inbox");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_targets() {
        let config = SweepConfig {
            target_folders: Vec::new(),
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(SweepError::Config(_))));
    }

    #[test]
    fn test_config_file_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("rulesweep.yaml");
        let config = SweepConfig {
            days_back: 30,
            max_messages_per_pass: Some(100),
            ..Default::default()
        };
        config.to_file(&path).unwrap();

        let loaded = SweepConfig::from_file(&path).unwrap();
        assert_eq!(loaded.days_back, 30);
        assert_eq!(loaded.max_messages_per_pass, Some(100));
        assert_eq!(loaded.suggestion_rule, "SpamAutoDeleteHeader");
    }
}
