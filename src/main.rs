use anyhow::{bail, Context};
use clap::{Arg, ArgAction, Command};
use log::LevelFilter;
use rulesweep::corpus::{self, CorpusStore};
use rulesweep::patterns::invalid_patterns;
use rulesweep::report::MatchInfo;
use rulesweep::review::{CorpusEdit, CorpusEditor, Suggestions};
use rulesweep::rules::FieldKind;
use rulesweep::{MemoryMailbox, Orchestrator, SweepConfig};
use std::io::{self, BufRead, Write};
use std::path::Path;
use std::process;

const DEPRECATED_FLAGS: &[&str] = &[
    "use-regex-files",
    "convert-safe-senders-to-regex",
    "convert-rules-to-regex",
];

const REVIEW_HELP: &str = "Options:
  d  - Add sender domain regex to the block rule (blocks by domain)
  e  - Add full sender email to the block rule (blocks this email)
  s  - Add literal address/domain to safe senders (never block)
  sd - Add sender-domain regex to safe senders (never block any subdomain)
  ?  - Show this help
  (empty) - Skip this message";

fn main() {
    let mut command = Command::new("rulesweep")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Rule-based bulk mail sweeper with a two-pass classification engine")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("FILE")
                .help("Configuration file path")
                .default_value("rulesweep.yaml"),
        )
        .arg(
            Arg::new("update-rules")
                .short('u')
                .long("update-rules")
                .visible_alias("update_rules")
                .help("Interactively add rules for unmatched messages between passes")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("generate-config")
                .long("generate-config")
                .value_name("FILE")
                .help("Generate a default configuration file")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("test-config")
                .long("test-config")
                .help("Load the rule corpus and report patterns that do not compile")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new("mailbox")
                .long("mailbox")
                .value_name("FILE")
                .help("YAML mailbox snapshot to sweep; updated in place")
                .action(ArgAction::Set),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .help("Enable debug logging")
                .action(ArgAction::SetTrue),
        );
    for flag in DEPRECATED_FLAGS {
        command = command.arg(
            Arg::new(*flag)
                .long(*flag)
                .hide(true)
                .action(ArgAction::SetTrue),
        );
    }
    let matches = command.get_matches();

    let log_level = if matches.get_flag("verbose") {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };
    env_logger::Builder::from_default_env()
        .filter_level(log_level)
        .init();

    for flag in DEPRECATED_FLAGS {
        if matches.get_flag(flag) {
            log::warn!("--{flag} is deprecated and ignored");
        }
    }

    if let Some(generate_path) = matches.get_one::<String>("generate-config") {
        generate_default_config(generate_path);
        return;
    }

    let config_path = matches
        .get_one::<String>("config")
        .map(String::as_str)
        .unwrap_or("rulesweep.yaml");
    let config = match load_config(config_path) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e:#}");
            process::exit(1);
        }
    };

    if matches.get_flag("test-config") {
        match test_config(&config) {
            Ok(true) => println!("All patterns compiled successfully."),
            Ok(false) => process::exit(1),
            Err(e) => {
                eprintln!("Configuration test failed: {e:#}");
                process::exit(1);
            }
        }
        return;
    }

    let result = run(
        &config,
        matches.get_one::<String>("mailbox").map(String::as_str),
        matches.get_flag("update-rules"),
    );
    if let Err(e) = result {
        log::error!("{e:#}");
        process::exit(1);
    }
}

fn load_config(path: &str) -> anyhow::Result<SweepConfig> {
    if Path::new(path).exists() {
        SweepConfig::from_file(path).with_context(|| format!("reading {path}"))
    } else {
        log::warn!("Configuration file '{path}' not found, using default configuration");
        Ok(SweepConfig::default())
    }
}

fn generate_default_config(path: &str) {
    let config = SweepConfig::default();
    match config.to_file(path) {
        Ok(()) => {
            println!("Default configuration written to: {path}");
            println!("Please edit the configuration file to suit your needs.");
        }
        Err(e) => {
            eprintln!("Error writing configuration file: {e}");
            process::exit(1);
        }
    }
}

/// Strictly load both corpus files and list every pattern that would be
/// dropped. Returns false when any pattern is invalid.
fn test_config(config: &SweepConfig) -> anyhow::Result<bool> {
    let rules = corpus::read_rules(&config.rules_file)
        .with_context(|| format!("loading {}", config.rules_file.display()))?;
    let safe = corpus::read_safe_senders(&config.safe_senders_file)
        .with_context(|| format!("loading {}", config.safe_senders_file.display()))?;

    println!("Number of rules: {}", rules.len());
    let mut valid = true;
    for (i, rule) in rules.rules().enumerate() {
        let state = if rule.enabled { "" } else { " (disabled)" };
        println!("  Rule {}: {}{state}", i + 1, rule.name);
        for kind in FieldKind::ALL {
            let lists = [("condition", &rule.conditions), ("exception", &rule.exceptions)];
            for (list, lists) in lists {
                for (pattern, error) in invalid_patterns(lists.get(kind)) {
                    println!("    invalid {list} {kind} pattern '{pattern}': {error}");
                    valid = false;
                }
            }
        }
    }

    println!("Number of safe sender patterns: {}", safe.len());
    for (pattern, error) in invalid_patterns(&safe.safe_senders) {
        println!("  invalid safe sender pattern '{pattern}': {error}");
        valid = false;
    }

    let mut canonical = rules.clone();
    corpus::canonicalize_rules(&mut canonical);
    let diff = corpus::compare_rules(&rules, &canonical);
    if !diff.is_empty() {
        println!("Next export will canonicalize {} rules:", diff.modified.len());
        for (name, paths) in &diff.modified {
            println!("  {name}: {}", paths.join(", "));
        }
    }

    Ok(valid)
}

fn run(config: &SweepConfig, mailbox_path: Option<&str>, interactive: bool) -> anyhow::Result<()> {
    let Some(mailbox_path) = mailbox_path else {
        bail!("no mailbox to sweep; pass --mailbox FILE");
    };
    let mut mailbox = MemoryMailbox::from_file(mailbox_path)
        .with_context(|| format!("loading mailbox snapshot {mailbox_path}"))?;

    let store = CorpusStore::from_config(config);
    let mut rules = store.load_rules();
    let mut safe = store.load_safe_senders();

    let mut prompt = StdinEditor::new();
    let editor: Option<&mut dyn CorpusEditor> = if interactive {
        Some(&mut prompt)
    } else {
        None
    };

    let summary = Orchestrator::new(config)
        .run(&mut mailbox, &mut rules, &mut safe, editor, Some(&store))
        .context("sweep failed")?;

    store.export_rules(&mut rules).context("exporting rules")?;
    store
        .export_safe_senders(&mut safe)
        .context("exporting safe senders")?;
    mailbox
        .to_file(mailbox_path)
        .with_context(|| format!("writing mailbox snapshot {mailbox_path}"))?;

    let total = summary.total();
    println!(
        "Processed {} messages: {} flagged, {} deleted, {} restored",
        total.processed, total.flagged, total.deleted, total.restored
    );
    Ok(())
}

/// Asks on the terminal what to do with each unmatched sender.
struct StdinEditor {
    stdin: io::Stdin,
}

impl StdinEditor {
    fn new() -> Self {
        StdinEditor { stdin: io::stdin() }
    }

    fn read_key(&self) -> Option<String> {
        let mut line = String::new();
        match self.stdin.lock().read_line(&mut line) {
            Ok(0) | Err(_) => None,
            Ok(_) => Some(line.trim().to_lowercase()),
        }
    }
}

impl CorpusEditor for StdinEditor {
    fn review(&mut self, info: &MatchInfo, suggestions: &Suggestions) -> CorpusEdit {
        println!();
        println!("{}", "=".repeat(60));
        println!("Subject: {}", info.subject);
        println!("From: {}", info.sender);
        println!("Domain: {}", info.header_from);
        println!("Unique URLs: {:?}", info.url_stubs);

        loop {
            print!("Add '{}' to block rule or safe senders? (d/e/s/sd/?): ", info.sender);
            let _ = io::stdout().flush();

            let Some(key) = self.read_key() else {
                return CorpusEdit::Skip;
            };
            if key == "?" {
                println!("{REVIEW_HELP}");
                continue;
            }
            match suggestions.edit_for_key(&key) {
                Some(edit) => return edit,
                None => println!("Unrecognized response '{key}'"),
            }
        }
    }
}
