use rulesweep::corpus::CorpusStore;
use rulesweep::engine::{ClassificationEngine, EngineOptions, MessageFields};
use rulesweep::normalization::{combine_header_lines, header_from};
use rulesweep::SweepConfig;
use std::env;
use std::process;

fn main() {
    env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Debug)
        .init();

    let args: Vec<String> = env::args().collect();
    if args.len() < 3 {
        eprintln!("Usage: {} <config.yaml> <sender> [subject] [body] [raw-headers]", args[0]);
        process::exit(2);
    }

    let config = match SweepConfig::from_file(&args[1]) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Error loading configuration: {e}");
            process::exit(1);
        }
    };
    let store = CorpusStore::from_config(&config);
    let rules = store.load_rules();
    let safe = store.load_safe_senders();
    let engine = ClassificationEngine::new(
        &rules,
        &safe,
        EngineOptions {
            inbox_folder: config.inbox_folder.clone(),
            retry: config.retry.clone(),
        },
    );

    let sender = args[2].trim().to_lowercase();
    let raw_headers = args
        .get(5)
        .cloned()
        .unwrap_or_else(|| format!("From: <{sender}>"));
    let fields = MessageFields {
        header_from: header_from(&combine_header_lines(&raw_headers)),
        sender,
        subject: args.get(3).cloned().unwrap_or_default(),
        body: args.get(4).cloned().unwrap_or_default(),
    };

    println!("Testing message:");
    println!("Sender: {}", fields.sender);
    println!("Header from: {}", fields.header_from);
    println!("Subject: {}", fields.subject);
    println!("Rule order: {:?}", engine.rule_order());
    println!();

    let decision = engine.evaluate_fields(&fields);
    if let Some(pattern) = &decision.safe_pattern {
        println!(
            "Safe sender (pattern '{pattern}') - message would be restored to {}",
            config.inbox_folder
        );
        return;
    }
    if decision.matches.is_empty() {
        println!("No rule matched - message would be left in place");
        return;
    }
    for rule_match in &decision.matches {
        let actions: Vec<String> = rule_match.actions.iter().map(|a| a.to_string()).collect();
        println!(
            "Matched rule: {} ({} pattern '{}') -> {}",
            rule_match.rule,
            rule_match.field,
            rule_match.pattern,
            actions.join(", ")
        );
    }
    if decision.deletes() {
        println!("Message would be deleted");
    }
}
