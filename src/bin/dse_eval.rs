//! Offline rule evaluator.
//!
//! Loads a JSON farm snapshot, evaluates the rule catalog for one user (or
//! every user in the snapshot) and prints the ranked candidates as JSON.
//! Nothing is persisted.

use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde_json::json;
use tracing::info;
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use farmdse::{
    ContextBuilder, DseConfig, FarmId, FarmSnapshot, InMemoryFarmData, RuleCatalog, RulesEngine,
    UserId,
};

/// Command-line options.
struct Options {
    facts: PathBuf,
    user: Option<UserId>,
    farm: Option<FarmId>,
    now: Option<DateTime<Utc>>,
    catalog: Option<PathBuf>,
    config: Option<PathBuf>,
}

fn fail(message: &str) -> ! {
    eprintln!("error: {message}");
    std::process::exit(1);
}

fn value_of(args: &[String], i: usize, flag: &str) -> String {
    args.get(i + 1)
        .cloned()
        .unwrap_or_else(|| fail(&format!("{flag} requires a value")))
}

fn parse_uuid(raw: &str, flag: &str) -> Uuid {
    Uuid::parse_str(raw).unwrap_or_else(|_| fail(&format!("invalid {flag}: {raw}")))
}

fn parse_args() -> Options {
    let args: Vec<String> = std::env::args().collect();
    let mut facts = None;
    let mut options = Options {
        facts: PathBuf::new(),
        user: None,
        farm: None,
        now: None,
        catalog: None,
        config: None,
    };

    let mut i = 1;
    while i < args.len() {
        match args[i].as_str() {
            "--facts" | "-f" => facts = Some(PathBuf::from(value_of(&args, i, "--facts"))),
            "--user" | "-u" => {
                let raw = value_of(&args, i, "--user");
                options.user = Some(UserId::from_uuid(parse_uuid(&raw, "--user")));
            }
            "--farm" => {
                let raw = value_of(&args, i, "--farm");
                options.farm = Some(FarmId::from_uuid(parse_uuid(&raw, "--farm")));
            }
            "--now" => {
                let raw = value_of(&args, i, "--now");
                let now = DateTime::parse_from_rfc3339(&raw)
                    .unwrap_or_else(|_| fail(&format!("invalid --now (expected RFC 3339): {raw}")));
                options.now = Some(now.with_timezone(&Utc));
            }
            "--catalog" | "-c" => options.catalog = Some(PathBuf::from(value_of(&args, i, "--catalog"))),
            "--config" => options.config = Some(PathBuf::from(value_of(&args, i, "--config"))),
            "--help" | "-h" => {
                println!("dse-eval - evaluate the rule catalog against a farm snapshot");
                println!();
                println!("USAGE:");
                println!("    dse-eval --facts <FILE> [OPTIONS]");
                println!();
                println!("OPTIONS:");
                println!("    -f, --facts <FILE>        JSON farm snapshot (required)");
                println!("    -u, --user <UUID>         Evaluate one user [default: every user]");
                println!("        --farm <UUID>         Scope evaluation to one farm");
                println!("        --now <RFC3339>       Evaluation instant [default: now]");
                println!("    -c, --catalog <FILE>      JSON rule catalog [default: built-in rules]");
                println!("        --config <FILE>       JSON engine configuration");
                println!("    -h, --help                Print help information");
                std::process::exit(0);
            }
            arg => fail(&format!("unknown argument: {arg}")),
        }
        i += 2;
    }

    options.facts = facts.unwrap_or_else(|| fail("--facts is required"));
    options
}

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let options = parse_args();

    let config = options
        .config
        .as_ref()
        .map_or_else(|| Ok(DseConfig::default()), DseConfig::from_path)
        .and_then(DseConfig::with_env_overrides)
        .unwrap_or_else(|e| fail(&e.to_string()));

    let catalog = options
        .catalog
        .as_ref()
        .map_or_else(RuleCatalog::builtin, RuleCatalog::from_path)
        .unwrap_or_else(|e| fail(&e.to_string()));

    let snapshot = FarmSnapshot::from_path(&options.facts).unwrap_or_else(|e| fail(&e.to_string()));
    let users: Vec<UserId> = match options.user {
        Some(user) => vec![user],
        None => snapshot.users.iter().map(|u| u.user_id).collect(),
    };

    let engine = RulesEngine::new(Arc::new(catalog), &config.model_version_label);
    let contexts = ContextBuilder::new(Arc::new(InMemoryFarmData::from_snapshot(snapshot)))
        .with_finance_window(config.finance_window());
    let now = options.now.unwrap_or_else(Utc::now);

    info!(
        model_version = engine.model_version(),
        users = users.len(),
        %now,
        "evaluating snapshot"
    );

    let mut results = Vec::with_capacity(users.len());
    for user in users {
        let ctx = contexts
            .build(user, options.farm, now)
            .unwrap_or_else(|e| fail(&format!("user {user}: {e}")));
        let report = engine.evaluate(&ctx);
        results.push(json!({
            "userId": user,
            "modelVersion": engine.model_version(),
            "degraded": ctx.degraded(),
            "report": report,
        }));
    }

    match serde_json::to_string_pretty(&results) {
        Ok(out) => println!("{out}"),
        Err(e) => fail(&e.to_string()),
    }
}
