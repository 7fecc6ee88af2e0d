//! `snare rules`: inspect and load autorun rule definitions from the CLI.

use std::path::Path;

use snare_core::{Config, Paths};
use snare_engine::RuleLoader;
use snare_storage::{Db, RuleStore};

pub async fn list() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let db = Db::open(&config.db_file(&paths))?;
    let rules = RuleStore::new(db).all()?;

    if rules.is_empty() {
        println!("No autorun rules stored.");
        println!("Load one with `snare rules load <file.json>`.");
        return Ok(());
    }

    println!(
        "{:<5} {:<24} {:<14} {:<14} {:<16} {}",
        "ID", "NAME", "BROWSER", "OS", "CHAIN", "MODULES"
    );
    for rule in &rules {
        println!(
            "{:<5} {:<24} {:<14} {:<14} {:<16} {}",
            rule.id,
            rule.name,
            format!("{} {}", rule.browser, rule.browser_version),
            format!("{} {}", rule.os, rule.os_version),
            rule.chain_mode,
            rule.modules.join(", "),
        );
    }
    println!();
    println!("{} rule(s)", rules.len());

    Ok(())
}

pub async fn load(file: &str) -> anyhow::Result<()> {
    let paths = Paths::new();
    paths.ensure_dirs()?;
    let config = Config::load_or_default(&paths)?;
    let db = Db::open(&config.db_file(&paths))?;
    let loader = RuleLoader::new(RuleStore::new(db));

    let result = loader.load_file(Path::new(file));
    if !result.success {
        let reason = result
            .error
            .unwrap_or_else(|| "unknown error".to_string());
        anyhow::bail!("rule load failed: {}", reason);
    }
    match result.rule_id {
        Some(id) => println!("✓ rule loaded (id {})", id),
        None => println!("✓ rule loaded"),
    }

    Ok(())
}
