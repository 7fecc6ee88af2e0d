//! `snare status`: configuration and store overview.

use chrono::Utc;

use snare_core::{Config, Paths};
use snare_engine::registry;
use snare_storage::{BrowserStore, Db, ModuleStore, RuleStore};

pub async fn run() -> anyhow::Result<()> {
    let paths = Paths::new();

    println!("snare status");
    println!("============");
    println!();

    let config_path = paths.config_file();
    let config_exists = config_path.exists();
    println!(
        "Config:  {} {}",
        config_path.display(),
        if config_exists {
            "✓"
        } else {
            "✗ (not found, defaults in effect)"
        }
    );

    let config = Config::load_or_default(&paths)?;
    let db_path = config.db_file(&paths);
    let db_exists = db_path.exists();
    println!(
        "Store:   {} {}",
        db_path.display(),
        if db_exists { "✓" } else { "✗ (created on first serve)" }
    );
    println!();

    println!("Hook endpoint:");
    println!(
        "  url:        http://{}:{}{}",
        config.hook.host, config.hook.port, config.hook.path
    );
    println!("  parameter:  {}", config.hook.session_param);
    println!("  poll:       {}ms", config.hook.poll_interval_ms);
    println!(
        "  websocket:  {}",
        if config.hook.websocket.enable {
            "✓ enabled"
        } else {
            "disabled"
        }
    );
    println!(
        "  autorun:    {}",
        if config.autorun.enable { "✓ enabled" } else { "disabled" }
    );
    println!(
        "  admin api:  {}",
        match config.api.token.as_deref() {
            Some(t) if !t.is_empty() => "✓ token configured",
            _ => "✗ disabled (no api.token)",
        }
    );

    if db_exists {
        let db = Db::open(&db_path)?;
        let browsers = BrowserStore::new(db.clone());
        let modules = ModuleStore::new(db.clone());
        let rules = RuleStore::new(db);

        let all = browsers.all()?;
        let now = Utc::now().timestamp();
        let online = all.iter().filter(|b| registry::is_online(b, now)).count();

        println!();
        println!("Store contents:");
        println!("  hooked browsers:  {} ({} online)", all.len(), online);
        println!("  autorun rules:    {}", rules.all()?.len());
        println!("  modules:          {}", modules.all()?.len());
    }

    println!();
    println!("Run `snare serve` to start the hook server.");

    Ok(())
}
