//! CLI inspection entry point.
//!
//! # Responsibility
//! - Open the configured task store, load it and print a per-realm summary.
//! - Keep output deterministic for quick local sanity checks.

use gtd_core::{
    init_from_config, open_db, CoreConfig, EntityKind, GtdTree, PersistenceAdapter,
    SqliteRecordStore,
};
use log::error;
use std::error::Error;
use std::process::ExitCode;

fn main() -> ExitCode {
    match run() {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            error!("event=cli_run module=cli status=error error={err}");
            eprintln!("gtd: {err}");
            ExitCode::FAILURE
        }
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut config = CoreConfig::from_env()?;
    if let Some(data_dir) = std::env::args().nth(1) {
        config = config.with_data_dir(data_dir)?;
    }

    std::fs::create_dir_all(config.data_dir())?;
    init_from_config(&config)?;

    let store = SqliteRecordStore::try_new(open_db(config.db_path())?)?;
    let adapter = PersistenceAdapter::new(store);
    let mut tree = GtdTree::new();
    let report = adapter.load(&mut tree)?;

    println!("gtd_core version={}", gtd_core::core_version());
    println!("db={}", config.db_path().display());
    println!(
        "loaded={} skipped={} contexts={}",
        report.loaded,
        report.skipped,
        tree.count(EntityKind::Context)
    );

    for realm in tree.realms() {
        let tasks = tree.tasks_in_realm(realm.id())?;
        let open = tasks
            .iter()
            .filter_map(|id| tree.action_state(*id))
            .filter(|state| !state.is_complete())
            .count();
        println!(
            "realm={} visible={} areas={} tasks={} open={}",
            realm.title(),
            realm.is_visible(),
            realm.areas().len(),
            tasks.len(),
            open
        );
    }
    Ok(())
}
