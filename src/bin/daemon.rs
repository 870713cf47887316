use std::sync::Arc;

use elitemining_core::config::EliteMiningConfig;
use elitemining_core::events::Dispatcher;
use elitemining_core::galaxy::GalaxyIndex;
use elitemining_core::journal::{self, FirstRunPolicy};
use elitemining_core::session::persistence::SessionPaths;
use elitemining_core::store::{BundledAssets, HotspotStore};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    elitemining_core::error::init_tracing();

    let data_dir = elitemining_core::config::resolve_data_dir();
    std::fs::create_dir_all(&data_dir)?;

    let config_path = data_dir.join("config.toml");
    let config = EliteMiningConfig::load(&config_path)?;

    let journal_dir = config
        .journal_dir
        .clone()
        .or_else(default_journal_dir)
        .ok_or_else(|| anyhow::anyhow!("no journal directory configured and none could be guessed"))?;
    tracing::info!("watching journal directory {}", journal_dir.display());

    let hotspot_db_path = data_dir.join("hotspots.db");
    let store = Arc::new(HotspotStore::open(&hotspot_db_path)?);
    tracing::info!("hotspot store opened at {}", hotspot_db_path.display());

    let galaxy_db_path = data_dir.join("galaxy.db");
    let galaxy = if galaxy_db_path.exists() {
        match GalaxyIndex::open_readonly(&galaxy_db_path) {
            Ok(idx) => Some(Arc::new(idx)),
            Err(e) => {
                tracing::warn!("failed to open galaxy index at {}: {e}", galaxy_db_path.display());
                None
            }
        }
    } else {
        tracing::warn!("no bundled galaxy index at {}, distance lookups limited to visited systems", galaxy_db_path.display());
        None
    };

    let assets = BundledAssets {
        overlap_csv: existing(data_dir.join("overlap.csv")),
        res_csv: existing(data_dir.join("res.csv")),
        bundled_hotspot_db: existing(data_dir.join("bundled_hotspots.db")),
    };
    store.run_migrations(galaxy.as_deref(), &assets)?;
    tracing::info!("schema migrations up to date");

    let cursor_path = data_dir.join("journal_cursor.json");
    let mut receiver = journal::spawn(journal_dir, cursor_path, FirstRunPolicy::SkipToEnd)?;

    let session_paths = SessionPaths {
        reports_dir: data_dir.join("sessions"),
        csv_index_path: data_dir.join("sessions").join("sessions.csv"),
    };

    let mut dispatcher = Dispatcher::new(
        store.clone(),
        galaxy.clone(),
        session_paths,
        config.auto_start_session,
        config.cargo_max_capacity,
    );

    tracing::info!("elitemining-daemon running");

    loop {
        tokio::select! {
            record = receiver.recv() => {
                match record {
                    Some(record) => dispatcher.handle_raw(record),
                    None => {
                        tracing::warn!("journal reader task ended, shutting down");
                        break;
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                tracing::info!("shutdown requested, persisting any active session");
                if let Err(e) = dispatcher.stop_session() {
                    tracing::error!("failed to persist session on shutdown: {e}");
                }
                break;
            }
        }
    }

    Ok(())
}

fn existing(path: std::path::PathBuf) -> Option<std::path::PathBuf> {
    path.exists().then_some(path)
}

#[cfg(target_os = "windows")]
fn default_journal_dir() -> Option<std::path::PathBuf> {
    let home = std::env::var_os("USERPROFILE")?;
    Some(std::path::PathBuf::from(home).join("Saved Games").join("Frontier Developments").join("Elite Dangerous"))
}

#[cfg(not(target_os = "windows"))]
fn default_journal_dir() -> Option<std::path::PathBuf> {
    None
}
