use clap::Parser;

use elitemining_core::config::resolve_data_dir;
use elitemining_core::galaxy::GalaxyIndex;
use elitemining_core::ringfinder::{self, RingQuery};
use elitemining_core::store::{HotspotStore, RingType};

/// Finds nearby ring hotspots from the locally-cached hotspot store.
#[derive(Debug, Parser)]
#[command(name = "elitemining-ringfinder", about = "Search for mining hotspots near a reference system")]
struct Cli {
    /// Reference system to search around.
    #[arg(long)]
    system: String,

    /// Canonical material name to filter on (omit for all materials).
    #[arg(long)]
    material: Option<String>,

    /// Ring type filter: rocky, metallic, metal-rich, icy.
    #[arg(long, value_name = "TYPE")]
    ring_type: Option<String>,

    /// Only include rings with at least one confirmed hotspot.
    #[arg(long, default_value_t = false)]
    confirmed_only: bool,

    /// Maximum search radius in light-years (capped at 100).
    #[arg(long, default_value_t = 50.0)]
    max_distance: f64,

    /// Maximum number of results to print.
    #[arg(long)]
    max_results: Option<usize>,
}

fn parse_ring_type(s: &str) -> Option<RingType> {
    match s.to_ascii_lowercase().replace(['-', '_'], " ").as_str() {
        "rocky" => Some(RingType::Rocky),
        "metallic" => Some(RingType::Metallic),
        "metal rich" => Some(RingType::MetalRich),
        "icy" => Some(RingType::Icy),
        _ => None,
    }
}

fn main() -> anyhow::Result<()> {
    elitemining_core::error::init_tracing();
    let cli = Cli::parse();

    let data_dir = resolve_data_dir();
    let store = HotspotStore::open(data_dir.join("hotspots.db"))?;
    let galaxy_path = data_dir.join("galaxy.db");
    let galaxy = galaxy_path.exists().then(|| GalaxyIndex::open_readonly(&galaxy_path)).transpose()?;

    let reference = ringfinder::resolve_reference_coords(&store, galaxy.as_ref(), &cli.system)
        .map_err(|e| anyhow::anyhow!("{e}"))?;

    let ring_type = match &cli.ring_type {
        Some(s) => {
            let parsed = parse_ring_type(s);
            if parsed.is_none() {
                anyhow::bail!("unrecognized ring type '{s}'; expected rocky, metallic, metal-rich, or icy");
            }
            parsed
        }
        None => None,
    };

    let query = RingQuery {
        reference_system: cli.system.clone(),
        ring_type,
        material: cli.material.clone(),
        confirmed_only: cli.confirmed_only,
        max_distance_ly: cli.max_distance,
        max_results: cli.max_results,
    };

    let results = ringfinder::find_rings(&store, galaxy.as_ref(), reference, &query)?;

    if results.is_empty() {
        println!("No matching rings found within {:.0} ly of {}.", cli.max_distance, cli.system);
        return Ok(());
    }

    for result in &results {
        let visited = if result.visited { "visited" } else { "unvisited" };
        let ring_type = result.ring_type.map(|t| t.to_string()).unwrap_or_else(|| "Unknown".to_string());
        let density = result
            .density
            .map(|d| d.to_db_string())
            .unwrap_or_else(|| "-".to_string());
        let ls = result
            .light_seconds
            .map(|ls| format!("{ls:.0}Ls"))
            .unwrap_or_else(|| "-".to_string());
        let summary =
            if cli.material.is_some() { result.hotspot_summary() } else { result.hotspot_summary_abbreviated() };
        println!(
            "{:>7.2} ly  {:>8}  {:<24} {:<10} [{:<10}] density={:<10} {}",
            result.distance_ly,
            ls,
            format!("{} / {}", result.system, result.body),
            visited,
            ring_type,
            density,
            summary,
        );
    }

    Ok(())
}
