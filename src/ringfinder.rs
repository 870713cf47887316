//! Ring finder query engine (C7), per SPEC_FULL.md §4.7.

use std::collections::HashMap;
use std::time::Duration;

use crate::error::StoreError;
use crate::galaxy::{Coords, GalaxyIndex};
use crate::store::materials::normalize_material_name;
use crate::store::{CoordSource, Hotspot, HotspotStore, RingType};

const MAX_DISTANCE_LY: f64 = 100.0;
const ENRICHMENT_TIMEOUT: Duration = Duration::from_secs(12);

/// Builds the `reqwest::Client` used for optional Spansh/EDSM enrichment
/// lookups, shared by the ring finder and the ingestor. Built once at
/// startup and handed down rather than constructed per call.
pub fn enrichment_client() -> reqwest::Client {
    reqwest::Client::builder()
        .timeout(ENRICHMENT_TIMEOUT)
        .build()
        .expect("reqwest client with a fixed timeout never fails to build")
}

#[derive(Debug, Clone, Default)]
pub struct RingQuery {
    pub reference_system: String,
    pub ring_type: Option<RingType>,
    pub material: Option<String>,
    pub confirmed_only: bool,
    pub max_distance_ly: f64,
    pub max_results: Option<usize>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RingResult {
    pub system: String,
    pub body: String,
    pub distance_ly: f64,
    pub light_seconds: Option<f64>,
    pub visited: bool,
    pub ring_type: Option<RingType>,
    pub hotspots: Vec<(String, i64)>,
    pub density: Option<crate::store::Density>,
}

impl RingResult {
    /// `"Platinum (3), Painite (2)"`, sorted by count descending for
    /// display, matching the reference UI's "All Materials" summary column.
    pub fn hotspot_summary(&self) -> String {
        let mut sorted = self.hotspots.clone();
        sorted.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        sorted
            .iter()
            .map(|(m, c)| format!("{m} ({c})"))
            .collect::<Vec<_>>()
            .join(", ")
    }

    /// Abbreviated form for the "All Materials" query, where the full
    /// per-material breakdown would make every row unreadably long:
    /// the distinct material count plus the combined hotspot total,
    /// e.g. `"3 materials, 7 hotspots"`.
    pub fn hotspot_summary_abbreviated(&self) -> String {
        let material_count = self.hotspots.len();
        let total: i64 = self.hotspots.iter().map(|(_, c)| c).sum();
        let materials = if material_count == 1 { "material" } else { "materials" };
        let hotspots = if total == 1 { "hotspot" } else { "hotspots" };
        format!("{material_count} {materials}, {total} {hotspots}")
    }
}

#[derive(Debug)]
pub enum ReferenceResolutionError {
    NotFound { system: String },
    Store(StoreError),
}

impl std::fmt::Display for ReferenceResolutionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReferenceResolutionError::NotFound { system } => {
                write!(f, "no known coordinates for reference system '{system}'")
            }
            ReferenceResolutionError::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for ReferenceResolutionError {}

impl From<StoreError> for ReferenceResolutionError {
    fn from(e: StoreError) -> Self {
        ReferenceResolutionError::Store(e)
    }
}

/// Resolves a reference system's coordinates: visited-systems first (most
/// authoritative, since it is always journal-sourced), then the bundled
/// galaxy index. An external API lookup is intentionally not attempted here
/// — callers that want it can layer `enrichment_client()` on top and retry
/// with a `Coords` override before calling `find_rings`.
pub fn resolve_reference_coords(
    store: &HotspotStore,
    galaxy: Option<&GalaxyIndex>,
    system: &str,
) -> Result<Coords, ReferenceResolutionError> {
    if let Some(visited) = store.get_visited_system(system)? {
        if let (Some(x), Some(y), Some(z)) = (visited.x, visited.y, visited.z) {
            return Ok(Coords { x, y, z });
        }
    }
    if let Some(galaxy) = galaxy {
        if let Some(coords) = galaxy.coords(system)? {
            return Ok(coords);
        }
    }
    Err(ReferenceResolutionError::NotFound { system: system.to_string() })
}

/// Runs the full query: bbox pre-filter over both indices, chunked
/// hotspot-store lookup, filtering, and final sort/truncate.
pub fn find_rings(
    store: &HotspotStore,
    galaxy: Option<&GalaxyIndex>,
    reference: Coords,
    query: &RingQuery,
) -> Result<Vec<RingResult>, StoreError> {
    let radius = query.max_distance_ly.min(MAX_DISTANCE_LY).max(0.0);

    let mut candidate_coords: HashMap<String, Coords> = HashMap::new();
    let mut visited_names: HashMap<String, bool> = HashMap::new();

    if let Some(galaxy) = galaxy {
        for system in galaxy.systems_in_bbox(reference, radius)? {
            if reference.distance(&system.coords) <= radius {
                candidate_coords.insert(system.name.clone(), system.coords);
                visited_names.entry(system.name).or_insert(false);
            }
        }
    }
    for (name, coords) in store.visited_systems_in_bbox(reference, radius)? {
        if reference.distance(&coords) <= radius {
            candidate_coords.insert(name.clone(), coords);
            visited_names.insert(name, true);
        }
    }

    if candidate_coords.is_empty() {
        return Ok(Vec::new());
    }

    let system_names: Vec<String> = candidate_coords.keys().cloned().collect();
    let rows = store.hotspots_in_systems(&system_names)?;

    let confirmed_only = query.confirmed_only || query.material.is_some();
    let wanted_material = query.material.as_ref().map(|m| normalize_material_name(m));

    let mut grouped: HashMap<(String, String), Vec<Hotspot>> = HashMap::new();
    for row in rows {
        if let Some(rt) = query.ring_type {
            if row.ring.ring_type != Some(rt) {
                continue;
            }
        }
        if confirmed_only && row.hotspot_count <= 0 {
            continue;
        }
        if let Some(wanted) = &wanted_material {
            if &normalize_material_name(&row.material_name) != wanted {
                continue;
            }
        }
        grouped.entry((row.system_name.clone(), row.body_name.clone())).or_default().push(row);
    }

    let mut results = Vec::new();
    for ((system, body), hotspots) in grouped {
        let coords = candidate_coords
            .get(&system)
            .copied()
            .or_else(|| hotspots.iter().find_map(|h| match (h.x, h.y, h.z) {
                (Some(x), Some(y), Some(z)) => Some(Coords { x, y, z }),
                _ => None,
            }));
        let Some(coords) = coords else { continue };
        let distance_ly = reference.distance(&coords);

        let ring_type = hotspots.iter().find_map(|h| h.ring.ring_type);
        let density = hotspots.iter().find_map(|h| h.ring.density);
        let light_seconds = hotspots.iter().find_map(|h| h.ring.ls_distance);
        let total_count: i64 = hotspots.iter().map(|h| h.hotspot_count).sum();
        let hotspot_list: Vec<(String, i64)> =
            hotspots.into_iter().map(|h| (h.material_name, h.hotspot_count)).collect();

        results.push((
            total_count,
            RingResult {
                visited: visited_names.get(&system).copied().unwrap_or(false),
                system,
                body,
                distance_ly,
                light_seconds,
                ring_type,
                hotspots: hotspot_list,
                density,
            },
        ));
    }

    results.sort_by(|(count_a, a), (count_b, b)| {
        a.distance_ly
            .partial_cmp(&b.distance_ly)
            .unwrap_or(std::cmp::Ordering::Equal)
            .then_with(|| count_b.cmp(count_a))
            .then_with(|| a.system.cmp(&b.system))
            .then_with(|| a.body.cmp(&b.body))
    });

    let mut results: Vec<RingResult> = results.into_iter().map(|(_, r)| r).collect();
    if let Some(max) = query.max_results {
        results.truncate(max);
    }
    Ok(results)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{Density, UpsertHotspot};

    fn seeded(tmp: &tempfile::TempDir) -> (HotspotStore, GalaxyIndex) {
        let store = HotspotStore::open_in_memory().unwrap();
        let galaxy = GalaxyIndex::create(tmp.path().join("galaxy.db")).unwrap();
        galaxy.insert("Paesia", Coords { x: 0.0, y: 0.0, z: 0.0 }).unwrap();
        galaxy.insert("Deciat", Coords { x: 5.0, y: 0.0, z: 0.0 }).unwrap();
        galaxy.insert("Far Away", Coords { x: 500.0, y: 0.0, z: 0.0 }).unwrap();

        store
            .upsert_hotspot(UpsertHotspot {
                system: "Deciat".to_string(),
                body: "1 A Ring".to_string(),
                material: "Platinum".to_string(),
                hotspot_count: 3,
                scan_date: "2024-01-01T00:00:00Z".to_string(),
                coords: Some(Coords { x: 5.0, y: 0.0, z: 0.0 }),
                coord_source: CoordSource::Journal,
                ring: Default::default(),
                data_source: Some("journal".to_string()),
            })
            .unwrap();
        store
            .upsert_hotspot(UpsertHotspot {
                system: "Far Away".to_string(),
                body: "1 A Ring".to_string(),
                material: "Platinum".to_string(),
                hotspot_count: 9,
                scan_date: "2024-01-01T00:00:00Z".to_string(),
                coords: Some(Coords { x: 500.0, y: 0.0, z: 0.0 }),
                coord_source: CoordSource::Journal,
                ring: Default::default(),
                data_source: Some("journal".to_string()),
            })
            .unwrap();
        (store, galaxy)
    }

    #[test]
    fn bbox_prefilter_excludes_out_of_range_systems() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, galaxy) = seeded(&tmp);
        let query = RingQuery {
            reference_system: "Paesia".to_string(),
            max_distance_ly: 50.0,
            ..Default::default()
        };
        let results = find_rings(&store, Some(&galaxy), Coords { x: 0.0, y: 0.0, z: 0.0 }, &query).unwrap();
        let systems: Vec<_> = results.iter().map(|r| r.system.as_str()).collect();
        assert!(systems.contains(&"Deciat"));
        assert!(!systems.contains(&"Far Away"));
    }

    #[test]
    fn material_filter_matches_through_alias_table() {
        let tmp = tempfile::tempdir().unwrap();
        let store = HotspotStore::open_in_memory().unwrap();
        let galaxy = GalaxyIndex::create(tmp.path().join("galaxy.db")).unwrap();
        galaxy.insert("Deciat", Coords { x: 0.0, y: 0.0, z: 0.0 }).unwrap();
        store
            .upsert_hotspot(UpsertHotspot {
                system: "Deciat".to_string(),
                body: "1 A Ring".to_string(),
                material: "Low Temperature Diamonds".to_string(),
                hotspot_count: 2,
                scan_date: "2024-01-01T00:00:00Z".to_string(),
                coords: Some(Coords { x: 0.0, y: 0.0, z: 0.0 }),
                coord_source: CoordSource::Journal,
                ring: Default::default(),
                data_source: None,
            })
            .unwrap();
        let query = RingQuery {
            reference_system: "Deciat".to_string(),
            material: Some("LTD".to_string()),
            max_distance_ly: 10.0,
            ..Default::default()
        };
        let results = find_rings(&store, Some(&galaxy), Coords { x: 0.0, y: 0.0, z: 0.0 }, &query).unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].hotspots[0].0, "Low Temperature Diamonds");
    }

    #[test]
    fn sort_orders_by_distance_then_count_then_name() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, galaxy) = seeded(&tmp);
        let query = RingQuery {
            reference_system: "Paesia".to_string(),
            max_distance_ly: 1000.0,
            ..Default::default()
        };
        let results = find_rings(&store, Some(&galaxy), Coords { x: 0.0, y: 0.0, z: 0.0 }, &query).unwrap();
        assert_eq!(results[0].system, "Deciat");
        assert_eq!(results[1].system, "Far Away");
    }

    #[test]
    fn max_distance_is_capped_at_100_ly() {
        let tmp = tempfile::tempdir().unwrap();
        let (store, galaxy) = seeded(&tmp);
        let query = RingQuery {
            reference_system: "Paesia".to_string(),
            max_distance_ly: 10_000.0,
            ..Default::default()
        };
        let results = find_rings(&store, Some(&galaxy), Coords { x: 0.0, y: 0.0, z: 0.0 }, &query).unwrap();
        assert!(!results.iter().any(|r| r.system == "Far Away"));
    }

    #[test]
    fn hotspot_summary_formats_and_sorts_by_count() {
        let result = RingResult {
            system: "Deciat".to_string(),
            body: "1 A Ring".to_string(),
            distance_ly: 5.0,
            light_seconds: Some(1234.5),
            visited: true,
            ring_type: None,
            hotspots: vec![("Painite".to_string(), 2), ("Platinum".to_string(), 3)],
            density: Some(Density::Numeric(1.5)),
        };
        assert_eq!(result.hotspot_summary(), "Platinum (3), Painite (2)");
        assert_eq!(result.hotspot_summary_abbreviated(), "2 materials, 5 hotspots");
    }
}
