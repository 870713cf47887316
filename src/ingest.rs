//! Ring/hotspot ingestor (C6): applies `SAASignalsFound` and `Scan` events to
//! the hotspot store, per SPEC_FULL.md §4.6.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::StoreError;
use crate::events::{RingScanNamed, SignalEntry};
use crate::galaxy::Coords;
use crate::store::materials::{normalize_body_name, normalize_material_name};
use crate::store::{CoordSource, RingMetadata, RingType, UpsertHotspot};
use crate::store::HotspotStore;

/// Matches a trailing ring designator (`"3 A Ring"`, `"1 a A Ring"`) so the
/// embedded-system-prefix check below can tell a genuine multi-star prefix
/// apart from a lone star-letter that belongs to the body itself.
fn ring_suffix_regex() -> &'static Regex {
    static RE: LazyLock<Regex> =
        LazyLock::new(|| Regex::new(r"(?i)^(.*?)\s+([A-Za-z]?\s*\d*\s*[A-Za-z]\s+Ring)$").unwrap());
    &RE
}

/// After `normalize_body_name` has already stripped `current_system`'s own
/// prefix, check whether what remains still begins with a *different*
/// multi-word system name — this happens when a ring is scanned in a
/// secondary star of a multi-star system and the journal reports the
/// primary star's name as the current system. A single-letter star
/// designator (`"B 3 A Ring"`) is not a system name and is left alone.
fn split_embedded_system(body: &str, current_system: &str) -> (String, String) {
    if let Some(caps) = ring_suffix_regex().captures(body) {
        let prefix = caps.get(1).unwrap().as_str().trim();
        let ring_part = caps.get(2).unwrap().as_str().trim();
        if prefix.contains(' ') && !prefix.eq_ignore_ascii_case(current_system) {
            return (prefix.to_string(), ring_part.to_string());
        }
    }
    (current_system.to_string(), body.to_string())
}

/// Applies the hotspot list from one `SAASignalsFound` event.
pub fn handle_signals_found(
    store: &HotspotStore,
    current_system: &str,
    current_coords: Option<Coords>,
    body_raw: &str,
    signals: &[SignalEntry],
    timestamp: &str,
) -> Result<(), StoreError> {
    let stripped = normalize_body_name(body_raw, current_system);
    let (system, body) = split_embedded_system(&stripped, current_system);

    let was_known = store.check_ring_exists(&system, &body)?;

    for signal in signals {
        let label = signal.type_localised.as_deref().unwrap_or(&signal.material_type);
        let material = normalize_material_name(label);
        store.upsert_hotspot(UpsertHotspot {
            system: system.clone(),
            body: body.clone(),
            material,
            hotspot_count: signal.count,
            scan_date: timestamp.to_string(),
            coords: current_coords,
            coord_source: CoordSource::Journal,
            ring: RingMetadata::default(),
            data_source: Some("journal".to_string()),
        })?;
    }

    if !was_known {
        tracing::debug!(
            "ingest: new ring {system} / {body} first seen; external ring-metadata enrichment is best-effort and optional"
        );
        // External Spansh/EDSM enrichment (C7's fetcher) is invoked by the
        // caller that owns the HTTP client; this function only records the
        // hotspot data itself, matching §4.6 step 4's "non-fatal" framing
        // (a missing enrichment client is equivalent to a failed one).
    }

    Ok(())
}

fn ring_type_from_class(ring_class: &str) -> RingType {
    let lower = ring_class.to_lowercase();
    if lower.contains("metalrich") {
        RingType::MetalRich
    } else if lower.contains("metal") {
        RingType::Metallic
    } else if lower.contains("icy") {
        RingType::Icy
    } else if lower.contains("rocky") {
        RingType::Rocky
    } else {
        RingType::Unknown
    }
}

/// Area-based ring density, matching the community (EDTools) formula
/// exactly so locally-scanned rings compare with bundled community data.
/// Radii are scaled by 1,000 before squaring; returns `None` for any
/// non-physical input.
pub fn calculate_ring_density(mass: f64, inner_radius: f64, outer_radius: f64) -> Option<f64> {
    if mass <= 0.0 || inner_radius <= 0.0 || outer_radius <= 0.0 {
        return None;
    }
    if outer_radius <= inner_radius {
        return None;
    }
    let r_inner = inner_radius / 1000.0;
    let r_outer = outer_radius / 1000.0;
    let area = std::f64::consts::PI * (r_outer.powi(2) - r_inner.powi(2));
    if area <= 0.0 {
        return None;
    }
    let density = mass / area;
    Some((density * 1_000_000.0).round() / 1_000_000.0)
}

/// Applies ring physical metadata from one `Scan` event. `rings[].name` is
/// the journal's full ring name (`"<system> <body> A Ring"`); normalized the
/// same way a signals-found body is.
pub fn handle_scan(
    store: &HotspotStore,
    current_system: &str,
    timestamp: &str,
    distance_from_arrival_ls: Option<f64>,
    rings: &[RingScanNamed],
) -> Result<(), StoreError> {
    for ring in rings {
        let stripped = normalize_body_name(&ring.name, current_system);
        let (system, body) = split_embedded_system(&stripped, current_system);

        let density = calculate_ring_density(ring.scan.mass_mt, ring.scan.inner_rad, ring.scan.outer_rad)
            .map(crate::store::Density::Numeric);

        let fields = RingMetadata {
            ring_type: Some(ring_type_from_class(&ring.scan.ring_class)),
            ls_distance: distance_from_arrival_ls,
            inner_radius: Some(ring.scan.inner_rad),
            outer_radius: Some(ring.scan.outer_rad),
            ring_mass: Some(ring.scan.mass_mt),
            density,
        };

        // A Scan event can arrive before any SAASignalsFound for this ring;
        // update_ring_metadata is safe to call on a ring with zero rows
        // (it simply updates nothing) so this never invents a placeholder
        // material row. A later SAASignalsFound backfills from it via
        // HotspotStore::upsert_hotspot's sibling propagation.
        store.update_ring_metadata(&system, &body, fields)?;
        let _ = timestamp;
    }
    Ok(())
}

/// Display-only cleanup of a journal ring name: strips the system prefix,
/// collapses whitespace, and upper-cases the trailing ring-letter
/// designator while leaving any interior lowercase body letter untouched
/// (`"2 a A Ring"` stays `"2 a A Ring"`, never `"2 A A RING"`).
pub fn clean_ring_name(full_ring_name: &str, system: &str) -> String {
    let stripped = normalize_body_name(full_ring_name, system);
    let mut words: Vec<String> = stripped.split_whitespace().map(|w| w.to_string()).collect();
    if let Some(last) = words.iter().rposition(|w| w.eq_ignore_ascii_case("ring")) {
        if last > 0 {
            if let Some(letter_word) = words.get_mut(last - 1) {
                if letter_word.len() == 1 {
                    *letter_word = letter_word.to_uppercase();
                }
            }
        }
        words[last] = "Ring".to_string();
    }
    words.join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::ReserveLevel;

    #[test]
    fn density_matches_reference_example() {
        let density = calculate_ring_density(5_965_100_000.0, 64_972_000.0, 66_417_000.0).unwrap();
        assert!((density - 10.000944).abs() < 1e-5, "got {density}");
    }

    #[test]
    fn density_rejects_non_physical_inputs() {
        assert_eq!(calculate_ring_density(0.0, 1.0, 2.0), None);
        assert_eq!(calculate_ring_density(1.0, 2.0, 1.0), None);
        assert_eq!(calculate_ring_density(1.0, -1.0, 2.0), None);
    }

    #[test]
    fn signals_found_normalizes_body_and_preserves_lowercase_letter() {
        let store = HotspotStore::open_in_memory().unwrap();
        let signals = vec![SignalEntry { material_type: "Platinum".to_string(), type_localised: None, count: 3 }];
        handle_signals_found(&store, "Paesia", None, "Paesia 2 a A Ring", &signals, "2024-01-01T00:00:00Z").unwrap();
        let hotspots = store.get_body_hotspots("Paesia", "2 a A Ring").unwrap();
        assert_eq!(hotspots, vec![("Platinum".to_string(), 3)]);
    }

    #[test]
    fn scan_populates_ring_metadata_with_matching_density() {
        let store = HotspotStore::open_in_memory().unwrap();
        let rings = vec![RingScanNamed {
            name: "Paesia 2 A Ring".to_string(),
            scan: crate::events::RingScan {
                ring_class: "eRingClass_Metalic".to_string(),
                mass_mt: 5_965_100_000.0,
                inner_rad: 64_972_000.0,
                outer_rad: 66_417_000.0,
            },
        }];
        handle_scan(&store, "Paesia", "2024-01-01T00:00:00Z", Some(1234.5), &rings).unwrap();

        let meta = store.get_ring_metadata("Paesia", "2 A Ring").unwrap();
        assert_eq!(meta.ring_type, Some(RingType::Metallic));
        assert_eq!(meta.ls_distance, Some(1234.5));
        match meta.density {
            Some(crate::store::Density::Numeric(v)) => assert!((v - 10.000944).abs() < 1e-5),
            other => panic!("expected numeric density, got {other:?}"),
        }
    }

    #[test]
    fn scan_before_any_signals_does_not_invent_a_material_row() {
        let store = HotspotStore::open_in_memory().unwrap();
        let rings = vec![RingScanNamed {
            name: "Paesia 2 A Ring".to_string(),
            scan: crate::events::RingScan {
                ring_class: "eRingClass_Rocky".to_string(),
                mass_mt: 1.0,
                inner_rad: 10.0,
                outer_rad: 20.0,
            },
        }];
        handle_scan(&store, "Paesia", "2024-01-01T00:00:00Z", None, &rings).unwrap();
        assert!(!store.check_ring_exists("Paesia", "2 A Ring").unwrap());
    }

    #[test]
    fn clean_ring_name_upper_cases_only_the_ring_letter() {
        assert_eq!(clean_ring_name("Paesia 2 a A Ring", "Paesia"), "2 a A Ring");
        assert_eq!(clean_ring_name("Paesia 2 a a Ring", "Paesia"), "2 a A Ring");
    }

    #[test]
    fn reserve_level_round_trips_as_density_text() {
        let store = HotspotStore::open_in_memory().unwrap();
        let signals = vec![SignalEntry { material_type: "Painite".to_string(), type_localised: None, count: 1 }];
        handle_signals_found(&store, "Borann", None, "Borann 1 A Ring", &signals, "2024-01-01T00:00:00Z").unwrap();
        store.set_reserve_level("Borann", "1 A Ring", Some(ReserveLevel::Pristine)).unwrap();
        assert_eq!(store.get_reserve_level("Borann", "1 A Ring").unwrap(), Some(ReserveLevel::Pristine));
    }
}
