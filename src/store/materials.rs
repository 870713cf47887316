use std::collections::HashMap;
use std::sync::LazyLock;

/// Alias → canonical material name. Data, not code, per the "alias tables
/// should be data" design note: kept as a static table here rather than
/// scattered string comparisons, but intentionally simple enough to later
/// move into a bundled resource file without changing the lookup API.
///
/// Unknown spellings outside this table are *not* fuzzy-matched; they pass
/// through title-cased but otherwise untouched (see SPEC_FULL.md §9).
static MATERIAL_ALIASES: LazyLock<HashMap<&'static str, &'static str>> = LazyLock::new(|| {
    let mut m = HashMap::new();
    // German localizations seen in journal Name_Localised fields / community CSVs.
    m.insert("tieftemperaturdiamanten", "Low Temperature Diamonds");
    m.insert("alexandrit", "Alexandrite");
    m.insert("bromellit", "Bromellite");
    m.insert("grandidierit", "Grandidierite");
    m.insert("monazit", "Monazite");
    m.insert("painit", "Painite");
    m.insert("musgravit", "Musgravite");
    m.insert("rhodplumsit", "Rhodplumsite");
    m.insert("serendibit", "Serendibite");
    m.insert("platin", "Platinum");
    m.insert("leereopale", "Void Opals");
    m.insert("leerenopal", "Void Opals");

    // Compact / abbreviated spellings.
    m.insert("lowtemperaturediamond", "Low Temperature Diamonds");
    m.insert("lowtemperaturediamonds", "Low Temperature Diamonds");
    m.insert("low temp diamonds", "Low Temperature Diamonds");
    m.insert("ltd", "Low Temperature Diamonds");
    m.insert("ltds", "Low Temperature Diamonds");
    m.insert("diamonds", "Low Temperature Diamonds");
    m.insert("opal", "Void Opals");
    m.insert("opals", "Void Opals");
    m.insert("voidopal", "Void Opals");
    m.insert("voidopals", "Void Opals");
    m.insert("vo", "Void Opals");
    m.insert("alex", "Alexandrite");
    m.insert("beni", "Benitoite");
    m.insert("benitoit", "Benitoite");
    m.insert("brom", "Bromellite");
    m.insert("bromel", "Bromellite");
    m.insert("grand", "Grandidierite");
    m.insert("grandi", "Grandidierite");
    m.insert("mona", "Monazite");
    m.insert("musg", "Musgravite");
    m.insert("musgravi", "Musgravite");
    m.insert("pain", "Painite");
    m.insert("rhod", "Rhodplumsite");
    m.insert("rhodplum", "Rhodplumsite");
    m.insert("seren", "Serendibite");
    m.insert("serendi", "Serendibite");
    m.insert("plat", "Platinum");
    m.insert("pt", "Platinum");
    m.insert("pd", "Palladium");
    m.insert("pall", "Palladium");
    m.insert("os", "Osmium");
    m.insert("au", "Gold");
    m
});

/// Canonical, title-cased equivalent of `name`: an alias-table hit if one
/// exists, otherwise `name` itself title-cased word by word.
pub fn normalize_material_name(name: &str) -> String {
    let trimmed = name.trim();
    let key = trimmed.to_lowercase();
    if let Some(canonical) = MATERIAL_ALIASES.get(key.as_str()) {
        return (*canonical).to_string();
    }
    title_case(trimmed)
}

fn title_case(s: &str) -> String {
    s.split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_uppercase().collect::<String>() + &chars.as_str().to_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// Strips a leading `system` prefix (case-insensitive) from `body` and
/// collapses internal whitespace. Never changes letter casing elsewhere in
/// the string: ring-letter case (`2 a A Ring` vs `2 A Ring`) distinguishes
/// physically different rings and must survive normalization untouched.
pub fn normalize_body_name(body: &str, system: &str) -> String {
    let stripped = if !system.is_empty() {
        let body_lower = body.to_lowercase();
        let system_lower = system.to_lowercase();
        if body_lower.starts_with(&system_lower) {
            &body[system.len()..]
        } else {
            body
        }
    } else {
        body
    };
    stripped.split_whitespace().collect::<Vec<_>>().join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_matching_system_prefix() {
        assert_eq!(normalize_body_name("Paesia 2 A Ring", "Paesia"), "2 A Ring");
    }

    #[test]
    fn preserves_lowercase_ring_letter() {
        assert_eq!(normalize_body_name("Paesia 2 a A Ring", "Paesia"), "2 a A Ring");
    }

    #[test]
    fn prefix_match_is_case_insensitive() {
        assert_eq!(normalize_body_name("PAESIA 2 A Ring", "paesia"), "2 A Ring");
    }

    #[test]
    fn leaves_non_matching_prefix_alone() {
        assert_eq!(
            normalize_body_name("Other System 2 A Ring", "Paesia"),
            "Other System 2 A Ring"
        );
    }

    #[test]
    fn collapses_internal_whitespace() {
        assert_eq!(normalize_body_name("Paesia   2  A Ring", "Paesia"), "2 A Ring");
    }

    #[test]
    fn alias_lookup_is_case_insensitive() {
        assert_eq!(normalize_material_name("LTD"), "Low Temperature Diamonds");
        assert_eq!(normalize_material_name("ltd"), "Low Temperature Diamonds");
        assert_eq!(
            normalize_material_name("Tieftemperaturdiamanten"),
            "Low Temperature Diamonds"
        );
    }

    #[test]
    fn unknown_material_falls_back_to_title_case() {
        assert_eq!(normalize_material_name("some weird mineral"), "Some Weird Mineral");
    }

    #[test]
    fn canonical_name_is_idempotent() {
        let once = normalize_material_name("Platinum");
        assert_eq!(normalize_material_name(&once), once);
    }
}
