use serde::{Deserialize, Serialize};

/// Qualitative richness tag for a ring. The textual side of the `density`
/// tagged union (see [`Density`]).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReserveLevel {
    Pristine,
    Major,
    Common,
    Low,
    Depleted,
}

impl ReserveLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            ReserveLevel::Pristine => "Pristine",
            ReserveLevel::Major => "Major",
            ReserveLevel::Common => "Common",
            ReserveLevel::Low => "Low",
            ReserveLevel::Depleted => "Depleted",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Pristine" => Some(ReserveLevel::Pristine),
            "Major" => Some(ReserveLevel::Major),
            "Common" => Some(ReserveLevel::Common),
            "Low" => Some(ReserveLevel::Low),
            "Depleted" => Some(ReserveLevel::Depleted),
            _ => None,
        }
    }
}

impl std::fmt::Display for ReserveLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The `density` column is a sum type: either a numeric area-based density or a
/// reserve-level string. A reserve-level string is considered higher value and
/// can only be overwritten by a *different* reserve-level string, never by a
/// number; a numeric value yields to anything.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Density {
    Numeric(f64),
    Reserve(ReserveLevel),
}

impl Density {
    pub fn to_db_string(self) -> String {
        match self {
            Density::Numeric(v) => v.to_string(),
            Density::Reserve(r) => r.as_str().to_string(),
        }
    }

    pub fn from_db_string(s: &str) -> Option<Density> {
        if let Some(r) = ReserveLevel::parse(s) {
            return Some(Density::Reserve(r));
        }
        s.parse::<f64>().ok().map(Density::Numeric)
    }

    pub fn is_reserve(self) -> bool {
        matches!(self, Density::Reserve(_))
    }
}

/// Merges an existing density value with an incoming one, honoring the
/// tagged-union override rule: numbers never beat reserve strings, and a
/// reserve string only replaces a different reserve string.
pub fn merge_density(existing: Option<Density>, incoming: Option<Density>) -> Option<Density> {
    match (existing, incoming) {
        (None, incoming) => incoming,
        (Some(_), None) => existing,
        (Some(Density::Reserve(old)), Some(Density::Reserve(new))) => {
            if old == new {
                existing
            } else {
                incoming
            }
        }
        (Some(Density::Reserve(_)), Some(Density::Numeric(_))) => existing,
        (Some(Density::Numeric(_)), _) => incoming,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RingType {
    Rocky,
    Metallic,
    MetalRich,
    Icy,
    Unknown,
}

impl RingType {
    pub fn as_str(self) -> &'static str {
        match self {
            RingType::Rocky => "Rocky",
            RingType::Metallic => "Metallic",
            RingType::MetalRich => "Metal Rich",
            RingType::Icy => "Icy",
            RingType::Unknown => "Unknown",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Rocky" => Some(RingType::Rocky),
            "Metallic" => Some(RingType::Metallic),
            "Metal Rich" | "MetalRich" => Some(RingType::MetalRich),
            "Icy" => Some(RingType::Icy),
            "Unknown" => Some(RingType::Unknown),
            _ => None,
        }
    }
}

impl std::fmt::Display for RingType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where a hotspot row's coordinates came from. Used to decide whether a new
/// write is allowed to clobber existing coordinates: `Journal` outranks
/// everything, `Unknown` outranks nothing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CoordSource {
    Journal,
    VisitedSystems,
    Edtools,
    Spansh,
    OverlapCsv,
    ResCsv,
    Unknown,
}

impl CoordSource {
    /// Higher value wins. Bundled/CSV sources all share one precedence tier
    /// below `visited_systems`, above `unknown`.
    pub fn precedence(self) -> u8 {
        match self {
            CoordSource::Journal => 4,
            CoordSource::VisitedSystems => 3,
            CoordSource::Edtools | CoordSource::Spansh => 2,
            CoordSource::OverlapCsv | CoordSource::ResCsv => 2,
            CoordSource::Unknown => 0,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CoordSource::Journal => "journal",
            CoordSource::VisitedSystems => "visited_systems",
            CoordSource::Edtools => "edtools",
            CoordSource::Spansh => "spansh",
            CoordSource::OverlapCsv => "overlap_csv",
            CoordSource::ResCsv => "res_csv",
            CoordSource::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "journal" => CoordSource::Journal,
            "visited_systems" => CoordSource::VisitedSystems,
            "edtools" => CoordSource::Edtools,
            "spansh" => CoordSource::Spansh,
            "overlap_csv" => CoordSource::OverlapCsv,
            "res_csv" => CoordSource::ResCsv,
            _ => CoordSource::Unknown,
        }
    }
}

/// Ring metadata shared by every material row of a `(system, body)` ring.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct RingMetadata {
    pub ring_type: Option<RingType>,
    pub ls_distance: Option<f64>,
    pub inner_radius: Option<f64>,
    pub outer_radius: Option<f64>,
    pub ring_mass: Option<f64>,
    pub density: Option<Density>,
}

impl RingMetadata {
    /// Count of the six metadata fields that are non-null, used by the
    /// upsert completeness rule.
    pub fn field_count(&self) -> u8 {
        [
            self.ls_distance.is_some(),
            self.ring_type.is_some(),
            self.inner_radius.is_some(),
            self.outer_radius.is_some(),
            self.ring_mass.is_some(),
            self.density.is_some(),
        ]
        .iter()
        .filter(|b| **b)
        .count() as u8
    }

    pub fn is_empty(&self) -> bool {
        self.field_count() == 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OverlapTag {
    TwoX,
    ThreeX,
}

impl OverlapTag {
    pub fn as_str(self) -> &'static str {
        match self {
            OverlapTag::TwoX => "2x",
            OverlapTag::ThreeX => "3x",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "2x" => Some(OverlapTag::TwoX),
            "3x" => Some(OverlapTag::ThreeX),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResTag {
    Hazardous,
    High,
    Low,
}

impl ResTag {
    pub fn as_str(self) -> &'static str {
        match self {
            ResTag::Hazardous => "Hazardous",
            ResTag::High => "High",
            ResTag::Low => "Low",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Hazardous" => Some(ResTag::Hazardous),
            "High" => Some(ResTag::High),
            "Low" => Some(ResTag::Low),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Hotspot {
    pub system_name: String,
    pub body_name: String,
    pub material_name: String,
    pub hotspot_count: i64,
    pub scan_date: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub coord_source: CoordSource,
    pub ring: RingMetadata,
    pub overlap_tag: Option<OverlapTag>,
    pub res_tag: Option<ResTag>,
    pub data_source: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct VisitedSystem {
    pub system_name: String,
    pub x: Option<f64>,
    pub y: Option<f64>,
    pub z: Option<f64>,
    pub first_visit_date: String,
    pub last_visit_date: String,
    pub visit_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn density_numeric_yields_to_reserve() {
        let merged = merge_density(
            Some(Density::Numeric(1.5)),
            Some(Density::Reserve(ReserveLevel::Pristine)),
        );
        assert_eq!(merged, Some(Density::Reserve(ReserveLevel::Pristine)));
    }

    #[test]
    fn density_reserve_blocks_numeric() {
        let merged = merge_density(
            Some(Density::Reserve(ReserveLevel::Major)),
            Some(Density::Numeric(9.9)),
        );
        assert_eq!(merged, Some(Density::Reserve(ReserveLevel::Major)));
    }

    #[test]
    fn density_reserve_same_value_is_noop() {
        let merged = merge_density(
            Some(Density::Reserve(ReserveLevel::Low)),
            Some(Density::Reserve(ReserveLevel::Low)),
        );
        assert_eq!(merged, Some(Density::Reserve(ReserveLevel::Low)));
    }

    #[test]
    fn density_reserve_different_value_overwrites() {
        let merged = merge_density(
            Some(Density::Reserve(ReserveLevel::Low)),
            Some(Density::Reserve(ReserveLevel::Depleted)),
        );
        assert_eq!(merged, Some(Density::Reserve(ReserveLevel::Depleted)));
    }

    #[test]
    fn field_count_counts_non_null_fields() {
        let meta = RingMetadata {
            ring_type: Some(RingType::Icy),
            ls_distance: Some(100.0),
            ..Default::default()
        };
        assert_eq!(meta.field_count(), 2);
    }
}
