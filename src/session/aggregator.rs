//! Live mining session state machine (C8), per SPEC_FULL.md §4.8.
//!
//! State lives behind one owner, `SessionAggregator`, touched only by the
//! dispatcher task — mirroring the "no ambient singletons" rule that already
//! governs `CurrentSystem` and the journal cursor.

use std::collections::{BTreeMap, HashMap};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::events::MaterialEntry;
use crate::journal::CargoInventoryItem;

const CARGO_FULL_IDLE_TIMEOUT: Duration = Duration::from_secs(60);

/// Items that don't count as mined cargo for session purposes: collector
/// limpets, black-box/escape-pod "data" items, and salvage scrap.
fn is_trackable_cargo_item(name: &str) -> bool {
    let lower = name.to_ascii_lowercase();
    !(lower.contains("limpet") || lower.contains("data") || lower.contains("scrap"))
}

#[derive(Debug, Clone)]
struct ProspectorRecord {
    has_material: bool,
    best_quality: f64,
    top_material: Option<String>,
}

#[derive(Debug, Clone, Default)]
struct ActiveData {
    started_at: Option<DateTime<Utc>>,
    start_instant: Option<Instant>,
    cargo_start: HashMap<String, i64>,
    refinery_in_progress: BTreeMap<String, i64>,
    prospector_records: Vec<ProspectorRecord>,
    engineering_materials: BTreeMap<String, i64>,
    cargo_full_since: Option<Instant>,
    last_cargo_change_at: Option<Instant>,
}

#[derive(Debug, Clone, PartialEq)]
enum LifecycleState {
    Idle,
    Active,
}

/// Immutable snapshot handed to C9 on session end. Owned, `Clone`-free move
/// out of the aggregator.
#[derive(Debug, Clone)]
pub struct SessionResult {
    pub session_id: String,
    pub system: Option<String>,
    pub body: String,
    pub started_at: DateTime<Utc>,
    pub ended_at: DateTime<Utc>,
    pub duration_secs: f64,
    pub materials_mined: BTreeMap<String, i64>,
    pub refined_materials: BTreeMap<String, i64>,
    pub total_tons: i64,
    pub tons_per_hour: Option<f64>,
    pub prospectors_used: u32,
    pub engineering_materials: BTreeMap<String, i64>,
    pub hit_rate: Option<f64>,
    pub average_quality: Option<f64>,
    pub best_material: Option<String>,
}

pub struct SessionAggregator {
    state: LifecycleState,
    active: ActiveData,
    current_system: Option<String>,
    current_cargo: HashMap<String, i64>,
    current_cargo_total_raw: Option<i64>,
}

impl SessionAggregator {
    pub fn new() -> Self {
        Self {
            state: LifecycleState::Idle,
            active: ActiveData::default(),
            current_system: None,
            current_cargo: HashMap::new(),
            current_cargo_total_raw: None,
        }
    }

    pub fn is_idle(&self) -> bool {
        self.state == LifecycleState::Idle
    }

    pub fn is_active(&self) -> bool {
        self.state == LifecycleState::Active
    }

    pub fn set_current_system(&mut self, system: Option<String>) {
        self.current_system = system;
    }

    fn begin(&mut self) {
        self.active = ActiveData {
            started_at: Some(Utc::now()),
            start_instant: Some(Instant::now()),
            cargo_start: self.current_cargo.clone(),
            ..Default::default()
        };
        self.state = LifecycleState::Active;
        tracing::info!("session: started");
    }

    /// Manual start, e.g. triggered by a UI collaborator.
    pub fn start(&mut self) {
        if self.is_idle() {
            self.begin();
        }
    }

    /// Auto-start on the first prospector-limpet fire while idle, per §4.8.
    pub fn auto_start(&mut self) {
        if self.is_idle() {
            self.begin();
        }
    }

    pub fn current_cargo_total(&self) -> i64 {
        if self.current_cargo.is_empty() {
            self.current_cargo_total_raw.unwrap_or(0)
        } else {
            self.current_cargo.values().sum()
        }
    }

    fn note_cargo_changed(&mut self) {
        if self.is_active() {
            self.active.last_cargo_change_at = Some(Instant::now());
        }
    }

    pub fn update_cargo_from_inventory(&mut self, inventory: &[CargoInventoryItem]) {
        self.current_cargo = inventory
            .iter()
            .filter(|item| is_trackable_cargo_item(&item.name))
            .map(|item| {
                let name = item.name_localised.clone().unwrap_or_else(|| item.name.clone());
                (name, item.count)
            })
            .collect();
        self.current_cargo_total_raw = None;
        self.note_cargo_changed();
    }

    pub fn update_cargo_total_only(&mut self, count: i64) {
        self.current_cargo_total_raw = Some(count);
        self.note_cargo_changed();
    }

    pub fn decrement_cargo(&mut self, item_type: &str, count: i64) {
        if !is_trackable_cargo_item(item_type) {
            return;
        }
        if let Some(entry) = self.current_cargo.get_mut(item_type) {
            *entry = (*entry - count).max(0);
        }
        if let Some(total) = self.current_cargo_total_raw.as_mut() {
            *total = (*total - count).max(0);
        }
        self.note_cargo_changed();
    }

    pub fn note_cargo_full(&mut self) {
        if self.is_active() && self.active.cargo_full_since.is_none() {
            self.active.cargo_full_since = Some(Instant::now());
        }
    }

    pub fn note_cargo_not_full(&mut self) {
        self.active.cargo_full_since = None;
    }

    /// Whether a cargo-full confirmation prompt should fire: cargo has been
    /// full for at least 60 seconds with no further cargo change. The
    /// aggregator only exposes this state; showing a modal is a UI concern.
    pub fn should_prompt_cargo_full(&self) -> bool {
        let Some(full_since) = self.active.cargo_full_since else { return false };
        let quiet_since = self.active.last_cargo_change_at.unwrap_or(full_since);
        quiet_since.elapsed() >= CARGO_FULL_IDLE_TIMEOUT && full_since.elapsed() >= CARGO_FULL_IDLE_TIMEOUT
    }

    pub fn record_engineering_material(&mut self, name: &str, count: i64) {
        if !self.is_active() {
            return;
        }
        *self.active.engineering_materials.entry(name.to_string()).or_insert(0) += count;
    }

    /// One ton-equivalent unit per `RefinementProcessed` event: the journal
    /// reports the event, not a quantity, so each event is counted as one
    /// unit of material still sitting in the refinery, overlaid on top of
    /// cargo-derived tons until it shows up in the next `Cargo` snapshot.
    pub fn record_refinement(&mut self, material: &str) {
        if !self.is_active() {
            return;
        }
        *self.active.refinery_in_progress.entry(material.to_string()).or_insert(0) += 1;
    }

    pub fn record_prospector_scan(&mut self, materials: &[MaterialEntry]) {
        if !self.is_active() {
            return;
        }
        let has_material = !materials.is_empty();
        let top = materials.iter().max_by(|a, b| {
            a.proportion.partial_cmp(&b.proportion).unwrap_or(std::cmp::Ordering::Equal)
        });
        self.active.prospector_records.push(ProspectorRecord {
            has_material,
            best_quality: top.map(|m| m.proportion).unwrap_or(0.0),
            top_material: top.map(|m| m.name.clone()),
        });
    }

    /// Discards the active session without persisting anything.
    pub fn cancel(&mut self) {
        self.active = ActiveData::default();
        self.state = LifecycleState::Idle;
        tracing::info!("session: cancelled");
    }

    /// Ends the active session and computes its final result. There is no
    /// externally observable gap between "Ending" and "persisted" in this
    /// implementation — the caller is expected to hand the result straight
    /// to C9 — so the two spec states collapse into this one call.
    pub fn stop(&mut self) -> Option<SessionResult> {
        if !self.is_active() {
            return None;
        }
        let started_at = self.active.started_at.unwrap_or_else(Utc::now);
        let start_instant = self.active.start_instant.unwrap_or_else(Instant::now);
        let ended_at = Utc::now();
        let duration_secs = start_instant.elapsed().as_secs_f64();

        let mut materials_mined = BTreeMap::new();
        let mut keys: std::collections::HashSet<&String> = self.active.cargo_start.keys().collect();
        keys.extend(self.current_cargo.keys());
        for material in keys {
            let start = self.active.cargo_start.get(material).copied().unwrap_or(0);
            let current = self.current_cargo.get(material).copied().unwrap_or(0);
            let delta = (current - start).max(0);
            if delta > 0 {
                materials_mined.insert(material.clone(), delta);
            }
        }
        for (material, qty) in &self.active.refinery_in_progress {
            *materials_mined.entry(material.clone()).or_insert(0) += qty;
        }

        let total_tons: i64 = materials_mined.values().sum();
        let tons_per_hour =
            if duration_secs < 1.0 { None } else { Some(total_tons as f64 / (duration_secs / 3600.0)) };

        let prospectors_used = self.active.prospector_records.len() as u32;
        let hit_rate = if self.active.prospector_records.is_empty() {
            None
        } else {
            let hits = self.active.prospector_records.iter().filter(|r| r.has_material).count();
            Some(hits as f64 / self.active.prospector_records.len() as f64)
        };
        let average_quality = if self.active.prospector_records.is_empty() {
            None
        } else {
            let sum: f64 = self.active.prospector_records.iter().map(|r| r.best_quality).sum();
            Some(sum / self.active.prospector_records.len() as f64)
        };
        let best_material = {
            let mut counts: HashMap<&str, u32> = HashMap::new();
            for record in &self.active.prospector_records {
                if let Some(name) = &record.top_material {
                    *counts.entry(name.as_str()).or_insert(0) += 1;
                }
            }
            counts
                .into_iter()
                .max_by(|a, b| a.1.cmp(&b.1).then_with(|| b.0.cmp(a.0)))
                .map(|(name, _)| name.to_string())
        };

        let result = SessionResult {
            session_id: Uuid::new_v4().to_string(),
            system: self.current_system.clone(),
            body: "Unknown".to_string(),
            started_at,
            ended_at,
            duration_secs,
            materials_mined: materials_mined
                .iter()
                .map(|(k, v)| (k.clone(), *v - self.active.refinery_in_progress.get(k).copied().unwrap_or(0)))
                .collect(),
            refined_materials: self.active.refinery_in_progress.clone(),
            total_tons,
            tons_per_hour,
            prospectors_used,
            engineering_materials: self.active.engineering_materials.clone(),
            hit_rate,
            average_quality,
            best_material,
        };

        self.active = ActiveData::default();
        self.state = LifecycleState::Idle;
        tracing::info!("session: stopped, {} tons over {:.1}s", result.total_tons, result.duration_secs);
        Some(result)
    }
}

impl Default for SessionAggregator {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(name: &str, count: i64) -> CargoInventoryItem {
        CargoInventoryItem { name: name.to_string(), name_localised: None, count, stolen: 0 }
    }

    #[test]
    fn auto_start_snapshots_cargo_and_stop_computes_delta() {
        let mut agg = SessionAggregator::new();
        agg.update_cargo_from_inventory(&[item("Platinum", 0)]);
        agg.auto_start();
        assert!(agg.is_active());
        agg.update_cargo_from_inventory(&[item("Platinum", 12)]);
        let result = agg.stop().unwrap();
        assert_eq!(result.materials_mined.get("Platinum"), Some(&12));
        assert_eq!(result.total_tons, 12);
        assert!(agg.is_idle());
    }

    #[test]
    fn limpet_and_data_items_are_excluded_from_cargo_delta() {
        let mut agg = SessionAggregator::new();
        agg.auto_start();
        agg.update_cargo_from_inventory(&[
            item("Platinum", 5),
            item("Drones", 3),
            item("Encrypted Data", 2),
            item("Salvageable Scrap", 1),
        ]);
        let result = agg.stop().unwrap();
        assert_eq!(result.materials_mined.len(), 1);
        assert_eq!(result.materials_mined.get("Platinum"), Some(&5));
    }

    #[test]
    fn negative_deltas_are_ignored() {
        let mut agg = SessionAggregator::new();
        agg.update_cargo_from_inventory(&[item("Platinum", 10)]);
        agg.auto_start();
        agg.update_cargo_from_inventory(&[item("Platinum", 4)]);
        let result = agg.stop().unwrap();
        assert!(!result.materials_mined.contains_key("Platinum"));
        assert_eq!(result.total_tons, 0);
    }

    #[test]
    fn hit_rate_and_best_material_are_computed_from_prospector_scans() {
        let mut agg = SessionAggregator::new();
        agg.auto_start();
        agg.record_prospector_scan(&[MaterialEntry { name: "Platinum".to_string(), proportion: 25.0 }]);
        agg.record_prospector_scan(&[MaterialEntry { name: "Painite".to_string(), proportion: 10.0 }]);
        agg.record_prospector_scan(&[]);
        let result = agg.stop().unwrap();
        assert_eq!(result.prospectors_used, 3);
        assert!((result.hit_rate.unwrap() - (2.0 / 3.0)).abs() < 1e-9);
        assert!((result.average_quality.unwrap() - (35.0 / 3.0)).abs() < 1e-9);
    }

    #[test]
    fn tph_is_null_under_one_second() {
        let mut agg = SessionAggregator::new();
        agg.auto_start();
        agg.update_cargo_from_inventory(&[item("Platinum", 3)]);
        let result = agg.stop().unwrap();
        assert_eq!(result.tons_per_hour, None);
    }

    #[test]
    fn cancel_discards_without_producing_a_result() {
        let mut agg = SessionAggregator::new();
        agg.auto_start();
        agg.update_cargo_from_inventory(&[item("Platinum", 50)]);
        agg.cancel();
        assert!(agg.is_idle());
        assert_eq!(agg.stop(), None);
    }

    #[test]
    fn stop_while_idle_returns_none() {
        let mut agg = SessionAggregator::new();
        assert_eq!(agg.stop(), None);
    }

    #[test]
    fn refinery_overlay_adds_to_total_without_double_counting_materials_mined() {
        let mut agg = SessionAggregator::new();
        agg.auto_start();
        agg.update_cargo_from_inventory(&[item("Platinum", 12)]);
        agg.record_refinement("Platinum");
        agg.record_refinement("Platinum");
        let result = agg.stop().unwrap();
        assert_eq!(result.total_tons, 14);
        assert_eq!(result.refined_materials.get("Platinum"), Some(&2));
        assert_eq!(result.materials_mined.get("Platinum"), Some(&12));
    }
}
