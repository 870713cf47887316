//! Typed journal events and the dispatcher that routes them to C6 (ingestor)
//! and C8 (session aggregator), per SPEC_FULL.md §4.5.
//!
//! Modeled as a `#[serde(tag = "event")]` enum with a trailing `Unknown`
//! catch-all so one `serde_json::from_str::<JournalEvent>(line)` call both
//! selects the handler and validates the payload, the same shape
//! `models/query.rs`'s request types use for their own tagged fields.

use std::sync::Arc;

use serde::Deserialize;

use crate::error::StoreError;
use crate::galaxy::{Coords, GalaxyIndex};
use crate::ingest;
use crate::journal::{CargoSnapshot, RawRecord, StatusSnapshot};
use crate::session::aggregator::SessionAggregator;
use crate::session::persistence::{self, SessionPaths};
use crate::store::HotspotStore;

#[derive(Debug, Clone, Deserialize)]
pub struct RingScan {
    #[serde(rename = "RingClass")]
    pub ring_class: String,
    #[serde(rename = "MassMT")]
    pub mass_mt: f64,
    #[serde(rename = "InnerRad")]
    pub inner_rad: f64,
    #[serde(rename = "OuterRad")]
    pub outer_rad: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SignalEntry {
    #[serde(rename = "Type")]
    pub material_type: String,
    #[serde(rename = "Type_Localised")]
    pub type_localised: Option<String>,
    #[serde(rename = "Count")]
    pub count: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MaterialEntry {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(rename = "Proportion", default)]
    pub proportion: f64,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "event")]
pub enum JournalEvent {
    LoadGame {
        #[serde(rename = "Ship")]
        ship: Option<String>,
        #[serde(rename = "ShipName")]
        ship_name: Option<String>,
        #[serde(rename = "ShipIdent")]
        ship_ident: Option<String>,
    },
    Loadout {
        #[serde(rename = "Ship")]
        ship: Option<String>,
        #[serde(rename = "ShipName")]
        ship_name: Option<String>,
        #[serde(rename = "ShipIdent")]
        ship_ident: Option<String>,
        #[serde(rename = "CargoCapacity")]
        cargo_capacity: Option<u32>,
    },
    Location {
        timestamp: String,
        #[serde(rename = "StarSystem")]
        star_system: String,
        #[serde(rename = "StarPos")]
        star_pos: Option<[f64; 3]>,
    },
    FSDJump {
        timestamp: String,
        #[serde(rename = "StarSystem")]
        star_system: String,
        #[serde(rename = "StarPos")]
        star_pos: Option<[f64; 3]>,
    },
    CarrierJump {
        timestamp: String,
        #[serde(rename = "StarSystem")]
        star_system: String,
        #[serde(rename = "StarPos")]
        star_pos: Option<[f64; 3]>,
    },
    Scan {
        timestamp: String,
        #[serde(rename = "BodyName")]
        body_name: String,
        #[serde(rename = "DistanceFromArrivalLS")]
        distance_from_arrival_ls: Option<f64>,
        #[serde(rename = "Rings", default)]
        rings: Vec<RingScanNamed>,
    },
    SAASignalsFound {
        timestamp: String,
        #[serde(rename = "BodyName")]
        body_name: String,
        #[serde(rename = "Signals", default)]
        signals: Vec<SignalEntry>,
    },
    MaterialCollected {
        #[serde(rename = "Category")]
        category: String,
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Count")]
        count: i64,
    },
    Cargo {
        #[serde(rename = "Inventory", default)]
        inventory: Option<Vec<crate::journal::CargoInventoryItem>>,
        #[serde(rename = "Count", default)]
        count: Option<i64>,
    },
    MarketSell {
        #[serde(rename = "Type")]
        item_type: String,
        #[serde(rename = "Count")]
        count: i64,
    },
    EjectCargo {
        #[serde(rename = "Type")]
        item_type: String,
        #[serde(rename = "Count")]
        count: i64,
    },
    ShipyardSwap {},
    ShipyardBuy {},
    ModuleBuy {
        #[serde(rename = "Slot", default)]
        slot: String,
    },
    ModuleSell {
        #[serde(rename = "Slot", default)]
        slot: String,
    },
    ModuleStore {
        #[serde(rename = "Slot", default)]
        slot: String,
    },
    ProspectedAsteroid {
        timestamp: String,
        #[serde(rename = "Materials", default)]
        materials: Vec<MaterialEntry>,
        #[serde(rename = "Content", default)]
        content: String,
    },
    RefinementProcessed {
        timestamp: String,
        #[serde(rename = "Name")]
        name: String,
        #[serde(rename = "Name_Localised")]
        name_localised: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// `Scan`'s `Rings` array entries are keyed by `Name` in the journal
/// (`"<system> <body> A Ring"`), unlike `SAASignalsFound` which gets the
/// ring body as a top-level `BodyName`.
#[derive(Debug, Clone, Deserialize)]
pub struct RingScanNamed {
    #[serde(rename = "Name")]
    pub name: String,
    #[serde(flatten)]
    pub scan: RingScan,
}

/// Owns the single piece of ambient state ingestion needs: which system the
/// player is currently in and its coordinates, updated only by location
/// events and read only by the ingestor. No global/ambient singleton.
#[derive(Debug, Clone, Default)]
pub struct CurrentSystem {
    pub name: Option<String>,
    pub coords: Option<Coords>,
}

pub struct Dispatcher {
    pub store: Arc<HotspotStore>,
    pub galaxy: Option<Arc<GalaxyIndex>>,
    pub session: SessionAggregator,
    pub session_paths: SessionPaths,
    pub current_system: CurrentSystem,
    pub auto_start_session: bool,
    pub cargo_max_capacity: u32,
}

impl Dispatcher {
    pub fn new(
        store: Arc<HotspotStore>,
        galaxy: Option<Arc<GalaxyIndex>>,
        session_paths: SessionPaths,
        auto_start_session: bool,
        cargo_max_capacity: u32,
    ) -> Self {
        Self {
            store,
            galaxy,
            session: SessionAggregator::new(),
            session_paths,
            current_system: CurrentSystem::default(),
            auto_start_session,
            cargo_max_capacity,
        }
    }

    /// Consumes one raw record off the journal-reader channel. Parse/data
    /// errors on a single record are logged and skipped — one bad line
    /// never kills the file (§7).
    pub fn handle_raw(&mut self, record: RawRecord) {
        match record {
            RawRecord::Line(line) => match serde_json::from_str::<JournalEvent>(&line) {
                Ok(event) => self.dispatch(event),
                Err(e) => tracing::debug!("dispatcher: malformed journal line: {e}"),
            },
            RawRecord::Status(status) => self.handle_status(status),
            RawRecord::Cargo(cargo) => self.handle_cargo_snapshot(cargo),
        }
    }

    pub fn dispatch(&mut self, event: JournalEvent) {
        match event {
            JournalEvent::LoadGame { .. } | JournalEvent::Loadout { cargo_capacity: _, .. } => {
                if let JournalEvent::Loadout { cargo_capacity: Some(cap), .. } = &event {
                    self.cargo_max_capacity = *cap;
                }
            }
            JournalEvent::Location { star_system, star_pos, timestamp }
            | JournalEvent::FSDJump { star_system, star_pos, timestamp }
            | JournalEvent::CarrierJump { star_system, star_pos, timestamp } => {
                self.handle_location(star_system, star_pos, timestamp);
            }
            JournalEvent::Scan { timestamp, body_name, distance_from_arrival_ls, rings } => {
                if let Err(e) = self.handle_scan(&timestamp, &body_name, distance_from_arrival_ls, &rings) {
                    tracing::warn!("dispatcher: Scan ingestion failed for {body_name}: {e}");
                }
            }
            JournalEvent::SAASignalsFound { timestamp, body_name, signals } => {
                if let Err(e) = self.handle_signals_found(&timestamp, &body_name, &signals) {
                    tracing::warn!("dispatcher: SAASignalsFound ingestion failed for {body_name}: {e}");
                }
            }
            JournalEvent::MaterialCollected { category, name, count } => {
                if category.eq_ignore_ascii_case("Raw") {
                    self.session.record_engineering_material(&name, count);
                }
            }
            JournalEvent::Cargo { inventory, count } => {
                if let Some(inventory) = inventory {
                    self.session.update_cargo_from_inventory(&inventory);
                } else if let Some(count) = count {
                    self.session.update_cargo_total_only(count);
                }
                self.maybe_trigger_cargo_full();
            }
            JournalEvent::MarketSell { item_type, count } | JournalEvent::EjectCargo { item_type, count } => {
                self.session.decrement_cargo(&item_type, count);
            }
            JournalEvent::ShipyardSwap {} | JournalEvent::ShipyardBuy {} => {
                tracing::debug!("dispatcher: shipyard event, capacity re-read deferred to next Status.json poll");
            }
            JournalEvent::ModuleBuy { slot } | JournalEvent::ModuleSell { slot } | JournalEvent::ModuleStore { slot } => {
                if slot.to_ascii_lowercase().contains("cargorack") {
                    tracing::debug!("dispatcher: cargo rack module change, capacity re-read deferred to next Status.json poll");
                }
            }
            JournalEvent::ProspectedAsteroid { materials, .. } => {
                if self.auto_start_session && self.session.is_idle() {
                    self.session.auto_start();
                }
                self.session.record_prospector_scan(&materials);
            }
            JournalEvent::RefinementProcessed { name, name_localised, .. } => {
                let material = name_localised.unwrap_or(name);
                self.session.record_refinement(&material);
            }
            JournalEvent::Unknown => {}
        }
    }

    fn handle_location(&mut self, star_system: String, star_pos: Option<[f64; 3]>, timestamp: String) {
        let coords = star_pos.map(|[x, y, z]| Coords { x, y, z });
        self.current_system = CurrentSystem { name: Some(star_system.clone()), coords };
        self.session.set_current_system(Some(star_system.clone()));
        if let Err(e) = self.store.add_visited_system(&star_system, &timestamp, coords) {
            tracing::warn!("dispatcher: failed to record visited system {star_system}: {e}");
        }
    }

    fn handle_scan(
        &self,
        timestamp: &str,
        body_name: &str,
        distance_from_arrival_ls: Option<f64>,
        rings: &[RingScanNamed],
    ) -> Result<(), StoreError> {
        let Some(system) = &self.current_system.name else {
            tracing::debug!("dispatcher: Scan for {body_name} with no known current system, skipping");
            return Ok(());
        };
        ingest::handle_scan(&self.store, system, timestamp, distance_from_arrival_ls, rings)
    }

    fn handle_signals_found(&self, timestamp: &str, body_name: &str, signals: &[SignalEntry]) -> Result<(), StoreError> {
        let Some(system) = &self.current_system.name else {
            tracing::debug!("dispatcher: SAASignalsFound for {body_name} with no known current system, skipping");
            return Ok(());
        };
        ingest::handle_signals_found(
            &self.store,
            system,
            self.current_system.coords,
            body_name,
            signals,
            timestamp,
        )
    }

    fn handle_status(&mut self, status: StatusSnapshot) {
        if let Some(cap) = status.cargo_capacity {
            self.cargo_max_capacity = cap;
        }
    }

    fn handle_cargo_snapshot(&mut self, cargo: CargoSnapshot) {
        self.session.update_cargo_from_inventory(&cargo.inventory);
        self.maybe_trigger_cargo_full();
    }

    fn maybe_trigger_cargo_full(&mut self) {
        let total: i64 = self.session.current_cargo_total();
        if total >= self.cargo_max_capacity as i64 {
            self.session.note_cargo_full();
        } else {
            self.session.note_cargo_not_full();
        }
    }

    /// Persists the active session (manual stop) and clears it back to `Idle`.
    pub fn stop_session(&mut self) -> Result<(), crate::error::StoreError> {
        if let Some(result) = self.session.stop() {
            if let Err(e) = persistence::write_session(&self.session_paths, &result) {
                tracing::error!("dispatcher: failed to persist session: {e}");
            }
        }
        Ok(())
    }
}
