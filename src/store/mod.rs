pub mod materials;
pub mod model;
mod migrations;

use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::galaxy::{Coords, GalaxyIndex};

pub use model::{
    CoordSource, Density, Hotspot, OverlapTag, ReserveLevel, ResTag, RingMetadata, RingType,
    VisitedSystem,
};
use model::merge_density;

const SCHEMA_SQL: &str = "
CREATE TABLE IF NOT EXISTS hotspot_data (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    system_name TEXT NOT NULL,
    body_name TEXT NOT NULL,
    material_name TEXT NOT NULL,
    hotspot_count INTEGER NOT NULL DEFAULT 0,
    scan_date TEXT NOT NULL,
    x_coord REAL,
    y_coord REAL,
    z_coord REAL,
    coord_source TEXT NOT NULL DEFAULT 'unknown',
    ring_type TEXT,
    ls_distance REAL,
    inner_radius REAL,
    outer_radius REAL,
    ring_mass REAL,
    density TEXT,
    overlap_tag TEXT,
    res_tag TEXT,
    data_source TEXT,
    UNIQUE(system_name, body_name, material_name)
);
CREATE INDEX IF NOT EXISTS idx_hotspot_system ON hotspot_data(system_name);
CREATE INDEX IF NOT EXISTS idx_hotspot_body ON hotspot_data(system_name, body_name);

CREATE TABLE IF NOT EXISTS visited_systems (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    system_name TEXT NOT NULL UNIQUE,
    x_coord REAL,
    y_coord REAL,
    z_coord REAL,
    first_visit_date TEXT NOT NULL,
    last_visit_date TEXT NOT NULL,
    visit_count INTEGER NOT NULL DEFAULT 1
);
CREATE INDEX IF NOT EXISTS idx_visited_system ON visited_systems(system_name);

CREATE TABLE IF NOT EXISTS migration_history (
    name TEXT PRIMARY KEY,
    version INTEGER NOT NULL DEFAULT 0,
    applied_at TEXT NOT NULL
);
";

/// Paths to the optional shipped assets migrations 4-6 merge in. Any missing
/// path is treated as "nothing to apply" rather than an error — a fresh
/// install with no bundled data is normal.
#[derive(Debug, Clone, Default)]
pub struct BundledAssets {
    pub overlap_csv: Option<PathBuf>,
    pub res_csv: Option<PathBuf>,
    pub bundled_hotspot_db: Option<PathBuf>,
}

/// The mutable, deduplicating record of rings, hotspots, and visited systems.
/// A single `Mutex<Connection>` serializes writers; every public method locks
/// it for the duration of one logical operation and releases it on every
/// exit path, including errors.
pub struct HotspotStore {
    conn: Mutex<Connection>,
}

struct ExistingHotspot {
    id: i64,
    hotspot_count: i64,
    scan_date: String,
    coord_source: CoordSource,
    x: Option<f64>,
    ring: RingMetadata,
}

fn parse_ring_type(s: Option<String>) -> Option<RingType> {
    s.and_then(|s| RingType::parse(&s))
}

fn parse_density(s: Option<String>) -> Option<Density> {
    s.and_then(|s| Density::from_db_string(&s))
}

impl HotspotStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StoreError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA_SQL)?;
        Ok(Self { conn: Mutex::new(conn) })
    }

    /// Runs the versioned migration pipeline. Safe to call on every startup:
    /// each migration is a no-op once its recorded version is current.
    pub fn run_migrations(
        &self,
        galaxy: Option<&GalaxyIndex>,
        assets: &BundledAssets,
    ) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().unwrap();
        migrations::migrate_material_normalization(&mut guard)?;
        migrations::migrate_body_prefix_repair(&mut guard)?;
        migrations::migrate_multistar_normalization(&mut guard, galaxy)?;
        if let Some(path) = &assets.overlap_csv {
            migrations::migrate_overlap_csv(&mut guard, path)?;
        }
        if let Some(path) = &assets.res_csv {
            migrations::migrate_res_csv(&mut guard, path)?;
        }
        if let Some(path) = &assets.bundled_hotspot_db {
            migrations::migrate_bundled_merge(&mut guard, path)?;
        }
        Ok(())
    }

    fn lookup_existing(
        tx: &rusqlite::Transaction,
        system: &str,
        body: &str,
        material: &str,
    ) -> rusqlite::Result<Option<ExistingHotspot>> {
        tx.query_row(
            "SELECT id, hotspot_count, scan_date, coord_source, x_coord,
                    ring_type, ls_distance, inner_radius, outer_radius, ring_mass, density
             FROM hotspot_data WHERE system_name = ?1 AND body_name = ?2 AND material_name = ?3",
            params![system, body, material],
            |row| {
                Ok(ExistingHotspot {
                    id: row.get(0)?,
                    hotspot_count: row.get(1)?,
                    scan_date: row.get(2)?,
                    coord_source: CoordSource::parse(&row.get::<_, String>(3)?),
                    x: row.get(4)?,
                    ring: RingMetadata {
                        ring_type: parse_ring_type(row.get(5)?),
                        ls_distance: row.get(6)?,
                        inner_radius: row.get(7)?,
                        outer_radius: row.get(8)?,
                        ring_mass: row.get(9)?,
                        density: parse_density(row.get(10)?),
                    },
                })
            },
        )
        .optional()
    }

    /// Inserts or updates a single hotspot row per the conflict rules in
    /// SPEC_FULL.md §4.3, then back-fills sibling material rows of the same
    /// ring with any newly-known metadata field.
    pub fn upsert_hotspot(&self, input: UpsertHotspot) -> Result<(), StoreError> {
        let body = materials::normalize_body_name(&input.body, &input.system);
        let material = materials::normalize_material_name(&input.material);

        let mut guard = self.conn.lock().unwrap();
        let tx = guard.transaction()?;

        let existing = Self::lookup_existing(&tx, &input.system, &body, &material)?;

        let (coords, coord_source) = match (&existing, input.coords) {
            (_, None) => {
                let fallback = tx
                    .query_row(
                        "SELECT x_coord, y_coord, z_coord FROM visited_systems
                         WHERE system_name = ?1 COLLATE NOCASE AND x_coord IS NOT NULL",
                        params![input.system],
                        |row| Ok(Coords { x: row.get(0)?, y: row.get(1)?, z: row.get(2)? }),
                    )
                    .optional()?;
                match fallback {
                    Some(c) => (Some(c), CoordSource::VisitedSystems),
                    None => (None, CoordSource::Unknown),
                }
            }
            (_, Some(c)) => (Some(c), input.coord_source),
        };

        match existing {
            None => {
                tx.execute(
                    "INSERT INTO hotspot_data
                        (system_name, body_name, material_name, hotspot_count, scan_date,
                         x_coord, y_coord, z_coord, coord_source,
                         ring_type, ls_distance, inner_radius, outer_radius, ring_mass, density,
                         data_source)
                     VALUES (?1,?2,?3,?4,?5, ?6,?7,?8,?9, ?10,?11,?12,?13,?14,?15, ?16)",
                    params![
                        input.system,
                        body,
                        material,
                        input.hotspot_count,
                        input.scan_date,
                        coords.map(|c| c.x),
                        coords.map(|c| c.y),
                        coords.map(|c| c.z),
                        coord_source.as_str(),
                        input.ring.ring_type.map(|t| t.as_str()),
                        input.ring.ls_distance,
                        input.ring.inner_radius,
                        input.ring.outer_radius,
                        input.ring.ring_mass,
                        input.ring.density.map(|d| d.to_db_string()),
                        input.data_source,
                    ],
                )?;
            }
            Some(existing) => {
                let new_count = input.ring.field_count();
                let old_count = existing.ring.field_count();
                let adds_new_field = field_would_be_added(&input.ring, &existing.ring);

                enum Decision {
                    Replace,
                    Merge,
                    BackfillOnly,
                    Skip,
                }

                let decision = if input.hotspot_count > 0 && existing.hotspot_count == 0 {
                    Decision::Replace
                } else if input.hotspot_count > existing.hotspot_count {
                    Decision::Replace
                } else if input.scan_date > existing.scan_date && new_count >= old_count {
                    Decision::Merge
                } else if input.scan_date > existing.scan_date {
                    // Newer but less complete: only a single-field backfill is
                    // allowed, and only when the existing row's coordinate
                    // source isn't already journal-grade.
                    if adds_new_field
                        && matches!(existing.coord_source, CoordSource::VisitedSystems | CoordSource::Unknown)
                    {
                        Decision::BackfillOnly
                    } else {
                        Decision::Skip
                    }
                } else if adds_new_field {
                    Decision::BackfillOnly
                } else {
                    Decision::Skip
                };

                if matches!(decision, Decision::Skip) {
                    tx.commit()?;
                    return Ok(());
                }

                let merged_density = merge_density(existing.ring.density, input.ring.density);

                let (count_sql, date_sql, field_coalesce_new_first) = match decision {
                    Decision::Replace | Decision::Merge => (input.hotspot_count, input.scan_date.clone(), true),
                    Decision::BackfillOnly => (existing.hotspot_count, existing.scan_date.clone(), false),
                    Decision::Skip => unreachable!(),
                };

                let (final_coords, final_source) = match coords {
                    Some(c) if coord_source.precedence() >= existing.coord_source.precedence() => {
                        (Some(c), coord_source)
                    }
                    _ => (None, existing.coord_source),
                };

                if field_coalesce_new_first {
                    tx.execute(
                        "UPDATE hotspot_data SET
                            hotspot_count = ?1, scan_date = ?2,
                            x_coord = COALESCE(?3, x_coord), y_coord = COALESCE(?4, y_coord),
                            z_coord = COALESCE(?5, z_coord), coord_source = ?6,
                            ring_type = COALESCE(?7, ring_type),
                            ls_distance = COALESCE(?8, ls_distance),
                            inner_radius = COALESCE(?9, inner_radius),
                            outer_radius = COALESCE(?10, outer_radius),
                            ring_mass = COALESCE(?11, ring_mass),
                            density = ?12,
                            data_source = COALESCE(?13, data_source)
                         WHERE id = ?14",
                        params![
                            count_sql,
                            date_sql,
                            final_coords.map(|c| c.x),
                            final_coords.map(|c| c.y),
                            final_coords.map(|c| c.z),
                            final_source.as_str(),
                            input.ring.ring_type.map(|t| t.as_str()),
                            input.ring.ls_distance,
                            input.ring.inner_radius,
                            input.ring.outer_radius,
                            input.ring.ring_mass,
                            merged_density.map(|d| d.to_db_string()),
                            input.data_source,
                            existing.id,
                        ],
                    )?;
                } else {
                    tx.execute(
                        "UPDATE hotspot_data SET
                            x_coord = COALESCE(x_coord, ?1), y_coord = COALESCE(y_coord, ?2),
                            z_coord = COALESCE(z_coord, ?3), coord_source = ?4,
                            ring_type = COALESCE(ring_type, ?5),
                            ls_distance = COALESCE(ls_distance, ?6),
                            inner_radius = COALESCE(inner_radius, ?7),
                            outer_radius = COALESCE(outer_radius, ?8),
                            ring_mass = COALESCE(ring_mass, ?9),
                            density = ?10
                         WHERE id = ?11",
                        params![
                            final_coords.map(|c| c.x),
                            final_coords.map(|c| c.y),
                            final_coords.map(|c| c.z),
                            final_source.as_str(),
                            input.ring.ring_type.map(|t| t.as_str()),
                            input.ring.ls_distance,
                            input.ring.inner_radius,
                            input.ring.outer_radius,
                            input.ring.ring_mass,
                            merged_density.map(|d| d.to_db_string()),
                            existing.id,
                        ],
                    )?;
                }
            }
        }

        Self::backfill_siblings(&tx, &input.system, &body, &material, &input.ring)?;
        tx.commit()?;
        Ok(())
    }

    fn backfill_siblings(
        tx: &rusqlite::Transaction,
        system: &str,
        body: &str,
        material_exclude: &str,
        ring: &RingMetadata,
    ) -> rusqlite::Result<()> {
        if ring.is_empty() {
            return Ok(());
        }
        tx.execute(
            "UPDATE hotspot_data SET
                ring_type = COALESCE(ring_type, ?1),
                ls_distance = COALESCE(ls_distance, ?2),
                inner_radius = COALESCE(inner_radius, ?3),
                outer_radius = COALESCE(outer_radius, ?4),
                ring_mass = COALESCE(ring_mass, ?5),
                density = COALESCE(density, ?6)
             WHERE system_name = ?7 AND body_name = ?8 AND material_name != ?9",
            params![
                ring.ring_type.map(|t| t.as_str()),
                ring.ls_distance,
                ring.inner_radius,
                ring.outer_radius,
                ring.ring_mass,
                ring.density.map(|d| d.to_db_string()),
                system,
                body,
                material_exclude,
            ],
        )?;
        Ok(())
    }

    /// Back-fills ring-level metadata (not tied to one material row) across
    /// every row of the `(system, body)` ring, honoring the density
    /// tagged-union override rule per row.
    pub fn update_ring_metadata(&self, system: &str, body: &str, fields: RingMetadata) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().unwrap();
        let tx = guard.transaction()?;

        let rows: Vec<(i64, Option<String>)> = {
            let mut stmt =
                tx.prepare("SELECT id, density FROM hotspot_data WHERE system_name = ?1 AND body_name = ?2")?;
            let rows = stmt.query_map(params![system, body], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };

        for (id, density_str) in rows {
            let existing_density = parse_density(density_str);
            let merged_density = merge_density(existing_density, fields.density);
            tx.execute(
                "UPDATE hotspot_data SET
                    ring_type = COALESCE(ring_type, ?1),
                    ls_distance = COALESCE(ls_distance, ?2),
                    inner_radius = COALESCE(inner_radius, ?3),
                    outer_radius = COALESCE(outer_radius, ?4),
                    ring_mass = COALESCE(ring_mass, ?5),
                    density = ?6
                 WHERE id = ?7",
                params![
                    fields.ring_type.map(|t| t.as_str()),
                    fields.ls_distance,
                    fields.inner_radius,
                    fields.outer_radius,
                    fields.ring_mass,
                    merged_density.map(|d| d.to_db_string()),
                    id,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    fn set_tag(&self, system: &str, body: &str, material: &str, column: &str, value: Option<&str>) -> Result<(), StoreError> {
        let material = materials::normalize_material_name(material);
        let mut guard = self.conn.lock().unwrap();
        let tx = guard.transaction()?;
        let sql = format!(
            "UPDATE hotspot_data SET {column} = ?1 WHERE system_name = ?2 AND body_name = ?3 AND material_name = ?4"
        );
        let updated = tx.execute(&sql, params![value, system, body, material])?;
        if updated == 0 {
            let insert_sql = format!(
                "INSERT INTO hotspot_data (system_name, body_name, material_name, hotspot_count, scan_date, coord_source, {column})
                 VALUES (?1, ?2, ?3, 0, strftime('%Y-%m-%dT%H:%M:%SZ','now'), 'unknown', ?4)"
            );
            tx.execute(&insert_sql, params![system, body, material, value])?;
        }
        tx.commit()?;
        Ok(())
    }

    fn get_tag(&self, system: &str, body: &str, material: &str, column: &str) -> Result<Option<String>, StoreError> {
        let material = materials::normalize_material_name(material);
        let guard = self.conn.lock().unwrap();
        let sql = format!(
            "SELECT {column} FROM hotspot_data WHERE system_name = ?1 AND body_name = ?2 AND material_name = ?3"
        );
        guard
            .query_row(&sql, params![system, body, material], |row| row.get(0))
            .optional()
            .map_err(Into::into)
    }

    pub fn set_overlap_tag(&self, system: &str, body: &str, material: &str, tag: Option<OverlapTag>) -> Result<(), StoreError> {
        self.set_tag(system, body, material, "overlap_tag", tag.map(|t| t.as_str()))
    }

    pub fn get_overlap_tag(&self, system: &str, body: &str, material: &str) -> Result<Option<OverlapTag>, StoreError> {
        Ok(self.get_tag(system, body, material, "overlap_tag")?.and_then(|s| OverlapTag::parse(&s)))
    }

    pub fn set_res_tag(&self, system: &str, body: &str, material: &str, tag: Option<ResTag>) -> Result<(), StoreError> {
        self.set_tag(system, body, material, "res_tag", tag.map(|t| t.as_str()))
    }

    pub fn get_res_tag(&self, system: &str, body: &str, material: &str) -> Result<Option<ResTag>, StoreError> {
        Ok(self.get_tag(system, body, material, "res_tag")?.and_then(|s| ResTag::parse(&s)))
    }

    /// One row per canonical material with its known count, sorted by
    /// material name.
    pub fn get_body_hotspots(&self, system: &str, body: &str) -> Result<Vec<(String, i64)>, StoreError> {
        let guard = self.conn.lock().unwrap();
        let mut stmt = guard.prepare(
            "SELECT material_name, MAX(hotspot_count) FROM hotspot_data
             WHERE system_name = ?1 AND body_name = ?2
             GROUP BY material_name ORDER BY material_name",
        )?;
        let rows = stmt.query_map(params![system, body], |row| Ok((row.get(0)?, row.get(1)?)))?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    pub fn check_ring_exists(&self, system: &str, body: &str) -> Result<bool, StoreError> {
        let guard = self.conn.lock().unwrap();
        Ok(guard
            .query_row(
                "SELECT 1 FROM hotspot_data WHERE system_name = ?1 AND body_name = ?2 LIMIT 1",
                params![system, body],
                |_| Ok(()),
            )
            .optional()?
            .is_some())
    }

    pub fn get_ls_distance(&self, system: &str, body: &str) -> Result<Option<f64>, StoreError> {
        let guard = self.conn.lock().unwrap();
        guard
            .query_row(
                "SELECT ls_distance FROM hotspot_data WHERE system_name = ?1 AND body_name = ?2 AND ls_distance IS NOT NULL LIMIT 1",
                params![system, body],
                |row| row.get(0),
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn get_ring_metadata(&self, system: &str, body: &str) -> Result<RingMetadata, StoreError> {
        let guard = self.conn.lock().unwrap();
        guard
            .query_row(
                "SELECT MAX(ring_type), MAX(ls_distance), MAX(inner_radius), MAX(outer_radius),
                        MAX(ring_mass), MAX(density)
                 FROM hotspot_data WHERE system_name = ?1 AND body_name = ?2",
                params![system, body],
                |row| {
                    Ok(RingMetadata {
                        ring_type: parse_ring_type(row.get(0)?),
                        ls_distance: row.get(1)?,
                        inner_radius: row.get(2)?,
                        outer_radius: row.get(3)?,
                        ring_mass: row.get(4)?,
                        density: parse_density(row.get(5)?),
                    })
                },
            )
            .map_err(Into::into)
    }

    pub fn get_reserve_level(&self, system: &str, body: &str) -> Result<Option<ReserveLevel>, StoreError> {
        let meta = self.get_ring_metadata(system, body)?;
        Ok(meta.density.and_then(|d| match d {
            Density::Reserve(r) => Some(r),
            Density::Numeric(_) => None,
        }))
    }

    pub fn set_reserve_level(&self, system: &str, body: &str, level: Option<ReserveLevel>) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().unwrap();
        let tx = guard.transaction()?;
        Self::set_reserve_level_tx(&tx, system, body, level)?;
        tx.commit()?;
        Ok(())
    }

    fn set_reserve_level_tx(tx: &rusqlite::Transaction, system: &str, body: &str, level: Option<ReserveLevel>) -> rusqlite::Result<()> {
        let rows: Vec<(i64, Option<String>)> = {
            let mut stmt = tx.prepare("SELECT id, density FROM hotspot_data WHERE system_name = ?1 AND body_name = ?2")?;
            let rows = stmt.query_map(params![system, body], |row| Ok((row.get(0)?, row.get(1)?)))?;
            rows.collect::<Result<_, _>>()?
        };
        for (id, density_str) in rows {
            let existing = parse_density(density_str);
            let new_value = match level {
                Some(level) => merge_density(existing, Some(Density::Reserve(level))),
                None => match existing {
                    Some(Density::Reserve(_)) => None,
                    other => other,
                },
            };
            tx.execute(
                "UPDATE hotspot_data SET density = ?1 WHERE id = ?2",
                params![new_value.map(|d| d.to_db_string()), id],
            )?;
        }
        Ok(())
    }

    /// Applies `set_reserve_level` across every named body in `system` within
    /// one transaction, used by the optional Spansh/EDSM reserve-level
    /// enrichment path.
    pub fn bulk_update_reserve_levels(&self, system: &str, levels: &[(String, ReserveLevel)]) -> Result<(), StoreError> {
        let mut guard = self.conn.lock().unwrap();
        let tx = guard.transaction()?;
        for (body, level) in levels {
            Self::set_reserve_level_tx(&tx, system, body, Some(*level))?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Upserts a visited system with a monotonically non-decreasing visit
    /// count: a re-scan of the same or an older timestamp never increments it.
    pub fn add_visited_system(&self, system: &str, timestamp: &str, coords: Option<Coords>) -> Result<(), StoreError> {
        let guard = self.conn.lock().unwrap();
        let existing: Option<(String, i64)> = guard
            .query_row(
                "SELECT last_visit_date, visit_count FROM visited_systems WHERE system_name = ?1",
                params![system],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;

        match existing {
            None => {
                guard.execute(
                    "INSERT INTO visited_systems (system_name, x_coord, y_coord, z_coord, first_visit_date, last_visit_date, visit_count)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?5, 1)",
                    params![system, coords.map(|c| c.x), coords.map(|c| c.y), coords.map(|c| c.z), timestamp],
                )?;
            }
            Some((last_visit, visit_count)) if timestamp > last_visit.as_str() => {
                guard.execute(
                    "UPDATE visited_systems SET last_visit_date = ?1, visit_count = ?2,
                        x_coord = COALESCE(?3, x_coord), y_coord = COALESCE(?4, y_coord), z_coord = COALESCE(?5, z_coord)
                     WHERE system_name = ?6",
                    params![timestamp, visit_count + 1, coords.map(|c| c.x), coords.map(|c| c.y), coords.map(|c| c.z), system],
                )?;
            }
            Some(_) => {
                // Same or older timestamp: a re-scanned log line. No-op.
            }
        }
        Ok(())
    }

    pub fn get_visited_system(&self, system: &str) -> Result<Option<VisitedSystem>, StoreError> {
        let guard = self.conn.lock().unwrap();
        guard
            .query_row(
                "SELECT system_name, x_coord, y_coord, z_coord, first_visit_date, last_visit_date, visit_count
                 FROM visited_systems WHERE system_name = ?1 COLLATE NOCASE",
                params![system],
                |row| {
                    Ok(VisitedSystem {
                        system_name: row.get(0)?,
                        x: row.get(1)?,
                        y: row.get(2)?,
                        z: row.get(3)?,
                        first_visit_date: row.get(4)?,
                        last_visit_date: row.get(5)?,
                        visit_count: row.get(6)?,
                    })
                },
            )
            .optional()
            .map_err(Into::into)
    }

    pub fn total_visits_count(&self) -> Result<i64, StoreError> {
        let guard = self.conn.lock().unwrap();
        Ok(guard.query_row("SELECT COALESCE(SUM(visit_count), 0) FROM visited_systems", [], |row| row.get(0))?)
    }

    /// All visited systems within the axis-aligned cube of half-side
    /// `radius_ly` centered on `center`, mirroring `GalaxyIndex::systems_in_bbox`.
    pub fn visited_systems_in_bbox(&self, center: Coords, radius_ly: f64) -> Result<Vec<(String, Coords)>, StoreError> {
        let guard = self.conn.lock().unwrap();
        let mut stmt = guard.prepare(
            "SELECT system_name, x_coord, y_coord, z_coord FROM visited_systems
             WHERE x_coord BETWEEN ?1 AND ?2 AND y_coord BETWEEN ?3 AND ?4 AND z_coord BETWEEN ?5 AND ?6",
        )?;
        let rows = stmt.query_map(
            params![
                center.x - radius_ly,
                center.x + radius_ly,
                center.y - radius_ly,
                center.y + radius_ly,
                center.z - radius_ly,
                center.z + radius_ly,
            ],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    Coords { x: row.get(1)?, y: row.get(2)?, z: row.get(3)? },
                ))
            },
        )?;
        rows.collect::<Result<_, _>>().map_err(Into::into)
    }

    /// Rows matching any of `systems`, chunked to stay under SQLite's bound
    /// parameter limit. Used by the ring finder's candidate-expansion step.
    pub fn hotspots_in_systems(&self, systems: &[String]) -> Result<Vec<Hotspot>, StoreError> {
        const CHUNK: usize = 500;
        let guard = self.conn.lock().unwrap();
        let mut out = Vec::new();
        for chunk in systems.chunks(CHUNK) {
            let placeholders = chunk.iter().map(|_| "?").collect::<Vec<_>>().join(",");
            let sql = format!(
                "SELECT system_name, body_name, material_name, hotspot_count, scan_date,
                        x_coord, y_coord, z_coord, coord_source,
                        ring_type, ls_distance, inner_radius, outer_radius, ring_mass, density,
                        overlap_tag, res_tag, data_source
                 FROM hotspot_data WHERE system_name IN ({placeholders})"
            );
            let mut stmt = guard.prepare(&sql)?;
            let params: Vec<&dyn rusqlite::ToSql> = chunk.iter().map(|s| s as &dyn rusqlite::ToSql).collect();
            let rows = stmt.query_map(params.as_slice(), |row| {
                Ok(Hotspot {
                    system_name: row.get(0)?,
                    body_name: row.get(1)?,
                    material_name: row.get(2)?,
                    hotspot_count: row.get(3)?,
                    scan_date: row.get(4)?,
                    x: row.get(5)?,
                    y: row.get(6)?,
                    z: row.get(7)?,
                    coord_source: CoordSource::parse(&row.get::<_, String>(8)?),
                    ring: RingMetadata {
                        ring_type: parse_ring_type(row.get(9)?),
                        ls_distance: row.get(10)?,
                        inner_radius: row.get(11)?,
                        outer_radius: row.get(12)?,
                        ring_mass: row.get(13)?,
                        density: parse_density(row.get(14)?),
                    },
                    overlap_tag: row.get::<_, Option<String>>(15)?.and_then(|s| OverlapTag::parse(&s)),
                    res_tag: row.get::<_, Option<String>>(16)?.and_then(|s| ResTag::parse(&s)),
                    data_source: row.get(17)?,
                })
            })?;
            out.extend(rows.collect::<Result<Vec<_>, _>>()?);
        }
        Ok(out)
    }
}

fn field_would_be_added(new: &RingMetadata, old: &RingMetadata) -> bool {
    (new.ls_distance.is_some() && old.ls_distance.is_none())
        || (new.ring_type.is_some() && old.ring_type.is_none())
        || (new.inner_radius.is_some() && old.inner_radius.is_none())
        || (new.outer_radius.is_some() && old.outer_radius.is_none())
        || (new.ring_mass.is_some() && old.ring_mass.is_none())
        || (new.density.is_some() && old.density.is_none())
}

#[derive(Debug, Clone)]
pub struct UpsertHotspot {
    pub system: String,
    pub body: String,
    pub material: String,
    pub hotspot_count: i64,
    pub scan_date: String,
    pub coords: Option<Coords>,
    pub coord_source: CoordSource,
    pub ring: RingMetadata,
    pub data_source: Option<String>,
}

impl Default for UpsertHotspot {
    fn default() -> Self {
        Self {
            system: String::new(),
            body: String::new(),
            material: String::new(),
            hotspot_count: 0,
            scan_date: String::new(),
            coords: None,
            coord_source: CoordSource::Unknown,
            ring: RingMetadata::default(),
            data_source: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base_upsert() -> UpsertHotspot {
        UpsertHotspot {
            system: "Paesia".to_string(),
            body: "2 A Ring".to_string(),
            material: "Platinum".to_string(),
            hotspot_count: 3,
            scan_date: "2024-01-01T00:00:00Z".to_string(),
            coords: Some(Coords { x: 1.0, y: 2.0, z: 3.0 }),
            coord_source: CoordSource::Journal,
            ring: RingMetadata::default(),
            data_source: None,
        }
    }

    #[test]
    fn insert_then_query_round_trips() {
        let store = HotspotStore::open_in_memory().unwrap();
        store.upsert_hotspot(base_upsert()).unwrap();
        let hotspots = store.get_body_hotspots("Paesia", "2 A Ring").unwrap();
        assert_eq!(hotspots, vec![("Platinum".to_string(), 3)]);
    }

    #[test]
    fn richer_count_replaces_placeholder() {
        let store = HotspotStore::open_in_memory().unwrap();
        let mut placeholder = base_upsert();
        placeholder.hotspot_count = 0;
        store.upsert_hotspot(placeholder).unwrap();

        let mut real_scan = base_upsert();
        real_scan.hotspot_count = 3;
        store.upsert_hotspot(real_scan).unwrap();

        let hotspots = store.get_body_hotspots("Paesia", "2 A Ring").unwrap();
        assert_eq!(hotspots, vec![("Platinum".to_string(), 3)]);
    }

    #[test]
    fn newer_but_less_complete_is_skipped() {
        let store = HotspotStore::open_in_memory().unwrap();
        let mut first = base_upsert();
        first.hotspot_count = 0;
        first.ring.ls_distance = Some(1234.5);
        first.ring.ring_type = Some(RingType::Metallic);
        first.coord_source = CoordSource::Journal;
        store.upsert_hotspot(first).unwrap();

        let mut second = base_upsert();
        second.hotspot_count = 2;
        second.scan_date = "2024-02-01T00:00:00Z".to_string();
        second.ring = RingMetadata::default();
        // existing coord_source is journal, so the single-field-backfill
        // exception does not apply: this must be skipped entirely.
        store.upsert_hotspot(second).unwrap();

        let meta = store.get_ring_metadata("Paesia", "2 A Ring").unwrap();
        assert_eq!(meta.ring_type, Some(RingType::Metallic));
        let hotspots = store.get_body_hotspots("Paesia", "2 A Ring").unwrap();
        assert_eq!(hotspots, vec![("Platinum".to_string(), 0)]);
    }

    #[test]
    fn sibling_rows_are_backfilled_with_ring_metadata() {
        let store = HotspotStore::open_in_memory().unwrap();
        let mut platinum = base_upsert();
        platinum.material = "Platinum".to_string();
        store.upsert_hotspot(platinum).unwrap();

        let mut painite = base_upsert();
        painite.material = "Painite".to_string();
        painite.ring.ring_type = Some(RingType::Metallic);
        painite.ring.ls_distance = Some(500.0);
        store.upsert_hotspot(painite).unwrap();

        let meta = store.get_ring_metadata("Paesia", "2 A Ring").unwrap();
        assert_eq!(meta.ring_type, Some(RingType::Metallic));
        assert_eq!(meta.ls_distance, Some(500.0));
    }

    #[test]
    fn reserve_level_blocks_numeric_density_overwrite() {
        let store = HotspotStore::open_in_memory().unwrap();
        store.upsert_hotspot(base_upsert()).unwrap();
        store.set_reserve_level("Paesia", "2 A Ring", Some(ReserveLevel::Pristine)).unwrap();
        store
            .update_ring_metadata("Paesia", "2 A Ring", RingMetadata { density: Some(Density::Numeric(4.2)), ..Default::default() })
            .unwrap();
        assert_eq!(store.get_reserve_level("Paesia", "2 A Ring").unwrap(), Some(ReserveLevel::Pristine));
    }

    #[test]
    fn overlap_tag_upserts_placeholder_row() {
        let store = HotspotStore::open_in_memory().unwrap();
        store.set_overlap_tag("Borann", "1 A Ring", "Platinum", Some(OverlapTag::TwoX)).unwrap();
        let tag = store.get_overlap_tag("Borann", "1 A Ring", "Platinum").unwrap();
        assert_eq!(tag, Some(OverlapTag::TwoX));
        let hotspots = store.get_body_hotspots("Borann", "1 A Ring").unwrap();
        assert_eq!(hotspots, vec![("Platinum".to_string(), 0)]);
    }

    #[test]
    fn visit_count_is_monotonic_under_replay() {
        let store = HotspotStore::open_in_memory().unwrap();
        store.add_visited_system("Paesia", "2024-01-01T00:00:00Z", None).unwrap();
        store.add_visited_system("Paesia", "2024-01-01T00:00:00Z", None).unwrap();
        let visited = store.get_visited_system("Paesia").unwrap().unwrap();
        assert_eq!(visited.visit_count, 1);

        store.add_visited_system("Paesia", "2024-01-02T00:00:00Z", None).unwrap();
        let visited = store.get_visited_system("Paesia").unwrap().unwrap();
        assert_eq!(visited.visit_count, 2);
    }
}

// `set_overlap_tag`/`set_res_tag` insert a placeholder row with
// `hotspot_count = 0` rather than `1` — an unscanned ring with only a
// community tag has no confirmed hotspot count yet (see DESIGN.md).
