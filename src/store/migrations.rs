use std::collections::HashMap;
use std::path::Path;

use regex::Regex;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::StoreError;
use crate::galaxy::GalaxyIndex;

use super::materials::normalize_material_name;

pub const MATERIAL_NORMALIZATION_VERSION: i64 = 1;
pub const BODY_PREFIX_REPAIR_VERSION: i64 = 1;
pub const MULTISTAR_NORMALIZATION_VERSION: i64 = 1;
pub const OVERLAP_CSV_VERSION: i64 = 3;
pub const RES_CSV_VERSION: i64 = 3;
pub const BUNDLED_MERGE_VERSION: i64 = 1;

/// Returns the currently recorded version for `name`, or `0` if never run.
pub fn recorded_version(conn: &Connection, name: &str) -> rusqlite::Result<i64> {
    conn.query_row(
        "SELECT version FROM migration_history WHERE name = ?1",
        params![name],
        |row| row.get(0),
    )
    .or_else(|e| if e == rusqlite::Error::QueryReturnedNoRows { Ok(0) } else { Err(e) })
}

fn record_version(conn: &Connection, name: &str, version: i64) -> rusqlite::Result<()> {
    conn.execute(
        "INSERT INTO migration_history (name, version, applied_at)
         VALUES (?1, ?2, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'))
         ON CONFLICT(name) DO UPDATE SET version = excluded.version, applied_at = excluded.applied_at",
        params![name, version],
    )?;
    Ok(())
}

/// Runs `body` inside a transaction and, only if it succeeds, bumps the
/// migration's recorded version. A failing migration leaves the version
/// unchanged so it is retried next startup; the rest of the pipeline still
/// runs (§7: "abort that migration only").
fn run_once<F>(conn: &mut Connection, name: &'static str, target_version: i64, body: F) -> Result<(), StoreError>
where
    F: FnOnce(&rusqlite::Transaction) -> rusqlite::Result<()>,
{
    if recorded_version(conn, name)? >= target_version {
        return Ok(());
    }
    let tx = conn.transaction()?;
    body(&tx).map_err(|source| StoreError::Migration { name, source })?;
    record_version(&tx, name, target_version).map_err(|source| StoreError::Migration { name, source })?;
    tx.commit()?;
    Ok(())
}

/// Migration 1: merge alias material names into their canonical form,
/// keeping the newest row per `(system, body)` when a merge collides.
pub fn migrate_material_normalization(conn: &mut Connection) -> Result<(), StoreError> {
    run_once(conn, "material_normalization", MATERIAL_NORMALIZATION_VERSION, |tx| {
        let names: Vec<String> = {
            let mut stmt = tx.prepare("SELECT DISTINCT material_name FROM hotspot_data")?;
            let rows = stmt.query_map([], |row| row.get::<_, String>(0))?;
            rows.collect::<Result<_, _>>()?
        };

        for old_name in names {
            let new_name = normalize_material_name(&old_name);
            if new_name == old_name {
                continue;
            }

            // Find (system, body) pairs that have both the alias and the
            // canonical name; keep only the newest row, delete the other.
            let collisions: Vec<(String, String)> = {
                let mut stmt = tx.prepare(
                    "SELECT a.system_name, a.body_name FROM hotspot_data a
                     JOIN hotspot_data b
                       ON a.system_name = b.system_name AND a.body_name = b.body_name
                     WHERE a.material_name = ?1 AND b.material_name = ?2",
                )?;
                let rows = stmt.query_map(params![old_name, new_name], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?;
                rows.collect::<Result<_, _>>()?
            };

            for (system, body) in collisions {
                let mut stmt = tx.prepare(
                    "SELECT id, scan_date FROM hotspot_data
                     WHERE system_name = ?1 AND body_name = ?2 AND material_name IN (?3, ?4)
                     ORDER BY scan_date DESC, id DESC",
                )?;
                let rows: Vec<(i64, String)> = stmt
                    .query_map(params![system, body, old_name, new_name], |row| {
                        Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?))
                    })?
                    .collect::<Result<_, _>>()?;
                if let Some((keep_id, _)) = rows.first() {
                    for (id, _) in rows.iter().skip(1) {
                        tx.execute("DELETE FROM hotspot_data WHERE id = ?1", params![id])?;
                    }
                    tx.execute(
                        "UPDATE hotspot_data SET material_name = ?1 WHERE id = ?2",
                        params![new_name, keep_id],
                    )?;
                }
            }

            // Remaining rows with the alias name (no collision) just get renamed.
            tx.execute(
                "UPDATE hotspot_data SET material_name = ?1 WHERE material_name = ?2",
                params![new_name, old_name],
            )?;
        }
        Ok(())
    })
}

fn ring_suffix_regex() -> Regex {
    Regex::new(r"(?i)\s+([A-Za-z]?\s*\d*\s*[A-Za-z]\s+Ring)$").unwrap()
}

/// Migration 2: repair rows whose `body_name` still embeds a system prefix
/// that disagrees with `system_name` (a historical bug in upstream data).
pub fn migrate_body_prefix_repair(conn: &mut Connection) -> Result<(), StoreError> {
    run_once(conn, "body_prefix_repair", BODY_PREFIX_REPAIR_VERSION, |tx| {
        let ring_re = ring_suffix_regex();

        let candidates: Vec<(i64, String, String)> = {
            let mut stmt = tx.prepare(
                "SELECT id, system_name, body_name FROM hotspot_data WHERE body_name LIKE '% Ring'",
            )?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
            })?;
            rows.collect::<Result<_, _>>()?
        };

        for (id, system_name, body_name) in candidates {
            let prefix_matches = body_name
                .to_lowercase()
                .starts_with(&format!("{} ", system_name.to_lowercase()));
            if prefix_matches || body_name.len() <= 15 {
                continue;
            }
            let Some(m) = ring_re.find(&body_name) else { continue };
            let true_body = m.as_str().trim().to_string();
            let true_system = body_name[..m.start()].trim().to_string();
            if true_system.is_empty() || true_system.eq_ignore_ascii_case(&system_name) {
                continue;
            }

            let exists: bool = tx
                .query_row(
                    "SELECT 1 FROM hotspot_data WHERE system_name = ?1 AND body_name = ?2 AND id != ?3 LIMIT 1",
                    params![true_system, true_body, id],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();

            if exists {
                tx.execute("DELETE FROM hotspot_data WHERE id = ?1", params![id])?;
            } else {
                tx.execute(
                    "UPDATE hotspot_data SET system_name = ?1, body_name = ?2 WHERE id = ?3",
                    params![true_system, true_body, id],
                )?;
            }
        }
        Ok(())
    })
}

fn multistar_suffix_regex() -> Regex {
    Regex::new(r"^(.+?)\s+([A-Z]{1,3})$").unwrap()
}

/// Migration 3: for `system_name` values that look like `"<base> <suffix>"`
/// where `<suffix>` is a 1-3 letter star designator, move the suffix into
/// `body_name` when the base system is known but the full name is not.
pub fn migrate_multistar_normalization(
    conn: &mut Connection,
    galaxy: Option<&GalaxyIndex>,
) -> Result<(), StoreError> {
    if recorded_version(conn, "multistar_normalization")? >= MULTISTAR_NORMALIZATION_VERSION {
        return Ok(());
    }
    let suffix_re = multistar_suffix_regex();

    let tx = conn.transaction()?;
    let rows: Vec<(i64, String, String)> = {
        let mut stmt = tx.prepare("SELECT id, system_name, body_name FROM hotspot_data")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, String>(1)?, row.get::<_, String>(2)?))
        })?;
        rows.collect::<Result<_, _>>().map_err(|e| StoreError::Migration { name: "multistar_normalization", source: e })?
    };

    for (id, system_name, body_name) in rows {
        let Some(caps) = suffix_re.captures(&system_name) else { continue };
        let base = caps.get(1).unwrap().as_str().to_string();
        let suffix = caps.get(2).unwrap().as_str().to_string();

        let full_known = system_known(&tx, galaxy, &system_name)
            .map_err(|e| StoreError::Migration { name: "multistar_normalization", source: e })?;
        if full_known {
            // It really is a distinct system; only backfill coordinates.
            backfill_coords_from_visited(&tx, id, &system_name)
                .map_err(|e| StoreError::Migration { name: "multistar_normalization", source: e })?;
            continue;
        }

        let base_known = system_known(&tx, galaxy, &base)
            .map_err(|e| StoreError::Migration { name: "multistar_normalization", source: e })?;
        if !base_known {
            continue;
        }

        let new_body = format!("{} {}", suffix, body_name);
        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM hotspot_data WHERE system_name = ?1 AND body_name = ?2 AND id != ?3 LIMIT 1",
                params![base, new_body, id],
                |_| Ok(()),
            )
            .optional()
            .map_err(|e| StoreError::Migration { name: "multistar_normalization", source: e })?
            .is_some();

        if exists {
            tx.execute("DELETE FROM hotspot_data WHERE id = ?1", params![id])
                .map_err(|e| StoreError::Migration { name: "multistar_normalization", source: e })?;
        } else {
            tx.execute(
                "UPDATE hotspot_data SET system_name = ?1, body_name = ?2 WHERE id = ?3",
                params![base, new_body, id],
            )
            .map_err(|e| StoreError::Migration { name: "multistar_normalization", source: e })?;
            backfill_coords_from_visited(&tx, id, &base)
                .map_err(|e| StoreError::Migration { name: "multistar_normalization", source: e })?;
        }
    }

    record_version(&tx, "multistar_normalization", MULTISTAR_NORMALIZATION_VERSION)
        .map_err(|e| StoreError::Migration { name: "multistar_normalization", source: e })?;
    tx.commit()?;
    Ok(())
}

fn system_known(
    tx: &rusqlite::Transaction,
    galaxy: Option<&GalaxyIndex>,
    name: &str,
) -> rusqlite::Result<bool> {
    let in_visited: bool = tx
        .query_row(
            "SELECT 1 FROM visited_systems WHERE system_name = ?1 COLLATE NOCASE LIMIT 1",
            params![name],
            |_| Ok(()),
        )
        .optional()?
        .is_some();
    if in_visited {
        return Ok(true);
    }
    if let Some(galaxy) = galaxy {
        if galaxy.coords(name).unwrap_or(None).is_some() {
            return Ok(true);
        }
    }
    Ok(false)
}

fn backfill_coords_from_visited(tx: &rusqlite::Transaction, id: i64, system_name: &str) -> rusqlite::Result<()> {
    let coords: Option<(f64, f64, f64)> = tx
        .query_row(
            "SELECT x_coord, y_coord, z_coord FROM visited_systems WHERE system_name = ?1 COLLATE NOCASE LIMIT 1",
            params![system_name],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )
        .optional()?;
    if let Some((x, y, z)) = coords {
        tx.execute(
            "UPDATE hotspot_data SET x_coord = COALESCE(x_coord, ?1), y_coord = COALESCE(y_coord, ?2),
             z_coord = COALESCE(z_coord, ?3) WHERE id = ?4",
            params![x, y, z, id],
        )?;
    }
    Ok(())
}

#[derive(Debug, serde::Deserialize)]
struct OverlayRow {
    #[serde(rename = "System")]
    system: String,
    #[serde(rename = "Body")]
    body: String,
    #[serde(rename = "Material")]
    material: String,
    #[serde(rename = "Overlap", alias = "RES")]
    tag: String,
}

/// Migrations 4/5 share this shape: apply a `(system, body, material, tag)`
/// CSV overlay onto `column`, only ever filling a previously-null tag or
/// inserting a placeholder row.
fn apply_tag_overlay(
    conn: &mut Connection,
    migration_name: &'static str,
    target_version: i64,
    csv_path: &Path,
    column: &str,
    coord_source: &str,
) -> Result<(), StoreError> {
    if recorded_version(conn, migration_name)? >= target_version {
        return Ok(());
    }
    if !csv_path.exists() {
        tracing::debug!("{migration_name}: no overlay CSV at {}, skipping", csv_path.display());
        // Nothing to apply, but still record the version so it isn't retried
        // every startup; a future bump re-enables it.
        let tx = conn.transaction()?;
        record_version(&tx, migration_name, target_version)
            .map_err(|source| StoreError::Migration { name: migration_name, source })?;
        tx.commit()?;
        return Ok(());
    }

    let mut reader = csv::Reader::from_path(csv_path)?;
    let tx = conn.transaction()?;
    for result in reader.deserialize() {
        let row: OverlayRow = result?;
        let material = normalize_material_name(&row.material);
        let update_sql = format!(
            "UPDATE hotspot_data SET {column} = ?1
             WHERE system_name = ?2 AND body_name = ?3 AND material_name = ?4 AND {column} IS NULL"
        );
        let updated = tx
            .execute(&update_sql, params![row.tag, row.system, row.body, material])
            .map_err(|source| StoreError::Migration { name: migration_name, source })?;
        if updated == 0 {
            let already_tagged: bool = tx
                .query_row(
                    "SELECT 1 FROM hotspot_data WHERE system_name = ?1 AND body_name = ?2 AND material_name = ?3 LIMIT 1",
                    params![row.system, row.body, material],
                    |_| Ok(()),
                )
                .optional()
                .map_err(|source| StoreError::Migration { name: migration_name, source })?
                .is_some();
            if !already_tagged {
                let insert_sql = format!(
                    "INSERT INTO hotspot_data
                        (system_name, body_name, material_name, hotspot_count, scan_date, coord_source, {column})
                     VALUES (?1, ?2, ?3, 0, strftime('%Y-%m-%dT%H:%M:%SZ', 'now'), ?4, ?5)"
                );
                tx.execute(&insert_sql, params![row.system, row.body, material, coord_source, row.tag])
                    .map_err(|source| StoreError::Migration { name: migration_name, source })?;
            }
        }
    }
    record_version(&tx, migration_name, target_version)
        .map_err(|source| StoreError::Migration { name: migration_name, source })?;
    tx.commit()?;
    Ok(())
}

pub fn migrate_overlap_csv(conn: &mut Connection, csv_path: &Path) -> Result<(), StoreError> {
    apply_tag_overlay(conn, "overlap_csv", OVERLAP_CSV_VERSION, csv_path, "overlap_tag", "overlap_csv")
}

pub fn migrate_res_csv(conn: &mut Connection, csv_path: &Path) -> Result<(), StoreError> {
    apply_tag_overlay(conn, "res_csv", RES_CSV_VERSION, csv_path, "res_tag", "res_csv")
}

/// Migration 6: merge a bundled read-only snapshot of `hotspot_data`, never
/// overwriting a locally-present key. A unique-constraint race between the
/// existence check and the insert is treated as "already present".
pub fn migrate_bundled_merge(conn: &mut Connection, bundled_db: &Path) -> Result<(), StoreError> {
    if recorded_version(conn, "bundled_merge")? >= BUNDLED_MERGE_VERSION {
        return Ok(());
    }
    if !bundled_db.exists() {
        tracing::debug!("bundled_merge: no bundled hotspot db at {}, skipping", bundled_db.display());
        let tx = conn.transaction()?;
        record_version(&tx, "bundled_merge", BUNDLED_MERGE_VERSION)
            .map_err(|source| StoreError::Migration { name: "bundled_merge", source })?;
        tx.commit()?;
        return Ok(());
    }

    conn.execute(
        "ATTACH DATABASE ?1 AS bundled",
        params![bundled_db.to_string_lossy().into_owned()],
    )?;
    let result = (|| -> Result<(), StoreError> {
        let tx = conn.transaction()?;
        let bundled_rows: Vec<HashMap<String, rusqlite::types::Value>> = {
            let mut stmt = tx.prepare("SELECT * FROM bundled.hotspot_data")?;
            let column_names: Vec<String> = stmt.column_names().iter().map(|s| s.to_string()).collect();
            let rows = stmt.query_map([], |row| {
                let mut map = HashMap::new();
                for (i, name) in column_names.iter().enumerate() {
                    map.insert(name.clone(), row.get(i)?);
                }
                Ok(map)
            })?;
            rows.collect::<Result<_, _>>()?
        };

        for row in bundled_rows {
            let system: String = match row.get("system_name") {
                Some(rusqlite::types::Value::Text(s)) => s.clone(),
                _ => continue,
            };
            let body: String = match row.get("body_name") {
                Some(rusqlite::types::Value::Text(s)) => s.clone(),
                _ => continue,
            };
            let material: String = match row.get("material_name") {
                Some(rusqlite::types::Value::Text(s)) => s.clone(),
                _ => continue,
            };

            let exists: bool = tx
                .query_row(
                    "SELECT 1 FROM hotspot_data WHERE system_name = ?1 AND body_name = ?2 AND material_name = ?3 LIMIT 1",
                    params![system, body, material],
                    |_| Ok(()),
                )
                .optional()?
                .is_some();
            if exists {
                continue;
            }

            let hotspot_count = row.get("hotspot_count").cloned().unwrap_or(rusqlite::types::Value::Integer(0));
            let scan_date = row.get("scan_date").cloned().unwrap_or(rusqlite::types::Value::Null);

            let insert = tx.execute(
                "INSERT INTO hotspot_data (system_name, body_name, material_name, hotspot_count, scan_date, coord_source)
                 VALUES (?1, ?2, ?3, ?4, COALESCE(?5, strftime('%Y-%m-%dT%H:%M:%SZ', 'now')), 'unknown')",
                params![system, body, material, hotspot_count, scan_date],
            );
            match insert {
                Ok(_) => {}
                Err(rusqlite::Error::SqliteFailure(e, _))
                    if e.code == rusqlite::ErrorCode::ConstraintViolation =>
                {
                    // Raced with another writer inserting the same key; treat as already present.
                }
                Err(e) => return Err(e.into()),
            }
        }

        record_version(&tx, "bundled_merge", BUNDLED_MERGE_VERSION)?;
        tx.commit()?;
        Ok(())
    })();

    conn.execute("DETACH DATABASE bundled", [])?;
    result
}
