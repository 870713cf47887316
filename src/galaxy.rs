use rusqlite::Connection;

use crate::error::StoreError;

/// Read-only index over the bundled galaxy coordinate database. Never mutated at
/// runtime; opened with the SQLite read-only URI so a stray write attempt is a hard
/// error rather than a silent corruption of a file we ship.
pub struct GalaxyIndex {
    conn: Connection,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Coords {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Coords {
    pub fn distance(&self, other: &Coords) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2) + (self.z - other.z).powi(2))
            .sqrt()
    }
}

#[derive(Debug, Clone)]
pub struct GalaxySystem {
    pub name: String,
    pub coords: Coords,
}

impl GalaxyIndex {
    pub fn open_readonly(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let uri = format!("file:{}?mode=ro", path.as_ref().display());
        let conn = Connection::open_with_flags(
            uri,
            rusqlite::OpenFlags::SQLITE_OPEN_READ_ONLY | rusqlite::OpenFlags::SQLITE_OPEN_URI,
        )?;
        Ok(Self { conn })
    }

    /// Creates an empty, writable index backing a fresh bundled snapshot. Used to build
    /// the bundled galaxy database and in tests; the live daemon always opens read-only.
    pub fn create(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS systems (
                name TEXT PRIMARY KEY,
                x REAL NOT NULL,
                y REAL NOT NULL,
                z REAL NOT NULL
            );
            CREATE INDEX IF NOT EXISTS idx_systems_xyz ON systems(x, y, z);",
        )?;
        Ok(Self { conn })
    }

    pub fn insert(&self, name: &str, coords: Coords) -> Result<(), StoreError> {
        self.conn.execute(
            "INSERT OR REPLACE INTO systems (name, x, y, z) VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![name, coords.x, coords.y, coords.z],
        )?;
        Ok(())
    }

    pub fn coords(&self, name: &str) -> Result<Option<Coords>, StoreError> {
        let mut stmt = self
            .conn
            .prepare("SELECT x, y, z FROM systems WHERE name = ?1 COLLATE NOCASE")?;
        let mut rows = stmt.query(rusqlite::params![name])?;
        if let Some(row) = rows.next()? {
            Ok(Some(Coords {
                x: row.get(0)?,
                y: row.get(1)?,
                z: row.get(2)?,
            }))
        } else {
            Ok(None)
        }
    }

    /// Returns every system within the axis-aligned cube of half-side `radius_ly`
    /// centered on `center`. Callers apply precise Euclidean filtering on top.
    pub fn systems_in_bbox(
        &self,
        center: Coords,
        radius_ly: f64,
    ) -> Result<Vec<GalaxySystem>, StoreError> {
        let mut stmt = self.conn.prepare(
            "SELECT name, x, y, z FROM systems
             WHERE x BETWEEN ?1 AND ?2 AND y BETWEEN ?3 AND ?4 AND z BETWEEN ?5 AND ?6",
        )?;
        let rows = stmt.query_map(
            rusqlite::params![
                center.x - radius_ly,
                center.x + radius_ly,
                center.y - radius_ly,
                center.y + radius_ly,
                center.z - radius_ly,
                center.z + radius_ly,
            ],
            |row| {
                Ok(GalaxySystem {
                    name: row.get(0)?,
                    coords: Coords {
                        x: row.get(1)?,
                        y: row.get(2)?,
                        z: row.get(3)?,
                    },
                })
            },
        )?;
        rows.collect::<Result<Vec<_>, _>>().map_err(Into::into)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seeded_index() -> (tempfile::TempDir, GalaxyIndex) {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("galaxy.db");
        let idx = GalaxyIndex::create(&path).unwrap();
        idx.insert("Paesia", Coords { x: 0.0, y: 0.0, z: 0.0 }).unwrap();
        idx.insert("Deciat", Coords { x: 5.0, y: 0.0, z: 0.0 }).unwrap();
        idx.insert("Far Away", Coords { x: 500.0, y: 0.0, z: 0.0 }).unwrap();
        (dir, idx)
    }

    #[test]
    fn coords_lookup_is_case_insensitive() {
        let (_dir, idx) = seeded_index();
        let found = idx.coords("PAESIA").unwrap().unwrap();
        assert_eq!(found.x, 0.0);
    }

    #[test]
    fn bbox_excludes_far_systems() {
        let (_dir, idx) = seeded_index();
        let results = idx
            .systems_in_bbox(Coords { x: 0.0, y: 0.0, z: 0.0 }, 10.0)
            .unwrap();
        let names: Vec<_> = results.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"Paesia"));
        assert!(names.contains(&"Deciat"));
        assert!(!names.contains(&"Far Away"));
    }
}
