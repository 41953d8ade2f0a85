//! Authoritative world state and its on-disk snapshot.
//!
//! Every mutable piece of the world lives in one of the typed tables in
//! [`WorldTables`]. Cell tables (blocks and the four attachment kinds) key
//! rows by `(p, q, x, y, z)` and stamp each write with a monotonically
//! increasing insertion id. Those ids are the incremental sync contract:
//! clients remember the highest id they have seen per chunk and ask only
//! for newer rows.
//!
//! Snapshots are a single `bincode` blob written to a temp file and
//! renamed over the previous one, so a crash mid-commit loses at most one
//! commit interval of changes.

use crate::config::COMMIT_INTERVAL;
use crate::world::Generator;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use shared::chunked;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::fs;
use std::io;
use std::path::PathBuf;
use std::time::Instant;

/// One stored cell value plus its insertion id.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Cell {
    pub w: i32,
    pub id: u64,
}

/// The four attachment tables that ride along with blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decoration {
    Extra,
    Light,
    Shape,
    Transform,
}

type CellKey = (i32, i32, i32, i32, i32);
type SignKey = (i32, i32, i32, i32);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct SignRow {
    p: i32,
    q: i32,
    text: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRow {
    pub timestamp: f64,
    pub user_id: Option<u64>,
    pub x: i32,
    pub y: i32,
    pub z: i32,
    pub w: i32,
}

#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
struct CellTable {
    rows: HashMap<CellKey, Cell>,
    last_id: u64,
}

impl CellTable {
    /// Replaces the row at `key`, stamping a fresh insertion id. Clients
    /// syncing from an older watermark will pick the row up again.
    fn upsert(&mut self, key: CellKey, w: i32) -> u64 {
        self.last_id += 1;
        self.rows.insert(key, Cell { w, id: self.last_id });
        self.last_id
    }

    fn get(&self, key: &CellKey) -> Option<Cell> {
        self.rows.get(key).copied()
    }

    /// Zeroes every row at a world coordinate without touching insertion
    /// ids, so existing client watermarks stay valid.
    fn zero_at(&mut self, x: i32, y: i32, z: i32) {
        for (key, cell) in self.rows.iter_mut() {
            if key.2 == x && key.3 == y && key.4 == z {
                cell.w = 0;
            }
        }
    }

    /// Rows in chunk `(p, q)` with an id greater than `after`, in id order.
    fn rows_after(&self, p: i32, q: i32, after: u64) -> Vec<(i32, i32, i32, Cell)> {
        let mut rows: Vec<_> = self
            .rows
            .iter()
            .filter(|(key, cell)| key.0 == p && key.1 == q && cell.id > after)
            .map(|(key, cell)| (key.2, key.3, key.4, *cell))
            .collect();
        rows.sort_by_key(|row| row.3.id);
        rows
    }
}

/// Everything that is persisted, separated from the commit bookkeeping so
/// a snapshot serializes the whole world in one shot.
#[derive(Debug, Default, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorldTables {
    blocks: CellTable,
    extras: CellTable,
    lights: CellTable,
    shapes: CellTable,
    transforms: CellTable,
    signs: HashMap<SignKey, SignRow>,
    options: BTreeMap<String, String>,
    history: Vec<HistoryRow>,
}

pub struct Store {
    tables: WorldTables,
    path: Option<PathBuf>,
    dirty: bool,
    last_commit: Instant,
}

impl Store {
    /// Opens the snapshot at `path`, starting empty when the file does not
    /// exist yet. `None` keeps the world in memory only.
    pub fn open(path: Option<PathBuf>) -> io::Result<Store> {
        let tables = match &path {
            Some(p) if p.exists() => {
                let bytes = fs::read(p)?;
                let tables: WorldTables = bincode::deserialize(&bytes)
                    .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
                info!(
                    "loaded world snapshot from {} ({} block rows)",
                    p.display(),
                    tables.blocks.rows.len()
                );
                tables
            }
            _ => WorldTables::default(),
        };
        Ok(Store {
            tables,
            path,
            dirty: false,
            last_commit: Instant::now(),
        })
    }

    pub fn in_memory() -> Store {
        Store {
            tables: WorldTables::default(),
            path: None,
            dirty: false,
            last_commit: Instant::now(),
        }
    }

    /// Read-only view of everything a snapshot would contain.
    pub fn tables(&self) -> &WorldTables {
        &self.tables
    }

    /// True once `COMMIT_INTERVAL` has passed since the last commit.
    pub fn commit_due(&self) -> bool {
        self.last_commit.elapsed() >= COMMIT_INTERVAL
    }

    /// Writes a snapshot if anything changed since the last one. The file
    /// is replaced via rename so a crash mid-write never truncates state.
    pub fn commit(&mut self) -> io::Result<()> {
        self.last_commit = Instant::now();
        if !self.dirty {
            return Ok(());
        }
        if let Some(path) = &self.path {
            let bytes = bincode::serialize(&self.tables)
                .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
            let tmp = path.with_extension("tmp");
            fs::write(&tmp, &bytes)?;
            fs::rename(&tmp, path)?;
            debug!("committed {} bytes to {}", bytes.len(), path.display());
        }
        self.dirty = false;
        Ok(())
    }

    /// Upserts a block row, returning its fresh insertion id.
    pub fn set_block(&mut self, p: i32, q: i32, x: i32, y: i32, z: i32, w: i32) -> u64 {
        self.dirty = true;
        self.tables.blocks.upsert((p, q, x, y, z), w)
    }

    /// The stored block at a world coordinate, looked up in its home
    /// chunk. Boundary ghosts in neighboring chunks never shadow it.
    pub fn block_at(&self, x: i32, y: i32, z: i32) -> Option<i32> {
        let key = (chunked(x), chunked(z), x, y, z);
        self.tables.blocks.get(&key).map(|cell| cell.w)
    }

    pub fn blocks_after(&self, p: i32, q: i32, after: u64) -> Vec<(i32, i32, i32, Cell)> {
        self.tables.blocks.rows_after(p, q, after)
    }

    /// The attachment table behind a decoration kind.
    fn table(&self, kind: Decoration) -> &CellTable {
        match kind {
            Decoration::Extra => &self.tables.extras,
            Decoration::Light => &self.tables.lights,
            Decoration::Shape => &self.tables.shapes,
            Decoration::Transform => &self.tables.transforms,
        }
    }

    fn table_mut(&mut self, kind: Decoration) -> &mut CellTable {
        match kind {
            Decoration::Extra => &mut self.tables.extras,
            Decoration::Light => &mut self.tables.lights,
            Decoration::Shape => &mut self.tables.shapes,
            Decoration::Transform => &mut self.tables.transforms,
        }
    }

    pub fn set_decoration(
        &mut self,
        kind: Decoration,
        p: i32,
        q: i32,
        x: i32,
        y: i32,
        z: i32,
        w: i32,
    ) -> u64 {
        self.dirty = true;
        self.table_mut(kind).upsert((p, q, x, y, z), w)
    }

    pub fn decoration_at(&self, kind: Decoration, x: i32, y: i32, z: i32) -> Option<i32> {
        let key = (chunked(x), chunked(z), x, y, z);
        self.table(kind).get(&key).map(|cell| cell.w)
    }

    pub fn decorations_after(
        &self,
        kind: Decoration,
        p: i32,
        q: i32,
        after: u64,
    ) -> Vec<(i32, i32, i32, Cell)> {
        self.table(kind).rows_after(p, q, after)
    }

    /// Removes everything riding on a block that was just cleared: signs
    /// are deleted outright, attachment cells are zeroed in place.
    pub fn clear_attachments(&mut self, x: i32, y: i32, z: i32) {
        self.dirty = true;
        self.tables
            .signs
            .retain(|key, _| !(key.0 == x && key.1 == y && key.2 == z));
        self.tables.extras.zero_at(x, y, z);
        self.tables.lights.zero_at(x, y, z);
        self.tables.shapes.zero_at(x, y, z);
        self.tables.transforms.zero_at(x, y, z);
    }

    pub fn set_sign(&mut self, p: i32, q: i32, x: i32, y: i32, z: i32, face: i32, text: &str) {
        self.dirty = true;
        self.tables.signs.insert(
            (x, y, z, face),
            SignRow {
                p,
                q,
                text: text.to_string(),
            },
        );
    }

    pub fn delete_sign(&mut self, x: i32, y: i32, z: i32, face: i32) {
        if self.tables.signs.remove(&(x, y, z, face)).is_some() {
            self.dirty = true;
        }
    }

    /// Signs in a chunk, ordered by coordinate for stable replies.
    pub fn signs_in(&self, p: i32, q: i32) -> Vec<(i32, i32, i32, i32, String)> {
        let mut rows: Vec<_> = self
            .tables
            .signs
            .iter()
            .filter(|(_, row)| row.p == p && row.q == q)
            .map(|(key, row)| (key.0, key.1, key.2, key.3, row.text.clone()))
            .collect();
        rows.sort();
        rows
    }

    pub fn set_option(&mut self, name: &str, value: &str) {
        self.dirty = true;
        self.tables
            .options
            .insert(name.to_string(), value.to_string());
    }

    pub fn option(&self, name: &str) -> Option<&str> {
        self.tables.options.get(name).map(String::as_str)
    }

    pub fn options(&self) -> impl Iterator<Item = (&str, &str)> {
        self.tables
            .options
            .iter()
            .map(|(name, value)| (name.as_str(), value.as_str()))
    }

    pub fn record_history(&mut self, row: HistoryRow) {
        self.dirty = true;
        self.tables.history.push(row);
    }

    pub fn history(&self) -> &[HistoryRow] {
        &self.tables.history
    }

    /// Deletes block rows that a fresh generator run would recreate, plus
    /// rows whose generated value could never have been destroyed. Rows
    /// are judged by their home chunk, and a condemned coordinate takes
    /// its boundary ghosts with it. The most recently placed block is
    /// left alone. Returns the number of rows removed.
    pub fn cleanup(&mut self, generator: &dyn Generator, indestructible: &HashSet<i32>) -> usize {
        let last = self
            .tables
            .blocks
            .rows
            .iter()
            .max_by_key(|(_, cell)| cell.id)
            .map(|(key, _)| (key.2, key.3, key.4));
        let mut doomed = HashSet::new();
        for (key, cell) in &self.tables.blocks.rows {
            let (p, q, x, y, z) = *key;
            if chunked(x) != p || chunked(z) != q {
                continue; // boundary ghost, owned by the real row
            }
            if Some((x, y, z)) == last {
                continue;
            }
            let natural = generator.default_block(x, y, z);
            if cell.w == natural || indestructible.contains(&natural) {
                doomed.insert((x, y, z));
            }
        }
        let before = self.tables.blocks.rows.len();
        self.tables
            .blocks
            .rows
            .retain(|key, _| !doomed.contains(&(key.2, key.3, key.4)));
        let removed = before - self.tables.blocks.rows.len();
        if removed > 0 {
            self.dirty = true;
        }
        removed
    }
}
