//! Default terrain generation.
//!
//! The store only holds player edits. Everything else is derived on demand
//! from a [`Generator`]: block validation asks it what was at a coordinate
//! before anyone touched it, and the cleanup tool asks it which stored rows
//! are redundant. Networked clients usually run their own worldgen, so the
//! default generator is an empty world.

use noise::{NoiseFn, Perlin};
use shared::CHUNK_SIZE;
use std::collections::HashMap;

use crate::config::Config;
use crate::store::Store;

pub const EMPTY: i32 = 0;
pub const GRASS: i32 = 1;
pub const SAND: i32 = 2;
pub const WOOD: i32 = 5;
pub const LEAVES: i32 = 15;
pub const CLOUD: i32 = 16;
pub const TALL_GRASS: i32 = 17;
pub const YELLOW_FLOWER: i32 = 18;

/// Height of the flattened sand floor.
const FLOOR: i32 = 12;
/// No hill, trunk or canopy reaches this height; only clouds sit above.
const TERRAIN_CEILING: i32 = 56;
/// Clouds occupy this slab of sky, well above the tallest terrain.
const CLOUD_BAND: std::ops::Range<i32> = 64..72;

/// Feature toggles read from the world options table at startup.
#[derive(Debug, Clone, Copy)]
pub struct WorldOptions {
    pub show_clouds: bool,
    pub show_plants: bool,
    pub show_trees: bool,
}

impl Default for WorldOptions {
    fn default() -> Self {
        Self {
            show_clouds: true,
            show_plants: true,
            show_trees: true,
        }
    }
}

impl WorldOptions {
    pub fn from_store(store: &Store) -> WorldOptions {
        WorldOptions {
            show_clouds: flag(store, "show-clouds", true),
            show_plants: flag(store, "show-plants", true),
            show_trees: flag(store, "show-trees", true),
        }
    }
}

fn flag(store: &Store, name: &str, default: bool) -> bool {
    match store.option(name) {
        Some(value) => value.parse::<i32>().map(|v| v != 0).unwrap_or(default),
        None => default,
    }
}

/// The world as it exists before anyone edits it.
pub trait Generator: Send {
    /// Default item at a single world coordinate.
    fn default_block(&self, x: i32, y: i32, z: i32) -> i32;

    /// Every non-empty default cell in chunk `(p, q)`. Must agree with
    /// `default_block` for each coordinate it covers.
    fn create_chunk(&self, p: i32, q: i32) -> HashMap<(i32, i32, i32), i32>;
}

/// Serves an untouched world that is all air. This is the default for
/// networked play, where clients generate scenery locally and the server
/// only arbitrates edits.
pub struct EmptyGenerator;

impl Generator for EmptyGenerator {
    fn default_block(&self, _x: i32, _y: i32, _z: i32) -> i32 {
        EMPTY
    }

    fn create_chunk(&self, _p: i32, _q: i32) -> HashMap<(i32, i32, i32), i32> {
        HashMap::new()
    }
}

/// Fractal-noise terrain for servers that own their world: rolling grass
/// hills over a sand floor, with optional plants, trees and clouds.
///
/// Deterministic for a given seed, which is what the cleanup tool relies
/// on: the same seed must describe the same pristine world across runs.
pub struct TerrainGenerator {
    noise: Perlin,
    options: WorldOptions,
}

impl TerrainGenerator {
    pub fn new(seed: u32, options: WorldOptions) -> Self {
        Self {
            noise: Perlin::new(seed),
            options,
        }
    }

    /// Octave-summed 2D noise, normalized to [0, 1].
    fn fractal2(&self, x: f64, z: f64, octaves: u32, persistence: f64, lacunarity: f64) -> f64 {
        let mut frequency = 1.0;
        let mut amplitude = 1.0;
        let mut total = 0.0;
        let mut max = 0.0;
        for _ in 0..octaves {
            total += self.noise.get([x * frequency, z * frequency]) * amplitude;
            max += amplitude;
            amplitude *= persistence;
            frequency *= lacunarity;
        }
        (total / max + 1.0) / 2.0
    }

    /// 3D counterpart of `fractal2`, used for clouds.
    fn fractal3(
        &self,
        x: f64,
        y: f64,
        z: f64,
        octaves: u32,
        persistence: f64,
        lacunarity: f64,
    ) -> f64 {
        let mut frequency = 1.0;
        let mut amplitude = 1.0;
        let mut total = 0.0;
        let mut max = 0.0;
        for _ in 0..octaves {
            total += self
                .noise
                .get([x * frequency, y * frequency, z * frequency])
                * amplitude;
            max += amplitude;
            amplitude *= persistence;
            frequency *= lacunarity;
        }
        (total / max + 1.0) / 2.0
    }

    /// Ground column at (x, z): surface height and surface item. Columns
    /// that would dip below the floor are flattened into sand flats.
    fn column(&self, x: i32, z: i32) -> (i32, i32) {
        let f = self.fractal2(x as f64 * 0.01, z as f64 * 0.01, 4, 0.5, 2.0);
        let g = self.fractal2(-(x as f64) * 0.01, -(z as f64) * 0.01, 2, 0.9, 2.0);
        let mh = (g * 32.0 + 16.0) as i32;
        let h = (f * mh as f64) as i32;
        if h <= FLOOR {
            (FLOOR, SAND)
        } else {
            (h, GRASS)
        }
    }

    /// Whether a tree trunk grows at (x, z). Trunks only spawn well inside
    /// their chunk so no canopy ever straddles a chunk boundary; that keeps
    /// point queries and whole-chunk generation in agreement.
    fn tree_at(&self, x: i32, z: i32) -> bool {
        if !self.options.show_trees {
            return false;
        }
        let lx = x.rem_euclid(CHUNK_SIZE);
        let lz = z.rem_euclid(CHUNK_SIZE);
        if !(4..CHUNK_SIZE - 4).contains(&lx) || !(4..CHUNK_SIZE - 4).contains(&lz) {
            return false;
        }
        self.fractal2(x as f64 * 0.31, z as f64 * 0.31, 6, 0.5, 2.0) > 0.67
    }

    fn cell(&self, x: i32, y: i32, z: i32) -> i32 {
        if y < 0 {
            return EMPTY;
        }
        let (h, w) = self.column(x, z);
        if y < h {
            return w;
        }
        if self.tree_at(x, z) && y >= h && y < h + 7 {
            return WOOD;
        }
        if self.options.show_trees {
            for tx in (x - 3)..=(x + 3) {
                for tz in (z - 3)..=(z + 3) {
                    if !self.tree_at(tx, tz) {
                        continue;
                    }
                    let (th, _) = self.column(tx, tz);
                    if y < th + 3 || y >= th + 8 {
                        continue;
                    }
                    let d = (x - tx).pow(2) + (z - tz).pow(2) + (y - (th + 4)).pow(2);
                    if d < 11 {
                        return LEAVES;
                    }
                }
            }
        }
        if y == h && w == GRASS && self.options.show_plants {
            let flower = self.fractal2(x as f64 * 0.05, -(z as f64) * 0.05, 4, 0.8, 2.0);
            if flower > 0.6 {
                let variety = self.fractal2(x as f64 * 0.13, z as f64 * 0.13, 4, 0.8, 2.0);
                return YELLOW_FLOWER + (variety * 6.0) as i32;
            }
            let grass = self.fractal2(-(x as f64) * 0.11, z as f64 * 0.11, 4, 0.8, 2.0);
            if grass > 0.55 {
                return TALL_GRASS;
            }
        }
        if self.options.show_clouds && CLOUD_BAND.contains(&y) {
            let v = self.fractal3(
                x as f64 * 0.01,
                y as f64 * 0.1,
                z as f64 * 0.01,
                8,
                0.5,
                2.0,
            );
            if v > 0.65 {
                return CLOUD;
            }
        }
        EMPTY
    }
}

impl Generator for TerrainGenerator {
    fn default_block(&self, x: i32, y: i32, z: i32) -> i32 {
        self.cell(x, y, z)
    }

    fn create_chunk(&self, p: i32, q: i32) -> HashMap<(i32, i32, i32), i32> {
        let mut cells = HashMap::new();
        let top = if self.options.show_clouds {
            CLOUD_BAND.end
        } else {
            TERRAIN_CEILING
        };
        for x in p * CHUNK_SIZE..(p + 1) * CHUNK_SIZE {
            for z in q * CHUNK_SIZE..(q + 1) * CHUNK_SIZE {
                for y in 0..top {
                    let w = self.cell(x, y, z);
                    if w != EMPTY {
                        cells.insert((x, y, z), w);
                    }
                }
            }
        }
        cells
    }
}

/// Generator for the configured world: seeded terrain, or the default
/// empty world where clients generate their own scenery.
pub fn generator_for(config: &Config, store: &Store) -> Box<dyn Generator> {
    match config.seed {
        Some(seed) => Box::new(TerrainGenerator::new(seed, WorldOptions::from_store(store))),
        None => Box::new(EmptyGenerator),
    }
}
