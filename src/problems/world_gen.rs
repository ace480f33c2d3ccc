//! World generation problem.
//!
//! Tunes the densities that shape an 80x60 farm map: a value-noise forest
//! layer biased toward the edges, scattered rocks and wildflowers, rivers
//! that wander in from a random edge, round ponds, and a cleared starting
//! farm zone.
//!
//! ## Quality criteria
//!
//! | Metric               | Target            | Why it matters                        |
//! |----------------------|-------------------|---------------------------------------|
//! | `water_fraction`     | 4% – 15%          | enough for irrigation, not a swamp    |
//! | `tree_fraction`      | 10% – 35%         | framed map without a wall of forest   |
//! | `flower_fraction`    | 2% – 10%          | decoration, also tillable             |
//! | `open_land_fraction` | >= 45%            | room to expand the farm               |
//! | `farm_zone_overflow` | 0                 | the cleared zone must fit on the map  |
//! | `reachable_fraction` | >= 60%            | open land reachable from the farm     |
//!
//! Each criterion scores in [0, 1] (1 inside the band, linear falloff outside)
//! and a trial's score is their mean.

use std::collections::VecDeque;

use anyhow::Context;
use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::noise::{TileHasher, XorShift32};
use super::{Problem, ProblemKind};
use crate::oracle::{EvalPlan, SimMode};
use crate::patch::{Field, Schema};
use crate::prompt::PromptBrief;
use crate::types::{FailureRecord, ParameterSet, Trial};

pub const WIDTH: usize = 80;
pub const HEIGHT: usize = 60;

const SEEDS: &[u64] = &[42069, 1337, 7, 2024, 99];

static SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::new(vec![
        Field::float("tree_frequency", 0.0, 0.6, "share of the noise field that becomes forest"),
        Field::float("rock_frequency", 0.0, 0.1, "per-tile boulder probability on open grass"),
        Field::float("flower_frequency", 0.0, 0.2, "per-tile wildflower probability on open grass"),
        Field::int("river_count", 0, 5, "rivers entering from a random edge"),
        Field::int("pond_count", 0, 10, "round ponds of radius 2-5"),
        Field::record(
            "farm_zone",
            vec![
                Field::int("x", 0, WIDTH as i64 - 1, "left edge (tile)"),
                Field::int("y", 0, HEIGHT as i64 - 1, "top edge (tile)"),
                Field::int("w", 8, 40, "width in tiles"),
                Field::int("h", 8, 30, "height in tiles"),
            ],
            "",
        ),
    ])
});

const BRIEF: PromptBrief = PromptBrief {
    title: "World generation tuning",
    goal: "Adjust the world generation parameters of an 80x60 tile farming map so that generated \
           worlds are balanced across all evaluation seeds: some water, a forest frame, room to \
           farm, and open land that is reachable from the farm zone.",
    tips: &[
        "Rivers are three tiles wide and cross most of the map; each one adds roughly 4-5% water and can cut the map in two.",
        "tree_frequency is a threshold on smooth noise; small changes have large effects.",
        "The farm zone must satisfy x + w <= 80 and y + h <= 60.",
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FarmZone {
    pub x: i64,
    pub y: i64,
    pub w: i64,
    pub h: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorldGenParams {
    pub tree_frequency: f64,
    pub rock_frequency: f64,
    pub flower_frequency: f64,
    pub river_count: u32,
    pub pond_count: u32,
    pub farm_zone: FarmZone,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tile {
    Grass,
    Flower,
    Tree,
    Rock,
    Water,
}

impl Tile {
    pub fn is_walkable(self) -> bool {
        matches!(self, Tile::Grass | Tile::Flower)
    }
}

pub struct World {
    tiles: Vec<Tile>,
}

impl World {
    fn filled(tile: Tile) -> Self {
        Self { tiles: vec![tile; WIDTH * HEIGHT] }
    }

    pub fn get(&self, x: usize, y: usize) -> Tile {
        self.tiles[y * WIDTH + x]
    }

    fn set(&mut self, x: i64, y: i64, tile: Tile) {
        if in_bounds(x, y) {
            self.tiles[y as usize * WIDTH + x as usize] = tile;
        }
    }

    pub fn fraction(&self, tile: Tile) -> f64 {
        self.tiles.iter().filter(|&&t| t == tile).count() as f64 / self.tiles.len() as f64
    }

    pub fn walkable_count(&self) -> usize {
        self.tiles.iter().filter(|t| t.is_walkable()).count()
    }

    /// Walkable tiles reachable from `(x, y)` by 4-neighbour moves.
    pub fn reachable_from(&self, x: usize, y: usize) -> usize {
        if !self.get(x, y).is_walkable() {
            return 0;
        }
        let mut seen = vec![false; self.tiles.len()];
        let mut queue = VecDeque::from([(x, y)]);
        seen[y * WIDTH + x] = true;
        let mut count = 0;
        while let Some((cx, cy)) = queue.pop_front() {
            count += 1;
            let neighbours = [
                (cx.wrapping_sub(1), cy),
                (cx + 1, cy),
                (cx, cy.wrapping_sub(1)),
                (cx, cy + 1),
            ];
            for (nx, ny) in neighbours {
                if nx >= WIDTH || ny >= HEIGHT {
                    continue;
                }
                let idx = ny * WIDTH + nx;
                if !seen[idx] && self.tiles[idx].is_walkable() {
                    seen[idx] = true;
                    queue.push_back((nx, ny));
                }
            }
        }
        count
    }
}

fn in_bounds(x: i64, y: i64) -> bool {
    x >= 0 && y >= 0 && (x as usize) < WIDTH && (y as usize) < HEIGHT
}

/// Generate one world. Same params and seed always give the same map.
pub fn generate(params: &WorldGenParams, seed: u64) -> World {
    let hasher = TileHasher::new(seed);
    let mut world = World::filled(Tile::Grass);
    let (w, h) = (WIDTH as i64, HEIGHT as i64);

    // Forest layer, denser toward the map edge
    for y in 0..h {
        for x in 0..w {
            let n = hasher.value_noise(x, y, 6.0);
            let edge_dist = x.min(y).min(w - 1 - x).min(h - 1 - y);
            let edge_bias = if edge_dist < 5 { (5 - edge_dist) as f64 / 5.0 } else { 0.0 };
            if n + edge_bias * 0.4 > 1.0 - params.tree_frequency {
                world.set(x, y, Tile::Tree);
            }
        }
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            if world.get(x as usize, y as usize) == Tile::Grass && hasher.tile(x, y, 1) < params.rock_frequency {
                world.set(x, y, Tile::Rock);
            }
        }
    }

    for y in 1..h - 1 {
        for x in 1..w - 1 {
            if world.get(x as usize, y as usize) == Tile::Grass && hasher.tile(x, y, 2) < params.flower_frequency {
                world.set(x, y, Tile::Flower);
            }
        }
    }

    let mut rng = XorShift32::new((seed as u32).wrapping_add(100));
    for _ in 0..params.river_count {
        carve_river(&mut world, &mut rng);
    }

    let mut rng = XorShift32::new((seed as u32).wrapping_add(200));
    for _ in 0..params.pond_count {
        let px = 5 + rng.below(WIDTH - 10) as i64;
        let py = 5 + rng.below(HEIGHT - 10) as i64;
        let size = 2 + rng.below(4) as i64;
        for dy in -size..=size {
            for dx in -size..=size {
                let radius = (size * size) as f64 * (0.6 + rng.next_f64() * 0.4);
                if ((dx * dx + dy * dy) as f64) <= radius {
                    world.set(px + dx, py + dy, Tile::Water);
                }
            }
        }
    }

    let zone = params.farm_zone;
    for y in zone.y..zone.y + zone.h {
        for x in zone.x..zone.x + zone.w {
            world.set(x, y, Tile::Grass);
        }
    }

    world
}

fn carve_river(world: &mut World, rng: &mut XorShift32) {
    let (w, h) = (WIDTH as i64, HEIGHT as i64);
    let (mut rx, mut ry, mut dir_x, mut dir_y) = match rng.below(4) {
        0 => (rng.below(WIDTH) as i64, 0, 0, 1),
        1 => (w - 1, rng.below(HEIGHT) as i64, -1, 0),
        2 => (rng.below(WIDTH) as i64, h - 1, 0, -1),
        _ => (0, rng.below(HEIGHT) as i64, 1, 0),
    };

    for _ in 0..(w + h) {
        if !in_bounds(rx, ry) {
            break;
        }
        for offset in -1..=1 {
            let wx = rx + if dir_y != 0 { offset } else { 0 };
            let wy = ry + if dir_x != 0 { offset } else { 0 };
            world.set(wx, wy, Tile::Water);
        }

        if rng.next_f64() < 0.3 {
            rx += dir_x;
            let jitter = if rng.coin() { -1 } else { 1 };
            if dir_x == 0 {
                rx += jitter;
            } else {
                ry += jitter;
            }
        } else {
            rx += dir_x;
            ry += dir_y;
        }

        if rng.next_f64() < 0.15 {
            let (old_x, old_y) = (dir_x, dir_y);
            dir_x = old_y * if rng.coin() { 1 } else { -1 };
            dir_y = old_x * if rng.coin() { 1 } else { -1 };
        }
    }
}

/// Score inside `[lo, hi]` is 1, falling linearly to 0 one band-width outside.
fn band(value: f64, lo: f64, hi: f64) -> f64 {
    let width = (hi - lo).max(f64::EPSILON);
    let dist = if value < lo {
        lo - value
    } else if value > hi {
        value - hi
    } else {
        0.0
    };
    (1.0 - dist / width).max(0.0)
}

fn pct(v: f64) -> String {
    format!("{:.1}%", v * 100.0)
}

/// Generate the world for `seed` and score it.
pub fn simulate(params: &ParameterSet, seed: u64) -> anyhow::Result<Trial> {
    let params: WorldGenParams = serde_json::from_value(params.as_value().clone())
        .context("parameters do not match the world_gen shape")?;
    let world = generate(&params, seed);
    let mut scores = Vec::with_capacity(6);
    let mut failures = Vec::new();

    let mut banded = |metric: &str, value: f64, lo: f64, hi: f64, advice: &str| {
        let s = band(value, lo, hi);
        if s < 1.0 {
            failures.push(FailureRecord::new(
                metric,
                value,
                format!(
                    "seed {}: {} is {} (target {} to {}); {}",
                    seed,
                    metric,
                    pct(value),
                    pct(lo),
                    pct(hi),
                    advice
                ),
            ));
        }
        scores.push(s);
    };

    let water = world.fraction(Tile::Water);
    banded(
        "water_fraction",
        water,
        0.04,
        0.15,
        if water > 0.15 { "fewer rivers or ponds" } else { "add a river or ponds" },
    );

    let trees = world.fraction(Tile::Tree);
    banded(
        "tree_fraction",
        trees,
        0.10,
        0.35,
        if trees > 0.35 { "lower tree_frequency" } else { "raise tree_frequency" },
    );

    let flowers = world.fraction(Tile::Flower);
    banded(
        "flower_fraction",
        flowers,
        0.02,
        0.10,
        if flowers > 0.10 { "lower flower_frequency" } else { "raise flower_frequency" },
    );

    let total = (WIDTH * HEIGHT) as f64;
    let open = world.walkable_count() as f64 / total;
    banded("open_land_fraction", open, 0.45, 1.0, "reduce trees, rocks or water");

    let zone = params.farm_zone;
    let overflow_x = (zone.x + zone.w - WIDTH as i64).max(0);
    let overflow_y = (zone.y + zone.h - HEIGHT as i64).max(0);
    let inside = (zone.w - overflow_x) * (zone.h - overflow_y);
    let outside = 1.0 - inside as f64 / (zone.w * zone.h) as f64;
    if outside > 0.0 {
        failures.push(FailureRecord::new(
            "farm_zone_overflow",
            outside,
            format!(
                "farm zone {}x{} at ({}, {}) leaves the {}x{} map; {} of it is cut off",
                zone.w, zone.h, zone.x, zone.y, WIDTH, HEIGHT, pct(outside)
            ),
        ));
    }
    scores.push(1.0 - outside);

    let cx = (zone.x + zone.w / 2).clamp(0, WIDTH as i64 - 1) as usize;
    let cy = (zone.y + zone.h / 2).clamp(0, HEIGHT as i64 - 1) as usize;
    let walkable = world.walkable_count().max(1) as f64;
    let reachable = world.reachable_from(cx, cy) as f64 / walkable;
    if reachable < 0.6 {
        failures.push(FailureRecord::new(
            "reachable_fraction",
            reachable,
            format!(
                "seed {}: only {} of open land is reachable from the farm zone centre; \
                 rivers or forest split the map",
                seed,
                pct(reachable)
            ),
        ));
    }
    scores.push((reachable / 0.6).min(1.0));

    let score = scores.iter().sum::<f64>() / scores.len() as f64;
    Ok(Trial { score, failures })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct WorldGen;

impl Problem for WorldGen {
    fn kind(&self) -> ProblemKind {
        ProblemKind::WorldGen
    }

    fn schema(&self) -> &Schema {
        &SCHEMA
    }

    fn plan(&self) -> EvalPlan {
        EvalPlan {
            mode: SimMode::WorldGen,
            seeds: SEEDS,
            viability_threshold: 0.85,
        }
    }

    fn brief(&self) -> &PromptBrief {
        &BRIEF
    }

    fn initial_params(&self) -> ParameterSet {
        ParameterSet::new(json!({
            "tree_frequency": 0.25,
            "rock_frequency": 0.015,
            "flower_frequency": 0.06,
            "river_count": 2,
            "pond_count": 4,
            "farm_zone": {"x": 27, "y": 20, "w": 26, "h": 20}
        }))
    }
}
