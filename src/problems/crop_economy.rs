//! Crop economy problem.
//!
//! Tunes crop economics and market settings so that one season of play is
//! balanced. The simulator plays a greedy farmer: every day it grows and
//! waters what is planted (rain waters for free), harvests ripe crops, sells
//! everything at the day's fluctuating price, and replants each free plot
//! with the affordable crop that has the best profit per day and still
//! ripens before the season ends.
//!
//! ## Quality criteria
//!
//! | Metric                  | Target           |
//! |-------------------------|------------------|
//! | `crop_margin`           | every crop > 0   |
//! | `crop_dominance`        | best/second <= 1.6 profit per day |
//! | `progression_inversion` | pricier seeds never earn less per harvest |
//! | `season_growth`         | 3x – 25x starting money |
//! | `first_income_day`      | by day 5         |
//! | `bankrupt`              | never            |

use std::collections::BTreeMap;

use anyhow::{Context, bail};
use once_cell::sync::Lazy;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use serde_json::json;

use super::{Problem, ProblemKind};
use crate::oracle::{EvalPlan, SimMode};
use crate::patch::{Field, Schema};
use crate::prompt::PromptBrief;
use crate::types::{FailureRecord, ParameterSet, Trial};

/// Tillable plots available to the simulated farmer.
pub const PLOTS: usize = 24;
/// Watering actions per dry day.
pub const WATER_BUDGET: u32 = 30;
const RAIN_CHANCE: f64 = 0.2;
const MAX_DOMINANCE: f64 = 1.6;
const GROWTH_BAND: (f64, f64) = (3.0, 25.0);
const FIRST_INCOME_BY: u32 = 5;

const SEEDS: &[u64] = &[1, 2, 3, 4];

static SCHEMA: Lazy<Schema> = Lazy::new(|| {
    Schema::new(vec![
        Field::int("start_money", 50, 5000, "coins at the start of the season"),
        Field::int("days_per_season", 7, 56, "length of the simulated season"),
        Field::boolean("price_fluctuation", "whether sell prices move day to day"),
        Field::float("fluctuation_amount", 0.0, 0.5, "max daily price swing as a fraction"),
        Field::float("bulk_bonus", 1.0, 1.5, "price multiplier when selling a large batch"),
        Field::int("bulk_threshold", 2, 50, "units of one crop that count as a large batch"),
        Field::table(
            "crops",
            vec![
                Field::int("grow_days", 1, 30, "days from planting to harvest"),
                Field::int("water_needs", 1, 3, "watering actions per dry day"),
                Field::int("sell_price", 1, 500, "coins per harvested unit"),
                Field::int("seed_cost", 1, 250, "coins per planting"),
                Field::int("harvest_yield", 1, 5, "units per harvest"),
            ],
            "one entry per crop; crops cannot be added or removed",
        ),
    ])
});

const BRIEF: PromptBrief = PromptBrief {
    title: "Crop economy balancing",
    goal: "Balance the crop economy of a farming game so a season of greedy play grows the \
           farmer's money steadily: every crop worth planting, no single crop dominating, \
           pricier seeds paying off more per harvest, and early income.",
    tips: &[
        "Profit per day is (sell_price * harvest_yield - seed_cost) / grow_days; the farmer always plants the best one it can afford.",
        "Watering is limited: 30 actions per dry day across 24 plots. Needy crops stall when the budget runs out.",
        "Growth is measured as final money / start_money.",
    ],
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropConfig {
    pub grow_days: u32,
    pub water_needs: u32,
    pub sell_price: u32,
    pub seed_cost: u32,
    pub harvest_yield: u32,
}

impl CropConfig {
    pub fn margin(&self) -> i64 {
        (self.sell_price * self.harvest_yield) as i64 - self.seed_cost as i64
    }

    pub fn profit_per_day(&self) -> f64 {
        self.margin() as f64 / self.grow_days.max(1) as f64
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EconomyParams {
    pub start_money: u32,
    pub days_per_season: u32,
    pub price_fluctuation: bool,
    pub fluctuation_amount: f64,
    pub bulk_bonus: f64,
    pub bulk_threshold: u32,
    pub crops: BTreeMap<String, CropConfig>,
}

#[derive(Debug, Clone)]
struct Planting {
    crop: String,
    days_grown: u32,
}

/// What happened over one simulated season.
#[derive(Debug, Clone, Default)]
pub struct SeasonReport {
    pub final_money: f64,
    pub first_income_day: Option<u32>,
    pub bankrupt_day: Option<u32>,
    pub harvested: BTreeMap<String, u32>,
}

/// Play one season with the greedy farmer.
pub fn run_season(params: &EconomyParams, seed: u64) -> SeasonReport {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut money = params.start_money as f64;
    let mut plots: Vec<Option<Planting>> = vec![None; PLOTS];
    let mut report = SeasonReport::default();
    let cheapest_seed = params.crops.values().map(|c| c.seed_cost).min().unwrap_or(0) as f64;

    for day in 0..params.days_per_season {
        let rain = rng.gen::<f64>() < RAIN_CHANCE;
        let multipliers: BTreeMap<&str, f64> = params
            .crops
            .keys()
            .map(|name| {
                let m = if params.price_fluctuation {
                    1.0 + (rng.gen::<f64>() - 0.5) * 2.0 * params.fluctuation_amount
                } else {
                    1.0
                };
                (name.as_str(), m)
            })
            .collect();

        // Grow and harvest
        let mut budget = WATER_BUDGET;
        let mut inventory: BTreeMap<String, u32> = BTreeMap::new();
        for plot in plots.iter_mut() {
            let Some(planting) = plot else { continue };
            let Some(cfg) = params.crops.get(&planting.crop) else {
                *plot = None;
                continue;
            };
            if rain {
                planting.days_grown += 1;
            } else if budget >= cfg.water_needs {
                budget -= cfg.water_needs;
                planting.days_grown += 1;
            }
            if planting.days_grown >= cfg.grow_days {
                *inventory.entry(planting.crop.clone()).or_default() += cfg.harvest_yield;
                *report.harvested.entry(planting.crop.clone()).or_default() += cfg.harvest_yield;
                *plot = None;
            }
        }

        // Sell everything
        for (name, qty) in &inventory {
            let cfg = &params.crops[name];
            let bonus = if *qty >= params.bulk_threshold { params.bulk_bonus } else { 1.0 };
            let earned = (cfg.sell_price as f64 * multipliers[name.as_str()] * *qty as f64 * bonus).round();
            if earned > 0.0 && report.first_income_day.is_none() {
                report.first_income_day = Some(day);
            }
            money += earned;
        }

        // Replant
        let days_left = params.days_per_season - day - 1;
        for plot in plots.iter_mut().filter(|p| p.is_none()) {
            let choice = params
                .crops
                .iter()
                .filter(|(_, c)| c.margin() > 0 && c.grow_days <= days_left && c.seed_cost as f64 <= money)
                .max_by(|a, b| a.1.profit_per_day().total_cmp(&b.1.profit_per_day()));
            let Some((name, cfg)) = choice else { break };
            money -= cfg.seed_cost as f64;
            *plot = Some(Planting { crop: name.clone(), days_grown: 0 });
        }

        let idle = plots.iter().all(Option::is_none);
        if idle && money < cheapest_seed && report.bankrupt_day.is_none() {
            report.bankrupt_day = Some(day);
        }
    }

    report.final_money = money;
    report
}

/// Play the season for `seed` and score the economy.
pub fn simulate(params: &ParameterSet, seed: u64) -> anyhow::Result<Trial> {
    let params: EconomyParams = serde_json::from_value(params.as_value().clone())
        .context("parameters do not match the crop_economy shape")?;
    if params.crops.is_empty() {
        bail!("no crops configured");
    }

    let mut failures = Vec::new();
    let mut scores = Vec::with_capacity(6);

    // Margins
    let unprofitable: Vec<_> = params.crops.iter().filter(|(_, c)| c.margin() <= 0).collect();
    for (name, cfg) in &unprofitable {
        failures.push(FailureRecord::new(
            "crop_margin",
            cfg.margin() as f64,
            format!(
                "{} loses money: sells {} x {} for a seed costing {}",
                name, cfg.harvest_yield, cfg.sell_price, cfg.seed_cost
            ),
        ));
    }
    scores.push(1.0 - unprofitable.len() as f64 / params.crops.len() as f64);

    // Dominance
    let mut ranked: Vec<(&String, f64)> = params
        .crops
        .iter()
        .filter(|(_, c)| c.margin() > 0)
        .map(|(n, c)| (n, c.profit_per_day()))
        .collect();
    ranked.sort_by(|a, b| b.1.total_cmp(&a.1));
    let dominance = match ranked.as_slice() {
        [(_, best), (_, second), ..] => best / second,
        _ => f64::INFINITY,
    };
    if dominance > MAX_DOMINANCE {
        let leader = ranked.first().map(|(n, _)| n.as_str()).unwrap_or("none");
        failures.push(FailureRecord::new(
            "crop_dominance",
            if dominance.is_finite() { dominance } else { 0.0 },
            format!(
                "{} earns {:.2}x the profit per day of the runner-up (max {}); the farmer will plant nothing else",
                leader, dominance, MAX_DOMINANCE
            ),
        ));
    }
    scores.push(if dominance.is_finite() {
        (1.0 - (dominance - MAX_DOMINANCE).max(0.0) / MAX_DOMINANCE).max(0.0)
    } else {
        0.0
    });

    // Progression
    let mut by_cost: Vec<(&String, &CropConfig)> = params.crops.iter().collect();
    by_cost.sort_by_key(|(_, c)| c.seed_cost);
    let mut pairs = 0usize;
    let mut inversions = 0usize;
    for i in 0..by_cost.len() {
        for j in i + 1..by_cost.len() {
            let (cheap_name, cheap) = by_cost[i];
            let (dear_name, dear) = by_cost[j];
            if cheap.seed_cost == dear.seed_cost {
                continue;
            }
            pairs += 1;
            if dear.margin() < cheap.margin() {
                inversions += 1;
                failures.push(FailureRecord::new(
                    "progression_inversion",
                    (cheap.margin() - dear.margin()) as f64,
                    format!(
                        "{} (seed {}) earns {} per harvest, less than {} (seed {}) at {}",
                        dear_name, dear.seed_cost, dear.margin(), cheap_name, cheap.seed_cost, cheap.margin()
                    ),
                ));
            }
        }
    }
    scores.push(if pairs == 0 { 1.0 } else { 1.0 - inversions as f64 / pairs as f64 });

    let report = run_season(&params, seed);

    // Growth
    let growth = report.final_money / params.start_money.max(1) as f64;
    let (lo, hi) = GROWTH_BAND;
    if growth < lo || growth > hi {
        failures.push(FailureRecord::new(
            "season_growth",
            growth,
            format!(
                "seed {}: money went from {} to {:.0} ({:.1}x, target {}x to {}x)",
                seed, params.start_money, report.final_money, growth, lo, hi
            ),
        ));
    }
    scores.push(if growth < lo {
        (growth / lo).max(0.0)
    } else if growth > hi {
        (1.0 - (growth - hi) / hi).max(0.0)
    } else {
        1.0
    });

    // Early income
    match report.first_income_day {
        Some(day) if day <= FIRST_INCOME_BY => scores.push(1.0),
        Some(day) => {
            failures.push(FailureRecord::new(
                "first_income_day",
                day as f64,
                format!("seed {}: first sale on day {} (target by day {})", seed, day, FIRST_INCOME_BY),
            ));
            scores.push((1.0 - (day - FIRST_INCOME_BY) as f64 / params.days_per_season as f64).max(0.0));
        }
        None => {
            failures.push(FailureRecord::new(
                "first_income_day",
                params.days_per_season as f64,
                format!("seed {}: nothing was ever sold", seed),
            ));
            scores.push(0.0);
        }
    }

    // Bankruptcy
    if let Some(day) = report.bankrupt_day {
        failures.push(FailureRecord::new(
            "bankrupt",
            day as f64,
            format!("seed {}: on day {} the farmer had nothing planted and could not afford any seed", seed, day),
        ));
        scores.push(0.0);
    } else {
        scores.push(1.0);
    }

    let score = scores.iter().sum::<f64>() / scores.len() as f64;
    Ok(Trial { score, failures })
}

#[derive(Debug, Clone, Copy, Default)]
pub struct CropEconomy;

impl Problem for CropEconomy {
    fn kind(&self) -> ProblemKind {
        ProblemKind::CropEconomy
    }

    fn schema(&self) -> &Schema {
        &SCHEMA
    }

    fn plan(&self) -> EvalPlan {
        EvalPlan {
            mode: SimMode::CropEconomy,
            seeds: SEEDS,
            viability_threshold: 0.8,
        }
    }

    fn brief(&self) -> &PromptBrief {
        &BRIEF
    }

    fn initial_params(&self) -> ParameterSet {
        ParameterSet::new(json!({
            "start_money": 500,
            "days_per_season": 28,
            "price_fluctuation": true,
            "fluctuation_amount": 0.18,
            "bulk_bonus": 1.08,
            "bulk_threshold": 10,
            "crops": {
                "wheat":     {"grow_days": 3,  "water_needs": 1, "sell_price": 12, "seed_cost": 4,  "harvest_yield": 1},
                "carrot":    {"grow_days": 4,  "water_needs": 1, "sell_price": 22, "seed_cost": 8,  "harvest_yield": 1},
                "tomato":    {"grow_days": 6,  "water_needs": 2, "sell_price": 38, "seed_cost": 14, "harvest_yield": 1},
                "blueberry": {"grow_days": 8,  "water_needs": 1, "sell_price": 55, "seed_cost": 22, "harvest_yield": 1},
                "pumpkin":   {"grow_days": 14, "water_needs": 2, "sell_price": 90, "seed_cost": 35, "harvest_yield": 1}
            }
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(overrides: serde_json::Value) -> ParameterSet {
        let base = CropEconomy.initial_params();
        ParameterSet::new(crate::patch::merge(base.as_value(), overrides.as_object().unwrap()))
    }

    fn typed(p: &ParameterSet) -> EconomyParams {
        serde_json::from_value(p.as_value().clone()).unwrap()
    }

    #[test]
    fn test_initial_params_are_schema_valid() {
        assert!(CropEconomy.schema().check(CropEconomy.initial_params().as_value()).is_empty());
    }

    #[test]
    fn test_default_crops_have_healthy_structure() {
        let trial = simulate(&CropEconomy.initial_params(), 1).unwrap();
        for metric in ["crop_margin", "crop_dominance", "progression_inversion"] {
            assert!(!trial.failures.iter().any(|f| f.metric == metric), "{}", metric);
        }
    }

    #[test]
    fn test_season_is_deterministic_per_seed() {
        let p = typed(&CropEconomy.initial_params());
        let a = run_season(&p, 3);
        let b = run_season(&p, 3);
        assert_eq!(a.final_money, b.final_money);
        assert_eq!(a.harvested, b.harvested);
        assert!(a.first_income_day.is_some());
    }

    #[test]
    fn test_unprofitable_crop_is_reported() {
        let trial = simulate(&params(json!({"crops": {"wheat": {"seed_cost": 20}}})), 1).unwrap();
        let margin = trial.failures.iter().find(|f| f.metric == "crop_margin").unwrap();
        assert_eq!(margin.value, -8.0);
        assert!(margin.description.starts_with("wheat"));
    }

    #[test]
    fn test_dominant_crop_is_reported() {
        let trial = simulate(&params(json!({"crops": {"carrot": {"sell_price": 200}}})), 1).unwrap();
        assert!(trial.failures.iter().any(|f| f.metric == "crop_dominance"));
    }

    #[test]
    fn test_progression_inversion_is_reported() {
        let trial = simulate(&params(json!({"crops": {"pumpkin": {"sell_price": 40}}})), 1).unwrap();
        let inversions: Vec<_> = trial
            .failures
            .iter()
            .filter(|f| f.metric == "progression_inversion")
            .collect();
        assert!(!inversions.is_empty());
        assert!(inversions.iter().all(|f| f.description.starts_with("pumpkin")));
    }

    #[test]
    fn test_broke_farmer_goes_bankrupt() {
        let p = params(json!({
            "start_money": 50,
            "crops": {
                "wheat": {"seed_cost": 60},
                "carrot": {"seed_cost": 70},
                "tomato": {"seed_cost": 80},
                "blueberry": {"seed_cost": 90},
                "pumpkin": {"seed_cost": 100}
            }
        }));
        let report = run_season(&typed(&p), 1);
        assert_eq!(report.bankrupt_day, Some(0));
        assert!(report.first_income_day.is_none());

        let trial = simulate(&p, 1).unwrap();
        assert!(trial.failures.iter().any(|f| f.metric == "bankrupt"));
        assert!(trial.score < 0.8);
    }

    #[test]
    fn test_scores_are_bounded() {
        for seed in SEEDS {
            let trial = simulate(&CropEconomy.initial_params(), *seed).unwrap();
            assert!((0.0..=1.0).contains(&trial.score));
        }
    }
}
