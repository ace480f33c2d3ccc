use std::time::Instant;

use super::{SimMode, Simulator};
use crate::problems::{crop_economy, world_gen};
use crate::types::{ParameterSet, Trial};

/// In-process simulators. A single trial is short and CPU-bound, so the
/// deadline is left to the oracle.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeSimulator;

impl Simulator for NativeSimulator {
    fn simulate(&self, params: &ParameterSet, seed: u64, mode: SimMode, _deadline: Instant) -> anyhow::Result<Trial> {
        match mode {
            SimMode::WorldGen => world_gen::simulate(params, seed),
            SimMode::CropEconomy => crop_economy::simulate(params, seed),
        }
    }
}
