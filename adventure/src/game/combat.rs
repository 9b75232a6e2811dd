//! Combat resolution.
//!
//! How much damage a blow does is game content, not runtime behavior, so it
//! sits behind [`CombatPolicy`]. Handlers own their policy instance; the
//! host builds one per activation through the registered factory.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Decides the damage of one blow.
pub trait CombatPolicy {
    /// Damage dealt by an attacker with the given aggression (0 = harmless).
    fn damage(&mut self, aggression: u32) -> u32;
}

/// Uniformly random damage in `1..=aggression`.
#[derive(Debug, Clone)]
pub struct RandomCombat {
    rng: StdRng,
}

impl RandomCombat {
    /// Seeded from the operating system.
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Deterministic sequence, for tests and replays.
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }
}

impl Default for RandomCombat {
    fn default() -> Self {
        Self::new()
    }
}

impl CombatPolicy for RandomCombat {
    fn damage(&mut self, aggression: u32) -> u32 {
        if aggression == 0 {
            return 0;
        }
        self.rng.random_range(1..=aggression)
    }
}

/// Every blow does the same damage, unless the attacker is harmless.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedCombat(pub u32);

impl CombatPolicy for FixedCombat {
    fn damage(&mut self, aggression: u32) -> u32 {
        if aggression == 0 { 0 } else { self.0 }
    }
}
