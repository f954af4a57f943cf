//! Dice roll and per-slot usage tracking.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::EngineError;

/// The current roll and which of its move slots are spent.
///
/// A non-double `[a, b]` exposes one slot per value; a double exposes four
/// slots of the same value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawDice", into = "RawDice")]
pub struct DiceState {
    roll: Option<[u8; 2]>,
    used: Vec<bool>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct RawDice {
    roll: Option<[u8; 2]>,
    #[serde(default)]
    used: Vec<bool>,
}

impl From<DiceState> for RawDice {
    fn from(dice: DiceState) -> Self {
        Self {
            roll: dice.roll,
            used: dice.used,
        }
    }
}

impl TryFrom<RawDice> for DiceState {
    type Error = EngineError;

    fn try_from(raw: RawDice) -> Result<Self, Self::Error> {
        DiceState::restore(raw.roll, raw.used)
    }
}

impl DiceState {
    pub fn none() -> Self {
        Self::default()
    }

    pub fn from_roll(first: u8, second: u8) -> Result<Self, EngineError> {
        for die in [first, second] {
            if !(1..=6).contains(&die) {
                return Err(EngineError::InvalidDie(die));
            }
        }
        let slots = if first == second { 4 } else { 2 };
        Ok(Self {
            roll: Some([first, second]),
            used: vec![false; slots],
        })
    }

    pub fn roll<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let first = rng.gen_range(1..=6);
        let second = rng.gen_range(1..=6);
        let slots = if first == second { 4 } else { 2 };
        Self {
            roll: Some([first, second]),
            used: vec![false; slots],
        }
    }

    /// Rebuilds a partially used roll, e.g. from a persisted record.
    pub fn restore(roll: Option<[u8; 2]>, used: Vec<bool>) -> Result<Self, EngineError> {
        let Some([first, second]) = roll else {
            if used.is_empty() {
                return Ok(Self::none());
            }
            return Err(EngineError::InvalidDice("usage flags without a roll".into()));
        };
        let mut dice = Self::from_roll(first, second)?;
        if used.len() != dice.used.len() {
            return Err(EngineError::InvalidDice(format!(
                "roll {first}-{second} needs {} usage flags, got {}",
                dice.used.len(),
                used.len()
            )));
        }
        dice.used = used;
        Ok(dice)
    }

    pub fn values(&self) -> Option<[u8; 2]> {
        self.roll
    }

    pub fn is_rolled(&self) -> bool {
        self.roll.is_some()
    }

    pub fn is_double(&self) -> bool {
        matches!(self.roll, Some([a, b]) if a == b)
    }

    fn slot_value(&self, slot: usize) -> Option<u8> {
        let [first, second] = self.roll?;
        Some(if self.is_double() || slot == 0 {
            first
        } else {
            second
        })
    }

    /// Values of every slot not yet spent, one entry per slot.
    pub fn remaining(&self) -> Vec<u8> {
        self.used
            .iter()
            .enumerate()
            .filter(|(_, used)| !**used)
            .filter_map(|(slot, _)| self.slot_value(slot))
            .collect()
    }

    /// Distinct unspent values in ascending order.
    pub fn available_values(&self) -> Vec<u8> {
        let mut values = self.remaining();
        values.sort_unstable();
        values.dedup();
        values
    }

    /// Marks one slot showing `die` as spent. Returns false when no unspent
    /// slot shows that value.
    pub fn consume(&mut self, die: u8) -> bool {
        let slot = (0..self.used.len())
            .find(|&slot| !self.used[slot] && self.slot_value(slot) == Some(die));
        match slot {
            Some(slot) => {
                self.used[slot] = true;
                true
            }
            None => false,
        }
    }

    pub fn is_exhausted(&self) -> bool {
        self.used.iter().all(|u| *u)
    }

    pub fn clear(&mut self) {
        self.roll = None;
        self.used.clear();
    }
}
