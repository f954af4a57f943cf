//! Elo rating adjustment applied once a game is decided.

use serde::{Deserialize, Serialize};

pub const K_FACTOR: f64 = 32.0;
pub const MIN_RATING: i32 = 100;
pub const MAX_RATING: i32 = 3000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameResult {
    FirstWins,
    SecondWins,
    Draw,
}

impl GameResult {
    /// Score credited to the first player: 1, 0 or 0.5.
    pub fn score(self) -> f64 {
        match self {
            GameResult::FirstWins => 1.0,
            GameResult::SecondWins => 0.0,
            GameResult::Draw => 0.5,
        }
    }
}

/// Logistic expectation of `rating` scoring against `other`.
pub fn expected_score(rating: i32, other: i32) -> f64 {
    1.0 / (1.0 + 10f64.powf((other - rating) as f64 / 400.0))
}

pub fn elo_update(first: i32, second: i32, result: GameResult) -> (i32, i32) {
    let score = result.score();
    let first_delta = K_FACTOR * (score - expected_score(first, second));
    let second_delta = K_FACTOR * ((1.0 - score) - expected_score(second, first));
    (
        clamp(first as f64 + first_delta),
        clamp(second as f64 + second_delta),
    )
}

fn clamp(rating: f64) -> i32 {
    (rating.round() as i32).clamp(MIN_RATING, MAX_RATING)
}
