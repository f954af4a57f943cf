//! Backgammon rules engine: board model, legal move generation, turn state
//! and Elo ratings. Shared by the session server and its tests.

use thiserror::Error;

pub mod board;
pub mod dice;
mod executor;
pub mod game;
pub mod moves;
pub mod rating;

pub use board::{Board, BoardSnapshot, Color, CHECKERS_PER_SIDE, HOME_POINTS, POINTS};
pub use dice::DiceState;
pub use game::{EngineSnapshot, GameState, MoveOutcome, MoveRecord, RollOutcome, TurnPhase};
pub use moves::{can_bear_off, legal_moves, Destination, GameMove, Origin, BAR, OFF};
pub use rating::{elo_update, GameResult};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error("invalid board: {0}")]
    InvalidBoard(String),
    #[error("invalid dice: {0}")]
    InvalidDice(String),
    #[error("die value out of range: {0}")]
    InvalidDie(u8),
    #[error("invalid point index: {0}")]
    InvalidPoint(i32),
    #[error("dice already rolled this turn")]
    DiceAlreadyRolled,
    #[error("no dice rolled this turn")]
    NoDiceRolled,
    #[error("not this player's turn")]
    NotYourTurn,
    #[error("move is not legal for the current dice")]
    IllegalMove,
    #[error("game already finished")]
    GameOver,
}
