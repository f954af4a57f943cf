use engine::EngineError;
use thiserror::Error;

use crate::store::StoreError;

/// Outcome kinds reported back to the actor of a rejected or failed action.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionError {
    #[error("game {0} not found")]
    NotFound(String),
    #[error("{player_id} is not part of game {game_id}")]
    NotParticipant { game_id: String, player_id: String },
    #[error("illegal move: {0}")]
    IllegalMove(String),
    #[error("invalid state: {0}")]
    InvalidState(String),
    #[error("persistence failure: {0}")]
    PersistenceFailure(String),
}

impl SessionError {
    pub fn kind(&self) -> &'static str {
        match self {
            SessionError::NotFound(_) => "not_found",
            SessionError::NotParticipant { .. } => "not_participant",
            SessionError::IllegalMove(_) => "illegal_move",
            SessionError::InvalidState(_) => "invalid_state",
            SessionError::PersistenceFailure(_) => "persistence_failure",
        }
    }

    /// Rejected actions, as opposed to system faults.
    pub fn is_rejection(&self) -> bool {
        !matches!(self, SessionError::PersistenceFailure(_))
    }
}

impl From<EngineError> for SessionError {
    fn from(err: EngineError) -> Self {
        match err {
            EngineError::IllegalMove | EngineError::InvalidPoint(_) => {
                SessionError::IllegalMove(err.to_string())
            }
            EngineError::DiceAlreadyRolled
            | EngineError::NoDiceRolled
            | EngineError::NotYourTurn
            | EngineError::GameOver
            | EngineError::InvalidDie(_)
            | EngineError::InvalidDice(_)
            | EngineError::InvalidBoard(_) => SessionError::InvalidState(err.to_string()),
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        SessionError::PersistenceFailure(err.to_string())
    }
}
