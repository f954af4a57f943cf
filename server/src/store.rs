//! Durable game records and the store they live in.

use std::future::Future;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use engine::{Color, EngineSnapshot};
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GameStatus {
    Waiting,
    InProgress,
    Finished,
    Paused,
    Abandoned,
}

impl GameStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Waiting => "WAITING",
            Self::InProgress => "IN_PROGRESS",
            Self::Finished => "FINISHED",
            Self::Paused => "PAUSED",
            Self::Abandoned => "ABANDONED",
        }
    }

    /// Both seats filled and no result yet.
    pub fn is_playable(&self) -> bool {
        matches!(self, Self::InProgress | Self::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Finished | Self::Abandoned)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Seat {
    pub player_id: String,
    pub rating: i32,
}

impl Seat {
    pub fn new(player_id: impl Into<String>, rating: i32) -> Self {
        Self {
            player_id: player_id.into(),
            rating,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub sender: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// Ratings before and after a decided game, indexed like seats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RatingChange {
    pub white: (i32, i32),
    pub black: (i32, i32),
}

/// Source of truth for a game; the in-memory engine is rebuilt from it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    pub status: GameStatus,
    pub white: Seat,
    pub black: Option<Seat>,
    #[serde(default)]
    pub spectators: Vec<String>,
    /// Board, dice in progress, side to move and move history.
    pub engine: EngineSnapshot,
    #[serde(default)]
    pub chat: Vec<ChatMessage>,
    pub winner: Option<Color>,
    pub rating_change: Option<RatingChange>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl GameRecord {
    pub fn new(id: String, white: Seat, black: Option<Seat>) -> Self {
        let now = Utc::now();
        let status = if black.is_some() {
            GameStatus::InProgress
        } else {
            GameStatus::Waiting
        };
        Self {
            id,
            status,
            white,
            black,
            spectators: Vec::new(),
            engine: EngineSnapshot::default(),
            chat: Vec::new(),
            winner: None,
            rating_change: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn color_of(&self, player_id: &str) -> Option<Color> {
        if self.white.player_id == player_id {
            return Some(Color::White);
        }
        match &self.black {
            Some(seat) if seat.player_id == player_id => Some(Color::Black),
            _ => None,
        }
    }

    pub fn seat(&self, color: Color) -> Option<&Seat> {
        match color {
            Color::White => Some(&self.white),
            Color::Black => self.black.as_ref(),
        }
    }

    pub fn is_spectator(&self, user_id: &str) -> bool {
        self.spectators.iter().any(|s| s == user_id)
    }

    pub fn player_ids(&self) -> Vec<String> {
        std::iter::once(&self.white)
            .chain(self.black.as_ref())
            .map(|s| s.player_id.clone())
            .collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("corrupt record {id}: {reason}")]
    Corrupt { id: String, reason: String },
}

/// Durable storage for game records.
pub trait GameStore: Send + Sync + 'static {
    fn load_game(
        &self,
        id: &str,
    ) -> impl Future<Output = Result<Option<GameRecord>, StoreError>> + Send;

    fn save_game(&self, record: &GameRecord) -> impl Future<Output = Result<(), StoreError>> + Send;
}

/// Process-local store; records are kept as JSON the way a document
/// database would hold them.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    documents: Arc<DashMap<String, String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

impl GameStore for MemoryStore {
    async fn load_game(&self, id: &str) -> Result<Option<GameRecord>, StoreError> {
        let Some(doc) = self.documents.get(id).map(|d| d.value().clone()) else {
            return Ok(None);
        };
        serde_json::from_str(&doc)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                id: id.to_string(),
                reason: e.to_string(),
            })
    }

    async fn save_game(&self, record: &GameRecord) -> Result<(), StoreError> {
        let doc = serde_json::to_string(record).map_err(|e| StoreError::Corrupt {
            id: record.id.clone(),
            reason: e.to_string(),
        })?;
        self.documents.insert(record.id.clone(), doc);
        Ok(())
    }
}
