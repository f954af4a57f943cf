//! Per-game broadcast channels feeding connected sockets.

use dashmap::DashMap;
use engine::{BoardSnapshot, Color, MoveOutcome, RollOutcome};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::store::{ChatMessage, GameStatus, RatingChange};

const CHANNEL_CAPACITY: usize = 64;

/// State deltas published to everyone watching a game.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum GameEvent {
    GameCreated {
        white: String,
        black: Option<String>,
        status: GameStatus,
    },
    PlayerJoined {
        player_id: String,
        color: Color,
    },
    DiceRolled {
        player_id: String,
        #[serde(flatten)]
        outcome: RollOutcome,
    },
    MoveApplied {
        player_id: String,
        #[serde(flatten)]
        outcome: MoveOutcome,
        board: BoardSnapshot,
    },
    SpectatorJoined {
        user_id: String,
    },
    Chat(ChatMessage),
    GameOver {
        status: GameStatus,
        winner: Color,
        ratings: Option<RatingChange>,
    },
}

impl GameEvent {
    pub fn name(&self) -> &'static str {
        match self {
            GameEvent::GameCreated { .. } => "game_created",
            GameEvent::PlayerJoined { .. } => "player_joined",
            GameEvent::DiceRolled { .. } => "dice_rolled",
            GameEvent::MoveApplied { .. } => "move_applied",
            GameEvent::SpectatorJoined { .. } => "spectator_joined",
            GameEvent::Chat(_) => "chat",
            GameEvent::GameOver { .. } => "game_over",
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Broadcast {
    pub game_id: String,
    #[serde(flatten)]
    pub event: GameEvent,
}

#[derive(Debug, Default)]
pub struct Hub {
    channels: DashMap<String, broadcast::Sender<Broadcast>>,
}

impl Hub {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, game_id: &str) -> broadcast::Receiver<Broadcast> {
        self.channels
            .entry(game_id.to_string())
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Fire-and-forget; returns how many subscribers received the event.
    pub fn publish(&self, game_id: &str, event: GameEvent) -> usize {
        let Some(sender) = self.channels.get(game_id) else {
            return 0;
        };
        sender
            .send(Broadcast {
                game_id: game_id.to_string(),
                event,
            })
            .unwrap_or(0)
    }

    /// Drops channels nobody listens to any more.
    pub fn prune(&self) -> usize {
        let mut removed = 0;
        self.channels.retain(|_, sender| {
            let keep = sender.receiver_count() > 0;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn subscriber_count(&self, game_id: &str) -> usize {
        self.channels
            .get(game_id)
            .map(|s| s.receiver_count())
            .unwrap_or(0)
    }
}
