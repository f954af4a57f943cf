//! Multiplayer backgammon session server.
//!
//! The [`Coordinator`] owns every live game and serializes operations per
//! game. Durable state goes through a [`GameStore`], a best-effort
//! [`SessionCache`] sits in front of it, and the [`Hub`] fans state deltas
//! out to connected sockets. [`http::router`] exposes all of it over axum.

pub mod cache;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod http;
pub mod hub;
pub mod matchmaking;
pub mod store;

pub use cache::SessionCache;
pub use config::Config;
pub use coordinator::{Coordinator, GameView, MatchmakingOutcome, MoveInput, SweepReport};
pub use error::SessionError;
pub use hub::{Broadcast, GameEvent, Hub};
pub use matchmaking::{MatchQueue, QueueOutcome};
pub use store::{GameRecord, GameStatus, GameStore, MemoryStore, Seat, StoreError};
