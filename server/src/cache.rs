//! Best-effort session cache in front of the durable store.
//!
//! Entries are only written after the store accepted the same record, so a
//! cached record is never ahead of the durable one. Misses and expiry simply
//! fall through to the store.

use std::time::{Duration, Instant};

use dashmap::DashMap;

use crate::store::{GameRecord, GameStatus};

#[derive(Debug, Clone)]
pub struct CachedSession {
    pub game_id: String,
    pub players: Vec<String>,
    pub spectators: Vec<String>,
    pub status: GameStatus,
    pub state: GameRecord,
    pub last_activity: Instant,
}

#[derive(Debug)]
pub struct SessionCache {
    entries: DashMap<String, CachedSession>,
    ttl: Duration,
}

impl SessionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: DashMap::new(),
            ttl,
        }
    }

    pub fn put(&self, record: &GameRecord) {
        let entry = CachedSession {
            game_id: record.id.clone(),
            players: record.player_ids(),
            spectators: record.spectators.clone(),
            status: record.status,
            state: record.clone(),
            last_activity: Instant::now(),
        };
        self.entries.insert(record.id.clone(), entry);
    }

    pub fn get(&self, game_id: &str) -> Option<GameRecord> {
        let entry = self.entries.get(game_id)?;
        if entry.last_activity.elapsed() > self.ttl {
            drop(entry);
            self.entries.remove(game_id);
            return None;
        }
        Some(entry.state.clone())
    }

    pub fn remove(&self, game_id: &str) {
        self.entries.remove(game_id);
    }

    /// Drops expired entries; returns how many were removed.
    pub fn purge_expired(&self) -> usize {
        let mut removed = 0;
        self.entries.retain(|_, entry| {
            let keep = entry.last_activity.elapsed() <= self.ttl;
            if !keep {
                removed += 1;
            }
            keep
        });
        removed
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
