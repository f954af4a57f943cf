//! Rating-aware matchmaking queue with expiring entries.

use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::Serialize;

use crate::store::Seat;

/// Widest rating gap the queue will pair across.
pub const RATING_WINDOW: i32 = 200;

#[derive(Debug, Clone)]
struct QueueEntry {
    seat: Seat,
    joined_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum QueueOutcome {
    Waiting { position: usize },
    Matched {
        opponent: Seat,
        /// When the opponent joined; lets a failed pairing put them back.
        #[serde(skip)]
        waiting_since: Instant,
    },
}

#[derive(Debug)]
pub struct MatchQueue {
    entries: Mutex<Vec<QueueEntry>>,
    ttl: Duration,
}

impl MatchQueue {
    pub fn new(ttl: Duration) -> Self {
        Self {
            entries: Mutex::new(Vec::new()),
            ttl,
        }
    }

    /// Pairs `seat` with the live entry of closest rating within
    /// [`RATING_WINDOW`], earliest first on ties, or queues it. Re-queueing
    /// refreshes an existing entry.
    pub fn enqueue(&self, seat: Seat) -> QueueOutcome {
        self.enqueue_at(seat, Instant::now())
    }

    fn enqueue_at(&self, seat: Seat, now: Instant) -> QueueOutcome {
        let mut entries = self.entries.lock();
        entries.retain(|e| now.duration_since(e.joined_at) < self.ttl);

        if let Some(existing) = entries
            .iter()
            .position(|e| e.seat.player_id == seat.player_id)
        {
            entries[existing] = QueueEntry {
                seat,
                joined_at: now,
            };
            return QueueOutcome::Waiting {
                position: existing + 1,
            };
        }

        let best = entries
            .iter()
            .enumerate()
            .filter(|(_, e)| (e.seat.rating - seat.rating).abs() <= RATING_WINDOW)
            .min_by_key(|(idx, e)| ((e.seat.rating - seat.rating).abs(), *idx))
            .map(|(idx, _)| idx);
        match best {
            Some(idx) => {
                let entry = entries.remove(idx);
                QueueOutcome::Matched {
                    opponent: entry.seat,
                    waiting_since: entry.joined_at,
                }
            }
            None => {
                entries.push(QueueEntry {
                    seat,
                    joined_at: now,
                });
                QueueOutcome::Waiting {
                    position: entries.len(),
                }
            }
        }
    }

    /// Puts a matched player back at their original place in line.
    pub fn reinstate(&self, seat: Seat, waiting_since: Instant) {
        let mut entries = self.entries.lock();
        if entries.iter().any(|e| e.seat.player_id == seat.player_id) {
            return;
        }
        let at = entries
            .iter()
            .position(|e| e.joined_at > waiting_since)
            .unwrap_or(entries.len());
        entries.insert(
            at,
            QueueEntry {
                seat,
                joined_at: waiting_since,
            },
        );
    }

    pub fn cancel(&self, player_id: &str) -> bool {
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|e| e.seat.player_id != player_id);
        entries.len() != before
    }

    /// Removes entries older than the TTL and returns their player ids.
    pub fn expire(&self) -> Vec<String> {
        self.expire_at(Instant::now())
    }

    fn expire_at(&self, now: Instant) -> Vec<String> {
        let mut entries = self.entries.lock();
        let (expired, kept): (Vec<_>, Vec<_>) = entries
            .drain(..)
            .partition(|e| now.duration_since(e.joined_at) >= self.ttl);
        *entries = kept;
        expired.into_iter().map(|e| e.seat.player_id).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn queue() -> MatchQueue {
        MatchQueue::new(Duration::from_secs(15 * 60))
    }

    fn opponent(outcome: QueueOutcome) -> Option<Seat> {
        match outcome {
            QueueOutcome::Matched { opponent, .. } => Some(opponent),
            QueueOutcome::Waiting { .. } => None,
        }
    }

    #[test]
    fn first_player_waits_second_is_matched() {
        let q = queue();
        assert_eq!(
            q.enqueue(Seat::new("ann", 1500)),
            QueueOutcome::Waiting { position: 1 }
        );
        assert_eq!(
            opponent(q.enqueue(Seat::new("bob", 1520))),
            Some(Seat::new("ann", 1500))
        );
        assert!(q.is_empty());
    }

    #[test]
    fn players_outside_the_window_keep_waiting() {
        let q = queue();
        q.enqueue(Seat::new("far", 1000));
        assert_eq!(
            q.enqueue(Seat::new("ann", 1400)),
            QueueOutcome::Waiting { position: 2 }
        );
        assert_eq!(q.len(), 2);
    }

    #[test]
    fn closest_rating_wins() {
        let q = queue();
        q.enqueue(Seat::new("low", 1400));
        q.enqueue(Seat::new("high", 1700));
        assert_eq!(
            opponent(q.enqueue(Seat::new("new", 1560))),
            Some(Seat::new("high", 1700))
        );
    }

    #[test]
    fn ties_go_to_the_earliest_entry() {
        let q = queue();
        q.enqueue(Seat::new("low", 1400));
        q.enqueue(Seat::new("high", 1700));
        assert_eq!(
            opponent(q.enqueue(Seat::new("new", 1550))),
            Some(Seat::new("low", 1400))
        );
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn requeue_refreshes_instead_of_self_matching() {
        let q = queue();
        q.enqueue(Seat::new("ann", 1500));
        assert_eq!(
            q.enqueue(Seat::new("ann", 1500)),
            QueueOutcome::Waiting { position: 1 }
        );
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn entries_expire_after_ttl() {
        let q = queue();
        let start = Instant::now();
        q.enqueue_at(Seat::new("ann", 1500), start);
        let later = start + Duration::from_secs(15 * 60);
        assert_eq!(q.expire_at(later), vec!["ann".to_string()]);
        assert!(q.is_empty());
    }

    #[test]
    fn expired_entries_are_never_matched() {
        let q = queue();
        let start = Instant::now();
        q.enqueue_at(Seat::new("ann", 1500), start);
        let later = start + Duration::from_secs(16 * 60);
        let outcome = q.enqueue_at(Seat::new("bob", 1500), later);
        assert_eq!(outcome, QueueOutcome::Waiting { position: 1 });
    }

    #[test]
    fn cancel_removes_entry() {
        let q = queue();
        q.enqueue(Seat::new("ann", 1500));
        assert!(q.cancel("ann"));
        assert!(!q.cancel("ann"));
    }

    #[test]
    fn reinstated_player_keeps_their_place() {
        let q = queue();
        let start = Instant::now();
        q.enqueue_at(Seat::new("ann", 1000), start);
        q.enqueue_at(Seat::new("cat", 2000), start + Duration::from_secs(2));
        let outcome = q.enqueue_at(Seat::new("bob", 1050), start + Duration::from_secs(3));
        let QueueOutcome::Matched {
            opponent,
            waiting_since,
        } = outcome
        else {
            panic!("expected a match");
        };
        assert_eq!(waiting_since, start);

        q.reinstate(opponent.clone(), waiting_since);
        q.reinstate(opponent, waiting_since);
        assert_eq!(q.len(), 2);
        let later = start + Duration::from_secs(15 * 60);
        assert_eq!(q.expire_at(later), vec!["ann".to_string()]);
    }
}
