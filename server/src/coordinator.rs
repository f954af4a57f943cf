//! Live game sessions.
//!
//! Each game id maps to one slot holding its engine behind an async mutex.
//! A mutating operation takes the lock, works on a staged copy, persists the
//! copy and only then commits it and broadcasts the delta, so at most one
//! operation per game is in flight and a failed write never leaves memory
//! ahead of the store. Eviction takes the same lock and skips busy slots.

use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use dashmap::DashMap;
use engine::{
    elo_update, BoardSnapshot, Color, DiceState, GameMove, GameResult, GameState, MoveOutcome,
    MoveRecord, RollOutcome, TurnPhase,
};
use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, Mutex as AsyncMutex, OwnedMutexGuard};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cache::SessionCache;
use crate::config::Config;
use crate::error::SessionError;
use crate::hub::{Broadcast, GameEvent, Hub};
use crate::matchmaking::{MatchQueue, QueueOutcome};
use crate::store::{ChatMessage, GameRecord, GameStatus, GameStore, RatingChange, Seat};

pub const MAX_CHAT_LEN: usize = 500;
pub const CHAT_HISTORY: usize = 200;

/// Move as submitted by a client, in wire encoding.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveInput {
    pub from: i32,
    pub to: i32,
}

/// Everything a client needs to render a game.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GameView {
    pub id: String,
    pub status: GameStatus,
    pub white: Seat,
    pub black: Option<Seat>,
    pub spectators: Vec<String>,
    pub board: BoardSnapshot,
    pub dice: DiceState,
    pub turn: Color,
    pub phase: TurnPhase,
    pub legal_moves: Vec<GameMove>,
    pub history: Vec<MoveRecord>,
    pub chat: Vec<ChatMessage>,
    pub winner: Option<Color>,
    pub rating_change: Option<RatingChange>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum MatchmakingOutcome {
    Waiting { position: usize },
    Matched { game: GameView },
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub evicted: Vec<String>,
    pub busy: usize,
    pub expired_queue_entries: Vec<String>,
    pub purged_cache_entries: usize,
    pub pruned_channels: usize,
}

#[derive(Debug)]
struct LiveGame {
    record: GameRecord,
    engine: GameState,
    last_activity: Instant,
    /// Set by the sweeper; anyone who acquires an evicted slot reloads.
    evicted: bool,
}

impl LiveGame {
    fn new(record: GameRecord, engine: GameState) -> Self {
        Self {
            record,
            engine,
            last_activity: Instant::now(),
            evicted: false,
        }
    }

    fn view(&self) -> GameView {
        build_view(&self.record, &self.engine)
    }
}

type Slot = Arc<AsyncMutex<LiveGame>>;

/// Working copy handed to a mutating operation.
struct Staged {
    record: GameRecord,
    engine: GameState,
}

impl Staged {
    fn participant(&self, player_id: &str) -> Result<Color, SessionError> {
        self.record
            .color_of(player_id)
            .ok_or_else(|| SessionError::NotParticipant {
                game_id: self.record.id.clone(),
                player_id: player_id.to_string(),
            })
    }

    fn ensure_playable(&self) -> Result<(), SessionError> {
        match self.record.status {
            status if status.is_playable() => Ok(()),
            GameStatus::Waiting => Err(SessionError::InvalidState(
                "game is still waiting for an opponent".into(),
            )),
            status => Err(SessionError::InvalidState(format!(
                "game is {}",
                status.as_str()
            ))),
        }
    }

    /// Records the result, applies the rating change and returns the event
    /// announcing it.
    fn finish(&mut self, status: GameStatus, winner: Color) -> GameEvent {
        let record = &mut self.record;
        record.status = status;
        record.winner = Some(winner);
        if let Some(black) = record.black.as_mut() {
            let result = match winner {
                Color::White => GameResult::FirstWins,
                Color::Black => GameResult::SecondWins,
            };
            let (white_after, black_after) =
                elo_update(record.white.rating, black.rating, result);
            record.rating_change = Some(RatingChange {
                white: (record.white.rating, white_after),
                black: (black.rating, black_after),
            });
            record.white.rating = white_after;
            black.rating = black_after;
        }
        GameEvent::GameOver {
            status,
            winner,
            ratings: record.rating_change,
        }
    }

    fn view(&self) -> GameView {
        build_view(&self.record, &self.engine)
    }
}

fn build_view(record: &GameRecord, engine: &GameState) -> GameView {
    let finished = record.status.is_terminal();
    GameView {
        id: record.id.clone(),
        status: record.status,
        white: record.white.clone(),
        black: record.black.clone(),
        spectators: record.spectators.clone(),
        board: engine.board().snapshot(),
        dice: engine.dice(),
        turn: engine.turn(),
        phase: if finished {
            TurnPhase::Finished
        } else {
            engine.phase()
        },
        legal_moves: if finished {
            Vec::new()
        } else {
            engine.legal_moves()
        },
        history: engine.history().to_vec(),
        chat: record.chat.clone(),
        winner: record.winner,
        rating_change: record.rating_change,
    }
}

fn new_game_id() -> String {
    Uuid::new_v4().simple().to_string()[..12].to_string()
}

pub struct Coordinator<S> {
    store: S,
    cache: SessionCache,
    hub: Hub,
    queue: MatchQueue,
    games: DashMap<String, Slot>,
    rng: Mutex<StdRng>,
    config: Config,
}

impl<S: GameStore> Coordinator<S> {
    pub fn new(store: S, config: Config) -> Self {
        Self::with_rng(store, config, StdRng::from_entropy())
    }

    /// Deterministic dice, for tests and replays.
    pub fn with_seed(store: S, config: Config, seed: u64) -> Self {
        Self::with_rng(store, config, StdRng::seed_from_u64(seed))
    }

    fn with_rng(store: S, config: Config, rng: StdRng) -> Self {
        Self {
            store,
            cache: SessionCache::new(config.cache_ttl),
            hub: Hub::new(),
            queue: MatchQueue::new(config.queue_ttl),
            games: DashMap::new(),
            rng: Mutex::new(rng),
            config,
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Number of games currently held in memory.
    pub fn live_games(&self) -> usize {
        self.games.len()
    }

    pub fn is_live(&self, game_id: &str) -> bool {
        self.games.contains_key(game_id)
    }

    // --- Lifecycle ---

    /// Opens a game with `host` as White, waiting for an opponent.
    pub async fn create_game(&self, host: Seat) -> Result<GameView, SessionError> {
        self.open_game(host, None).await
    }

    /// Opens a game with both seats filled; play starts immediately.
    pub async fn create_match(&self, white: Seat, black: Seat) -> Result<GameView, SessionError> {
        if white.player_id == black.player_id {
            return Err(SessionError::InvalidState(
                "a player cannot face themselves".into(),
            ));
        }
        self.open_game(white, Some(black)).await
    }

    async fn open_game(&self, white: Seat, black: Option<Seat>) -> Result<GameView, SessionError> {
        let id = new_game_id();
        let record = GameRecord::new(id.clone(), white, black);
        if let Err(err) = self.store.save_game(&record).await {
            error!(game_id = %id, error = %err, "failed to persist new game");
            return Err(err.into());
        }
        self.cache.put(&record);

        let live = LiveGame::new(record, GameState::new());
        let view = live.view();
        self.games.insert(id.clone(), Arc::new(AsyncMutex::new(live)));
        info!(
            game_id = %id,
            white = %view.white.player_id,
            status = view.status.as_str(),
            "game created"
        );
        self.hub.publish(
            &id,
            GameEvent::GameCreated {
                white: view.white.player_id.clone(),
                black: view.black.as_ref().map(|s| s.player_id.clone()),
                status: view.status,
            },
        );
        Ok(view)
    }

    /// Seats `seat` as Black in a waiting game.
    pub async fn join_game(&self, game_id: &str, seat: Seat) -> Result<GameView, SessionError> {
        let view = self
            .mutate(game_id, move |staged| {
                let record = &mut staged.record;
                if record.status != GameStatus::Waiting {
                    return Err(SessionError::InvalidState(
                        "game is not waiting for an opponent".into(),
                    ));
                }
                if record.white.player_id == seat.player_id {
                    return Err(SessionError::InvalidState(
                        "a player cannot face themselves".into(),
                    ));
                }
                record.spectators.retain(|s| *s != seat.player_id);
                let event = GameEvent::PlayerJoined {
                    player_id: seat.player_id.clone(),
                    color: Color::Black,
                };
                record.black = Some(seat);
                record.status = GameStatus::InProgress;
                Ok((staged.view(), vec![event]))
            })
            .await?;
        info!(game_id, "opponent joined");
        Ok(view)
    }

    pub async fn resign(&self, game_id: &str, player_id: &str) -> Result<GameView, SessionError> {
        let view = self
            .mutate(game_id, |staged| {
                let color = staged.participant(player_id)?;
                staged.ensure_playable()?;
                let event = staged.finish(GameStatus::Abandoned, color.opponent());
                Ok((staged.view(), vec![event]))
            })
            .await?;
        info!(game_id, player_id, "player resigned");
        Ok(view)
    }

    // --- Turn actions ---

    pub async fn roll_dice(
        &self,
        game_id: &str,
        player_id: &str,
    ) -> Result<RollOutcome, SessionError> {
        let outcome = self
            .mutate(game_id, |staged| {
                let color = staged.participant(player_id)?;
                staged.ensure_playable()?;
                if staged.engine.turn() != color {
                    return Err(SessionError::InvalidState("not your turn".into()));
                }
                let outcome = {
                    let mut rng = self.rng.lock();
                    staged.engine.roll(&mut *rng)?
                };
                let event = GameEvent::DiceRolled {
                    player_id: player_id.to_string(),
                    outcome: outcome.clone(),
                };
                Ok((outcome, vec![event]))
            })
            .await?;
        info!(
            game_id,
            player_id,
            dice = ?outcome.dice,
            turn_passed = outcome.turn_passed,
            "dice rolled"
        );
        Ok(outcome)
    }

    pub async fn apply_move(
        &self,
        game_id: &str,
        player_id: &str,
        input: MoveInput,
    ) -> Result<MoveOutcome, SessionError> {
        let outcome = self
            .mutate(game_id, |staged| {
                let color = staged.participant(player_id)?;
                staged.ensure_playable()?;
                let mv = GameMove::from_wire(input.from, input.to, color)?;
                let outcome = staged.engine.play(mv)?;
                let mut events = vec![GameEvent::MoveApplied {
                    player_id: player_id.to_string(),
                    outcome: outcome.clone(),
                    board: staged.engine.board().snapshot(),
                }];
                if let Some(winner) = outcome.winner {
                    events.push(staged.finish(GameStatus::Finished, winner));
                }
                Ok((outcome, events))
            })
            .await?;
        debug!(
            game_id,
            player_id,
            from = input.from,
            to = input.to,
            hit = outcome.record.hit,
            "move applied"
        );
        if let Some(winner) = outcome.winner {
            info!(game_id, winner = ?winner, "game finished");
        }
        Ok(outcome)
    }

    // --- Spectators and chat ---

    pub async fn join_spectator(
        &self,
        game_id: &str,
        user_id: &str,
    ) -> Result<GameView, SessionError> {
        self.mutate(game_id, |staged| {
            if staged.record.color_of(user_id).is_some() {
                return Err(SessionError::InvalidState(
                    "players cannot spectate their own game".into(),
                ));
            }
            let mut events = Vec::new();
            if !staged.record.is_spectator(user_id) {
                staged.record.spectators.push(user_id.to_string());
                events.push(GameEvent::SpectatorJoined {
                    user_id: user_id.to_string(),
                });
            }
            Ok((staged.view(), events))
        })
        .await
    }

    pub async fn chat(
        &self,
        game_id: &str,
        sender: &str,
        text: &str,
    ) -> Result<ChatMessage, SessionError> {
        self.mutate(game_id, |staged| {
            let record = &mut staged.record;
            if record.color_of(sender).is_none() && !record.is_spectator(sender) {
                return Err(SessionError::NotParticipant {
                    game_id: record.id.clone(),
                    player_id: sender.to_string(),
                });
            }
            let text = text.trim();
            if text.is_empty() || text.chars().count() > MAX_CHAT_LEN {
                return Err(SessionError::InvalidState(format!(
                    "chat messages must be 1 to {MAX_CHAT_LEN} characters"
                )));
            }
            let message = ChatMessage {
                sender: sender.to_string(),
                text: text.to_string(),
                sent_at: Utc::now(),
            };
            record.chat.push(message.clone());
            if record.chat.len() > CHAT_HISTORY {
                let excess = record.chat.len() - CHAT_HISTORY;
                record.chat.drain(..excess);
            }
            Ok((message.clone(), vec![GameEvent::Chat(message)]))
        })
        .await
    }

    // --- Reads ---

    pub async fn game_view(&self, game_id: &str) -> Result<GameView, SessionError> {
        let mut live = self.lock(game_id).await?;
        live.last_activity = Instant::now();
        Ok(live.view())
    }

    pub async fn legal_moves(&self, game_id: &str) -> Result<(Color, Vec<GameMove>), SessionError> {
        let view = self.game_view(game_id).await?;
        Ok((view.turn, view.legal_moves))
    }

    /// Current view plus a receiver for every later event. Subscribing under
    /// the game lock guarantees no event falls between the two.
    pub async fn subscribe(
        &self,
        game_id: &str,
    ) -> Result<(GameView, broadcast::Receiver<Broadcast>), SessionError> {
        let mut live = self.lock(game_id).await?;
        live.last_activity = Instant::now();
        let receiver = self.hub.subscribe(game_id);
        Ok((live.view(), receiver))
    }

    // --- Matchmaking ---

    /// Queues `seat`; when an opponent is found the earlier arrival plays White.
    pub async fn find_match(&self, seat: Seat) -> Result<MatchmakingOutcome, SessionError> {
        match self.queue.enqueue(seat.clone()) {
            QueueOutcome::Waiting { position } => {
                debug!(player_id = %seat.player_id, position, "queued for a match");
                Ok(MatchmakingOutcome::Waiting { position })
            }
            QueueOutcome::Matched {
                opponent,
                waiting_since,
            } => {
                info!(
                    white = %opponent.player_id,
                    black = %seat.player_id,
                    "matchmaking paired players"
                );
                match self.create_match(opponent.clone(), seat).await {
                    Ok(game) => Ok(MatchmakingOutcome::Matched { game }),
                    Err(err) => {
                        warn!(
                            player_id = %opponent.player_id,
                            error = %err,
                            "could not open matched game, requeueing opponent"
                        );
                        self.queue.reinstate(opponent, waiting_since);
                        Err(err)
                    }
                }
            }
        }
    }

    pub fn leave_queue(&self, player_id: &str) -> bool {
        self.queue.cancel(player_id)
    }

    // --- Eviction ---

    /// Evicts finished games and games idle past the configured window.
    /// Slots with an operation in flight are skipped until the next sweep.
    pub async fn sweep(&self) -> SweepReport {
        let now = Instant::now();
        let slots: Vec<(String, Slot)> = self
            .games
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        let mut report = SweepReport::default();
        for (game_id, slot) in slots {
            let Ok(mut live) = Arc::clone(&slot).try_lock_owned() else {
                report.busy += 1;
                continue;
            };
            let idle =
                now.saturating_duration_since(live.last_activity) >= self.config.idle_timeout;
            if !idle && !live.record.status.is_terminal() {
                continue;
            }
            if live.record.status == GameStatus::InProgress {
                let mut record = live.record.clone();
                record.status = GameStatus::Paused;
                record.updated_at = Utc::now();
                if let Err(err) = self.store.save_game(&record).await {
                    warn!(
                        game_id = %game_id,
                        error = %err,
                        "could not pause idle game, keeping it live"
                    );
                    continue;
                }
                live.record = record;
            }
            live.evicted = true;
            self.games.remove_if(&game_id, |_, current| Arc::ptr_eq(current, &slot));
            self.cache.put(&live.record);
            report.evicted.push(game_id);
        }

        report.expired_queue_entries = self.queue.expire();
        report.purged_cache_entries = self.cache.purge_expired();
        report.pruned_channels = self.hub.prune();
        if !report.evicted.is_empty() || !report.expired_queue_entries.is_empty() {
            info!(
                evicted = report.evicted.len(),
                busy = report.busy,
                expired_queue_entries = report.expired_queue_entries.len(),
                "session sweep"
            );
        }
        report
    }

    /// Runs [`Coordinator::sweep`] every `sweep_interval`.
    pub fn spawn_sweeper(self: &Arc<Self>) -> JoinHandle<()> {
        let coordinator = Arc::clone(self);
        let period = self.config.sweep_interval.max(Duration::from_secs(1));
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                coordinator.sweep().await;
            }
        })
    }

    // --- Internals ---

    /// Runs `op` on a staged copy under the game lock, persists the result and
    /// commits it. Nothing is committed or broadcast unless the store accepted
    /// the write.
    async fn mutate<T, F>(&self, game_id: &str, op: F) -> Result<T, SessionError>
    where
        F: FnOnce(&mut Staged) -> Result<(T, Vec<GameEvent>), SessionError>,
    {
        let mut live = self.lock(game_id).await?;
        live.last_activity = Instant::now();

        let mut staged = Staged {
            record: live.record.clone(),
            engine: live.engine.clone(),
        };
        if staged.record.status == GameStatus::Paused {
            staged.record.status = GameStatus::InProgress;
        }
        let (value, events) = op(&mut staged)?;
        staged.record.engine = staged.engine.snapshot();
        staged.record.updated_at = Utc::now();

        if let Err(err) = self.store.save_game(&staged.record).await {
            error!(game_id, error = %err, "failed to persist game update");
            return Err(err.into());
        }
        self.cache.put(&staged.record);
        live.record = staged.record;
        live.engine = staged.engine;

        for event in events {
            self.hub.publish(game_id, event);
        }
        Ok(value)
    }

    async fn lock(&self, game_id: &str) -> Result<OwnedMutexGuard<LiveGame>, SessionError> {
        loop {
            let slot = self.slot(game_id).await?;
            let guard = slot.lock_owned().await;
            if !guard.evicted {
                return Ok(guard);
            }
            debug!(game_id, "slot evicted while waiting, reloading");
        }
    }

    async fn slot(&self, game_id: &str) -> Result<Slot, SessionError> {
        if let Some(slot) = self.games.get(game_id) {
            return Ok(slot.value().clone());
        }

        let (record, source) = match self.cache.get(game_id) {
            Some(record) => (record, "cache"),
            None => {
                let record = self
                    .store
                    .load_game(game_id)
                    .await
                    .map_err(|err| {
                        error!(game_id, error = %err, "failed to load game");
                        SessionError::from(err)
                    })?
                    .ok_or_else(|| SessionError::NotFound(game_id.to_string()))?;
                (record, "store")
            }
        };
        let engine = GameState::restore(record.engine.clone()).map_err(|err| {
            SessionError::PersistenceFailure(format!("stored state of {game_id} is invalid: {err}"))
        })?;
        info!(
            game_id,
            source,
            status = record.status.as_str(),
            "game restored into memory"
        );

        let slot = self
            .games
            .entry(game_id.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(LiveGame::new(record, engine))))
            .value()
            .clone();
        Ok(slot)
    }

    #[cfg(test)]
    async fn force_dice(&self, game_id: &str, first: u8, second: u8) -> RollOutcome {
        self.mutate(game_id, |staged| Ok((staged.engine.set_dice(first, second)?, Vec::new())))
            .await
            .expect("forced dice")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{MemoryStore, StoreError};
    use engine::{Board, EngineSnapshot, BAR, OFF, POINTS};
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Wraps the memory store with an optional write delay and outage switch.
    #[derive(Clone, Default)]
    struct TestStore {
        inner: MemoryStore,
        failing: Arc<AtomicBool>,
        loads: Arc<AtomicUsize>,
        delay: Duration,
    }

    impl TestStore {
        fn slow(delay: Duration) -> Self {
            Self {
                delay,
                ..Self::default()
            }
        }
    }

    impl GameStore for TestStore {
        async fn load_game(&self, id: &str) -> Result<Option<GameRecord>, StoreError> {
            self.loads.fetch_add(1, Ordering::SeqCst);
            self.inner.load_game(id).await
        }

        async fn save_game(&self, record: &GameRecord) -> Result<(), StoreError> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.failing.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("disk offline".into()));
            }
            self.inner.save_game(record).await
        }
    }

    fn coordinator(store: TestStore) -> Coordinator<TestStore> {
        Coordinator::with_seed(store, Config::default(), 11)
    }

    fn idle_config() -> Config {
        Config {
            idle_timeout: Duration::ZERO,
            ..Config::default()
        }
    }

    fn seated(id: &str) -> GameRecord {
        GameRecord::new(
            id.into(),
            Seat::new("ann", 1500),
            Some(Seat::new("bob", 1500)),
        )
    }

    async fn started(coord: &Coordinator<TestStore>) -> String {
        coord
            .create_match(Seat::new("ann", 1500), Seat::new("bob", 1500))
            .await
            .unwrap()
            .id
    }

    #[tokio::test]
    async fn create_match_persists_a_fresh_game() {
        let store = TestStore::default();
        let coord = coordinator(store.clone());
        let view = coord
            .create_match(Seat::new("ann", 1500), Seat::new("bob", 1500))
            .await
            .unwrap();
        assert_eq!(view.status, GameStatus::InProgress);
        assert_eq!(view.turn, Color::White);
        assert_eq!(view.phase, TurnPhase::AwaitingRoll);
        assert_eq!(view.board, Board::standard().snapshot());

        let stored = store.inner.load_game(&view.id).await.unwrap().unwrap();
        assert_eq!(stored.status, GameStatus::InProgress);
        assert_eq!(stored.engine, EngineSnapshot::default());
    }

    #[tokio::test]
    async fn unknown_games_and_strangers_are_rejected() {
        let coord = coordinator(TestStore::default());
        let id = started(&coord).await;

        assert_eq!(
            coord.roll_dice("nope", "ann").await.unwrap_err(),
            SessionError::NotFound("nope".into())
        );
        assert!(matches!(
            coord.roll_dice(&id, "eve").await,
            Err(SessionError::NotParticipant { .. })
        ));
        assert!(matches!(
            coord
                .apply_move(&id, "eve", MoveInput { from: 23, to: 19 })
                .await,
            Err(SessionError::NotParticipant { .. })
        ));
    }

    #[tokio::test]
    async fn roll_respects_turn_state() {
        let coord = coordinator(TestStore::default());
        let id = started(&coord).await;

        assert!(matches!(
            coord.roll_dice(&id, "bob").await,
            Err(SessionError::InvalidState(_))
        ));
        let outcome = coord.roll_dice(&id, "ann").await.unwrap();
        assert_eq!(outcome.player, Color::White);
        assert!(outcome.dice.iter().all(|d| (1..=6).contains(d)));
        if !outcome.turn_passed {
            assert!(matches!(
                coord.roll_dice(&id, "ann").await,
                Err(SessionError::InvalidState(_))
            ));
        }
    }

    #[tokio::test]
    async fn moves_are_validated_applied_and_persisted() {
        let store = TestStore::default();
        let coord = coordinator(store.clone());
        let id = started(&coord).await;

        assert!(matches!(
            coord
                .apply_move(&id, "ann", MoveInput { from: 23, to: 19 })
                .await,
            Err(SessionError::InvalidState(_))
        ));

        coord.force_dice(&id, 3, 4).await;
        let outcome = coord
            .apply_move(&id, "ann", MoveInput { from: 23, to: 19 })
            .await
            .unwrap();
        assert_eq!(outcome.record.die, 4);
        assert!(!outcome.turn_ended);

        assert!(matches!(
            coord
                .apply_move(&id, "ann", MoveInput { from: 19, to: 16 })
                .await,
            Err(SessionError::IllegalMove(_))
        ));
        assert!(matches!(
            coord
                .apply_move(&id, "ann", MoveInput { from: 99, to: 3 })
                .await,
            Err(SessionError::IllegalMove(_))
        ));

        let view = coord.game_view(&id).await.unwrap();
        assert_eq!(view.board.points[23], [4, 0]);
        assert_eq!(view.board.points[19], [1, 0]);

        let stored = store.inner.load_game(&id).await.unwrap().unwrap();
        assert_eq!(stored.engine.history.len(), 1);
        assert_eq!(stored.engine.dice.remaining(), vec![3]);
    }

    #[tokio::test]
    async fn state_changes_are_broadcast() {
        let coord = coordinator(TestStore::default());
        let id = started(&coord).await;
        let (view, mut rx) = coord.subscribe(&id).await.unwrap();
        assert_eq!(view.id, id);

        coord.force_dice(&id, 3, 4).await;
        coord
            .apply_move(&id, "ann", MoveInput { from: 23, to: 19 })
            .await
            .unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.game_id, id);
        match event.event {
            GameEvent::MoveApplied { player_id, board, .. } => {
                assert_eq!(player_id, "ann");
                assert_eq!(board.points[19], [1, 0]);
            }
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_rolls_are_serialized() {
        let coord = Arc::new(coordinator(TestStore::slow(Duration::from_millis(20))));
        let id = started(&coord).await;

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let coord = Arc::clone(&coord);
                let id = id.clone();
                tokio::spawn(async move { coord.roll_dice(&id, "ann").await })
            })
            .collect();

        let mut rolled = 0;
        let mut rejected = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(_) => rolled += 1,
                Err(SessionError::InvalidState(_)) => rejected += 1,
                Err(other) => panic!("unexpected error {other:?}"),
            }
        }
        assert_eq!(rolled, 1);
        assert_eq!(rejected, 7);
    }

    #[tokio::test]
    async fn failed_writes_leave_memory_untouched() {
        let store = TestStore::default();
        let coord = coordinator(store.clone());
        let id = started(&coord).await;

        store.failing.store(true, Ordering::SeqCst);
        let err = coord.roll_dice(&id, "ann").await.unwrap_err();
        assert!(matches!(err, SessionError::PersistenceFailure(_)));
        assert!(!err.is_rejection());
        let view = coord.game_view(&id).await.unwrap();
        assert_eq!(view.phase, TurnPhase::AwaitingRoll);

        store.failing.store(false, Ordering::SeqCst);
        assert!(coord.roll_dice(&id, "ann").await.is_ok());
    }

    #[tokio::test]
    async fn idle_games_are_paused_and_restored_exactly() {
        let store = TestStore::default();
        let coord = Coordinator::with_seed(store.clone(), idle_config(), 3);
        let id = coord
            .create_match(Seat::new("ann", 1500), Seat::new("bob", 1500))
            .await
            .unwrap()
            .id;
        coord.force_dice(&id, 5, 5).await;
        coord
            .apply_move(&id, "ann", MoveInput { from: 12, to: 7 })
            .await
            .unwrap();

        let report = coord.sweep().await;
        assert_eq!(report.evicted, vec![id.clone()]);
        assert!(!coord.is_live(&id));
        let stored = store.inner.load_game(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, GameStatus::Paused);

        let view = coord.game_view(&id).await.unwrap();
        assert!(coord.is_live(&id));
        assert_eq!(view.dice.remaining(), vec![5, 5, 5]);
        assert_eq!(view.phase, TurnPhase::Moving);

        coord
            .apply_move(&id, "ann", MoveInput { from: 12, to: 7 })
            .await
            .unwrap();
        let stored = store.inner.load_game(&id).await.unwrap().unwrap();
        assert_eq!(stored.status, GameStatus::InProgress);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn sweep_skips_games_with_an_operation_in_flight() {
        let store = TestStore::slow(Duration::from_millis(300));
        let coord = Arc::new(Coordinator::with_seed(store, idle_config(), 5));
        let id = started(&coord).await;

        let roll = {
            let coord = Arc::clone(&coord);
            let id = id.clone();
            tokio::spawn(async move { coord.roll_dice(&id, "ann").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        let report = coord.sweep().await;
        assert!(report.evicted.is_empty());
        assert_eq!(report.busy, 1);
        assert!(coord.is_live(&id));

        roll.await.unwrap().unwrap();
        let report = coord.sweep().await;
        assert_eq!(report.evicted, vec![id]);
    }

    #[tokio::test]
    async fn bearing_off_the_last_checker_finishes_and_rates() {
        let store = TestStore::default();
        let coord = coordinator(store.clone());

        let mut points = [[0u8; 2]; POINTS];
        points[0][0] = 1;
        points[23][1] = 15;
        let board = Board::from_parts(points, [0, 0], [14, 0]).unwrap();
        let mut record = seated("endgame");
        record.engine = GameState::with_board(board, Color::White).snapshot();
        store.inner.save_game(&record).await.unwrap();

        let (_, mut rx) = coord.subscribe("endgame").await.unwrap();
        coord.force_dice("endgame", 1, 2).await;
        let outcome = coord
            .apply_move("endgame", "ann", MoveInput { from: 0, to: OFF })
            .await
            .unwrap();
        assert_eq!(outcome.winner, Some(Color::White));

        let view = coord.game_view("endgame").await.unwrap();
        assert_eq!(view.status, GameStatus::Finished);
        assert_eq!(view.winner, Some(Color::White));
        assert_eq!(view.white.rating, 1516);
        assert_eq!(view.black.as_ref().map(|s| s.rating), Some(1484));
        assert_eq!(
            view.rating_change,
            Some(RatingChange {
                white: (1500, 1516),
                black: (1500, 1484),
            })
        );

        let names: Vec<&str> = [rx.recv().await.unwrap(), rx.recv().await.unwrap()]
            .iter()
            .map(|b| b.event.name())
            .collect();
        assert_eq!(names, vec!["move_applied", "game_over"]);

        assert!(matches!(
            coord.roll_dice("endgame", "bob").await,
            Err(SessionError::InvalidState(_))
        ));

        let report = coord.sweep().await;
        assert_eq!(report.evicted, vec!["endgame".to_string()]);
    }

    #[tokio::test]
    async fn bar_entry_through_the_wire_encoding() {
        let store = TestStore::default();
        let coord = coordinator(store.clone());

        let mut points = Board::standard().snapshot().points;
        points[23][0] = 4;
        let board = Board::try_from(BoardSnapshot {
            points,
            bar: [1, 0],
            off: [0, 0],
        })
        .unwrap();
        let mut record = seated("bar");
        record.engine = GameState::with_board(board, Color::White).snapshot();
        store.inner.save_game(&record).await.unwrap();

        let roll = coord.force_dice("bar", 2, 5).await;
        assert_eq!(roll.legal_moves.len(), 2);
        assert!(matches!(
            coord
                .apply_move("bar", "ann", MoveInput { from: 12, to: 10 })
                .await,
            Err(SessionError::IllegalMove(_))
        ));
        coord
            .apply_move("bar", "ann", MoveInput { from: BAR, to: 22 })
            .await
            .unwrap();
        let view = coord.game_view("bar").await.unwrap();
        assert_eq!(view.board.bar, [0, 0]);
        assert_eq!(view.board.points[22], [1, 0]);
    }

    #[tokio::test]
    async fn resigning_abandons_and_credits_the_opponent() {
        let coord = coordinator(TestStore::default());
        let id = started(&coord).await;
        let view = coord.resign(&id, "bob").await.unwrap();
        assert_eq!(view.status, GameStatus::Abandoned);
        assert_eq!(view.winner, Some(Color::White));
        assert_eq!(view.phase, TurnPhase::Finished);
        assert!(matches!(
            coord.resign(&id, "ann").await,
            Err(SessionError::InvalidState(_))
        ));
    }

    #[tokio::test]
    async fn waiting_game_fills_its_second_seat() {
        let coord = coordinator(TestStore::default());
        let id = coord.create_game(Seat::new("ann", 1500)).await.unwrap().id;
        assert!(matches!(
            coord.roll_dice(&id, "ann").await,
            Err(SessionError::InvalidState(_))
        ));
        assert!(matches!(
            coord.join_game(&id, Seat::new("ann", 1500)).await,
            Err(SessionError::InvalidState(_))
        ));

        let view = coord.join_game(&id, Seat::new("bob", 1480)).await.unwrap();
        assert_eq!(view.status, GameStatus::InProgress);
        assert_eq!(view.black, Some(Seat::new("bob", 1480)));
        assert!(matches!(
            coord.join_game(&id, Seat::new("cat", 1500)).await,
            Err(SessionError::InvalidState(_))
        ));
        assert!(coord.roll_dice(&id, "ann").await.is_ok());
    }

    #[tokio::test]
    async fn spectators_watch_and_chat() {
        let coord = coordinator(TestStore::default());
        let id = started(&coord).await;

        assert!(matches!(
            coord.join_spectator(&id, "ann").await,
            Err(SessionError::InvalidState(_))
        ));
        let view = coord.join_spectator(&id, "sam").await.unwrap();
        assert_eq!(view.spectators, vec!["sam".to_string()]);
        let again = coord.join_spectator(&id, "sam").await.unwrap();
        assert_eq!(again.spectators.len(), 1);

        let message = coord.chat(&id, "sam", "  nice prime  ").await.unwrap();
        assert_eq!(message.text, "nice prime");
        coord.chat(&id, "bob", "thanks").await.unwrap();
        assert!(matches!(
            coord.chat(&id, "eve", "hi").await,
            Err(SessionError::NotParticipant { .. })
        ));
        assert!(matches!(
            coord.chat(&id, "ann", "   ").await,
            Err(SessionError::InvalidState(_))
        ));
        let too_long = "x".repeat(MAX_CHAT_LEN + 1);
        assert!(coord.chat(&id, "ann", &too_long).await.is_err());

        let view = coord.game_view(&id).await.unwrap();
        assert_eq!(view.chat.len(), 2);
    }

    #[tokio::test]
    async fn chat_log_keeps_the_latest_messages() {
        let coord = coordinator(TestStore::default());
        let id = started(&coord).await;
        for n in 0..CHAT_HISTORY + 5 {
            coord.chat(&id, "ann", &format!("msg {n}")).await.unwrap();
        }
        let view = coord.game_view(&id).await.unwrap();
        assert_eq!(view.chat.len(), CHAT_HISTORY);
        assert_eq!(view.chat[0].text, "msg 5");
    }

    #[tokio::test]
    async fn matchmaking_pairs_into_a_live_game() {
        let coord = coordinator(TestStore::default());
        assert_eq!(
            coord.find_match(Seat::new("ann", 1500)).await.unwrap(),
            MatchmakingOutcome::Waiting { position: 1 }
        );
        let MatchmakingOutcome::Matched { game } =
            coord.find_match(Seat::new("bob", 1550)).await.unwrap()
        else {
            panic!("expected a match");
        };
        assert_eq!(game.white.player_id, "ann");
        assert_eq!(game.black.map(|s| s.player_id), Some("bob".to_string()));
        assert!(coord.is_live(&game.id));
        assert!(!coord.leave_queue("ann"));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_moves_cannot_share_the_last_die() {
        let store = TestStore::slow(Duration::from_millis(20));
        let coord = Arc::new(Coordinator::with_seed(store, Config::default(), 11));
        let id = started(&coord).await;
        coord.force_dice(&id, 3, 4).await;
        coord
            .apply_move(&id, "ann", MoveInput { from: 23, to: 19 })
            .await
            .unwrap();

        let contenders = [MoveInput { from: 12, to: 9 }, MoveInput { from: 7, to: 4 }];
        let tasks: Vec<_> = contenders
            .into_iter()
            .map(|input| {
                let coord = Arc::clone(&coord);
                let id = id.clone();
                tokio::spawn(async move { coord.apply_move(&id, "ann", input).await })
            })
            .collect();

        let mut applied = 0;
        for task in tasks {
            match task.await.unwrap() {
                Ok(outcome) => {
                    applied += 1;
                    assert!(outcome.turn_ended);
                }
                Err(err) => assert!(matches!(err, SessionError::InvalidState(_)), "{err:?}"),
            }
        }
        assert_eq!(applied, 1);

        let view = coord.game_view(&id).await.unwrap();
        assert_eq!(view.history.len(), 2);
        assert_eq!(view.turn, Color::Black);
        let on_points: u32 = view.board.points.iter().map(|p| u32::from(p[0])).sum();
        let total = on_points + u32::from(view.board.bar[0]) + u32::from(view.board.off[0]);
        assert_eq!(total, 15);
    }

    #[tokio::test]
    async fn failed_pairing_keeps_the_waiting_player_queued() {
        let store = TestStore::default();
        let coord = coordinator(store.clone());
        coord.find_match(Seat::new("ann", 1500)).await.unwrap();

        store.failing.store(true, Ordering::SeqCst);
        let err = coord.find_match(Seat::new("bob", 1500)).await.unwrap_err();
        assert!(matches!(err, SessionError::PersistenceFailure(_)));
        assert_eq!(coord.live_games(), 0);

        store.failing.store(false, Ordering::SeqCst);
        let MatchmakingOutcome::Matched { game } =
            coord.find_match(Seat::new("bob", 1500)).await.unwrap()
        else {
            panic!("expected a match");
        };
        assert_eq!(game.white.player_id, "ann");
        assert!(!coord.leave_queue("ann"));
    }

    #[tokio::test]
    async fn evicted_games_reload_from_the_cache() {
        let store = TestStore::default();
        let coord = Coordinator::with_seed(store.clone(), idle_config(), 3);
        let id = started(&coord).await;
        coord.force_dice(&id, 3, 4).await;

        assert_eq!(coord.sweep().await.evicted, vec![id.clone()]);
        assert!(!coord.is_live(&id));

        let view = coord.game_view(&id).await.unwrap();
        assert_eq!(store.loads.load(Ordering::SeqCst), 0);
        assert_eq!(view.status, GameStatus::Paused);
        assert_eq!(view.dice.remaining(), vec![3, 4]);
    }

    #[tokio::test]
    async fn expired_cache_entries_fall_back_to_the_store() {
        let store = TestStore::default();
        let config = Config {
            cache_ttl: Duration::ZERO,
            ..idle_config()
        };
        let coord = Coordinator::with_seed(store.clone(), config, 3);
        let id = started(&coord).await;
        coord.sweep().await;
        tokio::time::sleep(Duration::from_millis(5)).await;

        let view = coord.game_view(&id).await.unwrap();
        assert_eq!(store.loads.load(Ordering::SeqCst), 1);
        assert_eq!(view.status, GameStatus::Paused);
    }
}
