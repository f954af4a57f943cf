//! Turn and dice state machine wrapped around a board.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::board::{Board, Color, CHECKERS_PER_SIDE};
use crate::dice::DiceState;
use crate::executor::apply_move;
use crate::moves::{legal_plays, GameMove, Play};
use crate::EngineError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnPhase {
    AwaitingRoll,
    Moving,
    Finished,
}

/// One applied move as kept in the history log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveRecord {
    pub turn: u32,
    #[serde(flatten)]
    pub mv: GameMove,
    pub die: u8,
    pub hit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RollOutcome {
    pub player: Color,
    pub dice: [u8; 2],
    pub legal_moves: Vec<GameMove>,
    /// No legal move existed, so the turn already passed to the opponent.
    pub turn_passed: bool,
    pub next_turn: Color,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MoveOutcome {
    pub record: MoveRecord,
    pub turn_ended: bool,
    pub next_turn: Color,
    pub winner: Option<Color>,
    /// Legal moves left for the same player; empty once the turn ends.
    pub legal_moves: Vec<GameMove>,
}

/// Live game: board, dice and whose turn it is.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GameState {
    board: Board,
    dice: DiceState,
    turn: Color,
    turn_number: u32,
    history: Vec<MoveRecord>,
}

impl Default for GameState {
    fn default() -> Self {
        Self::new()
    }
}

impl GameState {
    pub fn new() -> Self {
        Self::with_board(Board::standard(), Color::White)
    }

    pub fn with_board(board: Board, turn: Color) -> Self {
        Self {
            board,
            dice: DiceState::none(),
            turn,
            turn_number: 1,
            history: Vec::new(),
        }
    }

    pub fn board(&self) -> Board {
        self.board
    }

    pub fn dice(&self) -> DiceState {
        self.dice.clone()
    }

    pub fn turn(&self) -> Color {
        self.turn
    }

    pub fn turn_number(&self) -> u32 {
        self.turn_number
    }

    pub fn history(&self) -> &[MoveRecord] {
        &self.history
    }

    pub fn phase(&self) -> TurnPhase {
        if self.is_game_over() {
            TurnPhase::Finished
        } else if self.dice.is_rolled() {
            TurnPhase::Moving
        } else {
            TurnPhase::AwaitingRoll
        }
    }

    pub fn is_game_over(&self) -> bool {
        self.winner().is_some()
    }

    pub fn winner(&self) -> Option<Color> {
        [Color::White, Color::Black]
            .into_iter()
            .find(|c| self.board.off(*c) == CHECKERS_PER_SIDE)
    }

    pub fn legal_moves(&self) -> Vec<GameMove> {
        if self.is_game_over() {
            return Vec::new();
        }
        legal_plays(&self.board, self.turn, &self.dice)
            .into_iter()
            .map(|p| p.mv)
            .collect()
    }

    pub fn roll<R: Rng + ?Sized>(&mut self, rng: &mut R) -> Result<RollOutcome, EngineError> {
        self.ensure_can_roll()?;
        let dice = DiceState::roll(rng);
        Ok(self.start_moving(dice))
    }

    /// Rolls fixed values; used to replay a known roll.
    pub fn set_dice(&mut self, first: u8, second: u8) -> Result<RollOutcome, EngineError> {
        self.ensure_can_roll()?;
        let dice = DiceState::from_roll(first, second)?;
        Ok(self.start_moving(dice))
    }

    fn ensure_can_roll(&self) -> Result<(), EngineError> {
        match self.phase() {
            TurnPhase::Finished => Err(EngineError::GameOver),
            TurnPhase::Moving => Err(EngineError::DiceAlreadyRolled),
            TurnPhase::AwaitingRoll => Ok(()),
        }
    }

    fn start_moving(&mut self, dice: DiceState) -> RollOutcome {
        let player = self.turn;
        let values = dice.values().unwrap_or_default();
        self.dice = dice;
        let legal_moves = self.legal_moves();
        let turn_passed = legal_moves.is_empty();
        if turn_passed {
            self.end_turn();
        }
        RollOutcome {
            player,
            dice: values,
            legal_moves,
            turn_passed,
            next_turn: self.turn,
        }
    }

    /// Validates `mv` against the current legal set, applies it and advances
    /// the turn when the dice are spent or nothing else can move.
    pub fn play(&mut self, mv: GameMove) -> Result<MoveOutcome, EngineError> {
        match self.phase() {
            TurnPhase::Finished => return Err(EngineError::GameOver),
            TurnPhase::AwaitingRoll => return Err(EngineError::NoDiceRolled),
            TurnPhase::Moving => {}
        }
        if mv.player != self.turn {
            return Err(EngineError::NotYourTurn);
        }
        let Play { die, .. } = legal_plays(&self.board, self.turn, &self.dice)
            .into_iter()
            .find(|p| p.mv == mv)
            .ok_or(EngineError::IllegalMove)?;

        let hit = apply_move(&mut self.board, mv);
        self.dice.consume(die);
        let record = MoveRecord {
            turn: self.turn_number,
            mv,
            die,
            hit,
        };
        self.history.push(record);

        if let Some(winner) = self.winner() {
            self.dice.clear();
            return Ok(MoveOutcome {
                record,
                turn_ended: true,
                next_turn: self.turn,
                winner: Some(winner),
                legal_moves: Vec::new(),
            });
        }

        let legal_moves = if self.dice.is_exhausted() {
            Vec::new()
        } else {
            self.legal_moves()
        };
        let turn_ended = legal_moves.is_empty();
        if turn_ended {
            self.end_turn();
        }
        Ok(MoveOutcome {
            record,
            turn_ended,
            next_turn: self.turn,
            winner: None,
            legal_moves,
        })
    }

    fn end_turn(&mut self) {
        self.dice.clear();
        self.turn = self.turn.opponent();
        self.turn_number += 1;
    }

    pub fn snapshot(&self) -> EngineSnapshot {
        EngineSnapshot {
            board: self.board,
            dice: self.dice.clone(),
            turn: self.turn,
            turn_number: self.turn_number,
            history: self.history.clone(),
        }
    }

    /// Rebuilds a live game exactly, partially spent dice included. A roll
    /// with nothing left to play is closed out so the next player can roll.
    pub fn restore(snapshot: EngineSnapshot) -> Result<Self, EngineError> {
        snapshot.board.validate()?;
        let mut game = Self {
            board: snapshot.board,
            dice: snapshot.dice,
            turn: snapshot.turn,
            turn_number: snapshot.turn_number.max(1),
            history: snapshot.history,
        };
        if game.dice.is_rolled() && !game.is_game_over() && game.legal_moves().is_empty() {
            game.end_turn();
        }
        Ok(game)
    }
}

/// Persisted form of a [`GameState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineSnapshot {
    pub board: Board,
    pub dice: DiceState,
    pub turn: Color,
    pub turn_number: u32,
    #[serde(default)]
    pub history: Vec<MoveRecord>,
}

impl Default for EngineSnapshot {
    fn default() -> Self {
        GameState::new().snapshot()
    }
}
