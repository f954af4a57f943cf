//! Board model: 24 points, the bar and the borne-off trays.
//!
//! Point indices are zero-based. White (player 0) travels from point 23
//! towards point 0 and bears off below point 0; Black (player 1) travels from
//! point 0 towards point 23 and bears off above point 23.

use serde::{Deserialize, Serialize};

use crate::EngineError;

pub const POINTS: usize = 24;
pub const HOME_POINTS: usize = 6;
pub const CHECKERS_PER_SIDE: u8 = 15;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Color {
    White,
    Black,
}

impl Color {
    pub fn opponent(self) -> Color {
        match self {
            Color::White => Color::Black,
            Color::Black => Color::White,
        }
    }

    /// Player index used in the board's count pairs.
    pub fn index(self) -> usize {
        match self {
            Color::White => 0,
            Color::Black => 1,
        }
    }

    /// Point where a checker coming off the bar lands with `die`.
    pub fn entry_point(self, die: u8) -> usize {
        match self {
            Color::White => POINTS - die as usize,
            Color::Black => die as usize - 1,
        }
    }

    /// Destination of a checker on `point` moved `die` pips, if still on the board.
    pub fn advance(self, point: usize, die: u8) -> Option<usize> {
        let target = match self {
            Color::White => point as i32 - die as i32,
            Color::Black => point as i32 + die as i32,
        };
        (0..POINTS as i32).contains(&target).then_some(target as usize)
    }

    /// Pips needed to bear a checker off from `point`.
    pub fn distance_to_edge(self, point: usize) -> u8 {
        match self {
            Color::White => (point + 1) as u8,
            Color::Black => (POINTS - point) as u8,
        }
    }

    pub fn is_home(self, point: usize) -> bool {
        match self {
            Color::White => point < HOME_POINTS,
            Color::Black => (POINTS - HOME_POINTS..POINTS).contains(&point),
        }
    }

    /// Home points ordered from the bear-off edge outwards.
    pub fn home_points(self) -> impl Iterator<Item = usize> {
        (0..HOME_POINTS).map(move |offset| match self {
            Color::White => offset,
            Color::Black => POINTS - 1 - offset,
        })
    }
}

/// Checker counts per point, on the bar and borne off.
///
/// Fields are only written by the executor; everything else reads through
/// the accessors, and `Board` is `Copy` so every read hands out an
/// independent snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "BoardSnapshot", into = "BoardSnapshot")]
pub struct Board {
    pub(crate) points: [[u8; 2]; POINTS],
    pub(crate) bar: [u8; 2],
    pub(crate) off: [u8; 2],
}

impl Default for Board {
    fn default() -> Self {
        Self::standard()
    }
}

impl Board {
    /// Opening position. Each side keeps five checkers on its back point,
    /// five in the outer board, three on its bar-side outer point and two in
    /// its home board; Black mirrors White.
    pub fn standard() -> Self {
        let mut points = [[0u8; 2]; POINTS];
        for (point, count) in [(23, 5), (12, 5), (7, 3), (5, 2)] {
            points[point][Color::White.index()] = count;
            points[POINTS - 1 - point][Color::Black.index()] = count;
        }
        Self {
            points,
            bar: [0, 0],
            off: [0, 0],
        }
    }

    /// Builds a board from raw counts, rejecting anything that breaks the
    /// mixed-point or fifteen-checker invariants.
    pub fn from_parts(
        points: [[u8; 2]; POINTS],
        bar: [u8; 2],
        off: [u8; 2],
    ) -> Result<Self, EngineError> {
        let board = Self { points, bar, off };
        board.validate()?;
        Ok(board)
    }

    pub fn validate(&self) -> Result<(), EngineError> {
        for (idx, slot) in self.points.iter().enumerate() {
            if slot[0] > 0 && slot[1] > 0 {
                return Err(EngineError::InvalidBoard(format!(
                    "point {idx} holds checkers of both sides"
                )));
            }
        }
        for color in [Color::White, Color::Black] {
            let total = self.total(color);
            if total != CHECKERS_PER_SIDE as u32 {
                return Err(EngineError::InvalidBoard(format!(
                    "{color:?} has {total} checkers, expected {CHECKERS_PER_SIDE}"
                )));
            }
        }
        Ok(())
    }

    pub fn count(&self, point: usize, color: Color) -> u8 {
        self.points
            .get(point)
            .map(|slot| slot[color.index()])
            .unwrap_or(0)
    }

    pub fn bar(&self, color: Color) -> u8 {
        self.bar[color.index()]
    }

    pub fn off(&self, color: Color) -> u8 {
        self.off[color.index()]
    }

    /// Checkers of `color` on points, on the bar and borne off.
    pub fn total(&self, color: Color) -> u32 {
        let on_points: u32 = self.points.iter().map(|s| s[color.index()] as u32).sum();
        on_points + self.bar(color) as u32 + self.off(color) as u32
    }

    /// Remaining pips `color` needs to bear everything off.
    pub fn pip_count(&self, color: Color) -> u32 {
        let on_points: u32 = (0..POINTS)
            .map(|p| self.count(p, color) as u32 * color.distance_to_edge(p) as u32)
            .sum();
        on_points + self.bar(color) as u32 * (POINTS as u32 + 1)
    }

    pub fn snapshot(&self) -> BoardSnapshot {
        BoardSnapshot::from(*self)
    }
}

/// Wire and storage form of a [`Board`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BoardSnapshot {
    pub points: Vec<[u8; 2]>,
    pub bar: [u8; 2],
    pub off: [u8; 2],
}

impl From<Board> for BoardSnapshot {
    fn from(board: Board) -> Self {
        Self {
            points: board.points.to_vec(),
            bar: board.bar,
            off: board.off,
        }
    }
}

impl TryFrom<BoardSnapshot> for Board {
    type Error = EngineError;

    fn try_from(snapshot: BoardSnapshot) -> Result<Self, Self::Error> {
        let points: [[u8; 2]; POINTS] = snapshot.points.try_into().map_err(|v: Vec<_>| {
            EngineError::InvalidBoard(format!("expected {POINTS} points, got {}", v.len()))
        })?;
        Board::from_parts(points, snapshot.bar, snapshot.off)
    }
}
