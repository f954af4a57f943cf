//! Legal move generation.

use serde::{Deserialize, Serialize};

use crate::board::{Board, Color, POINTS};
use crate::dice::DiceState;
use crate::EngineError;

/// Wire value standing for the bar as a move origin.
pub const BAR: i32 = 24;
/// Wire value standing for the bear-off tray as a move destination.
pub const OFF: i32 = -1;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Origin {
    Bar,
    Point(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "i32", into = "i32")]
pub enum Destination {
    Point(u8),
    Off,
}

impl From<Origin> for i32 {
    fn from(origin: Origin) -> Self {
        match origin {
            Origin::Bar => BAR,
            Origin::Point(p) => p as i32,
        }
    }
}

impl TryFrom<i32> for Origin {
    type Error = EngineError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            BAR => Ok(Origin::Bar),
            v if (0..POINTS as i32).contains(&v) => Ok(Origin::Point(v as u8)),
            v => Err(EngineError::InvalidPoint(v)),
        }
    }
}

impl From<Destination> for i32 {
    fn from(destination: Destination) -> Self {
        match destination {
            Destination::Off => OFF,
            Destination::Point(p) => p as i32,
        }
    }
}

impl TryFrom<i32> for Destination {
    type Error = EngineError;

    fn try_from(value: i32) -> Result<Self, Self::Error> {
        match value {
            OFF => Ok(Destination::Off),
            v if (0..POINTS as i32).contains(&v) => Ok(Destination::Point(v as u8)),
            v => Err(EngineError::InvalidPoint(v)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GameMove {
    pub from: Origin,
    pub to: Destination,
    pub player: Color,
}

impl GameMove {
    pub fn new(from: Origin, to: Destination, player: Color) -> Self {
        Self { from, to, player }
    }

    /// Parses the integer encoding used at the transport boundary.
    pub fn from_wire(from: i32, to: i32, player: Color) -> Result<Self, EngineError> {
        Ok(Self {
            from: Origin::try_from(from)?,
            to: Destination::try_from(to)?,
            player,
        })
    }
}

/// A legal move together with the die value it spends.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Play {
    pub mv: GameMove,
    pub die: u8,
}

/// True when every checker of `color` is in its home board or borne off.
pub fn can_bear_off(board: &Board, color: Color) -> bool {
    if board.bar(color) > 0 {
        return false;
    }
    let home: u32 = color
        .home_points()
        .map(|p| board.count(p, color) as u32)
        .sum();
    home + board.off(color) as u32 == board.total(color)
}

pub fn legal_moves(board: &Board, color: Color, dice: &DiceState) -> Vec<GameMove> {
    legal_plays(board, color, dice)
        .into_iter()
        .map(|play| play.mv)
        .collect()
}

/// Every legal single move for the unspent dice. A move reachable with
/// several dice (bearing off with an oversized die) is listed once, paired
/// with the smallest die that allows it.
pub fn legal_plays(board: &Board, color: Color, dice: &DiceState) -> Vec<Play> {
    let values = dice.available_values();
    let mut plays: Vec<Play> = Vec::new();
    if values.is_empty() {
        return plays;
    }
    let opponent = color.opponent();

    if board.bar(color) > 0 {
        for die in values {
            let entry = color.entry_point(die);
            if board.count(entry, opponent) <= 1 {
                push_unique(
                    &mut plays,
                    Play {
                        mv: GameMove::new(Origin::Bar, Destination::Point(entry as u8), color),
                        die,
                    },
                );
            }
        }
        return plays;
    }

    let bearing_off = can_bear_off(board, color);
    for die in values {
        if bearing_off {
            for point in color.home_points() {
                if board.count(point, color) == 0 {
                    continue;
                }
                let distance = color.distance_to_edge(point);
                let exact = distance == die;
                let overage = distance < die && !has_checker_behind(board, color, distance);
                if exact || overage {
                    push_unique(
                        &mut plays,
                        Play {
                            mv: GameMove::new(
                                Origin::Point(point as u8),
                                Destination::Off,
                                color,
                            ),
                            die,
                        },
                    );
                }
            }
        }

        for point in 0..POINTS {
            if board.count(point, color) == 0 {
                continue;
            }
            let Some(target) = color.advance(point, die) else {
                continue;
            };
            if board.count(target, opponent) > 1 {
                continue;
            }
            push_unique(
                &mut plays,
                Play {
                    mv: GameMove::new(
                        Origin::Point(point as u8),
                        Destination::Point(target as u8),
                        color,
                    ),
                    die,
                },
            );
        }
    }
    plays
}

/// Any of `color`'s checkers on a home point further from the edge than `distance`.
fn has_checker_behind(board: &Board, color: Color, distance: u8) -> bool {
    color
        .home_points()
        .filter(|&p| color.distance_to_edge(p) > distance)
        .any(|p| board.count(p, color) > 0)
}

fn push_unique(plays: &mut Vec<Play>, play: Play) {
    if !plays.iter().any(|existing| existing.mv == play.mv) {
        plays.push(play);
    }
}
