//! Applies validated moves to a board.

use crate::board::Board;
use crate::moves::{Destination, GameMove, Origin};

/// Moves one checker, capturing a lone opposing checker on the destination.
/// Returns whether a checker was hit.
///
/// The caller must have checked `mv` against the current legal set; nothing
/// here re-validates it.
pub(crate) fn apply_move(board: &mut Board, mv: GameMove) -> bool {
    let me = mv.player.index();
    let them = mv.player.opponent().index();

    match mv.from {
        Origin::Bar => board.bar[me] -= 1,
        Origin::Point(p) => board.points[p as usize][me] -= 1,
    }

    let hit = match mv.to {
        Destination::Off => {
            board.off[me] += 1;
            false
        }
        Destination::Point(p) => {
            let slot = &mut board.points[p as usize];
            let hit = slot[them] == 1;
            if hit {
                slot[them] = 0;
                board.bar[them] += 1;
            }
            board.points[p as usize][me] += 1;
            hit
        }
    };

    debug_assert!(board.validate().is_ok(), "{mv:?} left an invalid board");
    hit
}
