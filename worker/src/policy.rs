//! The engine's policy move table: one slot per from-to pair a queen or a
//! knight could traverse on an empty board, plus explicit promotion forms.
//!
//! Knight promotions are implied: they reuse the bare queen-ray slot for
//! the same from-to pair, so only queen, rook and bishop promotions carry a
//! suffix of their own.

use std::collections::HashMap;

use lazy_static::lazy_static;

/// Number of entries in the policy table.
pub const NUM_MOVES: usize = 1858;

lazy_static! {
    /// Policy index → engine-dialect UCI move.
    pub static ref MOVES: Vec<String> = generate_moves();
    /// Engine-dialect UCI move → policy index.
    pub static ref MOVES_LOOKUP: HashMap<&'static str, usize> = MOVES
        .iter()
        .enumerate()
        .map(|(i, m)| (m.as_str(), i))
        .collect();
}

/// Queen ray directions, (file, rank) deltas.
const QUEEN_RAYS: [(i32, i32); 8] = [
    (0, 1),
    (1, 1),
    (1, 0),
    (1, -1),
    (0, -1),
    (-1, -1),
    (-1, 0),
    (-1, 1),
];

/// Knight jumps, clockwise from north-north-east.
const KNIGHT_JUMPS: [(i32, i32); 8] = [
    (1, 2),
    (2, 1),
    (2, -1),
    (1, -2),
    (-1, -2),
    (-2, -1),
    (-2, 1),
    (-1, 2),
];

fn square_name(file: i32, rank: i32) -> String {
    format!("{}{}", (b'a' + file as u8) as char, rank + 1)
}

fn on_board(file: i32, rank: i32) -> bool {
    (0..8).contains(&file) && (0..8).contains(&rank)
}

fn generate_moves() -> Vec<String> {
    let mut moves = Vec::with_capacity(NUM_MOVES);
    for from_rank in 0..8 {
        for from_file in 0..8 {
            let from = square_name(from_file, from_rank);
            for (df, dr) in QUEEN_RAYS {
                for distance in 1..8 {
                    let (file, rank) = (from_file + df * distance, from_rank + dr * distance);
                    if !on_board(file, rank) {
                        break;
                    }
                    moves.push(format!("{}{}", from, square_name(file, rank)));
                }
            }
            for (df, dr) in KNIGHT_JUMPS {
                let (file, rank) = (from_file + df, from_rank + dr);
                if on_board(file, rank) {
                    moves.push(format!("{}{}", from, square_name(file, rank)));
                }
            }
        }
    }
    for from_file in 0..8 {
        for df in [-1, 0, 1] {
            let to_file = from_file + df;
            if !(0..8).contains(&to_file) {
                continue;
            }
            for suffix in ['q', 'r', 'b'] {
                moves.push(format!(
                    "{}{}{}",
                    square_name(from_file, 6),
                    square_name(to_file, 7),
                    suffix
                ));
            }
        }
    }
    debug_assert_eq!(moves.len(), NUM_MOVES);
    moves
}
