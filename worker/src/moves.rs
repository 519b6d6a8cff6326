//! Translation between the engine's move dialect and the rules library's,
//! and inference of the move played between two consecutive records.
//!
//! The engine dialect encodes castling as the king moving to the rook's
//! square and leaves knight promotions implied; the rules dialect uses the
//! two-square king move and always spells the promotion piece. The board is
//! mirrored between plies, so all square talk is from the current side to
//! move's perspective.

use shakmaty::{Chess, File, Move, Position, Role, Setup, Square};
use thiserror::Error;
use tracing::warn;

use crate::board::position_fen;
use crate::planes::{board_from_planes, mirror_board};

#[derive(Debug, Error, PartialEq)]
pub enum MoveError {
    #[error("unparseable move {0:?}")]
    Unparseable(String),

    #[error("{0} is not legal in this position")]
    NotLegal(String),

    #[error("no legal move reaches the next recorded position")]
    NoCandidate,
}

/// Engine dialect → rules dialect.
pub fn clean(mv: &str, pos: &Chess) -> String {
    let bytes = mv.as_bytes();
    if mv.len() == 4
        && bytes[1] == b'7'
        && bytes[3] == b'8'
        && role_at(pos, &mv[0..2]) == Some(Role::Pawn)
    {
        return format!("{mv}n");
    }
    if mv == "e1h1" && role_at(pos, "e1") == Some(Role::King) {
        return "e1g1".into();
    }
    if mv == "e1a1" && role_at(pos, "e1") == Some(Role::King) {
        return "e1c1".into();
    }
    mv.to_string()
}

/// Rules dialect → engine dialect; inverse of [clean] on the forms it
/// rewrites.
pub fn unclean(mv: &str, pos: &Chess) -> String {
    if mv.len() == 5 && mv.ends_with('n') {
        return mv[..4].to_string();
    }
    if mv == "e1g1" && role_at(pos, "e1") == Some(Role::King) {
        return "e1h1".into();
    }
    if mv == "e1c1" && role_at(pos, "e1") == Some(Role::King) {
        return "e1a1".into();
    }
    mv.to_string()
}

fn role_at(pos: &Chess, square: &str) -> Option<Role> {
    let square: Square = square.parse().ok()?;
    pos.board().piece_at(square).map(|p| p.role)
}

/// Rules-dialect UCI rendering of a move.
pub fn library_uci(mv: &Move) -> String {
    match mv {
        Move::Normal {
            from,
            to,
            promotion,
            ..
        } => match promotion {
            Some(role) => format!("{}{}{}", from, to, role.char()),
            None => format!("{}{}", from, to),
        },
        Move::EnPassant { from, to } => format!("{}{}", from, to),
        Move::Castle { king, rook } => format!("{}{}", king, castle_king_to(*king, *rook)),
        Move::Put { .. } => unreachable!("drops do not occur in standard chess"),
    }
}

fn castle_king_to(king: Square, rook: Square) -> Square {
    let file = if rook.file() > king.file() {
        File::G
    } else {
        File::C
    };
    Square::from_coords(file, king.rank())
}

/// Resolve a rules-dialect UCI string against the legal moves of `pos`.
pub fn resolve(mv: &str, pos: &Chess) -> Result<Move, MoveError> {
    if mv.len() != 4 && mv.len() != 5 {
        return Err(MoveError::Unparseable(mv.into()));
    }
    let from: Square = mv[0..2]
        .parse()
        .map_err(|_| MoveError::Unparseable(mv.into()))?;
    let to: Square = mv[2..4]
        .parse()
        .map_err(|_| MoveError::Unparseable(mv.into()))?;
    let promotion = match mv.as_bytes().get(4) {
        Some(c) => {
            Some(Role::from_char(*c as char).ok_or_else(|| MoveError::Unparseable(mv.into()))?)
        }
        None => None,
    };

    pos.legal_moves()
        .into_iter()
        .find(|m| matches_squares(m, from, to, promotion))
        .ok_or_else(|| MoveError::NotLegal(mv.into()))
}

fn matches_squares(mv: &Move, from: Square, to: Square, promotion: Option<Role>) -> bool {
    match mv {
        Move::Normal {
            from: f,
            to: t,
            promotion: p,
            ..
        } => *f == from && *t == to && *p == promotion,
        Move::EnPassant { from: f, to: t } => *f == from && *t == to && promotion.is_none(),
        Move::Castle { king, rook } => {
            *king == from && castle_king_to(*king, *rook) == to && promotion.is_none()
        }
        _ => false,
    }
}

/// Infer the move played between `pos` and the placement encoded in the
/// next record's planes.
///
/// The next record is encoded from its own side to move's perspective, so
/// its board is mirrored once before comparison. Candidates are tried in
/// legal-move order; the first whose resulting placement matches wins.
pub fn infer_from_planes(pos: &Chess, next_planes: &[u8]) -> Result<Move, MoveError> {
    let target = mirror_board(&board_from_planes(next_planes));
    for candidate in pos.legal_moves() {
        let mut after = pos.clone();
        after.play_unchecked(candidate);
        if *after.board() == target {
            return Ok(candidate);
        }
    }
    let target_fen = shakmaty::fen::Fen::try_from_setup(Setup {
        board: target,
        ..Setup::empty()
    })
    .unwrap_or_else(shakmaty::fen::LossyFenError::ignore)
    .to_string();
    warn!(
        board = %position_fen(pos),
        planes = %target_fen,
        "couldn't infer next move from planes"
    );
    Err(MoveError::NoCandidate)
}
