//! The tracked game position. It is mirrored after every ply so the side
//! to move is always "white", matching the convention the planes are
//! encoded under.

use shakmaty::fen::Fen;
use shakmaty::{CastlingMode, Chess, EnPassantMode, FromSetup, Position, PositionError, Square};

use crate::planes::mirror_board;

/// Mirror a position wholesale: board, turn, castling rights and
/// en-passant square.
pub fn mirror_position(pos: Chess) -> Result<Chess, PositionError<Chess>> {
    let mut setup = pos.to_setup(EnPassantMode::Legal);
    setup.board = mirror_board(&setup.board);
    setup.turn = !setup.turn;
    setup.castling_rights = setup.castling_rights.flip_vertical();
    setup.ep_square = setup.ep_square.map(Square::flip_vertical);
    Chess::from_setup(setup, CastlingMode::Standard)
}

/// FEN of the tracked position, as handed to the analyzer.
pub fn position_fen(pos: &Chess) -> String {
    Fen::from_position(pos, EnPassantMode::Legal).to_string()
}

/// Number of pieces left on the board.
pub fn piece_count(pos: &Chess) -> usize {
    pos.board().occupied().count()
}

#[cfg(test)]
mod tests {
    use shakmaty::{Move, Role};

    use super::*;

    #[test]
    fn test_initial_position_fen() {
        assert_eq!(
            position_fen(&Chess::default()),
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
    }

    #[test]
    fn test_mirror_after_first_move_is_white_to_move() {
        let mut pos = Chess::default();
        pos.play_unchecked(Move::Normal {
            role: Role::Pawn,
            from: Square::E2,
            capture: None,
            to: Square::E4,
            promotion: None,
        });
        let mirrored = mirror_position(pos).unwrap();

        // Black's reply is now encoded as a white move from the seventh
        // rank; the pawn that moved sits on e5 as a black pawn.
        assert_eq!(
            position_fen(&mirrored),
            "rnbqkbnr/pppp1ppp/8/4p3/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
    }

    #[test]
    fn test_mirror_twice_restores_the_position() {
        let mut pos = Chess::default();
        pos.play_unchecked(Move::Normal {
            role: Role::Knight,
            from: Square::G1,
            capture: None,
            to: Square::F3,
            promotion: None,
        });
        let fen = position_fen(&pos);

        let there_and_back = mirror_position(mirror_position(pos).unwrap()).unwrap();
        assert_eq!(position_fen(&there_and_back), fen);
    }

    #[test]
    fn test_piece_count() {
        assert_eq!(piece_count(&Chess::default()), 32);
    }
}
