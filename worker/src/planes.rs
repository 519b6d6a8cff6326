//! Rebuilding piece placement from a record's packed input planes.

use shakmaty::{Board, Color, File, Piece, Rank, Role, Square};

/// Piece order of the twelve leading planes: the side to move's pieces
/// first, then the opponent's. The encoding always has the side to move as
/// "white".
pub(crate) const PLANE_PIECES: [Piece; 12] = [
    Piece { color: Color::White, role: Role::Pawn },
    Piece { color: Color::White, role: Role::Knight },
    Piece { color: Color::White, role: Role::Bishop },
    Piece { color: Color::White, role: Role::Rook },
    Piece { color: Color::White, role: Role::Queen },
    Piece { color: Color::White, role: Role::King },
    Piece { color: Color::Black, role: Role::Pawn },
    Piece { color: Color::Black, role: Role::Knight },
    Piece { color: Color::Black, role: Role::Bishop },
    Piece { color: Color::Black, role: Role::Rook },
    Piece { color: Color::Black, role: Role::Queen },
    Piece { color: Color::Black, role: Role::King },
];

/// Decode the piece placement encoded in a record's planes field.
///
/// Each plane is eight rank bytes, first rank first; bit `7 - f` of a rank
/// byte is file `f`. The result is as observed by the side to move.
pub fn board_from_planes(planes: &[u8]) -> Board {
    let mut board = Board::empty();
    for (i, piece) in PLANE_PIECES.iter().enumerate() {
        let plane = &planes[i * 8..(i + 1) * 8];
        for (rank, byte) in plane.iter().enumerate() {
            for file in 0..8u32 {
                if (byte >> (7 - file)) & 1 == 1 {
                    let square = Square::from_coords(File::new(file), Rank::new(rank as u32));
                    board.set_piece_at(square, *piece);
                }
            }
        }
    }
    board
}

/// Mirror a board: swap piece colors and reflect ranks.
pub fn mirror_board(board: &Board) -> Board {
    let mut mirrored = Board::empty();
    for square in Square::ALL {
        if let Some(piece) = board.piece_at(square) {
            mirrored.set_piece_at(
                square.flip_vertical(),
                Piece {
                    color: !piece.color,
                    role: piece.role,
                },
            );
        }
    }
    mirrored
}

/// Inverse of [board_from_planes], for building test fixtures.
#[cfg(test)]
pub(crate) fn planes_from_board(board: &Board) -> [u8; crate::v4::PLANES_BYTES] {
    let mut planes = [0u8; crate::v4::PLANES_BYTES];
    for (i, piece) in PLANE_PIECES.iter().enumerate() {
        for square in Square::ALL {
            if board.piece_at(square) == Some(*piece) {
                let rank = u32::from(square.rank()) as usize;
                let file = u32::from(square.file());
                planes[i * 8 + rank] |= 1 << (7 - file);
            }
        }
    }
    planes
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_initial_position() {
        let board = Board::default();
        let planes = planes_from_board(&board);

        assert_eq!(board_from_planes(&planes), board);
    }

    #[test]
    fn test_single_piece_bit_layout() {
        // A white knight on c2: plane 1, rank byte 1, bit 7-2.
        let mut planes = [0u8; crate::v4::PLANES_BYTES];
        planes[8 + 1] = 1 << 5;

        let board = board_from_planes(&planes);
        assert_eq!(
            board.piece_at(Square::C2),
            Some(Piece {
                color: Color::White,
                role: Role::Knight
            })
        );
        assert_eq!(board.occupied().count(), 1);
    }

    #[test]
    fn test_mirror_swaps_colors_and_ranks() {
        let mut board = Board::empty();
        board.set_piece_at(
            Square::E1,
            Piece { color: Color::White, role: Role::King },
        );
        board.set_piece_at(
            Square::A7,
            Piece { color: Color::Black, role: Role::Pawn },
        );

        let mirrored = mirror_board(&board);
        assert_eq!(
            mirrored.piece_at(Square::E8),
            Some(Piece { color: Color::Black, role: Role::King })
        );
        assert_eq!(
            mirrored.piece_at(Square::A2),
            Some(Piece { color: Color::White, role: Role::Pawn })
        );
        assert_eq!(mirrored.occupied().count(), 2);
    }

    #[test]
    fn test_mirror_is_an_involution() {
        let board = Board::default();
        assert_eq!(mirror_board(&mirror_board(&board)), board);
    }
}
