//! The rescore state machine: walk a game record by record, work out the
//! move that was played, ask the analyzer for a fresh evaluation and splice
//! the new scores into an otherwise byte-identical record stream.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use shakmaty::{Chess, Move, Position};
use thiserror::Error;
use tracing::warn;

use crate::board::{mirror_position, piece_count, position_fen};
use crate::engine::{Analysis, Analyzer, EngineError};
use crate::moves::{clean, infer_from_planes, library_uci, resolve, unclean, MoveError};
use crate::policy::{MOVES, MOVES_LOOKUP};
use crate::v4::{is_one_hot, nanargmax, records, V4Record};

/// Games are abandoned once this few pieces remain (tablebase territory).
pub const PIECE_CUTOFF: usize = 5;

#[derive(Debug, Error)]
pub enum ScoreError {
    #[error("bad gzip stream: {0}")]
    Gzip(std::io::Error),

    #[error(transparent)]
    Move(#[from] MoveError),

    #[error(transparent)]
    Engine(#[from] EngineError),

    #[error("mirrored position is not valid: {0}")]
    IllegalPosition(String),
}

/// Rescore one gzipped game, returning the rewritten gzip stream.
pub async fn score_file<A: Analyzer + Send>(
    data: &[u8],
    analyzer: &mut A,
    nodes: u32,
) -> Result<Vec<u8>, ScoreError> {
    let mut raw = Vec::new();
    GzDecoder::new(data)
        .read_to_end(&mut raw)
        .map_err(ScoreError::Gzip)?;

    let game: Vec<V4Record> = records(&raw).collect();
    let rescored = score_records(&game, Chess::default(), analyzer, nodes).await?;

    let mut encoder = GzEncoder::new(Vec::with_capacity(rescored.len() / 2), Compression::default());
    encoder.write_all(&rescored).map_err(ScoreError::Gzip)?;
    encoder.finish().map_err(ScoreError::Gzip)
}

/// Walk the records pairwise from `pos`, rescoring each and advancing the
/// tracked position by the played move (then mirroring, so the side to move
/// stays "white").
async fn score_records<A: Analyzer + Send>(
    game: &[V4Record],
    mut pos: Chess,
    analyzer: &mut A,
    nodes: u32,
) -> Result<Vec<u8>, ScoreError> {
    let mut rescored = Vec::with_capacity(game.len() * crate::v4::V4_BYTES);

    for pair in game.windows(2) {
        let (current, next) = (&pair[0], &pair[1]);
        if piece_count(&pos) <= PIECE_CUTOFF {
            break;
        }

        // Which move was actually played between these two records?
        let probs = current.probs();
        let played = if is_one_hot(&probs) {
            let index = nanargmax(&probs).expect("a one-hot vector has a maximum");
            resolve(&clean(&MOVES[index], &pos), &pos)?
        } else {
            infer_from_planes(&pos, &next.planes)?
        };

        let rewritten = rescore_record(current, analyzer, &pos, nodes, Some(&played)).await?;
        rescored.extend_from_slice(&rewritten.encode());

        pos.play_unchecked(played);
        pos = mirror_position(pos).map_err(|err| ScoreError::IllegalPosition(err.to_string()))?;
    }

    // The pairwise walk leaves the final record behind. It gets the same
    // treatment, minus a played move to boost, under the same cutoff.
    if !rescored.is_empty() && piece_count(&pos) > PIECE_CUTOFF {
        let last = game.last().expect("pairs were produced, the game is non-empty");
        let rewritten = rescore_record(last, analyzer, &pos, nodes, None).await?;
        rescored.extend_from_slice(&rewritten.encode());
    }

    Ok(rescored)
}

/// Evaluate `pos` and emit `record` with the fresh q spliced in. Under
/// multi-node evaluation the probability vector is rebuilt from the
/// search's visit counts as well.
async fn rescore_record<A: Analyzer + Send>(
    record: &V4Record,
    analyzer: &mut A,
    pos: &Chess,
    nodes: u32,
    played: Option<&Move>,
) -> Result<V4Record, ScoreError> {
    let analysis = analyzer.analyse(&position_fen(pos), nodes).await?;
    let q = analysis.score.q();

    let mut rewritten = record.clone();
    rewritten.root_q = q;
    rewritten.best_q = q;

    if nodes > 1 {
        if let Some(played) = played {
            boost_probs(&mut rewritten, &analysis, pos, played, nodes);
        }
    }
    Ok(rewritten)
}

/// Rebuild the probability vector from the search's visit counts. The move
/// that was actually played gets a booster added to its visits so it keeps
/// dominating the distribution regardless of what the fresh search
/// preferred.
fn boost_probs(record: &mut V4Record, analysis: &Analysis, pos: &Chess, played: &Move, nodes: u32) {
    let booster = (nodes as f64 / 0.7).ceil() as u64 - nodes as u64;

    let played_engine = unclean(&library_uci(played), pos);
    let Some(&played_index) = MOVES_LOOKUP.get(played_engine.as_str()) else {
        warn!(%played_engine, "played move missing from the policy table, keeping probs");
        return;
    };

    let mut visits: Vec<(usize, u64)> = Vec::with_capacity(analysis.pvs.len() + 1);
    let mut total = 0u64;
    for pv in &analysis.pvs {
        let engine_form = unclean(&pv.first_move, pos);
        match MOVES_LOOKUP.get(engine_form.as_str()) {
            Some(&index) => {
                visits.push((index, pv.visits));
                total += pv.visits;
            }
            None => warn!(%engine_form, "pv move missing from the policy table, ignoring"),
        }
    }
    if !visits.iter().any(|(index, _)| *index == played_index) {
        visits.push((played_index, 0));
    }

    let denominator = (total + booster) as f32;
    let mut probs = record.probs();
    for p in probs.iter_mut() {
        if !p.is_nan() {
            *p = 0.0;
        }
    }
    for (index, v) in visits {
        let v = if index == played_index { v + booster } else { v };
        probs[index] = v as f32 / denominator;
    }
    record.set_probs(&probs);
    record.best_d = played_index as f32;
}

#[cfg(test)]
mod tests {
    use shakmaty::{CastlingMode, Color, FromSetup, Piece, Role, Setup, Square};

    use crate::engine::{PrincipalVariation, Score};
    use crate::planes::{mirror_board, planes_from_board};
    use crate::v4::{PLANES_BYTES, PROBS_BYTES, PROBS_LEN, V4_BYTES};

    use super::*;

    /// Analyzer returning a fixed result, remembering what it was asked.
    struct StubAnalyzer {
        score: Score,
        pvs: Vec<PrincipalVariation>,
        fens: Vec<String>,
    }

    impl StubAnalyzer {
        fn cp(score: i32) -> Self {
            Self {
                score: Score::Cp(score),
                pvs: Vec::new(),
                fens: Vec::new(),
            }
        }
    }

    #[async_trait::async_trait]
    impl Analyzer for StubAnalyzer {
        async fn analyse(&mut self, fen: &str, _nodes: u32) -> Result<Analysis, EngineError> {
            self.fens.push(fen.to_string());
            Ok(Analysis {
                score: self.score,
                pvs: self.pvs.clone(),
            })
        }
    }

    fn blank_record() -> V4Record {
        V4Record {
            version: 4,
            probs: [0u8; PROBS_BYTES],
            planes: [0u8; PLANES_BYTES],
            us_ooo: 1,
            us_oo: 1,
            them_ooo: 1,
            them_oo: 1,
            stm: 0,
            rule50_count: 0,
            move_count: 0,
            winner: 1,
            root_q: 0.9,
            best_q: 0.9,
            root_d: 0.25,
            best_d: 0.0,
        }
    }

    fn one_hot_record(engine_move: &str) -> V4Record {
        let mut record = blank_record();
        let mut probs = vec![f32::NAN; PROBS_LEN];
        probs[MOVES_LOOKUP[engine_move]] = 1.0;
        record.set_probs(&probs);
        record
    }

    fn searched_record() -> V4Record {
        let mut record = blank_record();
        let mut probs = vec![f32::NAN; PROBS_LEN];
        probs[MOVES_LOOKUP["e2e4"]] = 0.6;
        probs[MOVES_LOOKUP["d2d4"]] = 0.4;
        record.set_probs(&probs);
        record
    }

    /// Planes a record following `pos` would carry after `moves` are played
    /// from it, as seen by the new side to move.
    fn planes_after(pos: &Chess, mv: &str) -> [u8; PLANES_BYTES] {
        let mut after = pos.clone();
        let played = resolve(mv, pos).unwrap();
        after.play_unchecked(played);
        planes_from_board(&mirror_board(after.board()))
    }

    fn gzip(records: &[V4Record]) -> Vec<u8> {
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        for record in records {
            encoder.write_all(&record.encode()).unwrap();
        }
        encoder.finish().unwrap()
    }

    fn gunzip(data: &[u8]) -> Vec<u8> {
        let mut out = Vec::new();
        GzDecoder::new(data).read_to_end(&mut out).unwrap();
        out
    }

    #[tokio::test]
    async fn test_one_hot_game_is_rescored_without_consulting_planes() {
        // Two records; the second one's planes are deliberately blank, so
        // only the one-hot probs can name the move.
        let game = gzip(&[one_hot_record("e2e4"), blank_record()]);
        let mut analyzer = StubAnalyzer::cp(1234);

        let rescored = gunzip(&score_file(&game, &mut analyzer, 1).await.unwrap());
        assert_eq!(rescored.len(), 2 * V4_BYTES);

        let out: Vec<V4Record> = records(&rescored).collect();
        for record in &out {
            assert_eq!(record.root_q, 0.1234);
            assert_eq!(record.best_q, 0.1234);
            // Everything else is untouched.
            assert_eq!(record.root_d, 0.25);
            assert_eq!(record.winner, 1);
        }

        // The analyzer saw the start position, then the mirrored reply.
        assert_eq!(analyzer.fens.len(), 2);
        assert_eq!(
            analyzer.fens[0],
            "rnbqkbnr/pppppppp/8/8/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
        assert_eq!(
            analyzer.fens[1],
            "rnbqkbnr/pppp1ppp/8/4p3/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
    }

    #[tokio::test]
    async fn test_searched_probs_fall_back_to_plane_matching() {
        // Several moves carry probability mass, so the move must be read
        // off the next record's planes instead.
        let start = Chess::default();
        let mut first = searched_record();
        first.planes = planes_from_board(start.board());
        let mut second = blank_record();
        second.planes = planes_after(&start, "d2d4");

        let game = gzip(&[first, second]);
        let mut analyzer = StubAnalyzer::cp(-300);

        let rescored = gunzip(&score_file(&game, &mut analyzer, 1).await.unwrap());
        let out: Vec<V4Record> = records(&rescored).collect();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].root_q, -0.03);

        // The second evaluation is of the position after d2d4, mirrored.
        assert_eq!(
            analyzer.fens[1],
            "rnbqkbnr/ppp1pppp/8/3p4/8/8/PPPPPPPP/RNBQKBNR w KQkq - 0 1"
        );
    }

    #[tokio::test]
    async fn test_unmatchable_planes_fail_the_file() {
        let mut first = searched_record();
        first.planes = planes_from_board(Chess::default().board());
        // Next record's planes are empty: no legal move reaches that.
        let game = gzip(&[first, blank_record()]);
        let mut analyzer = StubAnalyzer::cp(0);

        let err = score_file(&game, &mut analyzer, 1).await.unwrap_err();
        assert!(matches!(err, ScoreError::Move(MoveError::NoCandidate)));
    }

    #[tokio::test]
    async fn test_single_record_game_produces_empty_stream() {
        let game = gzip(&[one_hot_record("e2e4")]);
        let mut analyzer = StubAnalyzer::cp(50);

        let rescored = gunzip(&score_file(&game, &mut analyzer, 1).await.unwrap());
        assert!(rescored.is_empty());
        assert!(analyzer.fens.is_empty());
    }

    #[tokio::test]
    async fn test_trailing_partial_record_is_dropped() {
        let mut game = gzip(&[one_hot_record("e2e4"), blank_record()]);
        // Corrupt gzip payloads are a different failure; extend the raw
        // stream instead and recompress.
        let mut raw = gunzip(&game);
        raw.extend_from_slice(&[7u8; 100]);
        let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
        encoder.write_all(&raw).unwrap();
        game = encoder.finish().unwrap();

        let mut analyzer = StubAnalyzer::cp(10);
        let rescored = gunzip(&score_file(&game, &mut analyzer, 1).await.unwrap());
        assert_eq!(rescored.len(), 2 * V4_BYTES);
    }

    /// Six-piece position where white can capture down to five.
    fn six_piece_position() -> Chess {
        let mut setup = Setup::empty();
        for (square, color, role) in [
            (Square::G1, Color::White, Role::King),
            (Square::D1, Color::White, Role::Queen),
            (Square::A1, Color::White, Role::Rook),
            (Square::G8, Color::Black, Role::King),
            (Square::D8, Color::Black, Role::Queen),
            (Square::A8, Color::Black, Role::Rook),
        ] {
            setup.board.set_piece_at(square, Piece { color, role });
        }
        Chess::from_setup(setup, CastlingMode::Standard).unwrap()
    }

    #[tokio::test]
    async fn test_stops_once_five_pieces_remain() {
        // The capture d1xd8 brings the game to five pieces: the pair
        // after it must not be processed, nor the trailing record.
        let game = [
            one_hot_record("d1d8"),
            one_hot_record("a1a8"),
            blank_record(),
        ];
        let mut analyzer = StubAnalyzer::cp(77);

        let rescored = score_records(&game, six_piece_position(), &mut analyzer, 1)
            .await
            .unwrap();

        assert_eq!(rescored.len(), V4_BYTES);
        assert_eq!(analyzer.fens.len(), 1);
    }

    #[tokio::test]
    async fn test_game_starting_in_tablebase_territory_is_empty() {
        let mut setup = Setup::empty();
        for (square, color, role) in [
            (Square::G1, Color::White, Role::King),
            (Square::D1, Color::White, Role::Queen),
            (Square::G8, Color::Black, Role::King),
            (Square::D8, Color::Black, Role::Queen),
            (Square::A8, Color::Black, Role::Rook),
        ] {
            setup.board.set_piece_at(square, Piece { color, role });
        }
        let pos = Chess::from_setup(setup, CastlingMode::Standard).unwrap();

        let game = [one_hot_record("d1d8"), blank_record()];
        let mut analyzer = StubAnalyzer::cp(0);

        let rescored = score_records(&game, pos, &mut analyzer, 1).await.unwrap();
        assert!(rescored.is_empty());
        assert!(analyzer.fens.is_empty());
    }

    #[tokio::test]
    async fn test_multi_node_rewrites_probs_and_best_d() {
        let mut analyzer = StubAnalyzer::cp(100);
        analyzer.pvs = vec![
            PrincipalVariation { first_move: "d2d4".into(), visits: 6 },
            PrincipalVariation { first_move: "e2e4".into(), visits: 1 },
        ];

        let game = gzip(&[one_hot_record("e2e4"), blank_record()]);
        let rescored = gunzip(&score_file(&game, &mut analyzer, 10).await.unwrap());
        let out: Vec<V4Record> = records(&rescored).collect();

        // booster = ceil(10 / 0.7) - 10 = 5; denominator = 6 + 1 + 5 = 12.
        let probs = out[0].probs();
        let played = MOVES_LOOKUP["e2e4"];
        let other = MOVES_LOOKUP["d2d4"];
        assert_eq!(probs[played], 6.0 / 12.0);
        assert_eq!(probs[other], 6.0 / 12.0);
        assert_eq!(out[0].best_d, played as f32);

        // Entries for moves the search didn't visit are zeroed, NaN stays.
        assert!(probs[MOVES_LOOKUP["g1f3"]].is_nan() || probs[MOVES_LOOKUP["g1f3"]] == 0.0);

        // The trailing record has no played move: its probs are untouched.
        assert_eq!(out[1].probs, blank_record().probs);
        assert_eq!(out[1].root_q, 0.01);
    }
}
