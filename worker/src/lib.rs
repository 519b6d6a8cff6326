//! Worker side of the rescoring fleet: parses the fixed-size training
//! records of a game, reconstructs the board ply by ply, asks a UCI engine
//! for a fresh evaluation of every position and emits a byte-compatible
//! rewritten stream.

pub mod board;
pub mod client;
pub mod engine;
pub mod moves;
pub mod planes;
pub mod policy;
pub mod score;
pub mod v4;
