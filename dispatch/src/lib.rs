//! Server side of the rescoring fleet: walks an input tree of gzipped game
//! files, hands them out to connected workers in bounded chunks, tracks
//! per-client throughput and mirrors the returned artifacts into the output
//! tree.

pub mod server;
pub mod sink;
pub mod source;
pub mod stats;
