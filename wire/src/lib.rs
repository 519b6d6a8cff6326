//! Wire format shared between the dispatch server and its worker clients:
//! separator-delimited item framing and the connection handshake.

pub mod framing;
pub mod handshake;

pub use framing::SEP;
