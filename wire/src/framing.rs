//! Separator framing: every item on the wire is its raw bytes followed by
//! [SEP]. A multi-item payload is the plain concatenation of framed items;
//! end of stream is signalled by the sender half-closing the connection.
//!
//! The framing is not escape-safe. Payloads containing the separator would
//! collide, but actual payloads are gzip streams, so the risk is accepted.

use bytes::Bytes;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt};

/// Separator terminating every item on the wire.
pub const SEP: &[u8; 4] = b"\n\n\n\n";

/// Write a single framed item.
pub async fn write_item<W>(w: &mut W, item: &[u8]) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
{
    w.write_all(item).await?;
    w.write_all(SEP).await
}

/// Write a multi-item payload: each item framed, back to back.
pub async fn write_payload<W, I>(w: &mut W, items: I) -> std::io::Result<()>
where
    W: AsyncWriteExt + Unpin,
    I: IntoIterator,
    I::Item: AsRef<[u8]>,
{
    for item in items {
        write_item(w, item.as_ref()).await?;
    }
    Ok(())
}

/// Strip the trailing separator from a raw item.
///
/// Only the complete 4-byte suffix is removed. An item whose payload merely
/// ends in a newline is returned unmodified.
pub fn strip_separator(raw: &[u8]) -> &[u8] {
    raw.strip_suffix(SEP.as_slice()).unwrap_or(raw)
}

/// Read one framed item, with the separator stripped.
///
/// Returns `Ok(None)` on a clean end of stream (no buffered bytes). A stream
/// that ends in the middle of an item yields `ErrorKind::UnexpectedEof`;
/// callers in the dispatch and worker loops treat that as stream
/// termination, not a failure.
pub async fn read_item<R>(r: &mut R) -> std::io::Result<Option<Bytes>>
where
    R: AsyncBufReadExt + Unpin,
{
    let mut buf = Vec::new();
    loop {
        let n = r.read_until(b'\n', &mut buf).await?;
        if n == 0 {
            if buf.is_empty() {
                return Ok(None);
            }
            return Err(std::io::Error::new(
                std::io::ErrorKind::UnexpectedEof,
                "stream ended inside an item",
            ));
        }
        if buf.ends_with(SEP) {
            buf.truncate(buf.len() - SEP.len());
            return Ok(Some(buf.into()));
        }
    }
}
