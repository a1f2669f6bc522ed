//! Length-prefixed JSON framing.
//!
//! Protocol: 4-byte big-endian length, then the JSON payload. Frames
//! over [`MAX_FRAME_LEN`] are a protocol violation and terminate the
//! connection.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Hard cap on a single frame (1 MiB).
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Codec failure.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// Socket error or clean EOF mid-frame.
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    /// Peer announced a frame larger than [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    Oversized {
        /// The announced length.
        len: usize,
    },
}

/// Read one frame. `Ok(None)` on clean EOF at a frame boundary.
///
/// # Errors
///
/// [`CodecError::Oversized`] on an oversized announcement, otherwise
/// the underlying io error.
pub async fn read_frame<R>(reader: &mut R) -> Result<Option<Vec<u8>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {},
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::Oversized { len });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(Some(payload))
}

/// Write one frame.
///
/// # Errors
///
/// [`CodecError::Oversized`] if the payload is over the cap, otherwise
/// the underlying io error.
pub async fn write_frame<W>(writer: &mut W, payload: &[u8]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(CodecError::Oversized { len: payload.len() });
    }
    #[allow(clippy::cast_possible_truncation)]
    let len = payload.len() as u32;
    writer.write_all(&len.to_be_bytes()).await?;
    writer.write_all(payload).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn round_trips_a_frame() {
        let mut buf = Vec::new();
        write_frame(&mut buf, br#"{"type":"typing"}"#).await.unwrap();

        let mut cursor = std::io::Cursor::new(buf);
        let frame = read_frame(&mut cursor).await.unwrap().unwrap();
        assert_eq!(frame, br#"{"type":"typing"}"#);
    }

    #[tokio::test]
    async fn eof_at_boundary_is_none() {
        let mut cursor = std::io::Cursor::new(Vec::new());
        assert!(read_frame(&mut cursor).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn oversized_announcement_is_rejected() {
        let mut buf = Vec::new();
        let len = (MAX_FRAME_LEN as u32).saturating_add(1);
        buf.extend_from_slice(&len.to_be_bytes());
        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(CodecError::Oversized { .. })
        ));
    }

    #[tokio::test]
    async fn truncated_frame_is_io_error() {
        let mut buf = Vec::new();
        buf.extend_from_slice(&8u32.to_be_bytes());
        buf.extend_from_slice(b"abc");
        let mut cursor = std::io::Cursor::new(buf);
        assert!(matches!(
            read_frame(&mut cursor).await,
            Err(CodecError::Io(_))
        ));
    }
}
