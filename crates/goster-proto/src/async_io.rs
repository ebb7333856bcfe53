//! Async frame I/O for tokio streams.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use goster_crypto::SessionKey;

use crate::error::ProtoError;
use crate::frame::{decode_body, decode_header, Packet};
use crate::HEADER_SIZE;

/// Read one frame: exactly 32 header bytes, then the body the header
/// announces. The oversize check happens before the body allocation.
pub async fn read_packet<R: AsyncRead + Unpin>(
    reader: &mut R,
    key: Option<&SessionKey>,
) -> Result<Packet, ProtoError> {
    let mut raw = [0u8; HEADER_SIZE];
    reader.read_exact(&mut raw).await?;
    let header = decode_header(&raw)?;

    let mut body = vec![0u8; header.body_len()];
    reader.read_exact(&mut body).await?;
    decode_body(&header, &body, key)
}

/// Write a packed frame and flush it.
pub async fn write_frame<W: AsyncWrite + Unpin>(
    writer: &mut W,
    frame: &[u8],
) -> Result<(), ProtoError> {
    writer.write_all(frame).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::frame::pack;
    use crate::CMD_LOG_REPORT;

    #[tokio::test]
    async fn write_then_read_roundtrip() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let frame = pack(b"log line", CMD_LOG_REPORT, 0, None, 3, false).unwrap();
        write_frame(&mut client, &frame).await.unwrap();

        let packet = read_packet(&mut server, None).await.unwrap();
        assert_eq!(packet.cmd, CMD_LOG_REPORT);
        assert_eq!(packet.payload, b"log line");
    }

    #[tokio::test]
    async fn read_across_partial_writes() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let frame = pack(b"split", CMD_LOG_REPORT, 0, None, 1, false).unwrap();

        let (head, tail) = frame.split_at(10);
        let head = head.to_vec();
        let tail = tail.to_vec();
        let writer = tokio::spawn(async move {
            write_frame(&mut client, &head).await.unwrap();
            tokio::task::yield_now().await;
            write_frame(&mut client, &tail).await.unwrap();
        });

        let packet = read_packet(&mut server, None).await.unwrap();
        assert_eq!(packet.payload, b"split");
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn truncated_stream_reports_io_error() {
        let (mut client, mut server) = tokio::io::duplex(4096);
        let frame = pack(b"cut short", CMD_LOG_REPORT, 0, None, 1, false).unwrap();

        write_frame(&mut client, &frame[..frame.len() - 4])
            .await
            .unwrap();
        drop(client);

        assert!(matches!(
            read_packet(&mut server, None).await,
            Err(ProtoError::Io(_))
        ));
    }
}
