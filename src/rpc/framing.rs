//! Content-Length message framing.
//!
//! Header parsing is case-insensitive and accepts both CRLF and LF line
//! endings. Generic over the stream halves so the same code serves the
//! server side, the client side, and in-memory test streams.

use anyhow::{anyhow, Context, Result};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum framed message size (16MB). Engine results are small; anything
/// beyond this is a protocol violation, not a legitimate payload.
const MAX_MESSAGE_SIZE: usize = 16 * 1024 * 1024;

/// Maximum length of a single header line, so a peer streaming bytes
/// without a newline cannot grow the line buffer unboundedly.
const MAX_HEADER_LEN: u64 = 8 * 1024;

/// Read one framed message from the stream.
///
/// Returns an error on EOF, on a missing or invalid `Content-Length`
/// header, on an oversized length, or on a body that is not valid UTF-8.
pub async fn read_message<R>(reader: &mut R) -> Result<String>
where
    R: AsyncBufRead + Unpin,
{
    let mut content_length: Option<usize> = None;

    loop {
        let mut line = String::new();
        let bytes_read = (&mut *reader)
            .take(MAX_HEADER_LEN)
            .read_line(&mut line)
            .await
            .context("failed to read header line")?;

        if bytes_read == 0 {
            return Err(anyhow!("connection closed by peer"));
        }

        if bytes_read as u64 == MAX_HEADER_LEN && !line.ends_with('\n') {
            return Err(anyhow!(
                "header line exceeds {MAX_HEADER_LEN} bytes"
            ));
        }

        let trimmed = line.trim();
        if trimmed.is_empty() {
            break;
        }

        if let Some(colon_pos) = trimmed.find(':') {
            let key = trimmed[..colon_pos].trim();
            let value = trimmed[colon_pos + 1..].trim();

            if key.eq_ignore_ascii_case("Content-Length") {
                content_length = Some(
                    value
                        .parse()
                        .with_context(|| format!("invalid Content-Length value: {value}"))?,
                );
            }
            // Other headers (e.g. Content-Type) are ignored.
        }
    }

    let size = content_length.ok_or_else(|| anyhow!("missing Content-Length header"))?;
    if size > MAX_MESSAGE_SIZE {
        return Err(anyhow!(
            "message size {size} exceeds maximum {MAX_MESSAGE_SIZE} bytes"
        ));
    }

    let mut body = vec![0u8; size];
    reader
        .read_exact(&mut body)
        .await
        .context("failed to read message body")?;

    String::from_utf8(body).context("message body is not valid UTF-8")
}

/// Write one framed message to the stream and flush.
pub async fn write_message<W>(writer: &mut W, body: &str) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let header = format!("Content-Length: {}\r\n\r\n", body.len());

    writer
        .write_all(header.as_bytes())
        .await
        .context("failed to write message header")?;
    writer
        .write_all(body.as_bytes())
        .await
        .context("failed to write message body")?;
    writer.flush().await.context("failed to flush message")?;

    Ok(())
}
