//! Streaming DATA ingestor.
//!
//! Consumes the body portion of a DATA command directly from the network,
//! finds the `CRLF.CRLF` terminator across read boundaries, enforces the
//! message size cap, and lands the body atomically in `incoming/` via a
//! create-exclusive temp file, fsync, and rename.
//!
//! The body is persisted exactly as received; dot-stuffed lines are not
//! decoded.

use std::{os::unix::fs::OpenOptionsExt, path::Path, time::Duration};

use golubsmtpd_common::Signal;
use tokio::{
    fs::{File, OpenOptions},
    io::{AsyncRead, AsyncReadExt, AsyncWriteExt},
    sync::broadcast,
};
use tracing::{debug, warn};

use crate::{error::IngestorError, message::Message, spool::Spool, state::SpoolState};

/// SMTP end-of-body sequence. The leading CRLF terminates the last body
/// line, so it is written back to the file after the scan strips it.
pub const BODY_TERMINATOR: &[u8] = b"\r\n.\r\n";

const READ_CHUNK_SIZE: usize = 1024;

/// Stream one message body into the spool's `incoming/` directory.
///
/// `prelude` (trace headers, possibly empty) is fed through the same
/// terminator scan as the network bytes and counts toward the size cap.
/// Returns the number of bytes that reached the final file, including the
/// closing CRLF.
///
/// On any failure the temp file is removed; a final file appears only on
/// success.
pub async fn ingest_body<R>(
    spool: &Spool,
    message: &Message,
    prelude: &[u8],
    reader: &mut R,
    max_message_size: usize,
    read_timeout: Duration,
    shutdown: &mut broadcast::Receiver<Signal>,
) -> Result<u64, IngestorError>
where
    R: AsyncRead + Unpin + Send,
{
    let incoming = spool.state_dir(SpoolState::Incoming);
    let final_path = incoming.join(message.filename());
    let temp_path = incoming.join(format!("{}.tmp", message.filename()));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .mode(0o600)
        .open(&temp_path)
        .await
        .map_err(IngestorError::Create)?;

    let mut combined = prelude.chain(reader);
    let total = match stream_until_terminator(
        &mut file,
        &mut combined,
        max_message_size,
        read_timeout,
        shutdown,
    )
    .await
    {
        Ok(total) => total,
        Err(err) => {
            discard(file, &temp_path).await;
            return Err(err);
        }
    };

    // Data must be durable before the rename makes it observable.
    if let Err(err) = file.sync_all().await {
        discard(file, &temp_path).await;
        return Err(err.into());
    }
    drop(file);

    if let Err(err) = tokio::fs::rename(&temp_path, &final_path).await {
        let _ = tokio::fs::remove_file(&temp_path).await;
        return Err(err.into());
    }

    debug!(id = %message.id, bytes = total, "message body spooled");
    Ok(total)
}

async fn discard(file: File, temp_path: &Path) {
    drop(file);
    if let Err(err) = tokio::fs::remove_file(temp_path).await {
        warn!(path = %temp_path.display(), %err, "failed to remove temp spool file");
    }
}

/// Chunked read loop with a rolling tail window of terminator length, so a
/// terminator split across reads is still found.
async fn stream_until_terminator<R>(
    file: &mut File,
    reader: &mut R,
    max_message_size: usize,
    read_timeout: Duration,
    shutdown: &mut broadcast::Receiver<Signal>,
) -> Result<u64, IngestorError>
where
    R: AsyncRead + Unpin + Send,
{
    let mut tail: Vec<u8> = Vec::new();
    let mut buf = [0u8; READ_CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        let n = tokio::select! {
            _ = shutdown.recv() => return Err(IngestorError::Cancelled),
            read = tokio::time::timeout(read_timeout, reader.read(&mut buf)) => {
                match read {
                    Err(_) => return Err(IngestorError::Timeout),
                    Ok(result) => result?,
                }
            }
        };

        if n == 0 {
            // EOF before the terminator: the flushed bytes stand as a
            // truncated body.
            break;
        }

        let mut search_buf = std::mem::take(&mut tail);
        search_buf.extend_from_slice(&buf[..n]);

        if let Some(idx) = find_terminator(&search_buf) {
            let body = &search_buf[..idx];

            if max_message_size > 0
                && total + body.len() as u64 + 2 > max_message_size as u64
            {
                return Err(IngestorError::SizeLimit {
                    limit: max_message_size,
                });
            }

            file.write_all(body).await?;
            total += body.len() as u64;

            // The scan strips the CRLF that closed the last body line;
            // restore it so the stored body always ends with CRLF.
            file.write_all(b"\r\n").await?;
            total += 2;
            break;
        }

        if search_buf.len() > BODY_TERMINATOR.len() {
            let flush_upto = search_buf.len() - BODY_TERMINATOR.len();
            let line = &search_buf[..flush_upto];

            if max_message_size > 0 && total + line.len() as u64 > max_message_size as u64 {
                return Err(IngestorError::SizeLimit {
                    limit: max_message_size,
                });
            }

            file.write_all(line).await?;
            total += line.len() as u64;
            tail = search_buf.split_off(flush_upto);
        } else {
            tail = search_buf;
        }
    }

    Ok(total)
}

fn find_terminator(haystack: &[u8]) -> Option<usize> {
    haystack
        .windows(BODY_TERMINATOR.len())
        .position(|window| window == BODY_TERMINATOR)
}

#[cfg(test)]
mod test {
    use super::find_terminator;

    #[test]
    fn finds_terminator_anywhere() {
        assert_eq!(find_terminator(b"\r\n.\r\n"), Some(0));
        assert_eq!(find_terminator(b"abc\r\n.\r\n"), Some(3));
        assert_eq!(find_terminator(b"abc\r\n.\r"), None);
        assert_eq!(find_terminator(b""), None);
    }
}
