//! Newline-delimited JSON-RPC over a byte stream pair.

use std::io;
use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::broadcast;

use crate::protocol::{dispatch_raw, ProtocolHandler};

/// Serve requests read from `reader` until EOF or shutdown.
pub async fn serve_stdio<R, W>(
    reader: R,
    mut writer: W,
    handler: Arc<dyn ProtocolHandler>,
    mut shutdown: broadcast::Receiver<()>,
) -> io::Result<()>
where
    R: AsyncRead + Unpin + Send,
    W: AsyncWrite + Unpin + Send,
{
    let mut lines = BufReader::new(reader).lines();
    tracing::debug!("Stdio transport started");

    loop {
        let line = tokio::select! {
            _ = shutdown.recv() => break,
            line = lines.next_line() => line?,
        };

        let Some(line) = line else {
            tracing::debug!("Stdio input closed");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }

        if let Some(response) = dispatch_raw(handler.as_ref(), &line).await {
            let mut out = serde_json::to_vec(&response)?;
            out.push(b'\n');
            writer.write_all(&out).await?;
            writer.flush().await?;
        }
    }

    writer.flush().await?;
    tracing::debug!("Stdio transport stopped");
    Ok(())
}
