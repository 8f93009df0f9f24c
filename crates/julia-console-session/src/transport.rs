//! Newline-delimited JSON transport for [`Frame`]s.
//!
//! One frame per line in both directions. The pump owns the connection:
//! when the reader hits EOF or an error, the client is disconnected.

use std::sync::Arc;

use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use julia_console_core::Result;

use crate::rpc::{Frame, ProcessHandle, RpcClient};

/// Connect `process` to `client` and pump frames over `reader`/`writer`
/// until either side closes.
pub fn spawn<R, W>(
    client: &Arc<RpcClient>,
    process: ProcessHandle,
    reader: R,
    writer: W,
) -> JoinHandle<()>
where
    R: AsyncRead + Unpin + Send + 'static,
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    let connection = client.connect(process, tx);
    let client = Arc::clone(client);

    tokio::spawn(async move {
        if let Err(e) = pump(&client, reader, writer, rx).await {
            warn!("Transport error on connection {}: {}", connection, e);
        }
        client.end_connection(connection);
    })
}

/// Run the read and write halves until the peer closes the stream or the
/// client drops the connection.
pub async fn pump<R, W>(
    client: &RpcClient,
    reader: R,
    mut writer: W,
    mut outbound: mpsc::UnboundedReceiver<Frame>,
) -> Result<()>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = BufReader::new(reader).lines();

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    info!("Runtime closed the connection");
                    return Ok(());
                };
                let trimmed = line.trim();
                if trimmed.is_empty() {
                    continue;
                }
                match serde_json::from_str::<Frame>(trimmed) {
                    Ok(frame) => client.handle_frame(frame),
                    Err(e) => error!("Malformed frame: {} ({})", e, trimmed),
                }
            }
            frame = outbound.recv() => {
                let Some(frame) = frame else {
                    debug!("Outbound channel closed");
                    return Ok(());
                };
                let mut line = serde_json::to_vec(&frame)?;
                line.push(b'\n');
                writer.write_all(&line).await?;
                writer.flush().await?;
            }
        }
    }
}
