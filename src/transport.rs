use anyhow::Result;
use tokio::{
    io::{AsyncBufRead, AsyncBufReadExt, BufReader},
    sync::mpsc::UnboundedSender,
};
use tracing::{info, warn};

use crate::envelope::Envelope;
use crate::tracker::Shutdown;

/// Feeds newline-delimited JSON envelopes from `reader` into the pipeline queue.
/// Malformed lines are logged and skipped. Returns the number of envelopes queued.
pub async fn feed_lines<R>(reader: R, tx: UnboundedSender<Envelope>, shutdown: Shutdown) -> Result<u64>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut queued = 0u64;
    loop {
        let line = tokio::select! {
            line = lines.next_line() => line?,
            _ = shutdown.notified() => break,
        };
        let Some(line) = line else {
            info!("envelope feed closed after {queued} envelopes");
            break;
        };
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Envelope>(&line) {
            Ok(env) => {
                if tx.send(env).is_err() {
                    warn!("pipeline queue closed, feed stopping");
                    break;
                }
                queued += 1;
            }
            Err(e) => warn!("skipping malformed envelope: {e}"),
        }
    }
    Ok(queued)
}

pub async fn feed_stdin(tx: UnboundedSender<Envelope>, shutdown: Shutdown) -> Result<u64> {
    feed_lines(BufReader::new(tokio::io::stdin()), tx, shutdown).await
}
