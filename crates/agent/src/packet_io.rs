//! Line-oriented packet I/O for the `run` command.
//!
//! Input lines are `[<ingress>] <hex>`; output lines are
//! `<verdict> rule=<n|-> gen=<generation> <hex>`.

use application::packet_pipeline::{PacketJob, ProcessedPacket};
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Parse one input line into a job.
pub fn parse_packet_line(line: &str) -> Result<PacketJob, String> {
    let tokens: Vec<&str> = line.split_whitespace().collect();
    let (ingress, hex_text) = match tokens.as_slice() {
        [hex_text] => (None, *hex_text),
        [ingress, hex_text] => {
            let id = ingress
                .parse::<u32>()
                .map_err(|_| format!("invalid ingress interface '{ingress}'"))?;
            (Some(id), *hex_text)
        }
        _ => return Err("expected '[<ingress>] <hex>'".to_string()),
    };
    let packet = hex::decode(hex_text).map_err(|e| format!("invalid packet hex: {e}"))?;
    Ok(PacketJob { ingress, packet })
}

/// Render a processed packet as one output line.
pub fn format_processed(processed: &ProcessedPacket) -> String {
    let rule = processed
        .outcome
        .rule
        .map_or_else(|| "-".to_string(), |n| n.to_string());
    format!(
        "{} rule={rule} gen={} {}",
        processed.outcome.verdict.as_str(),
        processed.outcome.generation,
        hex::encode(&processed.job.packet)
    )
}

/// Read packet lines, batching up to `batch_size` jobs. A partial batch is
/// flushed whenever the reader has nothing buffered, so interactive input
/// is not held back. Returns on EOF or cancellation; dropping `tx` lets
/// the worker finish.
pub async fn read_packets<R>(
    reader: R,
    tx: mpsc::Sender<Vec<PacketJob>>,
    batch_size: usize,
    cancel_token: CancellationToken,
) where
    R: AsyncRead + Unpin,
{
    let mut lines = BufReader::new(reader).lines();
    let mut batch = Vec::with_capacity(batch_size);
    let mut line_no: u64 = 0;

    loop {
        let next = tokio::select! {
            biased;
            () = cancel_token.cancelled() => break,
            next = lines.next_line() => next,
        };
        let line = match next {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) => {
                warn!(error = %e, "packet input read failed");
                break;
            }
        };
        line_no += 1;

        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        match parse_packet_line(trimmed) {
            Ok(job) => batch.push(job),
            Err(reason) => {
                warn!(line = line_no, %reason, "skipping packet line");
                continue;
            }
        }

        if (batch.len() >= batch_size || lines.get_ref().buffer().is_empty())
            && tx.send(std::mem::take(&mut batch)).await.is_err()
        {
            warn!("packet worker channel closed");
            return;
        }
    }

    if !batch.is_empty() && tx.send(batch).await.is_err() {
        warn!("packet worker channel closed");
    }
    debug!(lines = line_no, "packet input finished");
}

/// Write one line per processed packet until the channel closes.
pub async fn write_verdicts<W>(mut rx: mpsc::Receiver<ProcessedPacket>, mut writer: W)
where
    W: AsyncWrite + Unpin,
{
    while let Some(processed) = rx.recv().await {
        let mut line = format_processed(&processed);
        line.push('\n');
        if let Err(e) = writer.write_all(line.as_bytes()).await {
            warn!(error = %e, "verdict output failed");
            return;
        }
        if rx.is_empty()
            && let Err(e) = writer.flush().await
        {
            warn!(error = %e, "verdict output flush failed");
            return;
        }
    }
    let _ = writer.flush().await;
}
