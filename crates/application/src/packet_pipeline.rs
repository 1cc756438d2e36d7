use std::sync::Arc;

use domain::packet::{PacketLayout, Verdict, match_and_rewrite};
use ports::secondary::metrics_port::MetricsPort;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::trace;

use crate::snapshot::{RuleSnapshot, SnapshotReader};

/// A packet handed to a worker, with the interface it arrived on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PacketJob {
    pub ingress: Option<u32>,
    pub packet: Vec<u8>,
}

/// Result of running one packet through a snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketOutcome {
    /// 1-based position of the matched rule.
    pub rule: Option<usize>,
    pub verdict: Verdict,
    /// Snapshot generation the packet was evaluated against.
    pub generation: u64,
}

/// A job after processing; `packet` holds the rewritten bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessedPacket {
    pub job: PacketJob,
    pub outcome: PacketOutcome,
}

/// Worker side of the engine: evaluates packets against the latest
/// published snapshot and never mutates the rule set.
#[derive(Clone)]
pub struct PacketPipeline {
    reader: SnapshotReader,
    metrics: Arc<dyn MetricsPort>,
}

impl PacketPipeline {
    pub fn new(reader: SnapshotReader, metrics: Arc<dyn MetricsPort>) -> Self {
        Self { reader, metrics }
    }

    /// Process a single packet in place.
    pub fn process(&self, ingress: Option<u32>, packet: &mut [u8]) -> PacketOutcome {
        let snapshot = self.reader.load();
        self.evaluate(&snapshot, ingress, packet)
    }

    /// Process a batch in place against one snapshot.
    pub fn process_batch(&self, batch: &mut [PacketJob]) -> Vec<PacketOutcome> {
        let snapshot = self.reader.load_full();
        batch
            .iter_mut()
            .map(|job| self.evaluate(&snapshot, job.ingress, &mut job.packet))
            .collect()
    }

    /// Worker loop. Receives batches, forwards processed packets to `tx`
    /// and drains queued batches on cancellation.
    pub async fn run(
        self,
        mut rx: mpsc::Receiver<Vec<PacketJob>>,
        tx: mpsc::Sender<ProcessedPacket>,
        cancel_token: CancellationToken,
    ) {
        let mut count: u64 = 0;

        loop {
            tokio::select! {
                () = cancel_token.cancelled() => {
                    while let Ok(batch) = rx.try_recv() {
                        count += self.dispatch(batch, &tx).await;
                    }
                    break;
                }
                msg = rx.recv() => {
                    match msg {
                        Some(batch) => count += self.dispatch(batch, &tx).await,
                        None => break,
                    }
                }
            }
        }

        tracing::info!(total_packets = count, "packet pipeline stopped");
    }

    async fn dispatch(&self, mut batch: Vec<PacketJob>, tx: &mpsc::Sender<ProcessedPacket>) -> u64 {
        let outcomes = self.process_batch(&mut batch);
        let mut sent = 0;
        for (job, outcome) in batch.into_iter().zip(outcomes) {
            if tx.send(ProcessedPacket { job, outcome }).await.is_err() {
                tracing::warn!("packet output channel closed");
                break;
            }
            sent += 1;
        }
        sent
    }

    fn evaluate(
        &self,
        snapshot: &RuleSnapshot,
        ingress: Option<u32>,
        packet: &mut [u8],
    ) -> PacketOutcome {
        let forward = PacketOutcome {
            rule: None,
            verdict: Verdict::Forward,
            generation: snapshot.generation,
        };
        let Some(layout) = PacketLayout::parse(packet) else {
            self.metrics.record_packet_error();
            trace!(len = packet.len(), "unparsable packet forwarded");
            return forward;
        };
        if !snapshot.active {
            self.metrics.record_packet(Verdict::Forward.as_str(), false);
            return forward;
        }

        let eval = match_and_rewrite(snapshot.rules(), packet, ingress);
        let rule = eval.rule_index.map(|i| i + 1);
        self.metrics
            .record_packet(eval.verdict.as_str(), rule.is_some());
        trace!(
            l3 = %layout.l3,
            protocol = layout.protocol,
            ingress = ?ingress,
            rule = ?rule,
            verdict = eval.verdict.as_str(),
            generation = snapshot.generation,
            "packet classified"
        );
        PacketOutcome {
            rule,
            verdict: eval.verdict,
            generation: snapshot.generation,
        }
    }
}
