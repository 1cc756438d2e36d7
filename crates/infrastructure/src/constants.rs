use std::time::Duration;

// ── Paths ──────────────────────────────────────────────────────────

pub const DEFAULT_CONFIG_PATH: &str = "/etc/mmb/config.yaml";

// ── Channel capacities ─────────────────────────────────────────────

/// Batches queued for a packet worker.
pub const PACKET_CHANNEL_CAPACITY: usize = 1_024;
/// Processed packets queued for output.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 4_096;

// ── Packet path ────────────────────────────────────────────────────

/// Packets handed to a worker per snapshot load.
pub const DEFAULT_BATCH_SIZE: usize = 32;

// ── Timeouts ───────────────────────────────────────────────────────

pub const GRACEFUL_SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);
