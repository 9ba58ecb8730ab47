//! Explicit configuration record passed into every entry point.
//!
//! The original source kept ambient directories and a singleton `Config`
//! class. Here there is no global state:
//! callers build a [`LockframeConfig`] and thread it through. Lattice
//! parameters are not configurable — they are compile-time constants in
//! [`crate::ring`] — only operational tuning (timeouts, retry counts,
//! transport sizing) lives here.

use std::time::Duration;

/// Operational tuning for a single dealer/recovery deployment.
#[derive(Clone, Debug)]
pub struct LockframeConfig {
	/// Maximum number of phase-1 restarts within a single threshold-signing
	/// session before giving up with [`crate::error::CryptoError::Sample`].
	pub threshold_phase1_retry_budget: u32,
	/// Maximum number of local resample attempts for a single-party signature
	/// before giving up with [`crate::error::CryptoError::Sample`].
	pub signer_retry_budget: u32,
	/// Wall-clock deadline for phase 1 (commitment collection).
	pub phase1_timeout: Duration,
	/// Wall-clock deadline for phase 2 (response collection).
	pub phase2_timeout: Duration,
	/// Wall-clock deadline for share delivery after a successful signature.
	pub share_delivery_timeout: Duration,
	/// Handshake and challenge timestamp tolerance.
	pub clock_skew_tolerance: Duration,
	/// Reliable-datagram transport tuning.
	pub transport: TransportConfig,
}

impl Default for LockframeConfig {
	fn default() -> Self {
		Self {
			threshold_phase1_retry_budget: 8,
			signer_retry_budget: 64,
			phase1_timeout: Duration::from_secs(30),
			phase2_timeout: Duration::from_secs(30),
			share_delivery_timeout: Duration::from_secs(60),
			clock_skew_tolerance: Duration::from_secs(60),
			transport: TransportConfig::default(),
		}
	}
}

/// Reliable-datagram transport tuning
#[derive(Clone, Copy, Debug)]
pub struct TransportConfig {
	pub mtu: usize,
	pub header_size: usize,
	pub ack_timeout: Duration,
	pub max_retries: u32,
	pub dedup_window: Duration,
	pub punch_beacons: u32,
	pub punch_interval: Duration,
}

impl Default for TransportConfig {
	fn default() -> Self {
		Self {
			mtu: 1024,
			header_size: 12,
			ack_timeout: Duration::from_millis(500),
			max_retries: 10,
			dedup_window: Duration::from_secs(60),
			punch_beacons: 5,
			punch_interval: Duration::from_millis(100),
		}
	}
}

impl TransportConfig {
	pub fn chunk_payload_len(&self) -> usize {
		self.mtu - self.header_size
	}
}
