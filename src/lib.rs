//! Lockframe: a post-quantum, threshold-protected asset custody engine.
//!
//! A dealer splits a secret pixel plane into `n` CRT shares and encrypts
//! each to a registered party's lattice public key ([`dealer`]). Recovering
//! the secret later requires `t` of those `n` parties to jointly run a
//! threshold lattice-signature ceremony authorizing the release
//! ([`threshold`], [`session`]) before their shares are combined back into
//! the original plane ([`crt`]). [`kem`], [`hybrid`], [`signer`], and
//! [`channel`] provide the cryptographic primitives the higher-level flows
//! build on; [`transport`] carries all of it over the network.

pub mod channel;
pub mod codec;
pub mod config;
pub mod crt;
pub mod dealer;
pub mod error;
pub mod hybrid;
pub mod kem;
pub mod keys;
pub mod ring;
pub mod session;
pub mod signer;
pub mod threshold;
pub mod transport;

pub use config::{LockframeConfig, TransportConfig};
pub use error::{LockframeError, Result};
pub use keys::{keygen, PublicKey, SecretKey};

pub use dealer::{lock_and_distribute, Delivery};
pub use session::{Participant, Phase, RecoveryHost, RecoveryOutcome};

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use rand::RngCore;

use crate::codec::{Manifest, RegistryEntry};
use crate::crt::Share;
use crate::threshold::ThresholdParty;
use crate::transport::Transport;

/// Opens a recovery session as the host: collects commitments and
/// responses from `manifest.threshold` of the listed participants, derives
/// the threshold signature authorizing release, and reconstructs the
/// secret pixel plane. Wraps [`RecoveryHost::run`] with the manifest's own
/// parameters so callers don't have to thread threshold/fingerprint/moduli
/// through by hand.
pub async fn open_recovery_host<T: Transport>(
	transport: Arc<T>,
	my_sk: SecretKey,
	my_pk: PublicKey,
	combined_pk: PublicKey,
	manifest: &Manifest,
	config: LockframeConfig,
	participants: &[(u32, SocketAddr, PublicKey)],
	message_digest: [u8; 32],
	rng: &mut impl RngCore,
) -> Result<RecoveryOutcome> {
	let share_fingerprints: HashMap<u32, [u8; 32]> =
		manifest.registry.iter().map(|e| (e.party_index, e.share_fingerprint)).collect();
	let host = RecoveryHost::new(
		manifest.session_id.clone(),
		transport,
		my_sk,
		my_pk,
		combined_pk,
		manifest.threshold as usize,
		manifest.arnold_iterations,
		share_fingerprints,
		config,
	);
	host.run(participants, message_digest, rng).await
}

/// Joins a recovery session as a participant: accepts the host's handshake
/// (rejecting any peer that doesn't present `host_pk`), verifies `my_share`
/// against `expected_fingerprint`, then answers the commit/challenge/respond
/// ceremony with this party's threshold key share, finally releasing
/// `my_share` once the ceremony completes.
pub async fn join_recovery_session<T: Transport>(
	transport: Arc<T>,
	my_sk: SecretKey,
	my_pk: PublicKey,
	host_pk: PublicKey,
	threshold_party: ThresholdParty,
	my_share: Share,
	expected_fingerprint: [u8; 32],
	config: LockframeConfig,
	rng: &mut impl RngCore,
) -> Result<()> {
	let mut participant =
		Participant::new(transport, my_sk, my_pk, host_pk, threshold_party, my_share, expected_fingerprint, config)?;
	participant.join(rng).await
}

/// Reconstructs a pixel plane directly from already-collected shares,
/// without running a session — used when shares have been gathered
/// out-of-band (e.g. by a CLI that already performed the ceremony).
/// Verifies each share against its registry entry's `share_fingerprint`,
/// by position, before combining them — a tampered share is rejected before
/// it ever reaches CRT reconstruction rather than after.
pub fn reconstruct_from_shares(shares: &[Share], registry: &[RegistryEntry], threshold: usize, arnold_iterations: u32) -> Result<Vec<u8>> {
	for (share, entry) in shares.iter().zip(registry.iter()) {
		let raw = bincode::serialize(share).expect("Share serializes infallibly");
		if dealer::fingerprint_share_bytes(&raw) != entry.share_fingerprint {
			return Err(error::DataError::Tamper.into());
		}
	}
	crt::reconstruct(shares, threshold, arnold_iterations).map_err(Into::into)
}
