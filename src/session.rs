//! The recovery session state machine
//!
//! `RecoveryHost::run` drives `IDLE -> WAITING_COMMITMENTS ->
//! WAITING_RESPONSES -> RECONSTRUCTING -> FINISHED` the way
//! `ceremony_runner.rs::run` drives a ceremony: sequential phases, each
//! bounded by a `tokio::time::timeout`, with a `tokio::sync::Mutex`-guarded
//! phase field so a concurrent status query never observes a torn state.
//! `join_recovery_session` is the participant side of the same protocol.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;

use rand::RngCore;
use tokio::sync::Mutex;

use crate::channel::{self, SecureChannel};
use crate::codec::{self, Envelope, SessionMessage};
use crate::config::LockframeConfig;
use crate::crt::{self, Share};
use crate::dealer;
use crate::error::{DataError, LockframeError, SessionError};
use crate::keys::{PublicKey, SecretKey};
use crate::signer::Signature;
use crate::threshold::{self, Challenge, Commitment, Response, ThresholdParty};
use crate::transport::Transport;

/// The five states a recovery session passes through, in order.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Phase {
	Idle,
	WaitingCommitments,
	WaitingResponses,
	Reconstructing,
	Finished,
}

struct PeerChannel {
	index: u32,
	addr: SocketAddr,
	channel: SecureChannel,
}

/// The host side: the party that collects commitments, derives the
/// challenge, aggregates responses and shares, and reconstructs the image.
pub struct RecoveryHost<T: Transport> {
	pub session_id: String,
	transport: Arc<T>,
	my_sk: SecretKey,
	my_pk: PublicKey,
	combined_pk: PublicKey,
	threshold: usize,
	arnold_iterations: u32,
	share_fingerprints: HashMap<u32, [u8; 32]>,
	config: LockframeConfig,
	phase: Mutex<Phase>,
}

/// Outcome of a completed recovery session.
pub struct RecoveryOutcome {
	pub pixels: Vec<u8>,
	pub signature: Signature,
}

impl<T: Transport> RecoveryHost<T> {
	pub fn new(
		session_id: String,
		transport: Arc<T>,
		my_sk: SecretKey,
		my_pk: PublicKey,
		combined_pk: PublicKey,
		threshold: usize,
		arnold_iterations: u32,
		share_fingerprints: HashMap<u32, [u8; 32]>,
		config: LockframeConfig,
	) -> Self {
		Self {
			session_id,
			transport,
			my_sk,
			my_pk,
			combined_pk,
			threshold,
			arnold_iterations,
			share_fingerprints,
			config,
			phase: Mutex::new(Phase::Idle),
		}
	}

	pub async fn phase(&self) -> Phase {
		*self.phase.lock().await
	}

	/// Runs the full session against the given set of registered
	/// participants and returns the reconstructed pixel plane plus the
	/// threshold-produced authorization signature.
	pub async fn run(
		&self,
		participants: &[(u32, SocketAddr, PublicKey)],
		message_digest: [u8; 32],
		rng: &mut impl RngCore,
	) -> Result<RecoveryOutcome, LockframeError> {
		tracing::info!(session_id = %self.session_id, n = participants.len(), threshold = self.threshold, "opening recovery session");

		let mut channels = Vec::new();
		for (index, addr, pk) in participants {
			let secure = channel::setup_as_initiator(
				&*self.transport,
				*addr,
				&self.my_pk,
				&self.my_sk,
				pk,
				self.config.clock_skew_tolerance.as_secs(),
				rng,
			)
			.await
			.map_err(LockframeError::Handshake)?;
			channels.push(PeerChannel { index: *index, addr: *addr, channel: secure });
		}
		let by_addr: HashMap<SocketAddr, usize> =
			channels.iter().enumerate().map(|(i, c)| (c.addr, i)).collect();

		*self.phase.lock().await = Phase::WaitingCommitments;
		let request = SessionMessage::RequestCommitment { session_id: self.session_id.clone(), message_digest };
		self.broadcast(&channels, &request, rng).await?;

		let commitments: Vec<Commitment> = self
			.collect(&channels, &by_addr, self.threshold, self.config.phase1_timeout, |_peer_idx, msg| match msg {
				SessionMessage::Commitment(c) => Ok(Some(c)),
				_ => Ok(None),
			})
			.await?;

		let aggregated_w = threshold::aggregate_commitments(&commitments);
		let challenge = threshold::derive_challenge(&message_digest, &aggregated_w);

		*self.phase.lock().await = Phase::WaitingResponses;
		self.broadcast(&channels, &SessionMessage::Challenge(challenge.clone()), rng).await?;

		let responses: Vec<Response> = self
			.collect(&channels, &by_addr, self.threshold, self.config.phase2_timeout, |_peer_idx, msg| match msg {
				SessionMessage::Response(r) => Ok(Some(r)),
				_ => Ok(None),
			})
			.await?;

		let aggregated_z = threshold::aggregate_responses(&responses);
		let signature = threshold::finalize(&self.combined_pk, &message_digest, &challenge, aggregated_z)
			.map_err(LockframeError::Crypto)?;

		*self.phase.lock().await = Phase::Reconstructing;
		let shares: Vec<Share> = self
			.collect(&channels, &by_addr, self.threshold, self.config.share_delivery_timeout, |peer_idx, msg| match msg {
				SessionMessage::ShareDelivery(s) => {
					let authenticated_index = channels[peer_idx].index;
					let expected = self
						.share_fingerprints
						.get(&authenticated_index)
						.ok_or(LockframeError::Data(DataError::Tamper))?;
					let raw = bincode::serialize(&s).expect("Share serializes infallibly");
					if dealer::fingerprint_share_bytes(&raw) != *expected {
						return Err(LockframeError::Data(DataError::Tamper));
					}
					Ok(Some(s))
				}
				_ => Ok(None),
			})
			.await?;

		let pixels = crt::reconstruct(&shares, self.threshold, self.arnold_iterations).map_err(LockframeError::Data)?;

		*self.phase.lock().await = Phase::Finished;
		tracing::info!(session_id = %self.session_id, "recovery session finished");
		Ok(RecoveryOutcome { pixels, signature })
	}

	async fn broadcast(
		&self,
		channels: &[PeerChannel],
		message: &SessionMessage,
		rng: &mut impl RngCore,
	) -> Result<(), LockframeError> {
		let bytes = codec::canonical_serialize(message)?;
		for peer in channels {
			let envelope = peer.channel.encrypt(&bytes, rng);
			let envelope_bytes = codec::canonical_serialize(&envelope)?;
			self.transport
				.send_reliable(peer.addr, &envelope_bytes)
				.await
				.map_err(LockframeError::Transport)?;
		}
		Ok(())
	}

	/// Drains messages off the transport until `quorum` items pass `extract`
	/// or `deadline` elapses. `extract` receives the authenticated sender's
	/// index (resolved from the handshake-verified `channels`, never from
	/// message content) and returns `Err` to abort the whole session rather
	/// than silently skip a message — used for the share-delivery phase,
	/// where a fingerprint mismatch must not just stall toward a timeout.
	async fn collect<U>(
		&self,
		channels: &[PeerChannel],
		by_addr: &HashMap<SocketAddr, usize>,
		quorum: usize,
		deadline: std::time::Duration,
		mut extract: impl FnMut(usize, SessionMessage) -> Result<Option<U>, LockframeError>,
	) -> Result<Vec<U>, LockframeError> {
		let mut collected = Vec::new();
		let deadline_fut = tokio::time::sleep(deadline);
		tokio::pin!(deadline_fut);

		while collected.len() < quorum {
			tokio::select! {
				_ = &mut deadline_fut => {
					return Err(LockframeError::Session(SessionError::Timeout));
				}
				received = self.transport.recv() => {
					let Some((addr, bytes)) = received else { continue };
					let Some(&peer_idx) = by_addr.get(&addr) else { continue };
					let Ok(envelope) = codec::canonical_deserialize::<Envelope>(&bytes) else { continue };
					let Ok(plaintext) = channels[peer_idx].channel.decrypt(&envelope) else { continue };
					let Ok(message) = codec::canonical_deserialize::<SessionMessage>(&plaintext) else { continue };
					if let SessionMessage::Decline { .. } = &message {
						continue;
					}
					if let Some(item) = extract(peer_idx, message)? {
						collected.push(item);
					}
				}
			}
		}
		Ok(collected)
	}
}

/// The participant side: holds this party's threshold key share and their
/// own decrypted CRT share, and answers a host's session messages.
pub struct Participant<T: Transport> {
	transport: Arc<T>,
	my_sk: SecretKey,
	my_pk: PublicKey,
	host_pk: PublicKey,
	threshold_party: ThresholdParty,
	my_share: Share,
	config: LockframeConfig,
}

impl<T: Transport> Participant<T> {
	/// `expected_fingerprint` is the `SHA256` of this party's own serialized
	/// `my_share` bytes, as recorded against this party's index in the
	/// manifest's registry; `new` rejects a share that doesn't match before
	/// the session ever starts, rather than finding out during delivery.
	pub fn new(
		transport: Arc<T>,
		my_sk: SecretKey,
		my_pk: PublicKey,
		host_pk: PublicKey,
		threshold_party: ThresholdParty,
		my_share: Share,
		expected_fingerprint: [u8; 32],
		config: LockframeConfig,
	) -> Result<Self, LockframeError> {
		let raw = bincode::serialize(&my_share).expect("Share serializes infallibly");
		if dealer::fingerprint_share_bytes(&raw) != expected_fingerprint {
			return Err(LockframeError::Data(DataError::Tamper));
		}
		Ok(Self { transport, my_sk, my_pk, host_pk, threshold_party, my_share, config })
	}

	/// Accepts the host's handshake and answers one full session: a
	/// commitment, a response to the resulting challenge, then the share.
	/// Returns once the share has been sent.
	pub async fn join(&mut self, rng: &mut impl RngCore) -> Result<(), LockframeError> {
		let (secure, host_addr) = channel::accept(
			&*self.transport,
			&self.my_sk,
			&self.my_pk,
			&self.host_pk,
			self.config.signer_retry_budget,
			rng,
		)
		.await
		.map_err(LockframeError::Handshake)?;

		loop {
			let message = self.recv_message(&secure).await?;
			let is_challenge = matches!(message, SessionMessage::Challenge(_));
			match message {
				SessionMessage::RequestCommitment { .. } => {
					let commitment = self.threshold_party.commit(rng);
					self.send_message(&secure, host_addr, &SessionMessage::Commitment(commitment), rng).await?;
				}
				SessionMessage::Challenge(challenge) => {
					let response = self.respond_to_challenge(&challenge)?;
					self.send_message(&secure, host_addr, &SessionMessage::Response(response), rng).await?;
				}
				_ => continue,
			}
			if is_challenge {
				break;
			}
		}

		self.send_message(&secure, host_addr, &SessionMessage::ShareDelivery(self.my_share.clone()), rng).await?;
		Ok(())
	}

	fn respond_to_challenge(&mut self, challenge: &Challenge) -> Result<Response, LockframeError> {
		self.threshold_party.respond(challenge).map_err(LockframeError::Crypto)
	}

	async fn recv_message(&self, secure: &SecureChannel) -> Result<SessionMessage, LockframeError> {
		let (_addr, bytes) = self.transport.recv().await.ok_or(LockframeError::Session(SessionError::Timeout))?;
		let envelope: Envelope = codec::canonical_deserialize(&bytes)?;
		let plaintext = secure.decrypt(&envelope).map_err(LockframeError::Handshake)?;
		codec::canonical_deserialize(&plaintext)
	}

	async fn send_message(
		&self,
		secure: &SecureChannel,
		to: SocketAddr,
		message: &SessionMessage,
		rng: &mut impl RngCore,
	) -> Result<(), LockframeError> {
		let bytes = codec::canonical_serialize(message)?;
		let envelope = secure.encrypt(&bytes, rng);
		let envelope_bytes = codec::canonical_serialize(&envelope)?;
		self.transport.send_reliable(to, &envelope_bytes).await.map_err(LockframeError::Transport)
	}
}
