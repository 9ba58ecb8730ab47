//! Secure channel handshake and message encryption
//!
//! A KEM encapsulation bound to a signature over its own bytes establishes
//! a shared 32-byte session key, used directly as an AES-256-GCM key for
//! every subsequent message on the channel. The handshake timestamp guards
//! against a captured handshake being replayed long after the fact.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::RngCore;
use zeroize::Zeroizing;

use crate::codec::Envelope;
use crate::error::HandshakeError;
use crate::kem;
use crate::keys::{PublicKey, SecretKey};
use crate::signer::{self, Signature};
use crate::transport::Transport;

/// An established channel: an AES-256-GCM session key plus the peer's
/// public-key fingerprint, kept only for logging.
#[derive(Debug)]
pub struct SecureChannel {
	session_key: Zeroizing<[u8; 32]>,
	pub peer_fingerprint: String,
}

fn now_unix() -> u64 {
	SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}

fn handshake_signing_bytes(kem_ct: &kem::KemCiphertext, nonce: &[u8; 16], timestamp_unix: u64) -> Vec<u8> {
	let mut bytes = bincode::serialize(kem_ct).expect("KemCiphertext serializes infallibly");
	bytes.extend_from_slice(nonce);
	bytes.extend_from_slice(&timestamp_unix.to_be_bytes());
	bytes
}

/// Sends a `Hello`, waits for the peer's `Handshake` reply, and derives the
/// session key by decapsulating it. Verifies the reply's signature against
/// `peer_pk` and rejects a stale timestamp.
pub async fn setup_as_initiator(
	transport: &dyn Transport,
	peer_addr: SocketAddr,
	my_pk: &PublicKey,
	my_sk: &SecretKey,
	peer_pk: &PublicKey,
	clock_skew_tolerance_secs: u64,
	rng: &mut impl RngCore,
) -> Result<SecureChannel, HandshakeError> {
	let mut nonce = [0u8; 16];
	rng.fill_bytes(&mut nonce);
	let hello = Envelope::Hello { from_party: 0, public_key: my_pk.clone(), nonce };
	let hello_bytes = serde_json::to_vec(&hello).map_err(|_| HandshakeError::Sig)?;
	transport.send_reliable(peer_addr, &hello_bytes).await.map_err(|_| HandshakeError::Sig)?;

	let (_from, reply_bytes) = transport.recv().await.ok_or(HandshakeError::Sig)?;
	let reply: Envelope = serde_json::from_slice(&reply_bytes).map_err(|_| HandshakeError::Sig)?;
	let Envelope::Handshake { kem_ct, signature, timestamp_unix } = reply else {
		return Err(HandshakeError::Sig);
	};

	let now = now_unix();
	let skew = now.abs_diff(timestamp_unix);
	if skew > clock_skew_tolerance_secs {
		return Err(HandshakeError::Stale);
	}

	let signed_bytes = handshake_signing_bytes(&kem_ct, &nonce, timestamp_unix);
	if !signer::verify(peer_pk, &signed_bytes, &signature) {
		return Err(HandshakeError::Sig);
	}

	let session_key = kem::decaps(my_sk, &kem_ct);
	let peer = peer_pk.fingerprint();
	tracing::debug!(peer = %peer, "secure channel established as initiator");
	Ok(SecureChannel { session_key: Zeroizing::new(session_key), peer_fingerprint: peer })
}

/// Waits for a `Hello`, checks the claimed initiator key against
/// `expected_initiator_pk` before proceeding, replies with a `Handshake`
/// encapsulating a fresh session key to the initiator's public key and
/// signed with this party's key, and returns the now-established channel.
/// Rejects with `HandshakeError::UnknownPeer` if the `Hello`'s claimed key
/// does not match — an unauthenticated `Hello` never gets far enough to
/// solicit a `Response`/`ShareDelivery` from this party.
pub async fn accept(
	transport: &dyn Transport,
	my_sk: &SecretKey,
	my_pk: &PublicKey,
	expected_initiator_pk: &PublicKey,
	signer_retry_budget: u32,
	rng: &mut impl RngCore,
) -> Result<(SecureChannel, SocketAddr), HandshakeError> {
	let (peer_addr, hello_bytes) = transport.recv().await.ok_or(HandshakeError::Sig)?;
	let hello: Envelope = serde_json::from_slice(&hello_bytes).map_err(|_| HandshakeError::Sig)?;
	let Envelope::Hello { public_key: initiator_pk, nonce, .. } = hello else {
		return Err(HandshakeError::Sig);
	};

	if initiator_pk != *expected_initiator_pk {
		tracing::warn!("dropping handshake from an unexpected public key");
		return Err(HandshakeError::UnknownPeer);
	}

	let mut session_key = [0u8; 32];
	rng.fill_bytes(&mut session_key);
	let kem_ct = kem::encaps(&initiator_pk, &session_key, rng);

	let timestamp_unix = now_unix();
	let signed_bytes = handshake_signing_bytes(&kem_ct, &nonce, timestamp_unix);
	let signature: Signature = signer::sign(my_sk, my_pk, &signed_bytes, signer_retry_budget, rng)
		.map_err(|_| HandshakeError::Sig)?;

	let reply = Envelope::Handshake { kem_ct, signature, timestamp_unix };
	let reply_bytes = serde_json::to_vec(&reply).map_err(|_| HandshakeError::Sig)?;
	transport.send_reliable(peer_addr, &reply_bytes).await.map_err(|_| HandshakeError::Sig)?;

	let peer = initiator_pk.fingerprint();
	tracing::debug!(peer = %peer, "secure channel established as responder");
	let channel = SecureChannel { session_key: Zeroizing::new(session_key), peer_fingerprint: peer };
	Ok((channel, peer_addr))
}

impl SecureChannel {
	/// Encrypts `plaintext` under the session key, producing a ready-to-send
	/// `Envelope::Secure`.
	pub fn encrypt(&self, plaintext: &[u8], rng: &mut impl RngCore) -> Envelope {
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*self.session_key));
		let mut nonce_bytes = [0u8; 12];
		rng.fill_bytes(&mut nonce_bytes);
		let nonce = Nonce::from_slice(&nonce_bytes);
		let ciphertext = cipher.encrypt(nonce, plaintext).expect("AES-GCM encryption does not fail");
		Envelope::Secure { ciphertext, nonce: nonce_bytes }
	}

	/// Decrypts an `Envelope::Secure`, returning `HandshakeError::Sig` if the
	/// authentication tag does not verify (wrong key, or tampered bytes).
	pub fn decrypt(&self, envelope: &Envelope) -> Result<Vec<u8>, HandshakeError> {
		let Envelope::Secure { ciphertext, nonce } = envelope else {
			return Err(HandshakeError::Sig);
		};
		let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&*self.session_key));
		cipher.decrypt(Nonce::from_slice(nonce), ciphertext.as_slice()).map_err(|_| HandshakeError::Sig)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys;
	use crate::transport::{MockNetwork, MockTransport};
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	fn addr(port: u16) -> SocketAddr {
		format!("127.0.0.1:{port}").parse().unwrap()
	}

	#[tokio::test]
	async fn handshake_establishes_matching_session_keys() {
		let network = MockNetwork::new();
		let initiator_transport = MockTransport::register(addr(50001), &network).await;
		let responder_transport = MockTransport::register(addr(50002), &network).await;

		let mut rng = StdRng::seed_from_u64(401);
		let (initiator_pk, initiator_sk) = keys::keygen(&mut rng);
		let (responder_pk, responder_sk) = keys::keygen(&mut rng);

		let responder_pk_clone = responder_pk.clone();
		let initiator_pk_clone = initiator_pk.clone();
		let responder_task = tokio::spawn(async move {
			let mut rng = StdRng::seed_from_u64(402);
			accept(&responder_transport, &responder_sk, &responder_pk_clone, &initiator_pk_clone, 64, &mut rng)
				.await
				.map(|(ch, _addr)| ch)
		});

		let mut rng = StdRng::seed_from_u64(403);
		let initiator_channel = setup_as_initiator(
			&initiator_transport,
			addr(50002),
			&initiator_pk,
			&initiator_sk,
			&responder_pk,
			60,
			&mut rng,
		)
		.await
		.unwrap();

		let responder_channel = responder_task.await.unwrap().unwrap();

		let plaintext = b"share delivery payload";
		let mut rng = StdRng::seed_from_u64(404);
		let envelope = initiator_channel.encrypt(plaintext, &mut rng);
		let decrypted = responder_channel.decrypt(&envelope).unwrap();
		assert_eq!(decrypted, plaintext);
	}

	#[tokio::test]
	async fn accept_rejects_a_hello_from_an_unexpected_public_key() {
		let network = MockNetwork::new();
		let stranger_transport = MockTransport::register(addr(50003), &network).await;
		let responder_transport = MockTransport::register(addr(50004), &network).await;

		let mut rng = StdRng::seed_from_u64(406);
		let (stranger_pk, _stranger_sk) = keys::keygen(&mut rng);
		let (responder_pk, responder_sk) = keys::keygen(&mut rng);
		let (expected_pk, _expected_sk) = keys::keygen(&mut rng);

		let mut nonce = [0u8; 16];
		rng.fill_bytes(&mut nonce);
		let hello = Envelope::Hello { from_party: 0, public_key: stranger_pk, nonce };
		let hello_bytes = serde_json::to_vec(&hello).unwrap();
		stranger_transport.send_reliable(addr(50004), &hello_bytes).await.unwrap();

		let result = accept(&responder_transport, &responder_sk, &responder_pk, &expected_pk, 64, &mut rng).await;
		assert_eq!(result.unwrap_err(), HandshakeError::UnknownPeer);
	}

	#[test]
	fn decrypt_rejects_a_tampered_ciphertext() {
		let key = Zeroizing::new([7u8; 32]);
		let channel = SecureChannel { session_key: key, peer_fingerprint: "test".into() };
		let mut rng = StdRng::seed_from_u64(405);
		let mut envelope = channel.encrypt(b"hello", &mut rng);
		if let Envelope::Secure { ciphertext, .. } = &mut envelope {
			ciphertext[0] ^= 0xFF;
		}
		assert!(channel.decrypt(&envelope).is_err());
	}
}
