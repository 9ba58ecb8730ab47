//! Hybrid KEM + stream-cipher encryption
//!
//! The KEM wraps a fresh 32-byte key per message; `SHAKE256(key)` is then
//! used as a one-time-pad keystream. Nonces are implicit — a fresh key is
//! generated for every message, so there is never a key/nonce pair reused
//! across two ciphertexts. There is no AEAD tag here — integrity is the
//! manifest's per-share `share_fingerprint` (a SHA-256 digest of the raw
//! share bytes), checked by the caller after decapsulation, per the Design
//! Note that explicitly rejects bundling an authentication tag into the blob.

use rand::RngCore;
use serde::{Deserialize, Serialize};
use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake256;

use crate::kem::{self, KemCiphertext};
use crate::keys::{PublicKey, SecretKey};

/// A self-contained encrypted message: the KEM wrapping plus the XOR'd bytes.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct EncryptedBlob {
	pub kem_ct: KemCiphertext,
	pub ciphertext: Vec<u8>,
}

/// `encrypt_to(pk, plaintext) -> EncryptedBlob`.
pub fn encrypt_to(pk: &PublicKey, plaintext: &[u8], rng: &mut impl RngCore) -> EncryptedBlob {
	let mut key = [0u8; 32];
	rng.fill_bytes(&mut key);

	let kem_ct = kem::encaps(pk, &key, rng);
	let ciphertext = xor_keystream(&key, plaintext);

	EncryptedBlob { kem_ct, ciphertext }
}

/// `decrypt_with(sk, blob) -> plaintext`. The stream cipher has no way to
/// signal tamper on its own: callers must separately check the plaintext's
/// fingerprint against the manifest.
pub fn decrypt_with(sk: &SecretKey, blob: &EncryptedBlob) -> Vec<u8> {
	let key = kem::decaps(sk, &blob.kem_ct);
	xor_keystream(&key, &blob.ciphertext)
}

fn xor_keystream(key: &[u8; 32], data: &[u8]) -> Vec<u8> {
	let mut hasher = Shake256::default();
	hasher.update(key);
	let mut reader = hasher.finalize_xof();

	let mut keystream = vec![0u8; data.len()];
	reader.read(&mut keystream);

	data.iter().zip(keystream.iter()).map(|(d, k)| d ^ k).collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	#[test]
	fn encrypt_then_decrypt_round_trips() {
		let mut rng = StdRng::seed_from_u64(21);
		let (pk, sk) = keys::keygen(&mut rng);
		let plaintext = b"threshold-protected payload bytes go here";
		let blob = encrypt_to(&pk, plaintext, &mut rng);
		let recovered = decrypt_with(&sk, &blob);
		assert_eq!(recovered, plaintext);
	}

	#[test]
	fn two_encryptions_of_the_same_plaintext_differ() {
		let mut rng = StdRng::seed_from_u64(22);
		let (pk, _sk) = keys::keygen(&mut rng);
		let plaintext = b"same plaintext, different key each time";
		let blob1 = encrypt_to(&pk, plaintext, &mut rng);
		let blob2 = encrypt_to(&pk, plaintext, &mut rng);
		assert_ne!(blob1.ciphertext, blob2.ciphertext);
	}

	#[test]
	fn ciphertext_length_matches_plaintext_length() {
		let mut rng = StdRng::seed_from_u64(23);
		let (pk, _sk) = keys::keygen(&mut rng);
		let plaintext = vec![7u8; 4096];
		let blob = encrypt_to(&pk, &plaintext, &mut rng);
		assert_eq!(blob.ciphertext.len(), plaintext.len());
	}
}
