//! The manifest and wire-message types.
//!
//! The manifest is the stable, human-inspectable JSON artifact the dealer
//! produces; wire messages are the binary envelope exchanged during a
//! recovery session. `canonical_serialize`/`canonical_deserialize` fix the
//! encoding each type uses so every caller agrees on the bytes that get
//! hashed, signed, or sent over the transport.

use serde::{Deserialize, Serialize};

use crate::error::LockframeError;
use crate::keys::PublicKey;

/// The manifest format version this crate produces and reads.
pub const MANIFEST_VERSION: &str = "QSP-4.0";

/// What a caller supplies per recipient before the dealer derives the
/// fields that depend on the split itself (`modulus`, `file_path`,
/// `share_fingerprint`).
#[derive(Clone, Debug)]
pub struct RegistryInput {
	pub party_index: u32,
	pub public_key: PublicKey,
	pub owner_alias: Option<String>,
	pub address_hint: Option<String>,
}

/// One registered key holder, as recorded by the dealer. `public_key`
/// carries the unified `(rho, t)` key this crate uses for both the KEM and
/// the signer, playing the role the external manifest contract calls
/// `owner_public_t`.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct RegistryEntry {
	pub party_index: u32,
	pub modulus: u64,
	pub file_path: String,
	#[serde(with = "hex::serde")]
	pub share_fingerprint: [u8; 32],
	pub owner_alias: Option<String>,
	pub public_key: PublicKey,
	pub address_hint: Option<String>,
}

/// The stable JSON artifact produced by `lock_and_distribute`. `file_path`
/// on each registry entry names the field holding that party's encrypted
/// share blob path; `public_seed` is the shared `rho` every threshold
/// party's combined public key expands the same matrix `A` from.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Manifest {
	pub version: String,
	pub session_id: String,
	pub threshold: u32,
	pub total_shares: u32,
	#[serde(with = "hex::serde")]
	pub public_seed: [u8; 32],
	pub width: u32,
	pub height: u32,
	pub arnold_iterations: u32,
	pub registry: Vec<RegistryEntry>,
}

/// Serializes a value with the manifest/wire JSON convention.
pub fn canonical_serialize<T: Serialize>(value: &T) -> Result<Vec<u8>, LockframeError> {
	serde_json::to_vec(value).map_err(|_| LockframeError::Data(crate::error::DataError::Tamper))
}

/// Deserializes a value with the manifest/wire JSON convention.
pub fn canonical_deserialize<T: for<'de> Deserialize<'de>>(bytes: &[u8]) -> Result<T, LockframeError> {
	serde_json::from_slice(bytes).map_err(|_| LockframeError::Data(crate::error::DataError::Tamper))
}

/// The outer envelope every recovery-session wire message is wrapped in
/// before hitting the secure channel. Carried as JSON on the wire, like the
/// manifest; `ciphertext` is base64-encoded so it survives that encoding
/// without ballooning into a JSON number array.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum Envelope {
	Hello { from_party: u32, public_key: PublicKey, nonce: [u8; 16] },
	Handshake { kem_ct: crate::kem::KemCiphertext, signature: crate::signer::Signature, timestamp_unix: u64 },
	Secure {
		#[serde(with = "base64_bytes")]
		ciphertext: Vec<u8>,
		nonce: [u8; 12],
	},
}

mod base64_bytes {
	use base64::engine::general_purpose::STANDARD;
	use base64::Engine;
	use serde::{Deserialize, Deserializer, Serializer};

	pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
		s.serialize_str(&STANDARD.encode(bytes))
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
		let encoded = String::deserialize(d)?;
		STANDARD.decode(&encoded).map_err(serde::de::Error::custom)
	}
}

/// Messages exchanged once a secure channel is established.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub enum SessionMessage {
	RequestCommitment { session_id: String, message_digest: [u8; 32] },
	Commitment(crate::threshold::Commitment),
	Challenge(crate::threshold::Challenge),
	Response(crate::threshold::Response),
	ShareDelivery(crate::crt::Share),
	Decline { reason: String },
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	fn sample_entry(pk: PublicKey) -> RegistryEntry {
		RegistryEntry {
			party_index: 0,
			modulus: 257,
			file_path: "alice/secure_share_1.dat".into(),
			share_fingerprint: [9u8; 32],
			owner_alias: Some("alice".into()),
			public_key: pk,
			address_hint: None,
		}
	}

	#[test]
	fn manifest_round_trips_through_json() {
		let mut rng = StdRng::seed_from_u64(201);
		let (pk, _sk) = keys::keygen(&mut rng);
		let manifest = Manifest {
			version: MANIFEST_VERSION.into(),
			session_id: "abc-123".into(),
			threshold: 3,
			total_shares: 5,
			public_seed: [3u8; 32],
			width: 64,
			height: 64,
			arnold_iterations: 6,
			registry: vec![sample_entry(pk)],
		};
		let bytes = canonical_serialize(&manifest).unwrap();
		let back: Manifest = canonical_deserialize(&bytes).unwrap();
		assert_eq!(manifest, back);
	}

	#[test]
	fn manifest_json_nests_share_fingerprint_and_file_path_per_entry() {
		let mut rng = StdRng::seed_from_u64(202);
		let (pk, _sk) = keys::keygen(&mut rng);
		let manifest = Manifest {
			version: MANIFEST_VERSION.into(),
			session_id: "s".into(),
			threshold: 2,
			total_shares: 3,
			public_seed: [0u8; 32],
			width: 8,
			height: 8,
			arnold_iterations: 1,
			registry: vec![sample_entry(pk)],
		};
		let json = String::from_utf8(canonical_serialize(&manifest).unwrap()).unwrap();
		assert!(json.contains("\"version\""));
		assert!(json.contains("\"public_seed\""));
		assert!(json.contains("\"file_path\""));
		assert!(json.contains("\"share_fingerprint\""));
		assert!(json.contains("\"owner_alias\""));
		assert!(!json.contains("carrier_file"));
	}
}
