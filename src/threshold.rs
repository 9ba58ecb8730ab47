//! Threshold lattice signing
//!
//! A three-phase commit-challenge-respond ceremony: every party samples a
//! nonce `y_i` and commits to `w_i = A * y_i` (phase 1); the aggregator
//! derives a single challenge from the summed commitment; every party
//! answers with `z_i = y_i + c * s1_i` (phase 2); the aggregator sums the
//! `z_i` and verifies against the combined public key. A norm violation at
//! either phase restarts the ceremony from phase 1 with fresh nonces,
//! bounded by `LockframeConfig::threshold_phase1_retry_budget`.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::CryptoError;
use crate::keys::PublicKey;
use crate::ring::{self, Poly, ALPHA, BETA, GAMMA1, GAMMA2, L, N, Q};
use crate::signer::{self, Signature};

/// Phase-1 commitment from a single party.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Commitment {
	pub party_index: u32,
	pub w: Vec<Poly>,
}

/// The challenge every party answers against in phase 2, derived from the
/// aggregated phase-1 commitments.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Challenge {
	#[serde(with = "hex::serde")]
	pub c_hash: [u8; 32],
}

/// Phase-2 response from a single party.
#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct Response {
	pub party_index: u32,
	pub z: Vec<Poly>,
}

/// A single threshold key holder's session state. Holds its additive share
/// of `(s1, s2)` and, between phase 1 and phase 2, the nonce `y_i` it
/// committed to. `y_i` is wiped the moment it is consumed by [`Self::respond`]
/// or discarded by [`Self::reset`].
pub struct ThresholdParty {
	pub index: u32,
	pub rho: [u8; 32],
	pub s1_share: Vec<Poly>,
	pub s2_share: Vec<Poly>,
	y: Option<Vec<Poly>>,
}

impl ThresholdParty {
	pub fn new(index: u32, rho: [u8; 32], s1_share: Vec<Poly>, s2_share: Vec<Poly>) -> Self {
		Self { index, rho, s1_share, s2_share, y: None }
	}

	/// Phase 1: sample a fresh nonce and commit to it.
	pub fn commit(&mut self, rng: &mut impl Rng) -> Commitment {
		self.reset();
		let a = ring::expand_a(&self.rho);
		let y = sample_y(rng);
		let w = ring::mat_vec_mul(&a, &y);
		self.y = Some(y);
		Commitment { party_index: self.index, w }
	}

	/// Phase 2: answer the aggregated challenge using the nonce from the
	/// most recent [`Self::commit`]. Fails if called before `commit` or
	/// after a prior `respond`/`reset` already consumed the nonce.
	///
	/// Before returning, checks both `||center(z_i)||_inf < GAMMA1 - BETA`
	/// and `||LowBits(A*y_i - c*s2_i)||_inf < GAMMA2 - BETA`; `y_i` is wiped
	/// either way, so a caller that sees `Err` must restart from `commit`.
	pub fn respond(&mut self, challenge: &Challenge) -> Result<Response, CryptoError> {
		let y = self.y.take().ok_or(CryptoError::Sample)?;
		let c = signer::hash_to_challenge(&challenge.c_hash);

		let cs1 = signer::scale_by_challenge(&c, &self.s1_share);
		let z = signer::vec_poly_add(&y, &cs1);

		let a = ring::expand_a(&self.rho);
		let ay = ring::mat_vec_mul(&a, &y);
		let cs2 = signer::scale_by_challenge(&c, &self.s2_share);
		let r = signer::vec_poly_sub(&ay, &cs2);
		let low_norm = r
			.iter()
			.flat_map(|p| p.0.iter())
			.map(|&coeff| ring::low_bits(coeff, ALPHA, Q).abs())
			.max()
			.unwrap_or(0);

		zero_out(y);

		if ring::vec_infinity_norm_centered(&z, Q) > GAMMA1 - BETA || low_norm > GAMMA2 - BETA {
			return Err(CryptoError::Sample);
		}
		Ok(Response { party_index: self.index, z })
	}

	/// Discards any in-flight nonce without producing a response, wiping it
	/// first. Called automatically at the start of every `commit`.
	pub fn reset(&mut self) {
		if let Some(y) = self.y.take() {
			zero_out(y);
		}
	}
}

fn zero_out(mut y: Vec<Poly>) {
	use zeroize::Zeroize;
	for poly in y.iter_mut() {
		poly.zeroize();
	}
}

fn sample_y(rng: &mut impl Rng) -> Vec<Poly> {
	let bound = GAMMA1 >> 3;
	(0..L)
		.map(|_| {
			let mut p = Poly::default();
			for i in 0..N {
				p[i] = rng.gen_range(-bound..=bound);
			}
			p
		})
		.collect()
}

/// Sums per-party commitments into the aggregate `w = sum(w_i)`.
pub fn aggregate_commitments(commitments: &[Commitment]) -> Vec<Poly> {
	let mut acc = commitments[0].w.clone();
	for commitment in &commitments[1..] {
		acc = signer::vec_poly_add(&acc, &commitment.w);
	}
	acc
}

/// Derives the phase-2 challenge from the message and the aggregated
/// phase-1 commitment, using the same `HighBits` + `SHA-256` construction
/// the single-party signer uses.
pub fn derive_challenge(message: &[u8], aggregated_w: &[Poly]) -> Challenge {
	let w1 = signer::high_bits_vec(aggregated_w);
	let c_hash = signer::compute_c_hash(message, &w1);
	Challenge { c_hash }
}

/// Sums per-party responses into the aggregate `z = sum(z_i)`.
pub fn aggregate_responses(responses: &[Response]) -> Vec<Poly> {
	let mut acc = responses[0].z.clone();
	for response in &responses[1..] {
		acc = signer::vec_poly_add(&acc, &response.z);
	}
	acc
}

/// Combines an aggregated `z` and the phase-2 challenge into a completed
/// signature and verifies it against the combined public key. Returns
/// `CryptoError::VerifyNorm` if the summed response exceeds `GAMMA1 - BETA`,
/// the same bound the single-party signer holds its own `z` to; the caller
/// should treat this as a signal to restart the ceremony with fresh nonces.
pub fn finalize(pk: &PublicKey, message: &[u8], challenge: &Challenge, aggregated_z: Vec<Poly>) -> Result<Signature, CryptoError> {
	if ring::vec_infinity_norm_centered(&aggregated_z, Q) > GAMMA1 - BETA {
		return Err(CryptoError::VerifyNorm);
	}
	let sig = Signature { z: aggregated_z, c_hash: challenge.c_hash };
	if !signer::verify(pk, message, &sig) {
		return Err(CryptoError::VerifyHash);
	}
	Ok(sig)
}
