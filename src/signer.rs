//! Single-party Fiat-Shamir-with-aborts lattice signatures
//!
//! [`crate::threshold`] reuses [`hash_to_challenge`] and the high/low bits
//! helpers from [`crate::ring`] so both signers derive challenges the same way.

use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sha3::digest::{ExtendableOutput, Update as _, XofReader};
use sha3::Shake256;

use crate::error::CryptoError;
use crate::keys::{PublicKey, SecretKey};
use crate::ring::{self, Poly, ALPHA, BETA, GAMMA1, GAMMA2, L, N, Q, TAU};

/// `(z, c_hash)`: a completed single-party signature.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Signature {
	pub z: Vec<Poly>,
	#[serde(with = "hex::serde")]
	pub c_hash: [u8; 32],
}

/// `hash_to_challenge(c_hash) -> c`: a sparse +/-1 polynomial of Hamming
/// weight `TAU`, derived deterministically from a 32-byte digest.
///
/// Draws bytes one at a time from `SHAKE256(c_hash)`; a byte that lands on
/// an already-occupied slot is skipped, never retried with fresh entropy.
/// The draw is capped at `N/2` bytes, which also provably terminates the
/// loop.
pub fn hash_to_challenge(c_hash: &[u8; 32]) -> Poly {
	let mut hasher = Shake256::default();
	hasher.update(c_hash);
	let mut reader = hasher.finalize_xof();

	let mut stream = vec![0u8; N / 2];
	reader.read(&mut stream);

	let mut c = Poly::default();
	let mut placed = 0usize;
	for &byte in stream.iter() {
		if placed >= TAU {
			break;
		}
		let idx = (byte as usize) % N;
		if c[idx] != 0 {
			continue;
		}
		c[idx] = if byte & 0x80 != 0 { -1 } else { 1 };
		placed += 1;
	}
	c
}

pub(crate) fn compute_c_hash(message: &[u8], w1: &[Poly]) -> [u8; 32] {
	let mut hasher = Sha256::new();
	Digest::update(&mut hasher, message);
	for poly in w1 {
		for &c in poly.0.iter() {
			Digest::update(&mut hasher, c.to_le_bytes());
		}
	}
	hasher.finalize().into()
}

pub(crate) fn high_bits_vec(v: &[Poly]) -> Vec<Poly> {
	v.iter()
		.map(|p| {
			let mut out = Poly::default();
			for i in 0..N {
				out[i] = ring::high_bits(p[i], ALPHA, Q);
			}
			out
		})
		.collect()
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

pub(crate) fn scale_by_challenge(c: &Poly, v: &[Poly]) -> Vec<Poly> {
	v.iter().map(|p| ring::poly_mul_rq(c, p)).collect()
}

pub(crate) fn vec_poly_add(a: &[Poly], b: &[Poly]) -> Vec<Poly> {
	a.iter().zip(b.iter()).map(|(x, y)| ring::poly_add(x, y)).collect()
}

pub(crate) fn vec_poly_sub(a: &[Poly], b: &[Poly]) -> Vec<Poly> {
	a.iter().zip(b.iter()).map(|(x, y)| ring::poly_sub(x, y)).collect()
}

/// `sign(sk, pk, message) -> Signature`. Retries with fresh `y` on a norm
/// violation, bounded by `retry_budget` (`LockframeConfig::signer_retry_budget`).
pub fn sign(
	sk: &SecretKey,
	pk: &PublicKey,
	message: &[u8],
	retry_budget: u32,
	rng: &mut impl Rng,
) -> Result<Signature, CryptoError> {
	let a = sk.expand_a();
	for _ in 0..retry_budget {
		let y = sample_y(rng);
		let w = ring::mat_vec_mul(&a, &y);
		let w1 = high_bits_vec(&w);
		let c_hash = compute_c_hash(message, &w1);
		let c = hash_to_challenge(&c_hash);

		let cs1 = scale_by_challenge(&c, &sk.s1);
		let z: Vec<Poly> = y.iter().zip(cs1.iter()).map(|(yi, csi)| ring::poly_add(yi, csi)).collect();
		if ring::vec_infinity_norm_centered(&z, Q) > GAMMA1 - BETA {
			continue;
		}

		let cs2 = scale_by_challenge(&c, &sk.s2);
		let w_minus_cs2 = vec_poly_sub(&w, &cs2);
		let low_norm = w_minus_cs2
			.iter()
			.flat_map(|p| p.0.iter())
			.map(|&coeff| ring::low_bits(coeff, ALPHA, Q).abs())
			.max()
			.unwrap_or(0);
		if low_norm > GAMMA2 - BETA {
			continue;
		}

		return Ok(Signature { z, c_hash });
	}
	Err(CryptoError::Sample)
}

/// `verify(pk, message, sig) -> bool`.
pub fn verify(pk: &PublicKey, message: &[u8], sig: &Signature) -> bool {
	if ring::vec_infinity_norm_centered(&sig.z, Q) > GAMMA1 - BETA {
		return false;
	}
	let a = pk.expand_a();
	let c = hash_to_challenge(&sig.c_hash);

	let az = ring::mat_vec_mul(&a, &sig.z);
	let ct = scale_by_challenge(&c, &pk.t);
	let w_prime = vec_poly_sub(&az, &ct);
	let w1_prime = high_bits_vec(&w_prime);
	let c_hash_prime = compute_c_hash(message, &w1_prime);

	c_hash_prime == sig.c_hash
}
