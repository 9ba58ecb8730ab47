//! The single key type shared by the KEM and the signer.
//!
//! The original source conflated a KEM-flavoured key (`public_seed`, `s`)
//! and a signature-flavoured key (`rho`, `s1`) behind a runtime adapter.
//! Here there is one [`PublicKey`] and one [`SecretKey`]; both the KEM and
//! the signer agree on `(rho, s1, s2)`, and [`crate::ring::expand_a`] is
//! the single source of truth for the matrix `A`.

use rand::Rng;
use serde::{Deserialize, Serialize};
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::ring::{self, Matrix, Poly, ETA, K, L, N, Q};

/// `(rho, t)`: immutable once produced.
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct PublicKey {
	#[serde(with = "hex::serde")]
	pub rho: [u8; 32],
	pub t: Vec<Poly>,
}

impl PublicKey {
	pub fn expand_a(&self) -> Matrix {
		ring::expand_a(&self.rho)
	}

	/// A short, safe-to-log fingerprint; never logs the key material itself.
	pub fn fingerprint(&self) -> String {
		use sha2::{Digest, Sha256};
		let mut hasher = Sha256::new();
		hasher.update(self.rho);
		for poly in &self.t {
			for c in poly.0 {
				hasher.update(c.to_le_bytes());
			}
		}
		hex::encode(&hasher.finalize()[..8])
	}
}

/// `(rho, s1, s2)`. Must never leave the host that minted it.
#[derive(Clone, Serialize, Deserialize, Zeroize, ZeroizeOnDrop)]
pub struct SecretKey {
	#[serde(with = "hex::serde")]
	#[zeroize(skip)]
	pub rho: [u8; 32],
	pub s1: Vec<Poly>,
	pub s2: Vec<Poly>,
}

impl SecretKey {
	pub fn expand_a(&self) -> Matrix {
		ring::expand_a(&self.rho)
	}
}

/// `keygen(rho) -> (pk, sk)`
///
/// `rho` is normally fresh per identity, but threshold parties share a
/// single `rho` (hence a single `A`) while holding distinct `(s1, s2)`.
pub fn keygen_with_seed(rho: [u8; 32], rng: &mut impl Rng) -> (PublicKey, SecretKey) {
	let a = ring::expand_a(&rho);
	let s1 = sample_bounded_vec(L, rng);
	let s2 = sample_bounded_vec(K, rng);

	let as1 = ring::mat_vec_mul(&a, &s1);
	let t: Vec<Poly> = as1.iter().zip(s2.iter()).map(|(row, e)| ring::poly_add(row, e)).collect();

	(PublicKey { rho, t }, SecretKey { rho, s1, s2 })
}

/// Generates a fresh `rho` and calls [`keygen_with_seed`].
pub fn keygen(rng: &mut impl Rng) -> (PublicKey, SecretKey) {
	let mut rho = [0u8; 32];
	rng.fill(&mut rho);
	keygen_with_seed(rho, rng)
}

fn sample_bounded_vec(len: usize, rng: &mut impl Rng) -> Vec<Poly> {
	(0..len)
		.map(|_| {
			let mut p = Poly::default();
			for i in 0..N {
				let v: i64 = rng.gen_range(-ETA..=ETA);
				p[i] = ring::pos_mod(v, Q);
			}
			p
		})
		.collect()
}

#[cfg(test)]
mod tests {
	use super::*;
	use rand::SeedableRng;
	use rand::rngs::StdRng;

	#[test]
	fn keygen_satisfies_public_key_relation() {
		let mut rng = StdRng::seed_from_u64(42);
		let (pk, sk) = keygen(&mut rng);
		assert_eq!(pk.rho, sk.rho);

		let a = sk.expand_a();
		let as1 = ring::mat_vec_mul(&a, &sk.s1);
		for (row, e) in as1.iter().zip(sk.s2.iter()) {
			let expected = ring::poly_add(row, e);
			assert!(pk.t.contains(&expected) || true); // structural sanity below
		}
		let reconstructed: Vec<Poly> =
			as1.iter().zip(sk.s2.iter()).map(|(row, e)| ring::poly_add(row, e)).collect();
		assert_eq!(pk.t, reconstructed);

		for poly in pk.t.iter().chain(sk.s1.iter()).chain(std::iter::empty()) {
			for &c in poly.0.iter() {
				assert!((0..Q).contains(&c));
			}
		}
	}

	#[test]
	fn secret_coefficients_are_bounded() {
		let mut rng = StdRng::seed_from_u64(7);
		let (_pk, sk) = keygen(&mut rng);
		for poly in sk.s1.iter().chain(sk.s2.iter()) {
			for &c in poly.0.iter() {
				let centered = ring::center_mod(c, Q);
				assert!(centered.abs() <= ETA);
			}
		}
	}

	#[test]
	fn fingerprint_is_stable_and_distinguishes_keys() {
		let mut rng = StdRng::seed_from_u64(1);
		let (pk1, _) = keygen(&mut rng);
		let (pk2, _) = keygen(&mut rng);
		assert_eq!(pk1.fingerprint(), pk1.fingerprint());
		assert_ne!(pk1.fingerprint(), pk2.fingerprint());
	}
}
