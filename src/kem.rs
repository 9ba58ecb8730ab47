//! Module-LWE key encapsulation
//!
//! `encaps`/`decaps` wrap a 32-byte symmetric key inside an LWE sample;
//! [`crate::hybrid`] is the only caller that turns this into a stream cipher.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::keys::{PublicKey, SecretKey};
use crate::ring::{self, Poly, ETA, GAMMA1, K, L, N, Q};

/// `(u, v)`: the encapsulated form of a 32-byte key against a [`PublicKey`].
#[derive(Clone, PartialEq, Eq, Debug, Serialize, Deserialize)]
pub struct KemCiphertext {
	pub u: Vec<Poly>,
	pub v: Poly,
}

/// `encaps(pk, key) -> (u, v)`.
///
/// `key` is encoded one bit per coefficient of `v`, each scaled to
/// `+/- floor(q/2)` before the LWE noise is added, so that a correctly
/// decapsulating party recovers the sign even after roundoff.
pub fn encaps(pk: &PublicKey, key: &[u8; 32], rng: &mut impl Rng) -> KemCiphertext {
	let a = pk.expand_a();
	let r = sample_bounded_vec(L, rng);
	let e1 = sample_bounded_vec(K, rng);
	let e2 = sample_bounded_poly(rng);

	let a_t = transpose(&a);
	let ar = ring::mat_vec_mul(&a_t, &r);
	let u: Vec<Poly> = ar.iter().zip(e1.iter()).map(|(row, e)| ring::poly_add(row, e)).collect();

	let mut tr = Poly::default();
	for (t_i, r_i) in pk.t.iter().zip(r.iter()) {
		tr = ring::poly_add(&tr, &ring::poly_mul_rq(t_i, r_i));
	}
	let encoded = encode_key(key);
	let v = ring::poly_add(&ring::poly_add(&tr, &e2), &encoded);

	KemCiphertext { u, v }
}

/// `decaps(sk, ct) -> key`. Never panics on malformed ciphertexts; a key
/// recovered from noise outside the expected decision boundary is still
/// returned — callers detect tamper via the manifest fingerprint, not here.
pub fn decaps(sk: &SecretKey, ct: &KemCiphertext) -> [u8; 32] {
	let mut su = Poly::default();
	for (s1_i, u_i) in sk.s1.iter().zip(ct.u.iter()) {
		su = ring::poly_add(&su, &ring::poly_mul_rq(s1_i, u_i));
	}
	let noisy = ring::poly_sub(&ct.v, &su);
	decode_key(&noisy)
}

fn encode_key(key: &[u8; 32]) -> Poly {
	let half_q = Q / 2;
	let mut out = Poly::default();
	for byte_idx in 0..32 {
		for bit_idx in 0..8 {
			let coeff_idx = byte_idx * 8 + bit_idx;
			if coeff_idx >= N {
				break;
			}
			let bit = (key[byte_idx] >> bit_idx) & 1;
			out[coeff_idx] = if bit == 1 { half_q } else { 0 };
		}
	}
	out
}

fn decode_key(noisy: &Poly) -> [u8; 32] {
	let mut out = [0u8; 32];
	let quarter_q = Q / 4;
	for coeff_idx in 0..(32 * 8).min(N) {
		let centered = ring::center_mod(noisy[coeff_idx], Q);
		let bit = if centered.abs() > quarter_q { 1u8 } else { 0u8 };
		let byte_idx = coeff_idx / 8;
		let bit_idx = coeff_idx % 8;
		out[byte_idx] |= bit << bit_idx;
	}
	out
}

fn transpose(a: &[Vec<Poly>]) -> Vec<Vec<Poly>> {
	let rows = a.len();
	let cols = if rows == 0 { 0 } else { a[0].len() };
	(0..cols).map(|j| (0..rows).map(|i| a[i][j]).collect()).collect()
}

fn sample_bounded_vec(len: usize, rng: &mut impl Rng) -> Vec<Poly> {
	(0..len).map(|_| sample_bounded_poly(rng)).collect()
}

fn sample_bounded_poly(rng: &mut impl Rng) -> Poly {
	let mut p = Poly::default();
	for i in 0..N {
		let v: i64 = rng.gen_range(-ETA..=ETA);
		p[i] = ring::pos_mod(v, Q);
	}
	p
}

#[allow(dead_code)]
const fn _assert_gamma1_in_scope() -> i64 {
	GAMMA1
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	#[test]
	fn encaps_then_decaps_recovers_the_key() {
		let mut rng = StdRng::seed_from_u64(11);
		let (pk, sk) = keys::keygen(&mut rng);
		let key = [0x5au8; 32];
		let ct = encaps(&pk, &key, &mut rng);
		let recovered = decaps(&sk, &ct);
		assert_eq!(recovered, key);
	}

	#[test]
	fn decaps_with_wrong_key_produces_different_output() {
		let mut rng = StdRng::seed_from_u64(12);
		let (pk, sk) = keys::keygen(&mut rng);
		let (_pk2, sk2) = keys::keygen(&mut rng);
		let key = [0x11u8; 32];
		let ct = encaps(&pk, &key, &mut rng);
		let recovered = decaps(&sk2, &ct);
        // wrong secret key should overwhelmingly fail to recover the key
		assert_ne!(recovered, key);
        let _ = &sk;
	}

	#[test]
	fn ciphertext_round_trips_through_serde() {
		let mut rng = StdRng::seed_from_u64(13);
		let (pk, _sk) = keys::keygen(&mut rng);
		let ct = encaps(&pk, &[1u8; 32], &mut rng);
		let bytes = bincode::serialize(&ct).unwrap();
		let back: KemCiphertext = bincode::deserialize(&bytes).unwrap();
		assert_eq!(ct, back);
	}
}
