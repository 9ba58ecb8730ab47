//! Polynomial arithmetic over `R_q = Z_q[X]/(X^N + 1)`.
//!
//! Every other crypto module (KEM, single-party signer, threshold signer)
//! shares the matrix expansion in this file: a different `expand_a` in any
//! of them would silently break verification.

use sha3::digest::{ExtendableOutput, Update, XofReader};
use sha3::Shake128;

/// Ring modulus.
pub const Q: i64 = 8_380_417;
/// Ring degree.
pub const N: usize = 256;
/// Public-key matrix row count (range dimension).
pub const K: usize = 2;
/// Secret-key vector length (domain dimension).
pub const L: usize = 2;
/// Secret coefficient bound.
pub const ETA: i64 = 2;
/// Fiat-Shamir challenge Hamming weight.
pub const TAU: usize = 39;
/// Challenge commitment bound.
pub const GAMMA1: i64 = (Q - 1) / 2;
/// Low-bits decomposition window.
pub const GAMMA2: i64 = (Q - 1) / 8;
/// Rejection-sampling margin.
pub const BETA: i64 = 250;
/// Decomposition window, `alpha = 2 * gamma2`.
pub const ALPHA: i64 = 2 * GAMMA2;

/// A single polynomial in `R_q`: `N` coefficients, conventionally held in `[0, q)`.
#[derive(Clone, Copy, PartialEq, Eq, Debug, serde::Serialize, serde::Deserialize)]
pub struct Poly(#[serde(with = "poly_serde")] pub [i64; N]);

mod poly_serde {
	use super::N;
	use serde::{Deserialize, Deserializer, Serialize, Serializer};

	pub fn serialize<S: Serializer>(v: &[i64; N], s: S) -> Result<S::Ok, S::Error> {
		v.to_vec().serialize(s)
	}

	pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<[i64; N], D::Error> {
		let v = Vec::<i64>::deserialize(d)?;
		v.try_into().map_err(|v: Vec<i64>| {
			serde::de::Error::custom(format!("expected {N} coefficients, got {}", v.len()))
		})
	}
}

impl Default for Poly {
	fn default() -> Self {
		Poly([0; N])
	}
}

impl std::ops::Index<usize> for Poly {
	type Output = i64;
	fn index(&self, i: usize) -> &i64 {
		&self.0[i]
	}
}

impl std::ops::IndexMut<usize> for Poly {
	fn index_mut(&mut self, i: usize) -> &mut i64 {
		&mut self.0[i]
	}
}

impl zeroize::Zeroize for Poly {
	fn zeroize(&mut self) {
		self.0.zeroize();
	}
}

/// `A = ExpandA(rho)`, a `K x L` matrix of polynomials.
pub type Matrix = Vec<Vec<Poly>>;
/// A length-`L` or length-`K` vector of polynomials.
pub type PolyVec = Vec<Poly>;

/// `c mod m`, reduced into `[0, m)`.
pub fn pos_mod(c: i64, m: i64) -> i64 {
	c.rem_euclid(m)
}

/// Centered reduction into `[-m/2, m/2)` (half-open at the top)
pub fn center_mod(c: i64, m: i64) -> i64 {
	let r = pos_mod(c, m);
	if 2 * r < m {
		r
	} else {
		r - m
	}
}

/// Centered reduction into `(-m/2, m/2]` (half-open at the bottom). Used by the
/// high/low decomposition, whose `LowBits` range the glossary fixes differently
/// from `center_mod`'s.
fn center_mod_upper_inclusive(c: i64, m: i64) -> i64 {
	let r = pos_mod(c, m);
	if 2 * r <= m {
		r
	} else {
		r - m
	}
}

pub fn poly_add(a: &Poly, b: &Poly) -> Poly {
	let mut out = Poly::default();
	for i in 0..N {
		out[i] = pos_mod(a[i] + b[i], Q);
	}
	out
}

pub fn poly_sub(a: &Poly, b: &Poly) -> Poly {
	let mut out = Poly::default();
	for i in 0..N {
		out[i] = pos_mod(a[i] - b[i], Q);
	}
	out
}

/// Schoolbook negacyclic multiplication in `Z_q[X]/(X^N + 1)`.
pub fn poly_mul_rq(a: &Poly, b: &Poly) -> Poly {
	let mut acc = [0i64; N];
	for i in 0..N {
		if a[i] == 0 {
			continue;
		}
		for j in 0..N {
			let k = i + j;
			let prod = a[i] * b[j];
			if k < N {
				acc[k] += prod;
			} else {
				acc[k - N] -= prod;
			}
		}
	}
	let mut out = Poly::default();
	for i in 0..N {
		out[i] = pos_mod(acc[i], Q);
	}
	out
}

/// `HighBits(c, alpha, q)`: `c = HighBits * alpha + LowBits` with `LowBits in (-alpha/2, alpha/2]`.
pub fn high_bits(c: i64, alpha: i64, q: i64) -> i64 {
	decompose(c, alpha, q).0
}

/// `LowBits(c, alpha, q)`.
pub fn low_bits(c: i64, alpha: i64, q: i64) -> i64 {
	decompose(c, alpha, q).1
}

fn decompose(c: i64, alpha: i64, q: i64) -> (i64, i64) {
	let r = pos_mod(c, q);
	let low = center_mod_upper_inclusive(r, alpha);
	let high = (r - low) / alpha;
	(high, low)
}

/// `infinity_norm` of a centered vector of polynomials.
pub fn vec_infinity_norm_centered(v: &[Poly], q: i64) -> i64 {
	v.iter()
		.flat_map(|p| p.0.iter())
		.map(|&c| center_mod(c, q).abs())
		.max()
		.unwrap_or(0)
}

/// `A * v`, where `A` is `rows x cols` and `v` has length `cols`.
pub fn mat_vec_mul(a: &Matrix, v: &[Poly]) -> PolyVec {
	let rows = a.len();
	let mut out = vec![Poly::default(); rows];
	for i in 0..rows {
		let mut acc = Poly::default();
		for (j, vj) in v.iter().enumerate() {
			acc = poly_add(&acc, &poly_mul_rq(&a[i][j], vj));
		}
		out[i] = acc;
	}
	out
}

/// `deterministic in seed`: `ExpandA(seed) -> K x L` matrix, shared by the KEM,
/// the single-party signer, and the threshold signer.
pub fn expand_a(seed: &[u8; 32]) -> Matrix {
	(0..K)
		.map(|i| (0..L).map(|j| sample_poly_uniform(seed, i as u8, j as u8)).collect())
		.collect()
}

fn sample_poly_uniform(seed: &[u8; 32], i: u8, j: u8) -> Poly {
	let mut hasher = Shake128::default();
	hasher.update(seed);
	hasher.update(&[i, j]);
	let mut reader = hasher.finalize_xof();

	let mut coeffs = [0i64; N];
	let mut filled = 0;
	let mut buf = [0u8; 3];
	while filled < N {
		reader.read(&mut buf);
		let val = (buf[0] as u32) | ((buf[1] as u32) << 8) | (((buf[2] & 0x7f) as u32) << 16);
		if (val as i64) < Q {
			coeffs[filled] = val as i64;
			filled += 1;
		}
	}
	Poly(coeffs)
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn expand_a_is_deterministic_and_shaped() {
		let seed = [7u8; 32];
		let a1 = expand_a(&seed);
		let a2 = expand_a(&seed);
		assert_eq!(a1, a2);
		assert_eq!(a1.len(), K);
		assert_eq!(a1[0].len(), L);
	}

	#[test]
	fn expand_a_differs_across_seeds() {
		let a1 = expand_a(&[1u8; 32]);
		let a2 = expand_a(&[2u8; 32]);
		assert_ne!(a1, a2);
	}

	#[test]
	fn coefficients_land_in_range() {
		let a = expand_a(&[9u8; 32]);
		for row in &a {
			for poly in row {
				for &c in poly.0.iter() {
					assert!((0..Q).contains(&c));
				}
			}
		}
	}

	#[test]
	fn center_mod_is_half_open_at_top() {
		assert_eq!(center_mod(0, 10), 0);
		assert_eq!(center_mod(4, 10), 4);
		assert_eq!(center_mod(5, 10), -5);
		assert_eq!(center_mod(9, 10), -1);
	}

	#[test]
	fn decompose_reconstructs_value() {
		let alpha = ALPHA;
		for c in [0i64, 1, Q - 1, Q / 2, 123_456] {
			let (high, low) = decompose(c, alpha, Q);
			let rebuilt = pos_mod(high * alpha + low, Q);
			assert_eq!(rebuilt, pos_mod(c, Q));
		}
	}

	#[test]
	fn poly_mul_is_negacyclic() {
		// X^(N-1) * X == -1 (mod X^N + 1)
		let mut a = Poly::default();
		a[N - 1] = 1;
		let mut b = Poly::default();
		b[1] = 1;
		let c = poly_mul_rq(&a, &b);
		let mut expected = Poly::default();
		expected[0] = Q - 1;
		assert_eq!(c, expected);
	}

	#[test]
	fn poly_mul_distributes_over_add() {
		let seed = [3u8; 32];
		let a = sample_poly_uniform(&seed, 0, 0);
		let b = sample_poly_uniform(&seed, 0, 1);
		let c = sample_poly_uniform(&seed, 1, 0);
		let lhs = poly_mul_rq(&a, &poly_add(&b, &c));
		let rhs = poly_add(&poly_mul_rq(&a, &b), &poly_mul_rq(&a, &c));
		assert_eq!(lhs, rhs);
	}
}
