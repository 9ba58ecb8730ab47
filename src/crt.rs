//! Chinese Remainder Theorem image secret sharing
//!
//! Each RGB pixel channel value is split into `n` CRT residues; a
//! reconstructor needs at least `t` of them (any `t`, by the threshold
//! property of CRT over pairwise-coprime moduli) to recover the original
//! byte. Residue planes are scrambled with an Arnold cat map before
//! distribution so that a single share, viewed as an image, reveals no
//! structure of the original. Non-square images are padded to a square
//! before scrambling and cropped back to `original_shape` on reconstruction.

use num_bigint::BigInt;
use num_integer::Integer;
use num_traits::{ToPrimitive, Zero};
use serde::{Deserialize, Serialize};

use crate::error::{DataError, ParamError};

/// Pixel channel values are bytes; every modulus must exceed this floor so
/// no residue class collapses two distinct values together.
const PIXEL_MODULUS_FLOOR: u64 = 257;

/// Number of channels every image carries (RGB).
const CHANNELS: usize = 3;

/// The moduli set the original spec names for up to 5 shares.
const DEFAULT_MODULI: [u64; 5] = [257, 263, 269, 271, 277];

/// One party's residue image plus the coordinates needed to reconstruct.
///
/// `data` holds the three scrambled channel planes concatenated in R, G, B
/// order, each of length `height * width` (the padded, square dimensions).
/// `original_height`/`original_width` record the pre-padding image size so
/// reconstruction can crop back to it.
#[derive(Clone, Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Share {
	pub index: u32,
	pub modulus: u64,
	pub height: u32,
	pub width: u32,
	pub original_height: u32,
	pub original_width: u32,
	pub data: Vec<u16>,
}

/// Generates `n` deterministic pairwise-coprime moduli above the pixel
/// floor. Reuses the literal default set for `n <= 5` and extends it with
/// the next prime above the last chosen one for larger `n`.
pub fn generate_moduli(n: usize) -> Result<Vec<u64>, ParamError> {
	if n == 0 {
		return Err(ParamError::ThresholdTooSmall);
	}
	let mut moduli: Vec<u64> = DEFAULT_MODULI.iter().take(n).copied().collect();
	let mut candidate = *moduli.last().unwrap_or(&PIXEL_MODULUS_FLOOR);
	while moduli.len() < n {
		candidate = next_prime_above(candidate);
		moduli.push(candidate);
	}
	validate_moduli(&moduli)?;
	Ok(moduli)
}

fn validate_moduli(moduli: &[u64]) -> Result<(), ParamError> {
	for &m in moduli {
		if m < PIXEL_MODULUS_FLOOR {
			return Err(ParamError::ModulusTooSmall(m));
		}
	}
	for i in 0..moduli.len() {
		for j in (i + 1)..moduli.len() {
			if gcd_u64(moduli[i], moduli[j]) != 1 {
				return Err(ParamError::ModuliNotCoprime(moduli[i], moduli[j]));
			}
		}
	}
	Ok(())
}

fn gcd_u64(a: u64, b: u64) -> u64 {
	if b == 0 {
		a
	} else {
		gcd_u64(b, a % b)
	}
}

fn is_prime(n: u64) -> bool {
	if n < 2 {
		return false;
	}
	if n % 2 == 0 {
		return n == 2;
	}
	let mut d = 3;
	while d * d <= n {
		if n % d == 0 {
			return false;
		}
		d += 2;
	}
	true
}

fn next_prime_above(n: u64) -> u64 {
	let mut candidate = n + 1;
	while !is_prime(candidate) {
		candidate += 1;
	}
	candidate
}

/// Pads interleaved RGB `pixels` (length `height*width*3`) into three
/// separate channel planes of size `side*side`, placing the original image
/// in the top-left corner and zero-filling the rest.
fn pad_channels(pixels: &[u8], height: u32, width: u32, side: u32) -> [Vec<u8>; CHANNELS] {
	let plane_len = (side as usize) * (side as usize);
	let mut channels = [vec![0u8; plane_len], vec![0u8; plane_len], vec![0u8; plane_len]];
	for y in 0..height {
		for x in 0..width {
			let src = ((y * width + x) * CHANNELS as u32) as usize;
			let dst = (y * side + x) as usize;
			for c in 0..CHANNELS {
				channels[c][dst] = pixels[src + c];
			}
		}
	}
	channels
}

/// Splits an interleaved RGB pixel plane into `n` CRT shares, each
/// Arnold-scrambled with `iterations` cat-map rounds so no single share's
/// residue image resembles the source. `pixels` must have length
/// `height * width * 3`; non-square images are padded to a square before
/// scrambling, with the original dimensions recorded on each `Share`.
pub fn split(pixels: &[u8], width: u32, height: u32, moduli: &[u64], iterations: u32) -> Result<Vec<Share>, ParamError> {
	validate_moduli(moduli)?;
	let expected_len = (width as usize) * (height as usize) * CHANNELS;
	if pixels.len() != expected_len {
		return Err(ParamError::WrongModuliCount { got: pixels.len(), want: expected_len });
	}

	let side = width.max(height);
	let channels = pad_channels(pixels, height, width, side);
	let plane_len = (side as usize) * (side as usize);

	Ok(moduli
		.iter()
		.enumerate()
		.map(|(index, &modulus)| {
			let mut data = Vec::with_capacity(plane_len * CHANNELS);
			for channel in &channels {
				let residues: Vec<u16> = channel.iter().map(|&p| (p as u64 % modulus) as u16).collect();
				let scrambled = arnold_scramble(&residues, side, side, iterations);
				data.extend(scrambled);
			}
			Share { index: index as u32, modulus, height: side, width: side, original_height: height, original_width: width, data }
		})
		.collect())
}

/// Reconstructs the interleaved RGB pixel plane from at least `t` shares.
/// Shares are unscrambled before the CRT combination and the padded square
/// is cropped back to `original_height x original_width`; any `t`-sized
/// subset of a valid `n`-share set reconstructs identically, by the CRT
/// threshold property.
pub fn reconstruct(shares: &[Share], t: usize, iterations: u32) -> Result<Vec<u8>, DataError> {
	if shares.len() < t {
		return Err(DataError::NotEnoughShares);
	}
	let first = &shares[0];
	let (height, width, orig_h, orig_w) = (first.height, first.width, first.original_height, first.original_width);
	let plane_len = (width as usize) * (height as usize);
	for share in shares {
		if share.height != height
			|| share.width != width
			|| share.original_height != orig_h
			|| share.original_width != orig_w
			|| share.data.len() != plane_len * CHANNELS
		{
			return Err(DataError::ShapeMismatch);
		}
		if share.modulus == 0 || share.data.iter().any(|&r| r as u64 >= share.modulus) {
			return Err(DataError::OutOfRange);
		}
	}

	let used = &shares[..t];
	let moduli: Vec<u64> = used.iter().map(|s| s.modulus).collect();

	let mut result = vec![0u8; (orig_h as usize) * (orig_w as usize) * CHANNELS];
	for channel_idx in 0..CHANNELS {
		let start = channel_idx * plane_len;
		let unscrambled: Vec<Vec<u16>> = used
			.iter()
			.map(|s| arnold_unscramble(&s.data[start..start + plane_len], width, height, iterations))
			.collect();

		for y in 0..orig_h {
			for x in 0..orig_w {
				let pixel_idx = (y * width + x) as usize;
				let residues: Vec<u64> = unscrambled.iter().map(|plane| plane[pixel_idx] as u64).collect();
				let value = crt_combine(&residues, &moduli);
				let out_idx = (((y * orig_w + x) * CHANNELS as u32) as usize) + channel_idx;
				result[out_idx] = value as u8;
			}
		}
	}
	Ok(result)
}

/// Combines residues `[r_1 mod m_1, ..., r_k mod m_k]` into the unique value
/// modulo `product(m_i)`, via iterative pairwise CRT (Garner's algorithm).
fn crt_combine(residues: &[u64], moduli: &[u64]) -> u64 {
	let mut x = BigInt::from(residues[0]);
	let mut m = BigInt::from(moduli[0]);
	for (&r, &modulus) in residues[1..].iter().zip(moduli[1..].iter()) {
		let r = BigInt::from(r);
		let modulus_big = BigInt::from(modulus);
		let m_inv = modinv(&m, &modulus_big).expect("moduli are pairwise coprime by construction");
		let diff = (&r - &x) * &m_inv;
		let k = diff.mod_floor(&modulus_big);
		x = &x + &m * &k;
		m = &m * &modulus_big;
	}
	x.mod_floor(&m).to_u64().unwrap_or(0)
}

fn modinv(a: &BigInt, m: &BigInt) -> Option<BigInt> {
	let (g, x, _) = extended_gcd(a.mod_floor(m), m.clone());
	if g != BigInt::from(1) {
		None
	} else {
		Some(x.mod_floor(m))
	}
}

fn extended_gcd(a: BigInt, b: BigInt) -> (BigInt, BigInt, BigInt) {
	if b.is_zero() {
		(a, BigInt::from(1), BigInt::from(0))
	} else {
		let (g, x1, y1) = extended_gcd(b.clone(), a.mod_floor(&b));
		let q = &a / &b;
		(g, y1.clone(), x1 - &q * &y1)
	}
}

/// Arnold-style scrambling generalized to rectangles via two sequential
/// shears per iteration: `x' = (x + y) mod width`, then `y' = (x' + y) mod
/// height`. Each shear fixes one coordinate while cyclically shifting the
/// other, so — unlike the classic single-step cat map, which is only a
/// bijection on square grids — this composition is invertible for any
/// `width x height`. Only ever invoked here on the padded square, but the
/// rectangle generalization costs nothing and keeps the helper testable on
/// its own.
fn arnold_scramble(plane: &[u16], width: u32, height: u32, iterations: u32) -> Vec<u16> {
	let (w, h) = (width as i64, height as i64);
	let mut current = plane.to_vec();
	for _ in 0..iterations {
		let mut next = vec![0u16; current.len()];
		for y in 0..h {
			for x in 0..w {
				let nx = (x + y).rem_euclid(w);
				let ny = (nx + y).rem_euclid(h);
				let src_idx = (y * w + x) as usize;
				let dst_idx = (ny * w + nx) as usize;
				next[dst_idx] = current[src_idx];
			}
		}
		current = next;
	}
	current
}

/// Inverts [`arnold_scramble`] by undoing each iteration's two shears in
/// reverse order.
fn arnold_unscramble(plane: &[u16], width: u32, height: u32, iterations: u32) -> Vec<u16> {
	let (w, h) = (width as i64, height as i64);
	let mut current = plane.to_vec();
	for _ in 0..iterations {
		let mut next = vec![0u16; current.len()];
		for ny in 0..h {
			for nx in 0..w {
				let y = (ny - nx).rem_euclid(h);
				let x = (nx - y).rem_euclid(w);
				let src_idx = (ny * w + nx) as usize;
				let dst_idx = (y * w + x) as usize;
				next[dst_idx] = current[src_idx];
			}
		}
		current = next;
	}
	current
}

#[cfg(test)]
mod tests {
	use super::*;

	fn rgb_checkerboard(width: u32, height: u32) -> Vec<u8> {
		let mut pixels = Vec::with_capacity((width * height * CHANNELS as u32) as usize);
		for y in 0..height {
			for x in 0..width {
				let v: u8 = if (x + y) % 2 == 0 { 0 } else { 255 };
				pixels.extend([v, v, v]);
			}
		}
		pixels
	}

	#[test]
	fn generate_moduli_reuses_the_default_set() {
		let moduli = generate_moduli(5).unwrap();
		assert_eq!(moduli, DEFAULT_MODULI.to_vec());
	}

	#[test]
	fn generate_moduli_extends_beyond_the_default_set() {
		let moduli = generate_moduli(7).unwrap();
		assert_eq!(moduli.len(), 7);
		assert_eq!(&moduli[..5], &DEFAULT_MODULI[..]);
		for w in moduli.windows(2) {
			assert!(w[1] > w[0]);
		}
	}

	#[test]
	fn arnold_scramble_then_unscramble_is_identity() {
		let width = 6;
		let height = 4;
		let plane: Vec<u16> = (0..(width * height) as u16).collect();
		let scrambled = arnold_scramble(&plane, width, height, 5);
		assert_ne!(scrambled, plane);
		let restored = arnold_unscramble(&scrambled, width, height, 5);
		assert_eq!(restored, plane);
	}

	#[test]
	fn split_then_reconstruct_recovers_a_square_rgb_checkerboard() {
		let width = 4;
		let height = 4;
		let pixels = rgb_checkerboard(width, height);
		let moduli = generate_moduli(5).unwrap();
		let shares = split(&pixels, width, height, &moduli, 3).unwrap();
		assert_eq!(shares[0].data.len(), (width as usize) * (height as usize) * CHANNELS);
		let recovered = reconstruct(&shares, 5, 3).unwrap();
		assert_eq!(recovered, pixels);
	}

	#[test]
	fn split_then_reconstruct_recovers_a_non_square_image() {
		let width = 5;
		let height = 3;
		let pixels: Vec<u8> = (0..(width * height * CHANNELS as u32) as u32).map(|v| (v % 256) as u8).collect();
		let moduli = generate_moduli(5).unwrap();
		let shares = split(&pixels, width, height, &moduli, 3).unwrap();

		let side = width.max(height);
		assert_eq!(shares[0].width, side);
		assert_eq!(shares[0].height, side);
		assert_eq!(shares[0].original_width, width);
		assert_eq!(shares[0].original_height, height);

		let recovered = reconstruct(&shares, 5, 3).unwrap();
		assert_eq!(recovered, pixels);
	}

	#[test]
	fn any_threshold_subset_reconstructs_identically() {
		let width = 5;
		let height = 5;
		let pixels = rgb_checkerboard(width, height);
		let moduli = generate_moduli(5).unwrap();
		let shares = split(&pixels, width, height, &moduli, 4).unwrap();

		let subset_a: Vec<Share> = shares[0..3].to_vec();
		let subset_b: Vec<Share> = vec![shares[1].clone(), shares[2].clone(), shares[4].clone()];

		let recovered_a = reconstruct(&subset_a, 3, 4).unwrap();
		let recovered_b = reconstruct(&subset_b, 3, 4).unwrap();
		assert_eq!(recovered_a, pixels);
		assert_eq!(recovered_b, pixels);
	}

	#[test]
	fn too_few_shares_is_rejected() {
		let width = 2;
		let height = 2;
		let pixels = rgb_checkerboard(width, height);
		let moduli = generate_moduli(5).unwrap();
		let shares = split(&pixels, width, height, &moduli, 2).unwrap();
		let err = reconstruct(&shares[0..2], 3, 2).unwrap_err();
		assert_eq!(err, DataError::NotEnoughShares);
	}
}
