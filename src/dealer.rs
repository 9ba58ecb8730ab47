//! The dealer's `lock_and_distribute` entry point.
//!
//! Orchestrates image splitting ([`crate::crt`]) and per-party hybrid
//! encryption ([`crate::hybrid`]) to turn a pixel plane into a manifest plus
//! one encrypted blob per registered key holder.

use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::codec::{Manifest, RegistryEntry, RegistryInput, MANIFEST_VERSION};
use crate::crt;
use crate::error::{LockframeError, ParamError};
use crate::hybrid::{self, EncryptedBlob};

/// Everything the dealer hands a party: their encrypted residue share plus
/// the manifest needed to make sense of it once reassembled with others.
#[derive(Clone, Debug)]
pub struct Delivery {
	pub party_index: u32,
	pub blob: EncryptedBlob,
}

/// `SHA256(raw)`, the fingerprint that both the dealer and every recipient
/// compute over a share's exact `bincode`-serialized bytes.
pub fn fingerprint_share_bytes(raw: &[u8]) -> [u8; 32] {
	let mut hasher = Sha256::new();
	hasher.update(raw);
	hasher.finalize().into()
}

/// `lock_and_distribute(pixels, width, height, threshold, registry,
/// arnold_iterations, session_id, public_seed, output_dir) -> (Manifest,
/// Vec<Delivery>)`
///
/// Splits the interleaved RGB pixel plane into one CRT share per registered
/// party, encrypts each share to that party's public key, and returns the
/// manifest plus the per-party deliveries. `registry.len()` is the total
/// share count `n`. `public_seed` is the combined threshold key's shared
/// `rho`, recorded in the manifest so participants can confirm they're
/// expanding the same matrix `A`.
pub fn lock_and_distribute(
	pixels: &[u8],
	width: u32,
	height: u32,
	threshold: u32,
	registry: Vec<RegistryInput>,
	arnold_iterations: u32,
	session_id: String,
	public_seed: [u8; 32],
	output_dir: String,
	rng: &mut impl RngCore,
) -> Result<(Manifest, Vec<Delivery>), LockframeError> {
	let n = registry.len();
	if threshold as usize > n {
		return Err(ParamError::ThresholdExceedsTotal { t: threshold as usize, n }.into());
	}
	if threshold == 0 {
		return Err(ParamError::ThresholdTooSmall.into());
	}

	tracing::info!(n, t = threshold, width, height, "locking pixel plane for distribution");

	let moduli = crt::generate_moduli(n)?;
	let shares = crt::split(pixels, width, height, &moduli, arnold_iterations)?;

	let mut deliveries = Vec::with_capacity(n);
	let mut entries = Vec::with_capacity(n);
	for (i, (input, share)) in registry.into_iter().zip(shares.iter()).enumerate() {
		let share_bytes = bincode::serialize(share).expect("Share serializes infallibly");
		let share_fingerprint = fingerprint_share_bytes(&share_bytes);
		let blob = hybrid::encrypt_to(&input.public_key, &share_bytes, rng);

		let file_path = match &input.owner_alias {
			Some(alias) => format!("{output_dir}/{alias}/secure_share_{}.dat", i + 1),
			None => format!("{output_dir}/party-{}/secure_share_{}.dat", input.party_index, i + 1),
		};

		deliveries.push(Delivery { party_index: input.party_index, blob });
		entries.push(RegistryEntry {
			party_index: input.party_index,
			modulus: share.modulus,
			file_path,
			share_fingerprint,
			owner_alias: input.owner_alias,
			public_key: input.public_key,
			address_hint: input.address_hint,
		});
	}

	let manifest = Manifest {
		version: MANIFEST_VERSION.into(),
		session_id,
		threshold,
		total_shares: n as u32,
		public_seed,
		width,
		height,
		arnold_iterations,
		registry: entries,
	};

	tracing::info!(session_id = %manifest.session_id, deliveries = deliveries.len(), "dealer locking complete");
	Ok((manifest, deliveries))
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::keys;
	use rand::rngs::StdRng;
	use rand::SeedableRng;

	fn rgb_checkerboard(width: u32, height: u32) -> Vec<u8> {
		let mut pixels = Vec::with_capacity((width * height * 3) as usize);
		for y in 0..height {
			for x in 0..width {
				let v: u8 = if (x + y) % 2 == 0 { 0 } else { 255 };
				pixels.extend([v, v, v]);
			}
		}
		pixels
	}

	#[test]
	fn lock_and_distribute_produces_one_delivery_per_party() {
		let mut rng = StdRng::seed_from_u64(301);
		let registry: Vec<RegistryInput> = (0..5)
			.map(|i| {
				let (pk, _sk) = keys::keygen(&mut rng);
				RegistryInput { party_index: i, public_key: pk, owner_alias: Some(format!("party-{i}")), address_hint: None }
			})
			.collect();
		let pixels = rgb_checkerboard(8, 8);

		let (manifest, deliveries) = lock_and_distribute(
			&pixels,
			8,
			8,
			3,
			registry,
			4,
			"session-1".into(),
			[1u8; 32],
			"vault".into(),
			&mut rng,
		)
		.unwrap();

		assert_eq!(deliveries.len(), 5);
		assert_eq!(manifest.total_shares, 5);
		assert_eq!(manifest.threshold, 3);
		assert_eq!(manifest.registry.len(), 5);
		assert!(manifest.registry[0].file_path.starts_with("vault/party-0/"));
	}

	#[test]
	fn threshold_exceeding_total_is_rejected() {
		let mut rng = StdRng::seed_from_u64(302);
		let (pk, _sk) = keys::keygen(&mut rng);
		let registry = vec![RegistryInput { party_index: 0, public_key: pk, owner_alias: None, address_hint: None }];
		let pixels = rgb_checkerboard(2, 2);
		let err = lock_and_distribute(&pixels, 2, 2, 5, registry, 1, "s".into(), [0u8; 32], "out".into(), &mut rng)
			.unwrap_err();
		assert!(matches!(err, LockframeError::Param(ParamError::ThresholdExceedsTotal { .. })));
	}

	#[test]
	fn each_delivery_decrypts_to_a_share_whose_fingerprint_matches_the_registry() {
		let mut rng = StdRng::seed_from_u64(303);
		let (pk, sk) = keys::keygen(&mut rng);
		let registry = vec![RegistryInput { party_index: 0, public_key: pk, owner_alias: None, address_hint: None }];
		let pixels = rgb_checkerboard(2, 2);

		let (manifest, deliveries) =
			lock_and_distribute(&pixels, 2, 2, 1, registry, 2, "s".into(), [0u8; 32], "out".into(), &mut rng).unwrap();

		let plaintext = hybrid::decrypt_with(&sk, &deliveries[0].blob);
		let share: crate::crt::Share = bincode::deserialize(&plaintext).unwrap();
		assert_eq!(share.original_width, 2);
		assert_eq!(share.original_height, 2);

		let digest = fingerprint_share_bytes(&plaintext);
		assert_eq!(digest, manifest.registry[0].share_fingerprint);
	}
}
