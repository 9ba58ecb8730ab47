//! Error kinds, grouped by failure family.
//!
//! Crypto and data errors are fatal to the operation that raised them: no
//! partial state is ever returned to the caller. Cryptographic failures
//! only ever report which *kind* of check failed, never which coefficient
//! or byte was implicated.

use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParamError {
	#[error("threshold {t} exceeds total shares {n}")]
	ThresholdExceedsTotal { t: usize, n: usize },
	#[error("threshold must be at least 1")]
	ThresholdTooSmall,
	#[error("moduli set has {got} entries, need {want}")]
	WrongModuliCount { got: usize, want: usize },
	#[error("modulus {0} is below the pixel modulus floor (257)")]
	ModulusTooSmall(u64),
	#[error("moduli are not pairwise coprime: {0} and {1} share a factor")]
	ModuliNotCoprime(u64, u64),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
	#[error("KEM decapsulation failed to decode a valid key")]
	Decap,
	#[error("signature norm check failed")]
	VerifyNorm,
	#[error("signature hash binding check failed")]
	VerifyHash,
	#[error("rejection-sampling retry budget exhausted")]
	Sample,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DataError {
	#[error("share fingerprint mismatch: data does not match the manifest")]
	Tamper,
	#[error("share coordinate is out of range for its modulus")]
	OutOfRange,
	#[error("share shapes do not match across the supplied set")]
	ShapeMismatch,
	#[error("fewer than the threshold number of shares were supplied")]
	NotEnoughShares,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandshakeError {
	#[error("handshake signature failed to verify")]
	Sig,
	#[error("handshake timestamp is outside the tolerance window")]
	Stale,
	#[error("handshake KEM ciphertext failed to decapsulate")]
	Decap,
	#[error("handshake initiator's claimed public key does not match the expected peer")]
	UnknownPeer,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
	#[error("peer did not acknowledge chunk {chunk} of message {msg_id} after {retries} retries")]
	PeerLost { msg_id: u32, chunk: u32, retries: u32 },
	#[error("failed to encode or decode a transport packet")]
	Encode,
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
	#[error("message arrived for the wrong session phase")]
	WrongPhase,
	#[error("session phase deadline elapsed")]
	Timeout,
	#[error("a participant declined to respond")]
	Declined,
	#[error("fewer than the threshold number of verified participants are connected")]
	NotEnoughParticipants,
}

/// Top-level error type returned from every library entry point.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LockframeError {
	#[error(transparent)]
	Param(#[from] ParamError),
	#[error(transparent)]
	Crypto(#[from] CryptoError),
	#[error(transparent)]
	Data(#[from] DataError),
	#[error(transparent)]
	Handshake(#[from] HandshakeError),
	#[error(transparent)]
	Transport(#[from] TransportError),
	#[error(transparent)]
	Session(#[from] SessionError),
}

pub type Result<T> = std::result::Result<T, LockframeError>;
