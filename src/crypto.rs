//! The group primitive used by every protocol role: Ristretto255 points and
//! scalars, hash-to-point, masking/unmasking and text-safe point encodings.
//!
//! Masking a point means multiplying it by a secret scalar. Since scalar
//! multiplication distributes over group addition, a masking applied to every
//! additive share of a point masks the reconstructed point itself, which is
//! what makes the chained multi-party masking of
//! [`crate::party::ComputeParty`] work.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64};
use curve25519_dalek::{ristretto::CompressedRistretto, ristretto::RistrettoPoint, scalar::Scalar};
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use sha2::Sha512;

/// Text-safe encodings for compressed Ristretto points.
///
/// Shares and masked values cross role boundaries as strings so that the
/// transport layer and the persisted CSV rows stay printable. Both encodings
/// round-trip through the same canonical 32-byte compressed representation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum Encoding {
    /// Standard base64 with padding.
    #[default]
    Base64,
    /// Lowercase hex.
    Hex,
}

/// Errors raised when decoding points received from another role.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The string is not valid under the expected text encoding.
    #[error("value is not valid {0:?}")]
    InvalidEncoding(Encoding),
    /// The bytes are not a canonical compressed Ristretto point.
    #[error("value is not a canonical Ristretto point encoding")]
    InvalidPoint,
}

/// Hashes an arbitrary string to a Ristretto point.
///
/// Deterministic: the same input always maps to the same point, and distinct
/// inputs map to distinct points with overwhelming probability.
pub fn hash_to_point(input: &str) -> RistrettoPoint {
    RistrettoPoint::hash_from_bytes::<Sha512>(input.as_bytes())
}

/// Generates a uniformly random scalar, used as a party key or blinding factor.
pub fn random_scalar() -> Scalar {
    Scalar::random(&mut OsRng)
}

/// Generates a uniformly random group element, used as a random additive share.
pub fn random_point() -> RistrettoPoint {
    RistrettoPoint::random(&mut OsRng)
}

/// Derives a scalar deterministically from a seed string.
///
/// Only meant for reproducible test keys; production keys come from
/// [`random_scalar`].
pub fn scalar_from_seed(seed: &str) -> Scalar {
    Scalar::hash_from_bytes::<Sha512>(seed.as_bytes())
}

/// Masks a point by multiplying it with a secret scalar.
pub fn mask(point: &RistrettoPoint, key: &Scalar) -> RistrettoPoint {
    key * point
}

/// Removes a previously applied masking scalar (the inverse of [`mask`]).
pub fn unmask(point: &RistrettoPoint, key: &Scalar) -> RistrettoPoint {
    key.invert() * point
}

/// Encodes a point into its canonical compressed form under the given encoding.
pub fn encode_point(point: &RistrettoPoint, encoding: Encoding) -> String {
    let compressed = point.compress();
    match encoding {
        Encoding::Base64 => BASE64.encode(compressed.as_bytes()),
        Encoding::Hex => hex::encode(compressed.as_bytes()),
    }
}

/// Decodes a point from its text encoding, validating canonicity.
pub fn decode_point(encoded: &str, encoding: Encoding) -> Result<RistrettoPoint, CryptoError> {
    let bytes = match encoding {
        Encoding::Base64 => BASE64
            .decode(encoded)
            .map_err(|_| CryptoError::InvalidEncoding(encoding))?,
        Encoding::Hex => {
            hex::decode(encoded).map_err(|_| CryptoError::InvalidEncoding(encoding))?
        }
    };
    let bytes: [u8; 32] = bytes.try_into().map_err(|_| CryptoError::InvalidPoint)?;
    CompressedRistretto::from_slice(&bytes)
        .map_err(|_| CryptoError::InvalidPoint)?
        .decompress()
        .ok_or(CryptoError::InvalidPoint)
}

/// Encodes a vector of points for transport or persistence.
pub fn encode_points(points: &[RistrettoPoint], encoding: Encoding) -> Vec<String> {
    points.iter().map(|p| encode_point(p, encoding)).collect()
}

/// Decodes a vector of transported points, failing on the first invalid entry.
pub fn decode_points(
    encoded: &[String],
    encoding: Encoding,
) -> Result<Vec<RistrettoPoint>, CryptoError> {
    encoded.iter().map(|s| decode_point(s, encoding)).collect()
}
