//! The two-party variant of the protocol, without outsourced compute parties.
//!
//! One side holds the list and a single secret key; the other learns which of
//! its elements are in the list and nothing else. The querier blinds its
//! hashed elements with a fresh random scalar, the holder raises the blinded
//! points to its key, and the querier unblinds and compares against the
//! holder's masked table. The holder never sees an unblinded query value and
//! the querier never sees the holder's key.

use std::collections::HashSet;

use curve25519_dalek::scalar::Scalar;

use crate::crypto::{self, CryptoError, Encoding};

/// The list-holding side of the two-party protocol.
pub struct ListHolder {
    key: Scalar,
    table: Vec<String>,
    encoding: Encoding,
}

impl ListHolder {
    /// Creates a holder with a fresh random key and an empty list.
    pub fn new(encoding: Encoding) -> Self {
        Self {
            key: crypto::random_scalar(),
            table: Vec::new(),
            encoding,
        }
    }

    /// Hashes, masks and stores the elements in the holder's table.
    pub fn mask_and_store(&mut self, elements: &[String]) {
        for element in elements {
            let masked = crypto::mask(&crypto::hash_to_point(element), &self.key);
            self.table
                .push(crypto::encode_point(&masked, self.encoding));
        }
    }

    /// Raises blinded query points to the holder's key.
    pub fn raise_to_key(&self, blinded: &[String]) -> Result<Vec<String>, CryptoError> {
        let points = crypto::decode_points(blinded, self.encoding)?;
        let raised: Vec<_> = points.iter().map(|p| crypto::mask(p, &self.key)).collect();
        Ok(crypto::encode_points(&raised, self.encoding))
    }

    /// The stored masked table.
    pub fn table(&self) -> &[String] {
        &self.table
    }

    /// The text encoding the holder expects and produces.
    pub fn encoding(&self) -> Encoding {
        self.encoding
    }
}

/// Returns the indices (in input order) of the elements present in the
/// holder's list.
///
/// The elements are blinded with a fresh scalar per call, so repeated queries
/// for the same element send unlinkable values to the holder.
pub fn check_membership(
    holder: &ListHolder,
    elements: &[String],
) -> Result<Vec<usize>, CryptoError> {
    let encoding = holder.encoding();
    let blind = crypto::random_scalar();
    let blinded: Vec<_> = elements
        .iter()
        .map(|element| crypto::mask(&crypto::hash_to_point(element), &blind))
        .collect();

    let evaluated = holder.raise_to_key(&crypto::encode_points(&blinded, encoding))?;
    let evaluated = crypto::decode_points(&evaluated, encoding)?;

    let table: HashSet<&str> = holder.table().iter().map(String::as_str).collect();
    Ok(evaluated
        .iter()
        .enumerate()
        .filter_map(|(index, point)| {
            let unblinded = crypto::encode_point(&crypto::unmask(point, &blind), encoding);
            table.contains(unblinded.as_str()).then_some(index)
        })
        .collect())
}
