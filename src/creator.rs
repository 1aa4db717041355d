//! The share encoder run by a list creator or querier.
//!
//! Elements never leave this role in the clear: each one is hashed to a
//! Ristretto point and split into one additive share per compute party, so
//! that the shares sum to the hashed point but any proper subset of them is
//! indistinguishable from random group elements. All parties are then driven
//! concurrently, each receiving its own column of the share matrix.

use curve25519_dalek::ristretto::RistrettoPoint;
use futures::future;
use tracing::warn;

use crate::{
    client::{ClientError, ComputeRequest, PartyClient},
    crypto::{self, Encoding},
};

/// Whether a batch of shares updates the stored list or only queries it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// Persist the shares and rotate keys before masking.
    Update,
    /// Mask the shares under the current keys without persisting anything.
    Query,
}

impl Mode {
    /// The wire flag carried by [`ComputeRequest`].
    pub fn is_update(self) -> bool {
        matches!(self, Mode::Update)
    }
}

/// Errors raised while encoding shares.
#[derive(Debug, thiserror::Error)]
pub enum ShareError {
    /// Fewer than two parties cannot hide anything from each other.
    #[error("need at least 2 compute parties, got {0}")]
    TooFewParties(usize),
}

/// The outcome of one dispatched round: the share matrix that was sent and
/// each party's result.
///
/// The shares are random and cannot be reconstructed after the fact, so they
/// are handed back to the caller for auditing and debugging.
#[derive(Debug)]
pub struct ShareBatch {
    /// The encoded share columns, one per party: `shares[p][i]` is party
    /// `p`'s share of element `i`.
    pub shares: Vec<Vec<String>>,
    /// Each party's aggregation result, in party order.
    pub results: Vec<Result<Vec<String>, ClientError>>,
}

/// Splits each element into `parties` additive shares of its hashed point.
///
/// Row `i` of the result sums to `hash_to_point(elements[i])`: the first
/// `parties - 1` shares are uniformly random points and the last one is the
/// hashed element minus their sum.
pub fn build_shares(
    elements: &[String],
    parties: usize,
) -> Result<Vec<Vec<RistrettoPoint>>, ShareError> {
    if parties < 2 {
        return Err(ShareError::TooFewParties(parties));
    }
    Ok(elements
        .iter()
        .map(|element| {
            let mut rest = crypto::hash_to_point(element);
            let mut shares = Vec::with_capacity(parties);
            for _ in 0..parties - 1 {
                let share = crypto::random_point();
                rest -= share;
                shares.push(share);
            }
            shares.push(rest);
            shares
        })
        .collect())
}

/// Shares out the elements and drives one aggregation round on every party.
///
/// Party `p` receives column `p` of the share matrix, so no party ever sees
/// two shares of the same element. The parties are driven concurrently and
/// each outcome is reported separately: a failed party does not suppress the
/// results of the others, it is logged and handed back as a typed error.
pub async fn send_shares<C: PartyClient>(
    client: &C,
    parties: usize,
    elements: &[String],
    tenant: &str,
    mode: Mode,
    encoding: Encoding,
) -> Result<ShareBatch, ShareError> {
    let matrix = build_shares(elements, parties)?;
    let shares: Vec<Vec<String>> = (0..parties)
        .map(|to| {
            matrix
                .iter()
                .map(|row| crypto::encode_point(&row[to], encoding))
                .collect()
        })
        .collect();
    let calls = shares.iter().enumerate().map(|(to, input)| {
        client.compute_from_shares(
            to,
            ComputeRequest {
                input: input.clone(),
                tenant: tenant.to_string(),
                is_update: mode.is_update(),
                encoding,
            },
        )
    });
    let results = future::join_all(calls).await;
    for (to, result) in results.iter().enumerate() {
        if let Err(error) = result {
            warn!(to, %error, ?mode, "compute party failed the round");
        }
    }
    Ok(ShareBatch { shares, results })
}

/// Adds `elements` to the tenant's list on every compute party.
pub async fn update_list<C: PartyClient>(
    client: &C,
    parties: usize,
    elements: &[String],
    tenant: &str,
    encoding: Encoding,
) -> Result<ShareBatch, ShareError> {
    send_shares(client, parties, elements, tenant, Mode::Update, encoding).await
}
