//! The transport seam between protocol roles.
//!
//! [`PartyClient`] abstracts the RPC surface of a compute party so that the
//! creator, querier and the parties themselves never depend on a concrete
//! transport; an HTTP deployment implements the trait against its own
//! routing, while [`LocalClient`] wires parties up in-process for tests and
//! simulations. Every call carries a deadline so an unreachable peer surfaces
//! as a typed error instead of stalling a round.

use std::{
    sync::{Arc, OnceLock},
    time::Duration,
};

use serde::{Deserialize, Serialize};
use tokio::time::timeout;

use crate::{
    crypto::Encoding,
    party::{ComputeParty, PartyError},
};

/// A boxed error used as the transport-specific failure cause.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// A request to mask shares, sent to `computeFromShares` or `raiseToKey`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ComputeRequest {
    /// Encoded points: raw shares for `computeFromShares`, partially chained
    /// values for `raiseToKey`.
    pub input: Vec<String>,
    /// The data domain whose list the values belong to.
    pub tenant: String,
    /// Whether this is a list update (persist + rotate) or a query.
    pub is_update: bool,
    /// Text encoding of `input` and of the response.
    pub encoding: Encoding,
}

/// A peer's fully chained share vector, pushed via `pushComputedShares`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PushSharesRequest {
    /// The data domain the aggregation belongs to.
    pub tenant: String,
    /// Index of the sending party.
    pub from: usize,
    /// The sender's chained share vector.
    pub input: Vec<String>,
    /// Text encoding of `input`.
    pub encoding: Encoding,
}

/// A request for a tenant's masked table, sent to `listData`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ListDataRequest {
    /// The data domain whose table is requested.
    pub tenant: String,
}

/// Errors raised when calling another party.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// The party could not be reached at the transport level.
    #[error("party {to} is unreachable")]
    Unreachable {
        /// Index of the unreachable party.
        to: usize,
        /// The transport-specific cause.
        #[source]
        source: BoxError,
    },
    /// The party did not answer before the call deadline.
    #[error("request to party {to} timed out")]
    Timeout {
        /// Index of the unresponsive party.
        to: usize,
    },
    /// The party answered with a protocol error.
    #[error("party {to} failed to process the request")]
    Party {
        /// Index of the failing party.
        to: usize,
        /// The party's typed failure.
        #[source]
        source: Box<PartyError>,
    },
}

/// A client for the RPC surface of the compute parties.
///
/// One method per exposed operation; `to` is the index of the target party in
/// the agreed party list. Implementations are expected to enforce a per-call
/// deadline and map remote protocol failures to [`ClientError::Party`].
pub trait PartyClient: Send + Sync + 'static {
    /// Starts a masking round at party `to`.
    fn compute_from_shares(
        &self,
        to: usize,
        req: ComputeRequest,
    ) -> impl Future<Output = Result<Vec<String>, ClientError>> + Send;

    /// Asks party `to` to multiply the inputs by its tenant key.
    fn raise_to_key(
        &self,
        to: usize,
        req: ComputeRequest,
    ) -> impl Future<Output = Result<Vec<String>, ClientError>> + Send;

    /// Delivers a chained share vector to party `to`.
    fn push_computed_shares(
        &self,
        to: usize,
        req: PushSharesRequest,
    ) -> impl Future<Output = Result<(), ClientError>> + Send;

    /// Fetches the tenant's masked table from party `to`.
    fn list_data(
        &self,
        to: usize,
        req: ListDataRequest,
    ) -> impl Future<Output = Result<Vec<String>, ClientError>> + Send;
}

const LOCAL_CALL_TIMEOUT: Duration = Duration::from_secs(60);

/// An in-process [`PartyClient`] connecting a cluster of parties directly.
#[derive(Clone)]
pub struct LocalClient {
    parties: Arc<OnceLock<Vec<Arc<ComputeParty<LocalClient>>>>>,
    call_timeout: Duration,
}

impl LocalClient {
    /// Creates one compute party per config, all reachable from each other,
    /// and a client handle for driving the cluster from the outside.
    pub fn cluster(
        configs: Vec<crate::party::PartyConfig>,
        stores: Vec<crate::store::Store>,
    ) -> (LocalClient, Vec<Arc<ComputeParty<LocalClient>>>) {
        let shared = Arc::new(OnceLock::new());
        let client = LocalClient {
            parties: Arc::clone(&shared),
            call_timeout: LOCAL_CALL_TIMEOUT,
        };
        let parties: Vec<_> = configs
            .into_iter()
            .zip(stores)
            .map(|(cfg, store)| Arc::new(ComputeParty::new(cfg, store, client.clone())))
            .collect();
        let _ = shared.set(parties.clone());
        (client, parties)
    }

    fn party(&self, to: usize) -> Result<Arc<ComputeParty<LocalClient>>, ClientError> {
        self.parties
            .get()
            .and_then(|parties| parties.get(to).cloned())
            .ok_or_else(|| ClientError::Unreachable {
                to,
                source: format!("no local party with index {to}").into(),
            })
    }
}

impl PartyClient for LocalClient {
    async fn compute_from_shares(
        &self,
        to: usize,
        req: ComputeRequest,
    ) -> Result<Vec<String>, ClientError> {
        let party = self.party(to)?;
        match timeout(self.call_timeout, party.compute_from_shares(req)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(source)) => Err(ClientError::Party {
                to,
                source: Box::new(source),
            }),
            Err(_) => Err(ClientError::Timeout { to }),
        }
    }

    async fn raise_to_key(
        &self,
        to: usize,
        req: ComputeRequest,
    ) -> Result<Vec<String>, ClientError> {
        let party = self.party(to)?;
        match timeout(self.call_timeout, party.raise_to_key(req)).await {
            Ok(Ok(result)) => Ok(result),
            Ok(Err(source)) => Err(ClientError::Party {
                to,
                source: Box::new(source),
            }),
            Err(_) => Err(ClientError::Timeout { to }),
        }
    }

    async fn push_computed_shares(
        &self,
        to: usize,
        req: PushSharesRequest,
    ) -> Result<(), ClientError> {
        let party = self.party(to)?;
        match timeout(self.call_timeout, party.push_computed_shares(req)).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(source)) => Err(ClientError::Party {
                to,
                source: Box::new(source),
            }),
            Err(_) => Err(ClientError::Timeout { to }),
        }
    }

    async fn list_data(&self, to: usize, req: ListDataRequest) -> Result<Vec<String>, ClientError> {
        let party = self.party(to)?;
        party.list_data(&req).map_err(|source| ClientError::Party {
            to,
            source: Box::new(source),
        })
    }
}
