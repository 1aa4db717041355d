//! The compute party engine: per-tenant key lifecycle, share-log
//! persistence, chained cross-party masking, the peer-share exchange barrier
//! and masked-table maintenance.
//!
//! Every party holds one secret key per tenant (data domain). An update
//! round rotates that key, appends the incoming shares to the tenant's share
//! log and re-masks the *entire* log under the new key chain; a query round
//! masks the ephemeral input under the current keys without touching any
//! persistent state. In both cases the driving party pipes the share vector
//! through `raise_to_key` of every party in the agreed order, broadcasts the
//! chained result to all peers and waits at a barrier until every peer's
//! vector has arrived, so the element-wise group sum reconstructs
//! `hash_to_point(element) * key_1 * ... * key_n`.
//!
//! Rounds for one tenant are serialized through a per-tenant async mutex and
//! the two cooperative block points (the key-freshness gate of
//! `raise_to_key` and the peer-share barrier) are notification-based with a
//! deadline, so a crashed peer fails the round explicitly instead of wedging
//! the tenant.

use std::{
    collections::HashMap,
    pin::pin,
    sync::{Arc, Mutex as StdMutex},
    time::Duration,
};

use curve25519_dalek::{ristretto::RistrettoPoint, scalar::Scalar, traits::Identity};
use futures::future;
use tokio::{
    sync::{Mutex as AsyncMutex, Notify},
    time::{Instant, timeout_at},
};
use tracing::{debug, warn};

use crate::{
    client::{ClientError, ComputeRequest, ListDataRequest, PartyClient, PushSharesRequest},
    crypto::{self, CryptoError, Encoding},
    store::Store,
};

/// Where a party's tenant keys come from.
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Fresh uniformly random scalars (production).
    Random,
    /// Scalars derived from a list of seeds, consumed back to front on every
    /// rotation (reproducible test runs).
    Seeded(Vec<String>),
}

/// Static configuration of one compute party.
#[derive(Debug, Clone)]
pub struct PartyConfig {
    /// This party's index in the agreed party list.
    pub party: usize,
    /// Total number of compute parties.
    pub parties: usize,
    /// Deadline for both cooperative block points: the key-freshness gate of
    /// `raise_to_key` and the peer-share barrier.
    pub peer_timeout: Duration,
    /// Key generation mode.
    pub key_source: KeySource,
}

impl PartyConfig {
    /// Config for party `party` of `parties`, with random keys and a 30 s
    /// deadline on the block points.
    pub fn new(party: usize, parties: usize) -> Self {
        Self {
            party,
            parties,
            peer_timeout: Duration::from_secs(30),
            key_source: KeySource::Random,
        }
    }
}

/// Errors raised by a compute party while serving a request.
#[derive(Debug, thiserror::Error)]
pub enum PartyError {
    /// A key or table lookup for a tenant that never completed an update.
    #[error("no key registered for data domain {0}")]
    UnknownTenant(String),
    /// An input point could not be decoded; fails this request only.
    #[error("share {index} could not be decoded")]
    InvalidShare {
        /// Position of the malformed entry in the request input.
        index: usize,
        /// The decoding failure.
        #[source]
        source: CryptoError,
    },
    /// A chained `raise_to_key` or broadcast call to a peer failed.
    #[error("peer call failed during the round")]
    Peer(#[source] Box<ClientError>),
    /// Not every peer delivered its share vector before the deadline.
    #[error("timed out waiting for peer shares for {tenant}, missing parties {missing:?}")]
    BarrierTimeout {
        /// The tenant whose round was abandoned.
        tenant: String,
        /// Parties whose buffer slot was still empty.
        missing: Vec<usize>,
    },
    /// The key-freshness gate expired before the tenant's buffer was reset.
    #[error("timed out waiting for a fresh key for {tenant}")]
    KeyWaitTimeout {
        /// The tenant whose key rotation never happened.
        tenant: String,
    },
    /// A peer pushed shares under an index outside the party list.
    #[error("party {from} pushed shares but is not in the party list")]
    UnknownPeer {
        /// The claimed sender index.
        from: usize,
    },
    /// A peer's vector does not line up with the round's element count.
    #[error("peer share vector has {actual} entries, expected {expected}")]
    LengthMismatch {
        /// Entries expected per vector in this round.
        expected: usize,
        /// Entries actually received.
        actual: usize,
    },
    /// Share log or masked table access failed; fails the whole round.
    #[error("share log or table access failed")]
    Storage(#[from] std::io::Error),
}

impl From<ClientError> for PartyError {
    fn from(e: ClientError) -> Self {
        Self::Peer(Box::new(e))
    }
}

struct TenantState {
    key: Scalar,
    /// One slot per party; `None` marks a slot still empty for the current
    /// aggregation.
    peer_shares: Vec<Option<Vec<RistrettoPoint>>>,
}

struct TenantCell {
    /// Serializes aggregations for this tenant; at most one round in flight.
    round: AsyncMutex<()>,
    state: StdMutex<TenantState>,
    /// Signalled on every buffer reset, slot fill and key rotation.
    changed: Notify,
}

/// One compute party, generic over the transport used to reach its peers.
pub struct ComputeParty<C> {
    cfg: PartyConfig,
    store: Store,
    client: C,
    tenants: StdMutex<HashMap<String, Arc<TenantCell>>>,
    /// Signalled when a tenant cell is created.
    tenants_changed: Notify,
    seeds: StdMutex<Vec<String>>,
}

impl<C: PartyClient> ComputeParty<C> {
    /// Creates a party with no registered tenants.
    pub fn new(cfg: PartyConfig, store: Store, client: C) -> Self {
        let seeds = match &cfg.key_source {
            KeySource::Random => Vec::new(),
            KeySource::Seeded(seeds) => seeds.clone(),
        };
        Self {
            cfg,
            store,
            client,
            tenants: StdMutex::new(HashMap::new()),
            tenants_changed: Notify::new(),
            seeds: StdMutex::new(seeds),
        }
    }

    /// This party's index in the agreed party list.
    pub fn index(&self) -> usize {
        self.cfg.party
    }

    /// Runs one aggregation round for the tenant.
    ///
    /// Update rounds rotate the tenant key, persist the incoming shares and
    /// reprocess the full share log; query rounds mask the input as given.
    /// Returns the element-wise sum of all parties' chained vectors, which is
    /// the input masked by the product of every party's key.
    pub async fn compute_from_shares(
        &self,
        req: ComputeRequest,
    ) -> Result<Vec<String>, PartyError> {
        let ComputeRequest {
            input,
            tenant,
            is_update,
            encoding,
        } = req;
        let (cell, created) = if is_update {
            self.tenant_or_create(&tenant)
        } else {
            (self.tenant(&tenant)?, false)
        };
        let _round = cell.round.lock().await;
        {
            let mut state = cell.state.lock().expect("tenant state lock poisoned");
            if is_update && !created {
                state.key = self.fresh_key();
            }
            for slot in &mut state.peer_shares {
                *slot = None;
            }
        }
        cell.changed.notify_waiters();

        let input = if is_update {
            self.store.append_share_log(&tenant, &input)?;
            self.store.read_share_log(&tenant)?
        } else {
            input
        };
        let elements = input.len();
        debug!(
            party = self.cfg.party,
            tenant, is_update, elements, "starting aggregation round"
        );

        // Chain the mask across every party's key, self included, in the
        // fixed party order.
        let mut current = input;
        for to in 0..self.cfg.parties {
            let req = ComputeRequest {
                input: current,
                tenant: tenant.clone(),
                is_update,
                encoding,
            };
            current = self.client.raise_to_key(to, req).await?;
        }

        let chained = decode_all(&current, encoding)?;
        {
            let mut state = cell.state.lock().expect("tenant state lock poisoned");
            state.peer_shares[self.cfg.party] = Some(chained);
        }
        cell.changed.notify_waiters();

        let pushes = (0..self.cfg.parties)
            .filter(|to| *to != self.cfg.party)
            .map(|to| {
                self.client.push_computed_shares(
                    to,
                    PushSharesRequest {
                        tenant: tenant.clone(),
                        from: self.cfg.party,
                        input: current.clone(),
                        encoding,
                    },
                )
            });
        future::try_join_all(pushes).await?;

        let vectors = self.await_peer_shares(&cell, &tenant).await?;
        let mut sums = vec![RistrettoPoint::identity(); elements];
        for vector in &vectors {
            if vector.len() != elements {
                return Err(PartyError::LengthMismatch {
                    expected: elements,
                    actual: vector.len(),
                });
            }
            for (sum, point) in sums.iter_mut().zip(vector) {
                *sum += point;
            }
        }
        let result = crypto::encode_points(&sums, encoding);

        if is_update {
            self.store.append_masked_table(&tenant, &result)?;
        }
        debug!(
            party = self.cfg.party,
            tenant, elements, "aggregation round complete"
        );
        Ok(result)
    }

    /// Masks the input points with this party's current tenant key.
    ///
    /// For update rounds the call waits until the tenant's buffer has been
    /// reset, which guarantees the key has already been rotated for the round
    /// in flight; queries use the current key immediately and fail for
    /// tenants without a key.
    pub async fn raise_to_key(&self, req: ComputeRequest) -> Result<Vec<String>, PartyError> {
        let ComputeRequest {
            input,
            tenant,
            is_update,
            encoding,
        } = req;
        let key = if is_update {
            self.await_fresh_key(&tenant).await?
        } else {
            let cell = self.tenant(&tenant)?;
            let state = cell.state.lock().expect("tenant state lock poisoned");
            state.key
        };
        let points = decode_all(&input, encoding)?;
        let raised: Vec<_> = points.iter().map(|p| crypto::mask(p, &key)).collect();
        Ok(crypto::encode_points(&raised, encoding))
    }

    /// Stores a peer's chained share vector in its buffer slot.
    pub async fn push_computed_shares(&self, req: PushSharesRequest) -> Result<(), PartyError> {
        let PushSharesRequest {
            tenant,
            from,
            input,
            encoding,
        } = req;
        if from >= self.cfg.parties {
            return Err(PartyError::UnknownPeer { from });
        }
        let cell = self.tenant(&tenant)?;
        let points = decode_all(&input, encoding)?;
        {
            let mut state = cell.state.lock().expect("tenant state lock poisoned");
            state.peer_shares[from] = Some(points);
        }
        cell.changed.notify_waiters();
        Ok(())
    }

    /// Returns the tenant's full masked table.
    pub fn list_data(&self, req: &ListDataRequest) -> Result<Vec<String>, PartyError> {
        self.tenant(&req.tenant)?;
        Ok(self.store.read_masked_table(&req.tenant)?)
    }

    /// Waits until every buffer slot for the tenant is filled, then returns
    /// all vectors. The buffer stays full afterwards, closing the
    /// key-freshness gate until the next reset.
    async fn await_peer_shares(
        &self,
        cell: &TenantCell,
        tenant: &str,
    ) -> Result<Vec<Vec<RistrettoPoint>>, PartyError> {
        let deadline = Instant::now() + self.cfg.peer_timeout;
        loop {
            let mut filled = pin!(cell.changed.notified());
            filled.as_mut().enable();
            let missing = {
                let state = cell.state.lock().expect("tenant state lock poisoned");
                let missing: Vec<usize> = state
                    .peer_shares
                    .iter()
                    .enumerate()
                    .filter_map(|(i, slot)| slot.is_none().then_some(i))
                    .collect();
                if missing.is_empty() {
                    return Ok(state.peer_shares.iter().cloned().flatten().collect());
                }
                missing
            };
            if timeout_at(deadline, filled).await.is_err() {
                return Err(PartyError::BarrierTimeout {
                    tenant: tenant.to_string(),
                    missing,
                });
            }
        }
    }

    /// The key-freshness gate: waits until the tenant exists and its buffer
    /// has at least one empty slot, i.e. the round in flight has already
    /// rotated the key this call is about to apply.
    async fn await_fresh_key(&self, tenant: &str) -> Result<Scalar, PartyError> {
        let deadline = Instant::now() + self.cfg.peer_timeout;
        let cell = loop {
            let mut created = pin!(self.tenants_changed.notified());
            created.as_mut().enable();
            if let Some(cell) = self.find_tenant(tenant) {
                break cell;
            }
            if timeout_at(deadline, created).await.is_err() {
                return Err(PartyError::KeyWaitTimeout {
                    tenant: tenant.to_string(),
                });
            }
        };
        loop {
            let mut changed = pin!(cell.changed.notified());
            changed.as_mut().enable();
            {
                let state = cell.state.lock().expect("tenant state lock poisoned");
                if state.peer_shares.iter().any(Option::is_none) {
                    return Ok(state.key);
                }
            }
            if timeout_at(deadline, changed).await.is_err() {
                return Err(PartyError::KeyWaitTimeout {
                    tenant: tenant.to_string(),
                });
            }
        }
    }

    fn find_tenant(&self, tenant: &str) -> Option<Arc<TenantCell>> {
        self.tenants
            .lock()
            .expect("tenant map lock poisoned")
            .get(tenant)
            .cloned()
    }

    fn tenant(&self, tenant: &str) -> Result<Arc<TenantCell>, PartyError> {
        self.find_tenant(tenant)
            .ok_or_else(|| PartyError::UnknownTenant(tenant.to_string()))
    }

    /// Returns the tenant cell, creating it with a fresh key if this is the
    /// tenant's first update. The flag reports whether this call created it,
    /// in which case the round must not rotate again.
    fn tenant_or_create(&self, tenant: &str) -> (Arc<TenantCell>, bool) {
        let mut tenants = self.tenants.lock().expect("tenant map lock poisoned");
        if let Some(cell) = tenants.get(tenant) {
            return (cell.clone(), false);
        }
        let cell = Arc::new(TenantCell {
            round: AsyncMutex::new(()),
            state: StdMutex::new(TenantState {
                key: self.fresh_key(),
                peer_shares: vec![None; self.cfg.parties],
            }),
            changed: Notify::new(),
        });
        tenants.insert(tenant.to_string(), cell.clone());
        drop(tenants);
        self.tenants_changed.notify_waiters();
        (cell, true)
    }

    fn fresh_key(&self) -> Scalar {
        match &self.cfg.key_source {
            KeySource::Random => crypto::random_scalar(),
            KeySource::Seeded(_) => {
                match self.seeds.lock().expect("seed list lock poisoned").pop() {
                    Some(seed) => crypto::scalar_from_seed(&seed),
                    None => {
                        warn!(
                            party = self.cfg.party,
                            "seeded key source exhausted, falling back to a random key"
                        );
                        crypto::random_scalar()
                    }
                }
            }
        }
    }
}

fn decode_all(input: &[String], encoding: Encoding) -> Result<Vec<RistrettoPoint>, PartyError> {
    input
        .iter()
        .enumerate()
        .map(|(index, encoded)| {
            crypto::decode_point(encoded, encoding)
                .map_err(|source| PartyError::InvalidShare { index, source })
        })
        .collect()
}
