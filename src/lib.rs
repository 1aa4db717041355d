//! A Rust implementation of multi-party private set intersection (PSI) with
//! outsourced compute parties.
//!
//! This crate lets a list creator store a set of sensitive identifiers across
//! a group of compute parties and lets queriers learn which of their own
//! elements are in that list, while no single party ever sees an element in
//! the clear. Elements are hashed to Ristretto255 group elements, split into
//! additive shares, and masked by every party's secret key in turn, so the
//! stored table only contains values of the form `H(x) * k_1 * ... * k_n`.
//!
//! ## Features
//!
//! - Additive secret sharing over Ristretto255: any proper subset of shares
//!   reveals nothing about the element
//! - Chained masking across all compute parties with per-tenant keys that
//!   rotate on every list update
//! - Append-only share logs and masked tables per (party, tenant) pair
//! - Deadline-bounded peer coordination: a crashed party fails a round with a
//!   typed error instead of wedging the tenant
//! - A two-party OPRF variant without outsourcing in [`pairwise`]
//!
//! ## Main Components
//!
//! The crate is structured into several modules:
//!
//! * [`creator`]: Splitting elements into shares and driving update rounds.
//! * [`querier`]: Evaluating set membership against a stored list.
//! * [`party`]: The compute party engine serving both of the above.
//! * [`client`]: The transport seam between the roles, with an in-process
//!   implementation for tests and simulations.
//! * [`crypto`]: The group primitive, hashing, masking and point encodings.
//! * [`store`]: Append-only persistence for share logs and masked tables.
//!
//! ## Basic Usage
//!
//! To run the protocol, stand up one [`party::ComputeParty`] per participant
//! behind a [`client::PartyClient`] implementation, then drive them through
//! the [`creator`] and [`querier`] entry points:
//!
//! ```ignore
//! use mpsi::{client::LocalClient, creator, crypto::Encoding, querier};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let (client, _parties) = LocalClient::cluster(configs, stores);
//!
//! // Store two identifiers in the tenant's list.
//! let elements = vec!["111223333".into(), "222334444".into()];
//! creator::update_list(&client, 3, &elements, "tenant-a", Encoding::Base64).await?;
//!
//! // Later, check two identifiers against the list.
//! let queried = vec!["111223333".into(), "999999999".into()];
//! let matched = querier::check_if_in_list(&client, 3, &queried, "tenant-a", Encoding::Base64).await?;
//! assert_eq!(matched, vec![0]);
//! # Ok(())
//! # }
//! ```
//!
//! ## Security Properties
//!
//! The protocol is secure against honest-but-curious parties: compute parties
//! only ever see uniformly random-looking shares and masked group elements,
//! queriers only learn membership of their own elements, and key rotation on
//! every update unlinks successive versions of the stored table. Collusion of
//! all compute parties, malicious deviations from the protocol, and transport
//! security are outside the threat model.
#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(rustdoc::broken_intra_doc_links)]

pub mod client;
pub mod creator;
pub mod crypto;
pub mod pairwise;
pub mod party;
pub mod querier;
pub mod store;
