//! The intersection evaluator run by a querier.
//!
//! A query is a throwaway aggregation round: the elements are shared out and
//! masked under the parties' current keys exactly like an update, but nothing
//! is persisted and no key rotates. Because every party aggregates the same
//! chained vectors, all successful parties return the identical result, so a
//! single one suffices. The masked query values are then compared byte for
//! byte against one party's stored table.

use std::collections::HashSet;

use tracing::{debug, warn};

use crate::{
    client::{ListDataRequest, PartyClient},
    creator::{self, Mode, ShareError},
    crypto::Encoding,
};

/// Errors raised while evaluating a query.
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    /// The query elements could not be shared out.
    #[error(transparent)]
    Share(#[from] ShareError),
    /// Every compute party failed the aggregation round.
    #[error("no compute party returned a result for the query")]
    NoPartyResult,
    /// No compute party could serve the tenant's masked table.
    #[error("no compute party returned the stored table for the data domain")]
    NoTableData,
}

/// Returns the indices (in input order) of the elements present in the
/// tenant's stored list, without revealing the elements to any party.
///
/// An empty result means none of the elements are in the list; a party that
/// failed the round is logged and skipped, and only if *no* party produced a
/// result does the query fail.
pub async fn check_if_in_list<C: PartyClient>(
    client: &C,
    parties: usize,
    elements: &[String],
    tenant: &str,
    encoding: Encoding,
) -> Result<Vec<usize>, QueryError> {
    let batch =
        creator::send_shares(client, parties, elements, tenant, Mode::Query, encoding).await?;
    let masked = batch
        .results
        .into_iter()
        .find_map(Result::ok)
        .ok_or(QueryError::NoPartyResult)?;

    let mut table = None;
    for to in 0..parties {
        let req = ListDataRequest {
            tenant: tenant.to_string(),
        };
        match client.list_data(to, req).await {
            Ok(rows) => {
                table = Some(rows);
                break;
            }
            Err(error) => warn!(to, %error, "could not fetch the masked table"),
        }
    }
    let table = table.ok_or(QueryError::NoTableData)?;
    let table: HashSet<&str> = table.iter().map(String::as_str).collect();

    let matched: Vec<usize> = masked
        .iter()
        .enumerate()
        .filter_map(|(index, row)| table.contains(row.as_str()).then_some(index))
        .collect();
    debug!(
        tenant,
        queried = elements.len(),
        matched = matched.len(),
        "query complete"
    );
    Ok(matched)
}
