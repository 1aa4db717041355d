use std::{sync::Arc, time::Duration};

use mpsi::{
    client::{ClientError, ComputeRequest, LocalClient, PartyClient},
    creator,
    crypto::{self, Encoding},
    party::{ComputeParty, KeySource, PartyConfig, PartyError},
    querier::{self, QueryError},
    store::Store,
};
use tempfile::TempDir;

const TENANT: &str = "tenant-a";

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn cluster(
    dir: &TempDir,
    parties: usize,
    peer_timeout: Duration,
    key_source: impl Fn(usize) -> KeySource,
) -> (LocalClient, Vec<Arc<ComputeParty<LocalClient>>>, Vec<Store>) {
    init_tracing();
    let configs = (0..parties)
        .map(|party| PartyConfig {
            party,
            parties,
            peer_timeout,
            key_source: key_source(party),
        })
        .collect();
    let stores: Vec<_> = (0..parties)
        .map(|party| Store::new(dir.path(), format!("party{party}")))
        .collect();
    let (client, handles) = LocalClient::cluster(configs, stores.clone());
    (client, handles, stores)
}

fn random_cluster(
    dir: &TempDir,
    parties: usize,
) -> (LocalClient, Vec<Arc<ComputeParty<LocalClient>>>, Vec<Store>) {
    cluster(dir, parties, Duration::from_secs(10), |_| KeySource::Random)
}

fn owned(elements: &[&str]) -> Vec<String> {
    elements.iter().map(|e| e.to_string()).collect()
}

#[tokio::test(flavor = "multi_thread")]
async fn insert_then_query_three_parties() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _parties, stores) = random_cluster(&dir, 3);

    let inserted = owned(&["111223333", "222334444"]);
    let batch = creator::update_list(&client, 3, &inserted, TENANT, Encoding::Base64)
        .await
        .unwrap();
    assert!(batch.results.iter().all(Result::is_ok));
    for store in &stores {
        assert_eq!(store.read_share_log(TENANT).unwrap().len(), 2);
        assert_eq!(store.read_masked_table(TENANT).unwrap().len(), 2);
    }

    let queried = owned(&["111223333", "999999999"]);
    let matched = querier::check_if_in_list(&client, 3, &queried, TENANT, Encoding::Base64)
        .await
        .unwrap();
    assert_eq!(matched, vec![0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn update_returns_the_same_aggregate_on_every_party() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _parties, _stores) = random_cluster(&dir, 4);

    let batch = creator::update_list(&client, 4, &owned(&["111223333"]), TENANT, Encoding::Base64)
        .await
        .unwrap();
    let aggregates: Vec<_> = batch.results.into_iter().map(Result::unwrap).collect();
    assert!(aggregates.iter().all(|a| *a == aggregates[0]));
    assert_eq!(aggregates[0].len(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn chained_masking_matches_the_direct_key_product() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _parties, _stores) = cluster(&dir, 3, Duration::from_secs(10), |party| {
        KeySource::Seeded(vec![format!("seed-{party}")])
    });

    let batch = creator::update_list(&client, 3, &owned(&["111223333"]), TENANT, Encoding::Base64)
        .await
        .unwrap();
    let aggregate = batch.results[0].as_ref().unwrap();

    let key_product = crypto::scalar_from_seed("seed-0")
        * crypto::scalar_from_seed("seed-1")
        * crypto::scalar_from_seed("seed-2");
    let expected = crypto::mask(&crypto::hash_to_point("111223333"), &key_product);
    assert_eq!(aggregate[0], crypto::encode_point(&expected, Encoding::Base64));
}

#[tokio::test(flavor = "multi_thread")]
async fn key_rotation_remasks_the_whole_table() {
    let dir = tempfile::tempdir().unwrap();
    // Two seeds per party, consumed back to front: one per update round.
    let (client, _parties, stores) = cluster(&dir, 3, Duration::from_secs(10), |party| {
        KeySource::Seeded(vec![format!("round2-{party}"), format!("round1-{party}")])
    });

    creator::update_list(&client, 3, &owned(&["111223333"]), TENANT, Encoding::Base64)
        .await
        .unwrap();
    creator::update_list(&client, 3, &owned(&["222334444"]), TENANT, Encoding::Base64)
        .await
        .unwrap();

    // The second round reprocesses the full share log under rotated keys and
    // appends it, so the table holds both rounds' views.
    let table = stores[0].read_masked_table(TENANT).unwrap();
    assert_eq!(table.len(), 3);
    assert_ne!(table[0], table[1], "rotation must change existing masks");

    let round2_product = crypto::scalar_from_seed("round2-0")
        * crypto::scalar_from_seed("round2-1")
        * crypto::scalar_from_seed("round2-2");
    let remasked = crypto::mask(&crypto::hash_to_point("111223333"), &round2_product);
    assert_eq!(table[1], crypto::encode_point(&remasked, Encoding::Base64));

    // Queries only match rows from the latest rotation, but both elements
    // are still found.
    let queried = owned(&["222334444", "111223333"]);
    let matched = querier::check_if_in_list(&client, 3, &queried, TENANT, Encoding::Base64)
        .await
        .unwrap();
    assert_eq!(matched, vec![0, 1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn the_batch_reports_the_shares_that_were_sent() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _parties, _stores) = random_cluster(&dir, 3);

    let batch = creator::update_list(&client, 3, &owned(&["111223333"]), TENANT, Encoding::Base64)
        .await
        .unwrap();
    assert_eq!(batch.shares.len(), 3);
    let points: Vec<_> = batch
        .shares
        .iter()
        .map(|column| crypto::decode_point(&column[0], Encoding::Base64).unwrap())
        .collect();
    let sum = points.iter().skip(1).fold(points[0], |acc, p| acc + p);
    assert_eq!(sum, crypto::hash_to_point("111223333"));
}

#[tokio::test(flavor = "multi_thread")]
async fn queries_do_not_modify_any_state() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _parties, stores) = random_cluster(&dir, 3);

    creator::update_list(&client, 3, &owned(&["111223333"]), TENANT, Encoding::Base64)
        .await
        .unwrap();

    let queried = owned(&["111223333", "999999999"]);
    let first = querier::check_if_in_list(&client, 3, &queried, TENANT, Encoding::Base64)
        .await
        .unwrap();
    let second = querier::check_if_in_list(&client, 3, &queried, TENANT, Encoding::Base64)
        .await
        .unwrap();
    assert_eq!(first, vec![0]);
    assert_eq!(second, first);
    for store in &stores {
        assert_eq!(store.read_share_log(TENANT).unwrap().len(), 1);
        assert_eq!(store.read_masked_table(TENANT).unwrap().len(), 1);
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn query_consistency_with_a_large_list() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _parties, _stores) = random_cluster(&dir, 3);

    let inserted: Vec<String> = (0..1000)
        .map(|i| format!("{:09}", 100_000_000 + i * 7))
        .collect();
    creator::update_list(&client, 3, &inserted, TENANT, Encoding::Base64)
        .await
        .unwrap();

    let disjoint: Vec<String> = (0..100).map(|i| format!("{:09}", 900_000_000 + i)).collect();
    let matched = querier::check_if_in_list(&client, 3, &disjoint, TENANT, Encoding::Base64)
        .await
        .unwrap();
    assert_eq!(matched, Vec::<usize>::new());

    let present: Vec<String> = (0..10).map(|i| inserted[i * 97].clone()).collect();
    let matched = querier::check_if_in_list(&client, 3, &present, TENANT, Encoding::Base64)
        .await
        .unwrap();
    assert_eq!(matched, (0..10).collect::<Vec<usize>>());
}

#[tokio::test(flavor = "multi_thread")]
async fn hex_encoding_works_end_to_end() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _parties, stores) = random_cluster(&dir, 2);

    creator::update_list(&client, 2, &owned(&["111223333"]), TENANT, Encoding::Hex)
        .await
        .unwrap();
    let table = stores[0].read_masked_table(TENANT).unwrap();
    assert_eq!(table[0].len(), 64);
    assert!(table[0].chars().all(|c| c.is_ascii_hexdigit()));

    let matched = querier::check_if_in_list(&client, 2, &owned(&["111223333"]), TENANT, Encoding::Hex)
        .await
        .unwrap();
    assert_eq!(matched, vec![0]);
}

#[tokio::test(flavor = "multi_thread")]
async fn tenants_are_isolated() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _parties, _stores) = random_cluster(&dir, 3);

    creator::update_list(&client, 3, &owned(&["111223333"]), "tenant-a", Encoding::Base64)
        .await
        .unwrap();
    creator::update_list(&client, 3, &owned(&["222334444"]), "tenant-b", Encoding::Base64)
        .await
        .unwrap();

    let queried = owned(&["111223333", "222334444"]);
    let in_a = querier::check_if_in_list(&client, 3, &queried, "tenant-a", Encoding::Base64)
        .await
        .unwrap();
    let in_b = querier::check_if_in_list(&client, 3, &queried, "tenant-b", Encoding::Base64)
        .await
        .unwrap();
    assert_eq!(in_a, vec![0]);
    assert_eq!(in_b, vec![1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn query_for_an_unknown_tenant_fails() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _parties, _stores) = random_cluster(&dir, 3);

    let result =
        querier::check_if_in_list(&client, 3, &owned(&["111223333"]), "nobody", Encoding::Base64)
            .await;
    assert!(matches!(result, Err(QueryError::NoPartyResult)));
}

#[tokio::test(start_paused = true)]
async fn a_lone_update_round_fails_instead_of_hanging() {
    let dir = tempfile::tempdir().unwrap();
    let (_client, parties, _stores) = cluster(&dir, 3, Duration::from_millis(300), |_| {
        KeySource::Random
    });

    // Drive only party 0: its chained raise on party 1 waits for a key
    // rotation that never happens and must hit the deadline.
    let shares = creator::build_shares(&owned(&["111223333"]), 3).unwrap();
    let input = vec![crypto::encode_point(&shares[0][0], Encoding::Base64)];
    let result = parties[0]
        .compute_from_shares(ComputeRequest {
            input,
            tenant: TENANT.to_string(),
            is_update: true,
            encoding: Encoding::Base64,
        })
        .await;
    match result {
        Err(PartyError::Peer(source)) => match *source {
            ClientError::Party { to: 1, source } => {
                assert!(matches!(*source, PartyError::KeyWaitTimeout { .. }));
            }
            other => panic!("expected party 1 to time out, got {other:?}"),
        },
        other => panic!("expected a peer timeout, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn a_partial_aggregation_times_out_at_the_barrier() {
    let dir = tempfile::tempdir().unwrap();
    let (client, parties, _stores) = cluster(&dir, 3, Duration::from_millis(300), |_| {
        KeySource::Random
    });

    creator::update_list(&client, 3, &owned(&["111223333"]), TENANT, Encoding::Base64)
        .await
        .unwrap();

    // Drive only party 0 in query mode: its chain and pushes succeed, but
    // parties 1 and 2 never push back, so slots 1 and 2 stay empty.
    let shares = creator::build_shares(&owned(&["111223333"]), 3).unwrap();
    let input = vec![crypto::encode_point(&shares[0][0], Encoding::Base64)];
    let result = parties[0]
        .compute_from_shares(ComputeRequest {
            input,
            tenant: TENANT.to_string(),
            is_update: false,
            encoding: Encoding::Base64,
        })
        .await;
    match result {
        Err(PartyError::BarrierTimeout { missing, .. }) => assert_eq!(missing, vec![1, 2]),
        other => panic!("expected a barrier timeout, got {other:?}"),
    }
}

#[tokio::test(flavor = "multi_thread")]
async fn malformed_shares_fail_the_round_with_a_typed_error() {
    let dir = tempfile::tempdir().unwrap();
    let (client, _parties, _stores) = random_cluster(&dir, 3);

    creator::update_list(&client, 3, &owned(&["111223333"]), TENANT, Encoding::Base64)
        .await
        .unwrap();

    let bogus = ComputeRequest {
        input: vec!["definitely not a point".to_string()],
        tenant: TENANT.to_string(),
        is_update: false,
        encoding: Encoding::Base64,
    };
    let result = client.compute_from_shares(0, bogus).await;
    assert!(matches!(result, Err(ClientError::Party { to: 0, .. })));
}
