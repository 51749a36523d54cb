use std::time::Duration;

use anyhow::Context as _;
use futures_util::future::join_all;
use tempfile::TempDir;

use featurevote::{
    domain::{Feature, NewFeature, VoterId},
    store::{FeatureStore, StoreOptions},
    vote::{VoteError, cast_vote},
};

async fn open_store(tmp: &TempDir) -> anyhow::Result<FeatureStore> {
    let store = FeatureStore::connect(&StoreOptions {
        database_url: format!("sqlite://{}", tmp.path().join("votes.db").display()),
        max_connections: 8,
        busy_timeout: Duration::from_secs(15),
    })
    .await
    .context("connect store")?;
    store.migrate().await.context("migrate store")?;
    Ok(store)
}

async fn seed_feature(store: &FeatureStore, title: &str) -> anyhow::Result<Feature> {
    store
        .create_feature(&NewFeature {
            title: title.to_string(),
            description: Some("seeded".to_string()),
            author_name: "alice".to_string(),
        })
        .await
        .context("create feature")
}

#[derive(Debug, Default)]
struct Tally {
    ok: usize,
    already_voted: usize,
    other: Vec<String>,
}

async fn run_votes(store: &FeatureStore, feature_id: i64, voters: Vec<String>) -> Tally {
    let handles = voters.into_iter().map(|voter| {
        let store = store.clone();
        tokio::spawn(async move { cast_vote(&store, feature_id, &VoterId::new(voter)).await })
    });

    let mut tally = Tally::default();
    for joined in join_all(handles).await {
        match joined.expect("vote task panicked") {
            Ok(_) => tally.ok += 1,
            Err(VoteError::AlreadyVoted { .. }) => tally.already_voted += 1,
            Err(e) => tally.other.push(e.to_string()),
        }
    }
    tally
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn distinct_voters_racing_on_one_feature_all_count() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = open_store(&tmp).await?;
    let feature = seed_feature(&store, "Dark mode").await?;

    let voters = (0..50).map(|i| format!("10.2.{}.{}", i / 200, i % 200)).collect();
    let tally = run_votes(&store, feature.id, voters).await;

    assert!(tally.other.is_empty(), "unexpected failures: {:?}", tally.other);
    assert_eq!(tally.ok, 50);
    assert_eq!(tally.already_voted, 0);

    let after = store.get_feature(feature.id).await?.context("feature vanished")?;
    assert_eq!(after.feature.votes, 50);
    assert_eq!(after.vote_count, 50);

    store.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn one_voter_racing_against_itself_wins_exactly_once() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = open_store(&tmp).await?;
    let feature = seed_feature(&store, "Dark mode").await?;

    let voters = std::iter::repeat_n("198.51.100.4".to_string(), 12).collect();
    let tally = run_votes(&store, feature.id, voters).await;

    assert!(tally.other.is_empty(), "unexpected failures: {:?}", tally.other);
    assert_eq!(tally.ok, 1);
    assert_eq!(tally.already_voted, 11);

    let after = store.get_feature(feature.id).await?.context("feature vanished")?;
    assert_eq!(after.feature.votes, 1);
    assert_eq!(store.votes_for_feature(feature.id).await?.len(), 1);

    store.close().await;
    Ok(())
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn mixed_duplicates_keep_counter_equal_to_vote_rows() -> anyhow::Result<()> {
    let tmp = TempDir::new()?;
    let store = open_store(&tmp).await?;
    let first = seed_feature(&store, "Dark mode").await?;
    let second = seed_feature(&store, "Offline sync").await?;

    // Ten distinct voters, each trying three times.
    let voters: Vec<String> = (0..30).map(|i| format!("10.3.0.{}", i % 10)).collect();
    let (a, b) = tokio::join!(
        run_votes(&store, first.id, voters.clone()),
        run_votes(&store, second.id, voters),
    );

    for (tally, feature) in [(a, &first), (b, &second)] {
        assert!(tally.other.is_empty(), "unexpected failures: {:?}", tally.other);
        assert_eq!(tally.ok, 10);
        assert_eq!(tally.already_voted, 20);

        let after = store.get_feature(feature.id).await?.context("feature vanished")?;
        assert_eq!(after.feature.votes, 10);
        assert_eq!(after.vote_count, 10);
    }

    let ranked: Vec<i64> = store
        .list_features()
        .await?
        .into_iter()
        .map(|f| f.feature.id)
        .collect();
    assert_eq!(ranked, vec![second.id, first.id]);

    store.close().await;
    Ok(())
}
