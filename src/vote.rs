//! Recording votes.
//!
//! A vote is one insert into `votes` plus a `+1` on `features.votes`, both in a
//! single transaction. Duplicate votes are detected only by the unique index
//! on `(feature_id, voter_ip)` rejecting the insert. Nothing here reads
//! `votes` to check for an earlier vote.

use tracing::{debug, warn};

use crate::{
    domain::{Feature, VoterId},
    store::{
        FEATURE_COLUMNS, FeatureRow, FeatureStore, StoreError, is_foreign_key_violation,
        is_unique_violation, timestamp_now,
    },
};

#[derive(Debug)]
pub enum VoteError {
    NotFound { feature_id: i64 },
    AlreadyVoted { feature_id: i64 },
    Store(StoreError),
}

impl std::fmt::Display for VoteError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::NotFound { feature_id } => write!(f, "feature not found: {feature_id}"),
            Self::AlreadyVoted { feature_id } => {
                write!(f, "already voted for feature: {feature_id}")
            }
            Self::Store(e) => write!(f, "{e}"),
        }
    }
}

impl std::error::Error for VoteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Store(e) => Some(e),
            Self::NotFound { .. } | Self::AlreadyVoted { .. } => None,
        }
    }
}

impl From<StoreError> for VoteError {
    fn from(value: StoreError) -> Self {
        Self::Store(value)
    }
}

impl From<sqlx::Error> for VoteError {
    fn from(value: sqlx::Error) -> Self {
        Self::Store(StoreError::Sqlx(value))
    }
}

/// Records one vote by `voter` for `feature_id` and returns the feature with
/// its incremented counter.
///
/// The existence check runs before the transaction so an unknown id never
/// opens one. Every early return drops the transaction, which rolls it back.
pub async fn cast_vote(
    store: &FeatureStore,
    feature_id: i64,
    voter: &VoterId,
) -> Result<Feature, VoteError> {
    if !store.feature_exists(feature_id).await? {
        return Err(VoteError::NotFound { feature_id });
    }

    let now = timestamp_now();
    let mut tx = store.pool().begin().await?;

    let inserted =
        sqlx::query("INSERT INTO votes (feature_id, voter_ip, created_at) VALUES (?1, ?2, ?3)")
            .bind(feature_id)
            .bind(voter.as_str())
            .bind(&now)
            .execute(&mut *tx)
            .await;
    if let Err(err) = inserted {
        if is_unique_violation(&err) {
            debug!(feature_id, voter = %voter, "duplicate vote rejected");
            return Err(VoteError::AlreadyVoted { feature_id });
        }
        if is_foreign_key_violation(&err) {
            return Err(VoteError::NotFound { feature_id });
        }
        warn!(feature_id, error = %err, "vote insert failed");
        return Err(err.into());
    }

    let sql = format!(
        "UPDATE features SET votes = votes + 1, updated_at = ?1 WHERE id = ?2 RETURNING {FEATURE_COLUMNS}"
    );
    let updated = sqlx::query_as::<_, FeatureRow>(&sql)
        .bind(&now)
        .bind(feature_id)
        .fetch_optional(&mut *tx)
        .await?;
    let Some(updated) = updated else {
        return Err(VoteError::NotFound { feature_id });
    };

    tx.commit().await?;
    Ok(updated.into())
}
