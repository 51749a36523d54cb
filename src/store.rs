use std::{io, str::FromStr, time::Duration};

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::{
    FromRow,
    sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions},
};
use tracing::{debug, info};

use crate::domain::{Feature, FeatureWithCount, NewFeature, Vote};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(10);

pub(crate) const FEATURE_COLUMNS: &str =
    "id, title, description, author_name, votes, created_at, updated_at";

#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub database_url: String,
    pub max_connections: u32,
    pub busy_timeout: Duration,
}

#[derive(Debug)]
pub enum StoreError {
    Io(io::Error),
    Sqlx(sqlx::Error),
    Migrate(sqlx::migrate::MigrateError),
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io(e) => write!(f, "io error: {e}"),
            Self::Sqlx(e) => write!(f, "database error: {e}"),
            Self::Migrate(e) => write!(f, "migration error: {e}"),
        }
    }
}

impl std::error::Error for StoreError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Io(e) => Some(e),
            Self::Sqlx(e) => Some(e),
            Self::Migrate(e) => Some(e),
        }
    }
}

impl From<io::Error> for StoreError {
    fn from(value: io::Error) -> Self {
        Self::Io(value)
    }
}

impl From<sqlx::Error> for StoreError {
    fn from(value: sqlx::Error) -> Self {
        Self::Sqlx(value)
    }
}

impl From<sqlx::migrate::MigrateError> for StoreError {
    fn from(value: sqlx::migrate::MigrateError) -> Self {
        Self::Migrate(value)
    }
}

#[derive(Debug, FromRow)]
pub(crate) struct FeatureRow {
    id: i64,
    title: String,
    description: Option<String>,
    author_name: String,
    votes: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl From<FeatureRow> for Feature {
    fn from(row: FeatureRow) -> Self {
        Self {
            id: row.id,
            title: row.title,
            description: row.description,
            author_name: row.author_name,
            votes: row.votes,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(Debug, FromRow)]
struct FeatureWithCountRow {
    #[sqlx(flatten)]
    feature: FeatureRow,
    vote_count: i64,
}

impl From<FeatureWithCountRow> for FeatureWithCount {
    fn from(row: FeatureWithCountRow) -> Self {
        Self {
            feature: row.feature.into(),
            vote_count: row.vote_count,
        }
    }
}

#[derive(Debug, FromRow)]
struct VoteRow {
    id: i64,
    feature_id: i64,
    voter_ip: String,
    created_at: DateTime<Utc>,
}

/// Handle to the relational store holding features and votes.
///
/// Cloning is cheap; all clones share one connection pool. The handle is
/// opened once at startup and must be [`closed`](Self::close) on shutdown.
#[derive(Debug, Clone)]
pub struct FeatureStore {
    pool: SqlitePool,
}

impl FeatureStore {
    pub async fn connect(options: &StoreOptions) -> Result<Self, StoreError> {
        let connect = SqliteConnectOptions::from_str(&options.database_url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(options.busy_timeout)
            .foreign_keys(true);

        if let Some(parent) = connect.get_filename().parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }

        let pool = SqlitePoolOptions::new()
            .max_connections(options.max_connections)
            .acquire_timeout(ACQUIRE_TIMEOUT)
            .connect_with(connect)
            .await?;
        debug!(
            max_connections = options.max_connections,
            "opened feature store pool"
        );
        Ok(Self { pool })
    }

    /// Applies the embedded schema migrations. Safe to call on every start.
    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        info!("feature store schema is up to date");
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    pub(crate) fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// All features, most voted first; equal counts list the newest first.
    pub async fn list_features(&self) -> Result<Vec<FeatureWithCount>, StoreError> {
        let rows = sqlx::query_as::<_, FeatureWithCountRow>(
            r#"
            SELECT f.id, f.title, f.description, f.author_name, f.votes, f.created_at, f.updated_at,
                   (SELECT COUNT(*) FROM votes v WHERE v.feature_id = f.id) AS vote_count
            FROM features f
            ORDER BY f.votes DESC, f.created_at DESC, f.id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(FeatureWithCount::from).collect())
    }

    pub async fn get_feature(&self, id: i64) -> Result<Option<FeatureWithCount>, StoreError> {
        let row = sqlx::query_as::<_, FeatureWithCountRow>(
            r#"
            SELECT f.id, f.title, f.description, f.author_name, f.votes, f.created_at, f.updated_at,
                   (SELECT COUNT(*) FROM votes v WHERE v.feature_id = f.id) AS vote_count
            FROM features f
            WHERE f.id = ?1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(FeatureWithCount::from))
    }

    pub async fn feature_exists(&self, id: i64) -> Result<bool, StoreError> {
        let found = sqlx::query_scalar::<_, i64>("SELECT 1 FROM features WHERE id = ?1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(found.is_some())
    }

    pub async fn create_feature(&self, new: &NewFeature) -> Result<Feature, StoreError> {
        let now = timestamp_now();
        let sql = format!(
            r#"
            INSERT INTO features (title, description, author_name, votes, created_at, updated_at)
            VALUES (?1, ?2, ?3, 0, ?4, ?4)
            RETURNING {FEATURE_COLUMNS}
            "#
        );
        let row = sqlx::query_as::<_, FeatureRow>(&sql)
            .bind(&new.title)
            .bind(new.description.as_deref())
            .bind(&new.author_name)
            .bind(&now)
            .fetch_one(&self.pool)
            .await?;
        Ok(row.into())
    }

    pub async fn votes_for_feature(&self, feature_id: i64) -> Result<Vec<Vote>, StoreError> {
        let rows = sqlx::query_as::<_, VoteRow>(
            "SELECT id, feature_id, voter_ip, created_at FROM votes WHERE feature_id = ?1 ORDER BY id",
        )
        .bind(feature_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|row| Vote {
                id: row.id,
                feature_id: row.feature_id,
                voter_ip: row.voter_ip,
                created_at: row.created_at,
            })
            .collect())
    }
}

/// Fixed-width RFC 3339 so that text ordering in SQL matches time ordering.
pub(crate) fn timestamp_now() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_unique_violation(),
        _ => false,
    }
}

pub(crate) fn is_foreign_key_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db_err) => db_err.is_foreign_key_violation(),
        _ => false,
    }
}
