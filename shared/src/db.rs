//! Postgres access for the three tables the enrichment job and the dashboard
//! read and write: `network_reports`, `analysis_results` and `providers`.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration};
use tokio_postgres::{Client, NoTls, Row};
use tracing::{debug, error, info, warn};

use crate::dto::{NetworkReport, OverallStats, ProviderStats, ReportAnalysis};
use crate::error::{AppError, Result};

/// Write side used by the enrichment pipeline.
#[async_trait]
pub trait ReportStore: Send + Sync {
    /// Reports whose analysis row is missing or has no sentiment score,
    /// created within the last `window_minutes`, oldest first.
    async fn fetch_candidates(&self, window_minutes: i32) -> Result<Vec<NetworkReport>>;

    /// Upsert the analysis row and mirror both scores into the report.
    /// Either both writes land or neither does.
    async fn save_analysis(&self, report_id: i32, analysis: &ReportAnalysis) -> Result<()>;
}

/// Read side used by the dashboard.
#[async_trait]
pub trait StatsSource: Send + Sync {
    async fn overall_stats(&self) -> Result<OverallStats>;
    async fn provider_stats(&self) -> Result<Vec<ProviderStats>>;
}

/// Hands out a store for one enrichment run. The store, and with it any
/// connection it holds, is dropped when the run ends.
#[async_trait]
pub trait StoreProvider: Send + Sync {
    async fn open(&self) -> Result<Arc<dyn ReportStore>>;
}

/// Opens a fresh Postgres connection per run.
pub struct PgStoreProvider {
    database_url: String,
}

impl PgStoreProvider {
    pub fn new(database_url: impl Into<String>) -> Self {
        Self {
            database_url: database_url.into(),
        }
    }
}

#[async_trait]
impl StoreProvider for PgStoreProvider {
    async fn open(&self) -> Result<Arc<dyn ReportStore>> {
        let store = PgStore::connect(&self.database_url).await.map_err(|e| {
            error!(%e, "opening database connection failed");
            e
        })?;
        let store: Arc<dyn ReportStore> = Arc::new(store);
        Ok(store)
    }
}

const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS providers ( \
        id SERIAL PRIMARY KEY, \
        name TEXT NOT NULL \
    )",
    "CREATE TABLE IF NOT EXISTS network_reports ( \
        id SERIAL PRIMARY KEY, \
        comment TEXT, \
        download_speed DOUBLE PRECISION NOT NULL DEFAULT 0, \
        upload_speed DOUBLE PRECISION NOT NULL DEFAULT 0, \
        created_at TIMESTAMPTZ NOT NULL DEFAULT now(), \
        provider_id INTEGER REFERENCES providers(id), \
        sentiment_score DOUBLE PRECISION, \
        network_quality_score DOUBLE PRECISION \
    )",
    "CREATE TABLE IF NOT EXISTS analysis_results ( \
        report_id INTEGER PRIMARY KEY REFERENCES network_reports(id), \
        sentiment_score DOUBLE PRECISION, \
        quality_score DOUBLE PRECISION, \
        sentiment_aspects JSONB, \
        analysis_details JSONB, \
        updated_at TIMESTAMPTZ \
    )",
];

/// Create the tables if they are missing. Existing tables are left alone.
pub async fn ensure_schema(db: &Client) -> Result<()> {
    for stmt in SCHEMA {
        db.execute(*stmt, &[]).await?;
    }
    info!("database schema ensured");
    Ok(())
}

fn want_tls(database_url: &str) -> bool {
    let q = match database_url.splitn(2, '?').nth(1) {
        Some(q) => q,
        None => return true,
    };
    for pair in q.split('&') {
        let mut it = pair.splitn(2, '=');
        let k = it.next().unwrap_or("");
        let v = it.next().unwrap_or("");
        if k.eq_ignore_ascii_case("sslmode") {
            return !v.eq_ignore_ascii_case("disable");
        }
    }
    true
}

/// Open a single connection, TLS unless the URL says `sslmode=disable`.
///
/// The connection task ends once the returned client is dropped.
pub async fn connect(database_url: &str) -> Result<Client> {
    if want_tls(database_url) {
        let tls = native_tls::TlsConnector::builder()
            .build()
            .map_err(|e| AppError::Database(format!("building TLS connector failed: {e}")))?;
        let tls = postgres_native_tls::MakeTlsConnector::new(tls);
        let (client, connection) = tokio_postgres::connect(database_url, tls).await?;
        tokio::spawn(async move {
            if let Err(e) = connection.await {
                error!(%e, "postgres connection task ended with error (TLS)");
            }
        });
        debug!("connected to PostgreSQL (TLS)");
        return Ok(client);
    }

    let (client, connection) = tokio_postgres::connect(database_url, NoTls).await?;
    tokio::spawn(async move {
        if let Err(e) = connection.await {
            error!(%e, "postgres connection task ended with error (NoTLS)");
        }
    });
    debug!("connected to PostgreSQL (NoTLS)");
    Ok(client)
}

/// Keep trying [`connect`] with a linear backoff capped at ten seconds.
pub async fn connect_with_retry(database_url: &str) -> Client {
    let mut backoff = 1u64;
    loop {
        match connect(database_url).await {
            Ok(client) => {
                info!("Connected to PostgreSQL.");
                return client;
            }
            Err(e) => {
                warn!(%e, retry_in = backoff, "DB connect failed");
                sleep(Duration::from_secs(backoff)).await;
                backoff = (backoff + 1).min(10);
            }
        }
    }
}

pub struct PgStore {
    client: Mutex<Client>,
}

impl PgStore {
    pub fn new(client: Client) -> Self {
        Self {
            client: Mutex::new(client),
        }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        Ok(Self::new(connect(database_url).await?))
    }
}

fn row_to_report(r: &Row) -> NetworkReport {
    NetworkReport {
        id: r.get(0),
        comment: r.get(1),
        download_speed: r.get(2),
        upload_speed: r.get(3),
        created_at: r.get(4),
        provider_id: r.get(5),
    }
}

#[async_trait]
impl ReportStore for PgStore {
    async fn fetch_candidates(&self, window_minutes: i32) -> Result<Vec<NetworkReport>> {
        let db = self.client.lock().await;
        let rows = db
            .query(
                "SELECT r.id, COALESCE(r.comment, ''), r.download_speed, r.upload_speed, \
                        r.created_at, r.provider_id \
                 FROM network_reports r \
                 LEFT JOIN analysis_results a ON r.id = a.report_id \
                 WHERE a.sentiment_score IS NULL \
                   AND r.created_at >= now() - make_interval(mins => $1) \
                 ORDER BY r.created_at, r.id",
                &[&window_minutes],
            )
            .await?;
        Ok(rows.iter().map(row_to_report).collect())
    }

    async fn save_analysis(&self, report_id: i32, analysis: &ReportAnalysis) -> Result<()> {
        let aspects = serde_json::to_value(&analysis.sentiment_aspects)
            .map_err(|e| AppError::Io(e.to_string()))?;

        let mut db = self.client.lock().await;
        let tx = db.transaction().await?;
        tx.execute(
            "INSERT INTO analysis_results \
               (report_id, sentiment_score, quality_score, sentiment_aspects, analysis_details, updated_at) \
             VALUES ($1, $2, $3, $4, $5, now()) \
             ON CONFLICT (report_id) DO UPDATE SET \
               sentiment_score = EXCLUDED.sentiment_score, \
               quality_score = EXCLUDED.quality_score, \
               sentiment_aspects = EXCLUDED.sentiment_aspects, \
               analysis_details = EXCLUDED.analysis_details, \
               updated_at = EXCLUDED.updated_at",
            &[
                &report_id,
                &analysis.sentiment_score,
                &analysis.quality_score,
                &aspects,
                &analysis.details,
            ],
        )
        .await?;
        let updated = tx
            .execute(
                "UPDATE network_reports \
                 SET sentiment_score = $2, network_quality_score = $3 \
                 WHERE id = $1",
                &[&report_id, &analysis.sentiment_score, &analysis.quality_score],
            )
            .await?;
        if updated != 1 {
            // dropping the transaction rolls back the analysis row too
            return Err(AppError::NotFound(format!("network report {report_id}")));
        }
        tx.commit().await?;
        Ok(())
    }
}

#[async_trait]
impl StatsSource for PgStore {
    async fn overall_stats(&self) -> Result<OverallStats> {
        let db = self.client.lock().await;
        let row = db
            .query_one(
                "SELECT COUNT(nr.id), \
                        COUNT(nr.sentiment_score), \
                        AVG(nr.sentiment_score), \
                        AVG(nr.network_quality_score), \
                        MAX(ar.updated_at) \
                 FROM network_reports nr \
                 LEFT JOIN analysis_results ar ON nr.id = ar.report_id",
                &[],
            )
            .await?;
        Ok(OverallStats {
            total_reports: row.get(0),
            analyzed_reports: row.get(1),
            avg_sentiment: row.get(2),
            avg_quality: row.get(3),
            last_analysis: row.get(4),
        })
    }

    async fn provider_stats(&self) -> Result<Vec<ProviderStats>> {
        let db = self.client.lock().await;
        let rows = db
            .query(
                "SELECT p.name, COUNT(*) AS report_count, \
                        AVG(r.sentiment_score), AVG(r.network_quality_score) \
                 FROM network_reports r \
                 JOIN providers p ON r.provider_id = p.id \
                 GROUP BY p.id, p.name \
                 ORDER BY report_count DESC, p.name",
                &[],
            )
            .await?;
        Ok(rows
            .into_iter()
            .map(|r| ProviderStats {
                provider_name: r.get(0),
                report_count: r.get(1),
                avg_sentiment: r.get(2),
                avg_quality: r.get(3),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tls_follows_sslmode() {
        assert!(want_tls("postgres://u@h/db"));
        assert!(want_tls("postgres://u@h/db?sslmode=require"));
        assert!(!want_tls("postgres://u@h/db?application_name=x&sslmode=DISABLE"));
    }
}
