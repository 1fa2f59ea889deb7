use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A report selected for enrichment.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetworkReport {
    pub id: i32,
    pub comment: String,
    /// Mbps
    pub download_speed: f64,
    /// Mbps
    pub upload_speed: f64,
    pub created_at: DateTime<Utc>,
    pub provider_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SentimentAspects {
    pub speed_satisfaction: f64,
    pub reliability_satisfaction: f64,
    pub value_satisfaction: f64,
    pub service_satisfaction: f64,
    pub aspects_analysis: String,
}

/// A model answer that passed validation.
///
/// `details` is the full parsed answer, including fields the model added on
/// its own; it is stored verbatim as `analysis_details`.
#[derive(Debug, Clone, PartialEq)]
pub struct ReportAnalysis {
    pub sentiment_score: f64,
    pub quality_score: f64,
    pub analysis: String,
    pub sentiment_aspects: SentimentAspects,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct OverallStats {
    pub total_reports: i64,
    pub analyzed_reports: i64,
    pub avg_sentiment: Option<f64>,
    pub avg_quality: Option<f64>,
    pub last_analysis: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ProviderStats {
    pub provider_name: String,
    pub report_count: i64,
    pub avg_sentiment: Option<f64>,
    pub avg_quality: Option<f64>,
}

#[derive(Debug, Serialize)]
pub struct ProviderStatsItem {
    #[serde(rename = "providerName")]
    pub provider_name: String,
    #[serde(rename = "reportCount")]
    pub report_count: i64,
    #[serde(rename = "avgSentiment")]
    pub avg_sentiment: f64,
    #[serde(rename = "avgQuality")]
    pub avg_quality: f64,
}

/// Dashboard payload for `GET /analysis-stats`.
#[derive(Debug, Serialize)]
pub struct AnalysisStats {
    #[serde(rename = "totalReports")]
    pub total_reports: i64,
    #[serde(rename = "analyzedReports")]
    pub analyzed_reports: i64,
    #[serde(rename = "lastAnalysisTime")]
    pub last_analysis_time: Option<DateTime<Utc>>,
    #[serde(rename = "averageSentiment")]
    pub average_sentiment: f64,
    #[serde(rename = "averageQuality")]
    pub average_quality: f64,
    #[serde(rename = "providerStats")]
    pub provider_stats: Vec<ProviderStatsItem>,
}
