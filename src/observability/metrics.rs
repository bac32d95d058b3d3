//! Metrics for the holdings pipeline
//!
//! Every stage records through the small per-stage modules below, using
//! standard Prometheus naming. The recorder is process-global; call
//! [`init`] once at startup and [`render`] to obtain the exposition text.

use std::fmt;
use std::sync::OnceLock;

use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use tracing::info;

/// Enum representing all metric names used in the pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MetricName {
    // Normalize metrics
    NormalizeRowsNormalized,
    NormalizeRowsMalformed,
    NormalizeRowsSkipped,
    NormalizeSourcesCompleted,
    NormalizeSourcesFailed,
    NormalizeSourceDuration,

    // Consolidate metrics
    ConsolidateHoldings,
    ConsolidateDuplicatesDetected,
    ConsolidateSharedIsins,

    // Quality Gate metrics
    QualityGateEvaluated,
    QualityGateScore,
    QualityGateOverallScore,
    QualityGateAffectedRows,

    // Output metrics
    OutputRecordsWritten,
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::NormalizeRowsNormalized => "holdings_normalize_rows_normalized_total",
            MetricName::NormalizeRowsMalformed => "holdings_normalize_rows_malformed_total",
            MetricName::NormalizeRowsSkipped => "holdings_normalize_rows_skipped_total",
            MetricName::NormalizeSourcesCompleted => "holdings_normalize_sources_completed_total",
            MetricName::NormalizeSourcesFailed => "holdings_normalize_sources_failed_total",
            MetricName::NormalizeSourceDuration => "holdings_normalize_source_duration_seconds",

            MetricName::ConsolidateHoldings => "holdings_consolidate_holdings",
            MetricName::ConsolidateDuplicatesDetected => "holdings_consolidate_duplicates_detected_total",
            MetricName::ConsolidateSharedIsins => "holdings_consolidate_shared_isins",

            MetricName::QualityGateEvaluated => "holdings_quality_gate_evaluated_total",
            MetricName::QualityGateScore => "holdings_quality_gate_score",
            MetricName::QualityGateOverallScore => "holdings_quality_gate_overall_score",
            MetricName::QualityGateAffectedRows => "holdings_quality_gate_affected_rows",

            MetricName::OutputRecordsWritten => "holdings_output_records_written_total",
        }
    }

    pub fn all_metrics() -> impl Iterator<Item = MetricName> {
        use MetricName::*;
        [
            NormalizeRowsNormalized,
            NormalizeRowsMalformed,
            NormalizeRowsSkipped,
            NormalizeSourcesCompleted,
            NormalizeSourcesFailed,
            NormalizeSourceDuration,
            ConsolidateHoldings,
            ConsolidateDuplicatesDetected,
            ConsolidateSharedIsins,
            QualityGateEvaluated,
            QualityGateScore,
            QualityGateOverallScore,
            QualityGateAffectedRows,
            OutputRecordsWritten,
        ]
        .into_iter()
    }

    /// Returns (phase, description, unit)
    pub fn metadata(&self) -> (&'static str, &'static str, Option<&'static str>) {
        match self {
            MetricName::NormalizeRowsNormalized => ("normalize", "Rows normalized into holdings", None),
            MetricName::NormalizeRowsMalformed => ("normalize", "Rows dropped as malformed", None),
            MetricName::NormalizeRowsSkipped => ("normalize", "Blank and summary rows skipped", None),
            MetricName::NormalizeSourcesCompleted => ("normalize", "Sources extracted", None),
            MetricName::NormalizeSourcesFailed => ("normalize", "Sources that failed extraction", None),
            MetricName::NormalizeSourceDuration => ("normalize", "Per-source extraction duration", Some("s")),

            MetricName::ConsolidateHoldings => ("consolidate", "Holdings in the consolidated dataset", None),
            MetricName::ConsolidateDuplicatesDetected => ("consolidate", "Within-source duplicate ISINs", None),
            MetricName::ConsolidateSharedIsins => ("consolidate", "ISINs held by more than one fund", None),

            MetricName::QualityGateEvaluated => ("quality_gate", "Gate evaluations by status", None),
            MetricName::QualityGateScore => ("quality_gate", "Per-gate score", None),
            MetricName::QualityGateOverallScore => ("quality_gate", "Mean score across gates", None),
            MetricName::QualityGateAffectedRows => ("quality_gate", "Rows affected per gate", None),

            MetricName::OutputRecordsWritten => ("output", "Records written by output adapters", None),
        }
    }
}

static METRICS_HANDLE: OnceLock<Result<PrometheusHandle, String>> = OnceLock::new();

/// Install the Prometheus recorder. The first call installs it; later or
/// concurrent calls share that outcome.
pub fn init() -> Result<(), Box<dyn std::error::Error>> {
    let installed = METRICS_HANDLE.get_or_init(|| {
        let handle = PrometheusBuilder::new()
            .install_recorder()
            .map_err(|e| format!("Failed to install Prometheus recorder: {}", e))?;
        describe_all();
        info!("Metrics system initialized");
        Ok(handle)
    });

    match installed {
        Ok(_) => Ok(()),
        Err(e) => Err(e.clone().into()),
    }
}

/// Prometheus exposition text, if the recorder is installed
pub fn render() -> Option<String> {
    METRICS_HANDLE
        .get()
        .and_then(|installed| installed.as_ref().ok())
        .map(|handle| handle.render())
}

fn describe_all() {
    for metric in MetricName::all_metrics() {
        let (_, description, _) = metric.metadata();
        let name = metric.as_str();
        if name.ends_with("_total") {
            ::metrics::describe_counter!(name, description);
        } else if name.ends_with("_seconds") || name.ends_with("_score") || name.ends_with("_rows") {
            ::metrics::describe_histogram!(name, description);
        } else {
            ::metrics::describe_gauge!(name, description);
        }
    }
}

// ============================================================================
// Normalize Metrics
// ============================================================================

pub mod normalize {
    use super::MetricName;

    pub fn rows_normalized(source_id: &str, count: usize) {
        ::metrics::counter!(MetricName::NormalizeRowsNormalized.as_str(), "source" => source_id.to_string())
            .increment(count as u64);
    }

    pub fn rows_malformed(source_id: &str, count: usize) {
        ::metrics::counter!(MetricName::NormalizeRowsMalformed.as_str(), "source" => source_id.to_string())
            .increment(count as u64);
    }

    pub fn rows_skipped(source_id: &str, count: usize) {
        ::metrics::counter!(MetricName::NormalizeRowsSkipped.as_str(), "source" => source_id.to_string())
            .increment(count as u64);
    }

    pub fn source_completed(source_id: &str, secs: f64) {
        ::metrics::counter!(MetricName::NormalizeSourcesCompleted.as_str(), "source" => source_id.to_string())
            .increment(1);
        ::metrics::histogram!(MetricName::NormalizeSourceDuration.as_str(), "source" => source_id.to_string())
            .record(secs);
    }

    /// Record a source that produced no holdings because extraction failed
    pub fn source_failed(source_id: &str) {
        ::metrics::counter!(MetricName::NormalizeSourcesFailed.as_str(), "source" => source_id.to_string())
            .increment(1);
    }
}

// ============================================================================
// Consolidate Metrics
// ============================================================================

pub mod consolidate {
    use super::MetricName;

    pub fn dataset_built(holdings: usize, shared_isins: usize) {
        ::metrics::gauge!(MetricName::ConsolidateHoldings.as_str()).set(holdings as f64);
        ::metrics::gauge!(MetricName::ConsolidateSharedIsins.as_str()).set(shared_isins as f64);
    }

    pub fn duplicates_detected(count: usize) {
        ::metrics::counter!(MetricName::ConsolidateDuplicatesDetected.as_str()).increment(count as u64);
    }
}

// ============================================================================
// Quality Gate Metrics
// ============================================================================

pub mod quality_gate {
    use super::MetricName;

    /// Record one gate's outcome
    pub fn gate_evaluated(gate: &str, status: &str, score: f64, affected_rows: usize) {
        ::metrics::counter!(MetricName::QualityGateEvaluated.as_str(),
            "gate" => gate.to_string(),
            "status" => status.to_string()
        )
        .increment(1);
        ::metrics::histogram!(MetricName::QualityGateScore.as_str(), "gate" => gate.to_string()).record(score);
        ::metrics::histogram!(MetricName::QualityGateAffectedRows.as_str(), "gate" => gate.to_string())
            .record(affected_rows as f64);
    }

    pub fn overall_score_recorded(score: f64) {
        ::metrics::histogram!(MetricName::QualityGateOverallScore.as_str()).record(score);
    }
}

// ============================================================================
// Output Metrics
// ============================================================================

pub mod output {
    use super::MetricName;

    pub fn records_written(artifact: &str, count: usize) {
        ::metrics::counter!(MetricName::OutputRecordsWritten.as_str(), "artifact" => artifact.to_string())
            .increment(count as u64);
    }
}
