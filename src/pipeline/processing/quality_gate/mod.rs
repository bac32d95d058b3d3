use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::QualityConfig;
use crate::domain::{ConsolidatedDataset, RowId};
use crate::error::Result;

pub mod gates;

use self::gates::Gate;

/// Finite outcome of one gate; ordered from best to worst
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateStatus {
    Pass,
    Warn,
    Fail,
}

impl fmt::Display for GateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            GateStatus::Pass => "PASS",
            GateStatus::Warn => "WARN",
            GateStatus::Fail => "FAIL",
        };
        f.write_str(s)
    }
}

/// The eight validation gates, in report order
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GateName {
    DateIntegrity,
    NavSanity,
    IsinFormat,
    TypeCasting,
    OutlierDetection,
    CoverageAnalysis,
    BusinessLogic,
    CrossFundValidation,
}

impl GateName {
    pub fn as_str(&self) -> &'static str {
        match self {
            GateName::DateIntegrity => "date_integrity",
            GateName::NavSanity => "nav_sanity",
            GateName::IsinFormat => "isin_format",
            GateName::TypeCasting => "type_casting",
            GateName::OutlierDetection => "outlier_detection",
            GateName::CoverageAnalysis => "coverage_analysis",
            GateName::BusinessLogic => "business_logic",
            GateName::CrossFundValidation => "cross_fund_validation",
        }
    }
}

impl fmt::Display for GateName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One gate's outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityGateResult {
    pub gate_name: GateName,
    pub status: GateStatus,
    /// 0 to 100
    pub score: f64,
    /// Finding key -> description
    pub details: BTreeMap<String, String>,
    pub affected_rows: BTreeSet<RowId>,
}

/// A single observation made by a gate
#[derive(Debug, Clone)]
pub struct Finding {
    pub key: String,
    pub description: String,
    /// `Pass` marks an informational entry
    pub severity: GateStatus,
    pub rows: Vec<RowId>,
}

impl Finding {
    pub fn new(key: impl Into<String>, description: impl Into<String>, severity: GateStatus) -> Self {
        Self {
            key: key.into(),
            description: description.into(),
            severity,
            rows: Vec::new(),
        }
    }

    pub fn for_row(row: &RowId, description: impl Into<String>, severity: GateStatus) -> Self {
        Self {
            key: row.to_string(),
            description: description.into(),
            severity,
            rows: vec![row.clone()],
        }
    }

    pub fn with_rows(mut self, rows: impl IntoIterator<Item = RowId>) -> Self {
        self.rows.extend(rows);
        self
    }
}

/// How a gate turns findings into a score
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Scoring {
    /// `100 * (1 - affected / total)`
    RowLevel { total_rows: usize },
    /// 100 unless the gate failed
    DatasetLevel,
}

impl QualityGateResult {
    pub fn from_findings(gate_name: GateName, scoring: Scoring, findings: Vec<Finding>) -> Self {
        let status = findings
            .iter()
            .map(|f| f.severity)
            .max()
            .unwrap_or(GateStatus::Pass);

        let mut details = BTreeMap::new();
        let mut affected_rows = BTreeSet::new();
        for finding in findings {
            if finding.severity > GateStatus::Pass {
                affected_rows.extend(finding.rows);
            }
            details.insert(finding.key, finding.description);
        }

        let score = match scoring {
            Scoring::RowLevel { total_rows: 0 } => 100.0,
            Scoring::RowLevel { total_rows } => {
                let affected = affected_rows.len().min(total_rows);
                100.0 * (1.0 - affected as f64 / total_rows as f64)
            }
            Scoring::DatasetLevel if status == GateStatus::Fail => 0.0,
            Scoring::DatasetLevel => 100.0,
        };

        Self {
            gate_name,
            status,
            score,
            details,
            affected_rows,
        }
    }
}

/// Immutable outcome of all gates for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QualityReport {
    pub run_id: Uuid,
    pub generated_at: DateTime<Utc>,
    pub schema_version: String,
    pub as_of_date: NaiveDate,
    pub total_rows: usize,
    pub gates: BTreeMap<GateName, QualityGateResult>,
    /// Mean of the gate scores
    pub overall_score: f64,
    /// Worst gate status
    pub overall_status: GateStatus,
}

impl QualityReport {
    pub fn gate(&self, name: GateName) -> Option<&QualityGateResult> {
        self.gates.get(&name)
    }

    pub fn has_failures(&self) -> bool {
        self.overall_status == GateStatus::Fail
    }

    pub fn failed_gates(&self) -> Vec<GateName> {
        self.gates
            .values()
            .filter(|g| g.status == GateStatus::Fail)
            .map(|g| g.gate_name)
            .collect()
    }
}

/// Runs every gate over a consolidated dataset. Gates only observe; they
/// never remove or alter rows.
pub struct QualityGateEngine {
    gates: Vec<Box<dyn Gate>>,
}

impl QualityGateEngine {
    pub fn from_config(config: &QualityConfig) -> Result<Self> {
        Ok(Self {
            gates: gates::default_gates(config)?,
        })
    }

    pub fn evaluate(&self, dataset: &ConsolidatedDataset) -> QualityReport {
        let gates: BTreeMap<GateName, QualityGateResult> = self
            .gates
            .iter()
            .map(|gate| {
                let result = gate.evaluate(dataset);
                (result.gate_name, result)
            })
            .collect();

        let overall_score = if gates.is_empty() {
            100.0
        } else {
            gates.values().map(|g| g.score).sum::<f64>() / gates.len() as f64
        };
        let overall_status = gates
            .values()
            .map(|g| g.status)
            .max()
            .unwrap_or(GateStatus::Pass);

        QualityReport {
            run_id: Uuid::new_v4(),
            generated_at: Utc::now(),
            schema_version: dataset.schema_version.clone(),
            as_of_date: dataset.as_of_date,
            total_rows: dataset.len(),
            gates,
            overall_score,
            overall_status,
        }
    }
}
