use anyhow::Result;
use tracing::{info, warn};

use crate::app::ports::QualityReportOutputPort;
use crate::config::QualityConfig;
use crate::domain::ConsolidatedDataset;
use crate::pipeline::processing::quality_gate::{GateStatus, QualityGateEngine, QualityReport};

/// Use case for validating a consolidated dataset through every quality gate
pub struct QualityGateUseCase {
    engine: QualityGateEngine,
    output: Box<dyn QualityReportOutputPort>,
}

impl QualityGateUseCase {
    pub fn new(engine: QualityGateEngine, output: Box<dyn QualityReportOutputPort>) -> Self {
        Self { engine, output }
    }

    /// Create a use case with the default gate set
    pub fn from_config(config: &QualityConfig, output: Box<dyn QualityReportOutputPort>) -> Result<Self> {
        Ok(Self::new(QualityGateEngine::from_config(config)?, output))
    }

    /// Evaluate all gates and persist the report. Findings never fail the call.
    pub async fn assess(&self, dataset: &ConsolidatedDataset) -> Result<QualityReport> {
        let report = self.engine.evaluate(dataset);

        for gate in report.gates.values() {
            crate::observability::metrics::quality_gate::gate_evaluated(
                gate.gate_name.as_str(),
                &gate.status.to_string(),
                gate.score,
                gate.affected_rows.len(),
            );
            match gate.status {
                GateStatus::Pass => info!(gate = %gate.gate_name, score = gate.score, "Gate passed"),
                status => warn!(
                    gate = %gate.gate_name,
                    status = %status,
                    score = gate.score,
                    affected_rows = gate.affected_rows.len(),
                    "Gate raised findings"
                ),
            }
        }
        crate::observability::metrics::quality_gate::overall_score_recorded(report.overall_score);

        info!(
            "Quality report {}: overall {} with score {:.1}",
            report.run_id, report.overall_status, report.overall_score
        );

        self.output.write_quality_report(&report).await?;
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::processing::consolidate::tests::{extraction, holding};
    use crate::pipeline::processing::consolidate::Consolidator;
    use crate::pipeline::processing::quality_gate::GateName;
    use async_trait::async_trait;
    use chrono::NaiveDate;
    use std::sync::Arc;
    use tokio::sync::Mutex;

    struct MockQualityReportOutput {
        pub reports: Arc<Mutex<Vec<QualityReport>>>,
    }

    impl MockQualityReportOutput {
        pub fn new() -> Self {
            Self {
                reports: Arc::new(Mutex::new(Vec::new())),
            }
        }
    }

    #[async_trait]
    impl QualityReportOutputPort for MockQualityReportOutput {
        async fn write_quality_report(&self, report: &QualityReport) -> Result<()> {
            self.reports.lock().await.push(report.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_quality_gate_use_case() {
        let output = Box::new(MockQualityReportOutput::new());
        let reports = output.reports.clone();
        let use_case = QualityGateUseCase::from_config(&QualityConfig::default(), output).unwrap();

        let as_of = NaiveDate::from_ymd_opt(2025, 7, 31).unwrap();
        let mut good = holding("a", 2, "Fund A", "INE040A08146", 600.0);
        good.pct_to_nav = 0.6;
        let mut short = holding("a", 3, "Fund A", "INE040A0814", 400.0);
        short.pct_to_nav = 0.4;
        let dataset = Consolidator::consolidate(as_of, vec![extraction("a", vec![good, short])]);

        let report = use_case.assess(&dataset).await.unwrap();
        assert!(report.has_failures());
        assert_eq!(report.failed_gates(), vec![GateName::IsinFormat]);

        // gates observe only
        assert_eq!(dataset.len(), 2);

        let written = reports.lock().await;
        assert_eq!(written.len(), 1);
        assert_eq!(written[0].run_id, report.run_id);
    }
}
