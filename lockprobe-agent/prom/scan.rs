use prometheus::{Gauge, IntCounterVec, IntGaugeVec, Registry};
use std::sync::Arc;

use crate::checks::ModuleResult;
use crate::error::Result;
use crate::orchestrator::ScanReport;

metric_enum! {
    pub enum ScanMetric {
        ModuleResult => "lockprobe_module_result",
        ModuleResultsTotal => "lockprobe_module_results_total",
        ScanDuration => "lockprobe_scan_duration_seconds",
    }
}

pub struct ScanMetricExporter {
    registry: Arc<Registry>,
    module_result: IntGaugeVec,
    results_total: IntCounterVec,
    scan_duration: Gauge,
}

impl ScanMetricExporter {
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());

        let module_result = IntGaugeVec::new(
            prometheus::Opts::new(
                ScanMetric::ModuleResult.name(),
                "Latest verdict of each check module (1 for the reported result)",
            ),
            &["module", "result"],
        )?;
        let results_total = IntCounterVec::new(
            prometheus::Opts::new(
                ScanMetric::ModuleResultsTotal.name(),
                "Module verdicts reported since start, by result",
            ),
            &["result"],
        )?;
        let scan_duration = Gauge::with_opts(prometheus::Opts::new(
            ScanMetric::ScanDuration.name(),
            "Wall time of the last scan",
        ))?;

        registry.register(Box::new(module_result.clone()))?;
        registry.register(Box::new(results_total.clone()))?;
        registry.register(Box::new(scan_duration.clone()))?;

        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        Ok(Self {
            registry,
            module_result,
            results_total,
            scan_duration,
        })
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Publish the verdicts of `report`, replacing those of earlier scans
    pub fn record(&self, report: &ScanReport) {
        for module in &report.modules {
            for result in ModuleResult::all() {
                let value = i64::from(result == module.result);
                self.module_result
                    .with_label_values(&[module.name, result.name()])
                    .set(value);
            }
            self.results_total
                .with_label_values(&[module.result.name()])
                .inc();
        }
        self.scan_duration.set(report.duration.as_secs_f64());
        tracing::debug!("Recorded {} module verdicts", report.modules.len());
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use prometheus::{Encoder, TextEncoder};

    use super::*;
    use crate::orchestrator::ModuleReport;

    fn report() -> ScanReport {
        let module = |name, result| ModuleReport {
            name,
            description: "",
            result,
            error: None,
            duration: Duration::from_millis(1),
        };
        ScanReport {
            chipset: "cfl".to_string(),
            modules: vec![
                module("cf9_lock", ModuleResult::Passed),
                module("bios_wp", ModuleResult::Failed),
            ],
            duration: Duration::from_millis(250),
        }
    }

    #[test]
    fn test_metrics_registered() {
        let exporter = ScanMetricExporter::new().unwrap();
        exporter.record(&report());
        let names: Vec<String> = exporter
            .registry()
            .gather()
            .iter()
            .map(|family| family.get_name().to_string())
            .collect();
        for metric in ScanMetric::all() {
            assert!(names.iter().any(|n| n == metric.name()), "{}", metric.name());
        }
    }

    #[test]
    fn test_record_exposes_verdicts() {
        let exporter = ScanMetricExporter::new().unwrap();
        exporter.record(&report());
        exporter.record(&report());

        let mut buffer = Vec::new();
        TextEncoder::new()
            .encode(&exporter.registry().gather(), &mut buffer)
            .unwrap();
        let text = String::from_utf8(buffer).unwrap();

        assert!(text.contains(r#"lockprobe_module_result{module="cf9_lock",result="PASSED"} 1"#));
        assert!(text.contains(r#"lockprobe_module_result{module="cf9_lock",result="FAILED"} 0"#));
        assert!(text.contains(r#"lockprobe_module_results_total{result="FAILED"} 2"#));
        assert!(text.contains("lockprobe_scan_duration_seconds 0.25"));
    }
}
