pub mod scan;

pub use scan::{ScanMetric, ScanMetricExporter};
