pub mod scanner;

pub use scanner::{ModuleReport, ScanReport, Scanner};
