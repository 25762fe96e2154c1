// Scan orchestration
// Runs the selected check modules one after another against a single engine

use std::time::{Duration, Instant};

use crate::checks::{CheckModule, ModuleResult};
use crate::engine::RegisterEngine;
use crate::error::{LockprobeError, Result};

/// Result of one module in a scan
#[derive(Debug, Clone)]
pub struct ModuleReport {
    pub name: &'static str,
    pub description: &'static str,
    pub result: ModuleResult,
    /// Error that ended the module, when `result` is `Error` or `Skipped`
    pub error: Option<String>,
    pub duration: Duration,
}

#[derive(Debug, Clone)]
pub struct ScanReport {
    pub chipset: String,
    pub modules: Vec<ModuleReport>,
    pub duration: Duration,
}

impl ScanReport {
    /// Worst outcome among executed modules
    ///
    /// `Failed` outranks `Error`, which outranks `Warning`, which outranks
    /// `Passed`. A scan in which no module ran is `NotApplicable`.
    pub fn overall(&self) -> ModuleResult {
        self.modules
            .iter()
            .map(|m| m.result)
            .filter(|r| !matches!(r, ModuleResult::NotApplicable | ModuleResult::Skipped))
            .max_by_key(|r| r.severity())
            .unwrap_or(ModuleResult::NotApplicable)
    }

    pub fn count(&self, result: ModuleResult) -> usize {
        self.modules.iter().filter(|m| m.result == result).count()
    }

    pub fn log_summary(&self) {
        tracing::info!("[*] SUMMARY ({} on {:.2?})", self.chipset, self.duration);
        for result in ModuleResult::all() {
            let names: Vec<&str> = self
                .modules
                .iter()
                .filter(|m| m.result == result)
                .map(|m| m.name)
                .collect();
            if !names.is_empty() {
                tracing::info!("[*] {}: {} [{}]", result, names.len(), names.join(", "));
            }
        }
        tracing::info!("[*] Overall: {}", self.overall());
    }
}

pub struct Scanner {
    engine: RegisterEngine,
    modules: Vec<Box<dyn CheckModule>>,
}

impl Scanner {
    pub fn new(engine: RegisterEngine, modules: Vec<Box<dyn CheckModule>>) -> Self {
        Self { engine, modules }
    }

    /// Keep only the modules named in `names`; an empty list keeps all
    pub fn select(mut self, names: &[String]) -> Result<Self> {
        if names.is_empty() {
            return Ok(self);
        }
        for name in names {
            if !self.modules.iter().any(|m| m.name() == name) {
                return Err(LockprobeError::ConfigError(format!(
                    "Unknown module: {name}"
                )));
            }
        }
        self.modules
            .retain(|m| names.iter().any(|name| name == m.name()));
        Ok(self)
    }

    pub fn module_names(&self) -> Vec<&'static str> {
        self.modules.iter().map(|m| m.name()).collect()
    }

    fn run_module(&self, module: &dyn CheckModule) -> ModuleReport {
        let start = Instant::now();
        tracing::info!("[+] {}: {}", module.name(), module.description());

        let (result, error) = if !module.is_supported(&self.engine) {
            tracing::info!("Skipping module {} since it is not supported", module.name());
            (ModuleResult::NotApplicable, None)
        } else {
            match module.run(&self.engine) {
                Ok(result) => (result, None),
                Err(LockprobeError::Unsupported(what)) => {
                    tracing::warn!("{}: {} is not available on this backend", module.name(), what);
                    (ModuleResult::Skipped, Some(format!("{what} not supported")))
                }
                Err(e) => {
                    tracing::error!("{}: {}", module.name(), e);
                    (ModuleResult::Error, Some(e.to_string()))
                }
            }
        };

        tracing::info!("[-] {}: {}", module.name(), result);
        ModuleReport {
            name: module.name(),
            description: module.description(),
            result,
            error,
            duration: start.elapsed(),
        }
    }

    /// Run every selected module in order
    ///
    /// A module error is recorded against that module; it never aborts the
    /// remaining modules.
    pub fn scan(&self) -> ScanReport {
        let start = Instant::now();
        tracing::info!(
            "Running {} module(s) on {}",
            self.modules.len(),
            self.engine.chipset_code()
        );
        let modules = self
            .modules
            .iter()
            .map(|module| self.run_module(module.as_ref()))
            .collect();
        ScanReport {
            chipset: self.engine.chipset_code().to_string(),
            modules,
            duration: start.elapsed(),
        }
    }
}
