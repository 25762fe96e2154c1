//! Declarative macros shared across the lockprobe agent

/// Define a metric enum with automatic `name()` and `all()` implementations
///
/// # Example
/// ```
/// use lockprobe::metric_enum;
///
/// metric_enum! {
///     pub enum ScanMetric {
///         ModuleResult => "lockprobe_module_result",
///         ScanDuration => "lockprobe_scan_duration_seconds",
///     }
/// }
///
/// let metric = ScanMetric::ScanDuration;
/// assert_eq!(metric.name(), "lockprobe_scan_duration_seconds");
/// assert_eq!(ScanMetric::all().len(), 2);
/// ```
#[macro_export]
macro_rules! metric_enum {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident {
            $($variant:ident => $str:literal),* $(,)?
        }
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }
    };
}

/// Define an enum with name() and all() methods, plus custom data per variant
///
/// # Example
/// ```
/// use lockprobe::enum_with_data;
///
/// enum_with_data! {
///     pub enum Verdict: u8 {
///         Good => ("GOOD", 0),
///         Bad => ("BAD", 2),
///     }
///     impl severity -> u8
/// }
///
/// assert_eq!(Verdict::Bad.name(), "BAD");
/// assert_eq!(Verdict::Bad.severity(), 2);
/// ```
#[macro_export]
macro_rules! enum_with_data {
    (
        $(#[$meta:meta])*
        $vis:vis enum $name:ident: $data_type:ty {
            $($variant:ident => ($str:literal, $data:expr)),* $(,)?
        }
        impl $method:ident -> $return_type:ty
    ) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        $vis enum $name {
            $($variant,)*
        }

        impl $name {
            pub fn name(&self) -> &'static str {
                match self {
                    $($name::$variant => $str,)*
                }
            }

            pub fn $method(&self) -> $return_type {
                match self {
                    $($name::$variant => $data,)*
                }
            }

            pub fn all() -> Vec<$name> {
                vec![$($name::$variant,)*]
            }
        }
    };
}

/// Encode an exporter's registry into a text exposition buffer
///
/// # Example
/// ```ignore
/// // In main.rs metrics handler
/// let mut buffer = Vec::new();
/// gather_metrics!(buffer, encoder, state.exporter, "scan");
/// ```
#[macro_export]
macro_rules! gather_metrics {
    ($buffer:expr, $encoder:expr, $exporter:expr, $name:literal) => {
        if let Some(ref exporter) = $exporter {
            let metric_families = exporter.registry().gather();
            if let Err(e) = $encoder.encode(&metric_families, &mut $buffer) {
                tracing::error!(concat!("Failed to encode ", $name, " metrics: {}"), e);
            }
        }
    };
}
