//! Maintenance-window config loader, shaped after `reticulumd`'s
//! `DaemonConfig::from_path`: read, parse, validate, fall back — never fail.

use std::path::Path;

/// Accepted range for `maintenance_ms`: 30 s .. 30 d.
pub const MAINTENANCE_MS_MIN: u64 = 30_000;
pub const MAINTENANCE_MS_MAX: u64 = 2_592_000_000;
/// Fallback used on any missing file, parse failure, or out-of-range value.
pub const MAINTENANCE_MS_DEFAULT: u64 = 2_592_000_000;

/// The daemon's self-restart window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MaintenanceConfig {
    pub maintenance_ms: u64,
}

impl MaintenanceConfig {
    /// Reads one decimal integer from `path`. Any error (missing file,
    /// unparseable contents, out-of-range value) is logged once and
    /// answered with the 30-day default; this never returns `Err`.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();
        match std::fs::read_to_string(path) {
            Ok(contents) => Self::from_str(&contents),
            Err(err) => {
                log::warn!(
                    "config: could not read {} ({err}); using {MAINTENANCE_MS_DEFAULT}ms default",
                    path.display()
                );
                Self { maintenance_ms: MAINTENANCE_MS_DEFAULT }
            }
        }
    }

    fn from_str(contents: &str) -> Self {
        match contents.trim().parse::<u64>() {
            Ok(ms) if (MAINTENANCE_MS_MIN..=MAINTENANCE_MS_MAX).contains(&ms) => {
                Self { maintenance_ms: ms }
            }
            Ok(ms) => {
                log::warn!(
                    "config: maintenance_ms {ms} out of range [{MAINTENANCE_MS_MIN}, {MAINTENANCE_MS_MAX}]; using {MAINTENANCE_MS_DEFAULT}ms default"
                );
                Self { maintenance_ms: MAINTENANCE_MS_DEFAULT }
            }
            Err(err) => {
                log::warn!(
                    "config: could not parse maintenance_ms ({err}); using {MAINTENANCE_MS_DEFAULT}ms default"
                );
                Self { maintenance_ms: MAINTENANCE_MS_DEFAULT }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_lower_boundary() {
        let cfg = MaintenanceConfig::from_str("30000");
        assert_eq!(cfg.maintenance_ms, 30_000);
    }

    #[test]
    fn rejects_just_below_lower_boundary() {
        let cfg = MaintenanceConfig::from_str("29999");
        assert_eq!(cfg.maintenance_ms, MAINTENANCE_MS_DEFAULT);
    }

    #[test]
    fn rejects_just_above_upper_boundary() {
        let cfg = MaintenanceConfig::from_str("2592000001");
        assert_eq!(cfg.maintenance_ms, MAINTENANCE_MS_DEFAULT);
    }

    #[test]
    fn falls_back_on_garbage() {
        let cfg = MaintenanceConfig::from_str("not a number");
        assert_eq!(cfg.maintenance_ms, MAINTENANCE_MS_DEFAULT);
    }

    #[test]
    fn falls_back_on_missing_file() {
        let cfg = MaintenanceConfig::from_path("/nonexistent/path/bleserver.config");
        assert_eq!(cfg.maintenance_ms, MAINTENANCE_MS_DEFAULT);
    }

    #[test]
    fn accepts_value_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bleserver.config");
        std::fs::write(&path, "60000\n").unwrap();
        let cfg = MaintenanceConfig::from_path(&path);
        assert_eq!(cfg.maintenance_ms, 60_000);
    }
}
