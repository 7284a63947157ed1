use std::fs;
use std::path::{Path, PathBuf};

const POWER_SUPPLY_ROOT: &str = "/sys/class/power_supply";

/// Battery charge as a fraction in `0.0..=1.0`, when the host exposes one.
pub trait BatteryProbe: Send + Sync {
    fn charge_fraction(&self) -> Option<f64>;
}

/// Reads the first `type == Battery` entry under `/sys/class/power_supply`.
#[derive(Debug, Clone)]
pub struct SysfsBattery {
    root: PathBuf,
}

impl Default for SysfsBattery {
    fn default() -> Self {
        Self::with_root(POWER_SUPPLY_ROOT)
    }
}

impl SysfsBattery {
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl BatteryProbe for SysfsBattery {
    fn charge_fraction(&self) -> Option<f64> {
        let mut supplies = fs::read_dir(&self.root)
            .ok()?
            .filter_map(|entry| entry.ok().map(|entry| entry.path()))
            .collect::<Vec<_>>();
        supplies.sort();

        supplies
            .iter()
            .filter(|path| is_battery(path))
            .find_map(|path| read_capacity(path))
    }
}

fn is_battery(path: &Path) -> bool {
    fs::read_to_string(path.join("type"))
        .map(|kind| kind.trim().eq_ignore_ascii_case("battery"))
        .unwrap_or(false)
}

fn read_capacity(path: &Path) -> Option<f64> {
    fs::read_to_string(path.join("capacity"))
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|percent| (0.0..=100.0).contains(percent))
        .map(|percent| percent / 100.0)
}

pub fn format_level(fraction: Option<f64>) -> String {
    fraction
        .filter(|value| value.is_finite())
        .map(|value| format!("{}%", (value.clamp(0.0, 1.0) * 100.0).round() as u8))
        .unwrap_or_else(|| crate::ledger::PLACEHOLDER.to_string())
}
