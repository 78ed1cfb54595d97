//! Startup configuration.
//!
//! A single JSON document consulted once at startup. The file has grown
//! organically, so unknown fields anywhere are ignored; only the keys the
//! core consumes are modeled here, everything else falls back to a
//! default.

use std::path::{Path, PathBuf};

use serde::Deserialize;

use slicehub_core::types::{Continent, StationProfile};
use slicehub_core::{Error, Result};

/// Which radio stack to run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperatingMode {
    /// Multi-slice SDR: radio backend + supervisor drive four channels.
    Flex,
    /// Single hard-coded channel without a radio backend.
    Standard,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct Config {
    pub mode: OperatingMode,
    pub station: StationConfig,
    pub flex: FlexConfig,
    pub wsjtx: WsjtxConfig,
    pub logbook: LogbookConfig,
    pub dashboard: DashboardConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            mode: OperatingMode::Flex,
            station: StationConfig::default(),
            flex: FlexConfig::default(),
            wsjtx: WsjtxConfig::default(),
            logbook: LogbookConfig::default(),
            dashboard: DashboardConfig::default(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct StationConfig {
    pub callsign: String,
    pub grid: String,
    pub continent: String,
    pub dxcc: String,
    pub prefixes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FlexConfig {
    /// Radio host; LAN discovery is out of scope.
    pub host: String,
    /// Base port for the per-channel HRD servers.
    pub cat_base_port: u16,
    /// Four Hz frequencies used to pre-tune slices on appearance.
    pub default_bands: Option<Vec<u64>>,
}

impl Default for FlexConfig {
    fn default() -> Self {
        FlexConfig {
            host: "localhost".to_string(),
            cat_base_port: slicehub_core::HRD_BASE_PORT,
            default_bands: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct WsjtxConfig {
    /// Decoder executable path.
    pub path: Option<PathBuf>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LogbookConfig {
    pub path: Option<PathBuf>,
    /// Whether to run the aggregate HRD server for external loggers.
    pub enable_hrd_server: bool,
    pub hrd_port: u16,
}

impl Default for LogbookConfig {
    fn default() -> Self {
        LogbookConfig {
            path: None,
            enable_hrd_server: true,
            hrd_port: slicehub_core::HRD_AGGREGATE_PORT,
        }
    }
}

/// Dashboard knobs; parsed for validation, unused by the core.
#[derive(Debug, Clone, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct DashboardConfig {
    pub station_lifetime_seconds: Option<u64>,
    pub snr_thresholds: Option<serde_json::Value>,
}

impl Config {
    /// Load and parse the config file. Any failure here is startup-fatal.
    pub fn load(path: impl AsRef<Path>) -> Result<Config> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::InvalidParameter(format!("cannot read {}: {e}", path.display())))?;
        serde_json::from_str(&content)
            .map_err(|e| Error::InvalidParameter(format!("invalid config {}: {e}", path.display())))
    }

    /// The station profile the enrichment and config generation consume.
    pub fn station_profile(&self) -> Result<StationProfile> {
        let continent: Continent = self
            .station
            .continent
            .parse()
            .map_err(|_| {
                Error::InvalidParameter(format!(
                    "invalid continent '{}' in station config",
                    self.station.continent
                ))
            })?;
        Ok(StationProfile {
            callsign: self.station.callsign.to_uppercase(),
            grid: self.station.grid.clone(),
            continent,
            dxcc: self.station.dxcc.to_uppercase(),
            prefixes: self.station.prefixes.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn full_document_parses() {
        let doc = r#"{
            "mode": "flex",
            "station": {
                "callsign": "hb9bla",
                "grid": "JN37VL",
                "continent": "EU",
                "dxcc": "HB9",
                "prefixes": ["HB9", "HB3"]
            },
            "flex": {
                "host": "192.168.1.20",
                "catBasePort": 7809,
                "defaultBands": [7074000, 14074000, 21074000, 28074000]
            },
            "wsjtx": { "path": "/usr/bin/wsjtx" },
            "logbook": { "path": "/tmp/log.adi", "enableHrdServer": true, "hrdPort": 7800 },
            "dashboard": { "stationLifetimeSeconds": 900, "snrThresholds": { "good": -10 } }
        }"#;
        let cfg: Config = serde_json::from_str(doc).unwrap();
        assert_eq!(cfg.mode, OperatingMode::Flex);
        assert_eq!(cfg.flex.host, "192.168.1.20");
        assert_eq!(
            cfg.flex.default_bands.as_deref(),
            Some(&[7_074_000, 14_074_000, 21_074_000, 28_074_000][..])
        );
        assert_eq!(cfg.logbook.hrd_port, 7800);

        let profile = cfg.station_profile().unwrap();
        assert_eq!(profile.callsign, "HB9BLA");
        assert_eq!(profile.continent, Continent::EU);
    }

    #[test]
    fn unknown_fields_are_ignored() {
        let doc = r#"{
            "mode": "standard",
            "station": { "callsign": "K1XYZ", "continent": "NA", "legacyKnob": 3 },
            "futureSection": { "x": 1 }
        }"#;
        let cfg: Config = serde_json::from_str(doc).unwrap();
        assert_eq!(cfg.mode, OperatingMode::Standard);
        assert_eq!(cfg.station.callsign, "K1XYZ");
    }

    #[test]
    fn missing_sections_default() {
        let cfg: Config = serde_json::from_str(r#"{ "mode": "standard" }"#).unwrap();
        assert_eq!(cfg.flex.cat_base_port, 7809);
        assert!(cfg.logbook.enable_hrd_server);
        assert!(cfg.flex.default_bands.is_none());
        assert!(cfg.wsjtx.path.is_none());
    }

    #[test]
    fn bad_continent_is_rejected() {
        let cfg: Config =
            serde_json::from_str(r#"{ "station": { "continent": "XX" } }"#).unwrap();
        assert!(cfg.station_profile().is_err());
    }

    #[test]
    fn bad_mode_is_rejected() {
        assert!(serde_json::from_str::<Config>(r#"{ "mode": "turbo" }"#).is_err());
    }
}
