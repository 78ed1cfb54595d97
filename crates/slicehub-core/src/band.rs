//! Amateur band identification from a dial frequency.
//!
//! The hub derives a band string ("20m", "40m", ...) for every channel and
//! decode; the same strings key the logbook's worked-index and appear in
//! ADIF `BAND` fields.

use std::fmt;
use std::str::FromStr;

/// Amateur band, HF through 70cm. Digital-mode decoders only operate in
/// these allocations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Band {
    M160,
    M80,
    M60,
    M40,
    M30,
    M20,
    M17,
    M15,
    M12,
    M10,
    M6,
    M2,
    Cm70,
}

/// (band, low edge Hz, high edge Hz), frequency order.
const BAND_EDGES: &[(Band, u64, u64)] = &[
    (Band::M160, 1_800_000, 2_000_000),
    (Band::M80, 3_500_000, 4_000_000),
    (Band::M60, 5_330_500, 5_403_500),
    (Band::M40, 7_000_000, 7_300_000),
    (Band::M30, 10_100_000, 10_150_000),
    (Band::M20, 14_000_000, 14_350_000),
    (Band::M17, 18_068_000, 18_168_000),
    (Band::M15, 21_000_000, 21_450_000),
    (Band::M12, 24_890_000, 24_990_000),
    (Band::M10, 28_000_000, 29_700_000),
    (Band::M6, 50_000_000, 54_000_000),
    (Band::M2, 144_000_000, 148_000_000),
    (Band::Cm70, 420_000_000, 450_000_000),
];

impl Band {
    /// Returns the band containing `freq_hz`, or `None` outside all
    /// amateur allocations.
    pub fn from_freq(freq_hz: u64) -> Option<Band> {
        BAND_EDGES
            .iter()
            .find(|(_, lo, hi)| freq_hz >= *lo && freq_hz <= *hi)
            .map(|(band, _, _)| *band)
    }

    /// Short band name as used in ADIF and the worked-index ("20m").
    pub fn name(&self) -> &'static str {
        match self {
            Band::M160 => "160m",
            Band::M80 => "80m",
            Band::M60 => "60m",
            Band::M40 => "40m",
            Band::M30 => "30m",
            Band::M20 => "20m",
            Band::M17 => "17m",
            Band::M15 => "15m",
            Band::M12 => "12m",
            Band::M10 => "10m",
            Band::M6 => "6m",
            Band::M2 => "2m",
            Band::Cm70 => "70cm",
        }
    }
}

impl fmt::Display for Band {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

/// Band string for a frequency, `"?"` when outside all allocations.
///
/// Channels can sit on out-of-band frequencies while being dragged around
/// by an operator, so this never fails.
pub fn band_name(freq_hz: u64) -> String {
    Band::from_freq(freq_hz)
        .map(|b| b.name().to_string())
        .unwrap_or_else(|| "?".to_string())
}

/// Error returned when a string cannot be parsed into a [`Band`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParseBandError(String);

impl fmt::Display for ParseBandError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown band: '{}'", self.0)
    }
}

impl std::error::Error for ParseBandError {}

impl FromStr for Band {
    type Err = ParseBandError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let lower = s.to_lowercase();
        BAND_EDGES
            .iter()
            .find(|(band, _, _)| band.name() == lower)
            .map(|(band, _, _)| *band)
            .ok_or_else(|| ParseBandError(s.to_string()))
    }
}
