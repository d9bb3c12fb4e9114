use serde::{Deserialize, Serialize};

use crate::error::ChartError;

/// Sign name used when the provider did not return a point.
pub const UNKNOWN_SIGN: &str = "unknown";

/// Incoming birth data, as posted by the caller.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BirthSubmission {
    #[serde(default)]
    pub birth_date: String,
    #[serde(default)]
    pub birth_time: String,
    #[serde(default)]
    pub birth_location: String,
    #[serde(default)]
    pub name: Option<String>,
}

impl BirthSubmission {
    /// Checks that the required fields are present. Contents are not
    /// interpreted; the chart provider is the judge of date formats.
    pub fn validate(&self) -> Result<(), ChartError> {
        if self.birth_date.trim().is_empty() {
            return Err(ChartError::Validation("birthDate"));
        }
        if self.birth_time.trim().is_empty() {
            return Err(ChartError::Validation("birthTime"));
        }
        if self.birth_location.trim().is_empty() {
            return Err(ChartError::Validation("birthLocation"));
        }
        Ok(())
    }

    /// Combined local date-time in the form the chart provider expects,
    /// e.g. `1990-05-15T14:30:00`.
    pub fn chart_date(&self) -> String {
        let date = self.birth_date.trim();
        let time = self.birth_time.trim();

        if is_hh_mm(time) {
            return format!("{date}T{time}:00");
        }
        format!("{date}T{time}")
    }
}

/// Two digits, a colon, two digits. Values are not range checked.
fn is_hh_mm(time: &str) -> bool {
    let b = time.as_bytes();
    b.len() == 5
        && b[2] == b':'
        && [b[0], b[1], b[3], b[4]].iter().all(u8::is_ascii_digit)
}

/// First geocoding match for a free-text place name.
#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    /// IANA zone name, when the geocoder annotates one.
    pub timezone: Option<String>,
}

/// One computed chart point.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChartPoint {
    #[serde(rename = "pointID")]
    pub point_id: u32,
    #[serde(rename = "signName")]
    pub sign_name: String,
}

/// Point ids understood by the chart provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum CelestialPoint {
    Sun = 0,
    Moon = 1,
    Ascendant = 24,
}

impl CelestialPoint {
    pub const fn id(self) -> u32 {
        self as u32
    }

    /// Points requested on every chart.
    pub const fn requested() -> [u32; 3] {
        [
            CelestialPoint::Sun.id(),
            CelestialPoint::Moon.id(),
            CelestialPoint::Ascendant.id(),
        ]
    }
}

/// Sun, Moon and Rising signs derived from a chart.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signs {
    pub sun: String,
    pub moon: String,
    pub rising: String,
}

impl Signs {
    pub fn from_points(points: &[ChartPoint]) -> Self {
        let sign_of = |point: CelestialPoint| {
            points
                .iter()
                .find(|p| p.point_id == point.id())
                .map(|p| p.sign_name.clone())
                .unwrap_or_else(|| UNKNOWN_SIGN.to_string())
        };

        Self {
            sun: sign_of(CelestialPoint::Sun),
            moon: sign_of(CelestialPoint::Moon),
            rising: sign_of(CelestialPoint::Ascendant),
        }
    }
}

/// What the caller gets back on success.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartResult {
    pub image_url: String,
    pub sun: String,
    pub moon: String,
    pub rising: String,
}

impl ChartResult {
    pub fn new(image_url: String, signs: Signs) -> Self {
        Self {
            image_url,
            sun: signs.sun,
            moon: signs.moon,
            rising: signs.rising,
        }
    }
}
