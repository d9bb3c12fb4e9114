//! Chart provider wire format.
//!
//! The request payload is fixed apart from the birth data. The response is
//! read according to a [`ResponseSchema`] chosen in configuration; only the
//! image URL location differs between schemas, the point list is always the
//! top-level `chartPoints` array.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::{
    config::ResponseSchema,
    model::{BirthSubmission, CelestialPoint, ChartPoint, Location},
};

pub const DEFAULT_CHART_NAME: &str = "Customer Chart";

/// Tropical zodiac.
pub const ZODIAC_ID: u32 = 100;
/// Placidus houses.
pub const HOUSE_SYSTEM_ID: u32 = 1;
/// Geocentric coordinates.
pub const COORD_SYS: &str = "G";

/// How a chart call is authenticated.
#[derive(Clone, PartialEq, Eq)]
pub enum Credential {
    Bearer(String),
    Basic { username: String, password: String },
}

// Never print secrets.
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Credential::Bearer(_) => f.write_str("Credential::Bearer(***)"),
            Credential::Basic { username, .. } => {
                write!(f, "Credential::Basic {{ username: {username:?}, password: *** }}")
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartRequest {
    pub chart: ChartEnvelope,
    pub calc_request_props: CalcRequestProps,
    pub params: ChartParams,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartEnvelope {
    pub chart_data: ChartData,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChartData {
    pub chart_name: String,
    pub chart_date: String,
    pub elevation: i32,
    pub lat: f64,
    pub lng: f64,
    pub tz: String,
    #[serde(rename = "zodiacID")]
    pub zodiac_id: u32,
    #[serde(rename = "houseSystemID")]
    pub house_system_id: u32,
    pub coord_sys: String,
    pub version: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CalcRequestProps {
    pub need_image: String,
    pub need_aspects: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartParams {
    pub objects: Vec<u32>,
}

impl ChartRequest {
    pub fn new(submission: &BirthSubmission, location: &Location, tz: &str) -> Self {
        let chart_name = submission
            .name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or(DEFAULT_CHART_NAME)
            .to_string();

        Self {
            chart: ChartEnvelope {
                chart_data: ChartData {
                    chart_name,
                    chart_date: submission.chart_date(),
                    elevation: 0,
                    lat: location.lat,
                    lng: location.lng,
                    tz: tz.to_string(),
                    zodiac_id: ZODIAC_ID,
                    house_system_id: HOUSE_SYSTEM_ID,
                    coord_sys: COORD_SYS.to_string(),
                    version: 1,
                },
            },
            calc_request_props: CalcRequestProps {
                need_image: "Y".to_string(),
                need_aspects: "N".to_string(),
            },
            params: ChartParams { objects: CelestialPoint::requested().to_vec() },
        }
    }
}

/// The useful part of a chart response.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChartOutput {
    pub image_url: Option<String>,
    pub points: Vec<ChartPoint>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChartResponse {
    chart_image_url: Option<String>,
    chart_data: Option<RawChartData>,
    chart_result: Option<RawChartResult>,
    chart_points: Option<Vec<ChartPoint>>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChartData {
    img_path: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawChartResult {
    image_url: Option<String>,
}

pub fn parse_chart_response(body: &str, schema: ResponseSchema) -> Result<ChartOutput> {
    let raw: RawChartResponse =
        serde_json::from_str(body).context("Failed to parse chart response JSON")?;

    let image_url = match schema {
        ResponseSchema::ChartImageUrl => raw.chart_image_url,
        ResponseSchema::ChartDataImgPath => raw.chart_data.and_then(|d| d.img_path),
        ResponseSchema::ChartResultImageUrl => raw.chart_result.and_then(|r| r.image_url),
    }
    .filter(|url| !url.trim().is_empty());

    Ok(ChartOutput {
        image_url,
        points: raw.chart_points.unwrap_or_default(),
    })
}
