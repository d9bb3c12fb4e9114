use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::model::Location;

use super::{Geocoder, join_url, read_success_body};

const DEFAULT_BASE_URL: &str = "https://api.opencagedata.com";

#[derive(Debug, Clone)]
pub struct OpenCageGeocoder {
    api_key: String,
    base_url: String,
    http: Client,
}

impl OpenCageGeocoder {
    pub fn new(api_key: String, http: Client) -> Self {
        Self { api_key, base_url: DEFAULT_BASE_URL.to_string(), http }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[derive(Debug, Deserialize)]
struct OcResponse {
    #[serde(default)]
    results: Vec<OcResult>,
}

#[derive(Debug, Deserialize)]
struct OcResult {
    geometry: OcGeometry,
    annotations: Option<OcAnnotations>,
}

#[derive(Debug, Deserialize)]
struct OcGeometry {
    lat: f64,
    lng: f64,
}

#[derive(Debug, Deserialize)]
struct OcAnnotations {
    timezone: Option<OcTimezone>,
}

#[derive(Debug, Deserialize)]
struct OcTimezone {
    name: String,
}

fn parse_geocode(body: &str) -> Result<Option<Location>> {
    let parsed: OcResponse =
        serde_json::from_str(body).context("Failed to parse OpenCage geocode JSON")?;

    Ok(parsed.results.into_iter().next().map(|r| Location {
        lat: r.geometry.lat,
        lng: r.geometry.lng,
        timezone: r.annotations.and_then(|a| a.timezone).map(|tz| tz.name),
    }))
}

#[async_trait]
impl Geocoder for OpenCageGeocoder {
    async fn geocode(&self, query: &str) -> Result<Option<Location>> {
        let url = join_url(&self.base_url, "/geocode/v1/json");

        let res = self
            .http
            .get(url)
            .query(&[("q", query), ("key", self.api_key.as_str()), ("limit", "1")])
            .send()
            .await
            .context("Failed to send request to OpenCage")?;

        let body = read_success_body(res, "OpenCage geocode").await?;
        let location = parse_geocode(&body)?;

        debug!(query, found = location.is_some(), "geocoded location");
        Ok(location)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn takes_first_result_with_timezone_annotation() {
        let body = r#"{
            "results": [
                {
                    "geometry": {"lat": 48.8566, "lng": 2.3522},
                    "annotations": {"timezone": {"name": "Europe/Paris", "offset_sec": 7200}}
                },
                {"geometry": {"lat": 33.66, "lng": -95.55}}
            ],
            "status": {"code": 200, "message": "OK"}
        }"#;

        let loc = parse_geocode(body).unwrap().unwrap();
        assert_eq!(loc.lat, 48.8566);
        assert_eq!(loc.lng, 2.3522);
        assert_eq!(loc.timezone.as_deref(), Some("Europe/Paris"));
    }

    #[test]
    fn annotation_is_optional() {
        let body = r#"{"results": [{"geometry": {"lat": 1.5, "lng": -2.25}}]}"#;
        let loc = parse_geocode(body).unwrap().unwrap();
        assert_eq!(loc.timezone, None);
    }

    #[test]
    fn zero_results_is_none() {
        assert_eq!(parse_geocode(r#"{"results": []}"#).unwrap(), None);
        assert_eq!(parse_geocode(r#"{"total_results": 0}"#).unwrap(), None);
    }

    #[test]
    fn malformed_body_errors() {
        assert!(parse_geocode("not json").is_err());
    }
}
