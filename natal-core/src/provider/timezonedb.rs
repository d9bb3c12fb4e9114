use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;

use super::{TimezoneResolver, join_url, read_success_body};

const DEFAULT_BASE_URL: &str = "https://api.timezonedb.com";

#[derive(Debug, Clone)]
pub struct TimezoneDbResolver {
    api_key: String,
    base_url: String,
    http: Client,
}

impl TimezoneDbResolver {
    pub fn new(api_key: String, http: Client) -> Self {
        Self { api_key, base_url: DEFAULT_BASE_URL.to_string(), http }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TzResponse {
    status: Option<String>,
    message: Option<String>,
    zone_name: Option<String>,
}

fn parse_zone(body: &str) -> Result<String> {
    let parsed: TzResponse =
        serde_json::from_str(body).context("Failed to parse TimezoneDB JSON")?;

    // TimezoneDB answers 200 with status "FAILED" for bad keys and unknown positions.
    if let Some(status) = parsed.status.as_deref()
        && !status.eq_ignore_ascii_case("OK")
    {
        return Err(anyhow!(
            "TimezoneDB returned status {status}: {}",
            parsed.message.as_deref().unwrap_or("no message")
        ));
    }

    parsed
        .zone_name
        .filter(|z| !z.is_empty())
        .ok_or_else(|| anyhow!("TimezoneDB response contained no zoneName"))
}

#[async_trait]
impl TimezoneResolver for TimezoneDbResolver {
    async fn timezone(&self, lat: f64, lng: f64) -> Result<String> {
        let url = join_url(&self.base_url, "/v2.1/get-time-zone");
        let (lat, lng) = (lat.to_string(), lng.to_string());

        let res = self
            .http
            .get(url)
            .query(&[
                ("key", self.api_key.as_str()),
                ("format", "json"),
                ("by", "position"),
                ("lat", lat.as_str()),
                ("lng", lng.as_str()),
            ])
            .send()
            .await
            .context("Failed to send request to TimezoneDB")?;

        let body = read_success_body(res, "TimezoneDB").await?;
        parse_zone(&body)
    }
}
