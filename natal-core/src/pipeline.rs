//! The chart request pipeline.
//!
//! `geocode -> timezone -> authenticate -> compute chart -> (upload) -> result`
//!
//! Each step needs the previous step's output, so the calls are strictly
//! sequential. The first failure aborts the request; nothing is retried.

use anyhow::Result;
use chrono::Utc;
use tracing::{error, info, warn};

use crate::{
    Config,
    chart::ChartRequest,
    config::TimezoneFallback,
    error::ChartError,
    model::{BirthSubmission, ChartResult, Signs},
    provider::{
        ChartProvider, Geocoder, PrintUploader, TimezoneResolver, chart_provider_from_config,
        geocoder_from_config, http_client, print_uploader_from_config,
        timezone_resolver_from_config,
    },
};

/// Zone used when the timezone lookup is allowed to degrade.
pub const FALLBACK_TIMEZONE: &str = "UTC";

#[derive(Debug)]
pub struct ChartOrchestrator {
    geocoder: Box<dyn Geocoder>,
    timezones: Box<dyn TimezoneResolver>,
    charts: Box<dyn ChartProvider>,
    printer: Option<Box<dyn PrintUploader>>,
    timezone_fallback: TimezoneFallback,
}

impl ChartOrchestrator {
    pub fn new(
        geocoder: Box<dyn Geocoder>,
        timezones: Box<dyn TimezoneResolver>,
        charts: Box<dyn ChartProvider>,
    ) -> Self {
        Self {
            geocoder,
            timezones,
            charts,
            printer: None,
            timezone_fallback: TimezoneFallback::default(),
        }
    }

    /// Return the print provider's hosted URL instead of the chart image URL.
    pub fn with_print_uploader(mut self, printer: Box<dyn PrintUploader>) -> Self {
        self.printer = Some(printer);
        self
    }

    pub fn with_timezone_fallback(mut self, fallback: TimezoneFallback) -> Self {
        self.timezone_fallback = fallback;
        self
    }

    /// Build the production pipeline. Fails if a required credential is missing.
    pub fn from_config(config: &Config) -> Result<Self> {
        let http = http_client(config)?;

        let mut orchestrator = Self::new(
            geocoder_from_config(config, http.clone())?,
            timezone_resolver_from_config(config, http.clone())?,
            chart_provider_from_config(config, http.clone())?,
        )
        .with_timezone_fallback(config.pipeline.timezone_fallback);

        if let Some(printer) = print_uploader_from_config(config, http)? {
            orchestrator = orchestrator.with_print_uploader(printer);
        }

        Ok(orchestrator)
    }

    #[tracing::instrument(skip_all, fields(location = %submission.birth_location))]
    pub async fn generate_chart(
        &self,
        submission: &BirthSubmission,
    ) -> Result<ChartResult, ChartError> {
        submission.validate()?;

        let location = self
            .geocoder
            .geocode(submission.birth_location.trim())
            .await
            .map_err(|e| {
                error!("geocoding failed: {e:#}");
                ChartError::Geocode(e)
            })?
            .ok_or_else(|| {
                warn!("no geocoding results");
                ChartError::LocationNotFound(submission.birth_location.clone())
            })?;
        info!(lat = location.lat, lng = location.lng, "location resolved");

        let tz = match self.timezones.timezone(location.lat, location.lng).await {
            Ok(tz) => tz,
            Err(e) if self.timezone_fallback == TimezoneFallback::Utc => {
                let tz = location
                    .timezone
                    .clone()
                    .unwrap_or_else(|| FALLBACK_TIMEZONE.to_string());
                warn!(fallback = %tz, "timezone lookup failed, degrading: {e:#}");
                tz
            }
            Err(e) => {
                error!("timezone lookup failed: {e:#}");
                return Err(ChartError::Timezone(e));
            }
        };
        info!(%tz, "timezone resolved");

        let credential = self.charts.authenticate().await.map_err(|e| {
            error!("chart provider authentication failed: {e:#}");
            ChartError::Auth(e)
        })?;

        let request = ChartRequest::new(submission, &location, &tz);
        let output = self
            .charts
            .compute_chart(&credential, &request)
            .await
            .map_err(|e| {
                error!("chart computation failed: {e:#}");
                ChartError::ChartProvider(e)
            })?;

        let image_url = output.image_url.ok_or_else(|| {
            error!("chart response contained no image URL");
            ChartError::ChartProvider(anyhow::anyhow!("Chart response contained no image URL"))
        })?;
        let signs = Signs::from_points(&output.points);

        let image_url = match &self.printer {
            Some(printer) => {
                let file_stem = format!("natal-chart-{}", Utc::now().format("%Y%m%d%H%M%S%3f"));
                printer
                    .upload_image(&image_url, &file_stem)
                    .await
                    .map_err(|e| {
                        error!("print upload failed: {e:#}");
                        ChartError::Upload(e)
                    })?
            }
            None => image_url,
        };

        info!(sun = %signs.sun, moon = %signs.moon, rising = %signs.rising, "chart generated");
        Ok(ChartResult::new(image_url, signs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        chart::{ChartOutput, Credential},
        model::{ChartPoint, Location, UNKNOWN_SIGN},
    };
    use anyhow::anyhow;
    use async_trait::async_trait;
    use std::sync::{Arc, Mutex};

    const IMAGE: &str = "https://astro.example/chart123.png";

    #[derive(Debug, Clone, Default)]
    struct Calls(Arc<Mutex<Vec<String>>>);

    impl Calls {
        fn push(&self, call: String) {
            self.0.lock().unwrap().push(call);
        }

        fn recorded(&self) -> Vec<String> {
            self.0.lock().unwrap().clone()
        }
    }

    #[derive(Debug)]
    struct FakeGeocoder {
        calls: Calls,
        result: Option<Location>,
        fail: bool,
    }

    #[async_trait]
    impl Geocoder for FakeGeocoder {
        async fn geocode(&self, query: &str) -> Result<Option<Location>> {
            self.calls.push(format!("geocode {query}"));
            if self.fail {
                return Err(anyhow!("operation timed out"));
            }
            Ok(self.result.clone())
        }
    }

    #[derive(Debug)]
    struct FakeTimezones {
        calls: Calls,
        zone: Option<&'static str>,
    }

    #[async_trait]
    impl TimezoneResolver for FakeTimezones {
        async fn timezone(&self, lat: f64, lng: f64) -> Result<String> {
            self.calls.push(format!("timezone {lat},{lng}"));
            self.zone.map(str::to_string).ok_or_else(|| anyhow!("connection refused"))
        }
    }

    #[derive(Debug)]
    struct FakeCharts {
        calls: Calls,
        token: Option<&'static str>,
        output: Option<ChartOutput>,
    }

    #[async_trait]
    impl ChartProvider for FakeCharts {
        async fn authenticate(&self) -> Result<Credential> {
            self.calls.push("authenticate".to_string());
            self.token
                .map(|t| Credential::Bearer(t.to_string()))
                .ok_or_else(|| anyhow!("AstroApp authenticate response contained no token"))
        }

        async fn compute_chart(
            &self,
            credential: &Credential,
            request: &ChartRequest,
        ) -> Result<ChartOutput> {
            let token = match credential {
                Credential::Bearer(t) => t.as_str(),
                Credential::Basic { .. } => "basic",
            };
            let data = &request.chart.chart_data;
            self.calls.push(format!(
                "chart {token} {} {},{} {}",
                data.chart_date, data.lat, data.lng, data.tz
            ));
            self.output.clone().ok_or_else(|| anyhow!("status 500"))
        }
    }

    #[derive(Debug)]
    struct FakePrinter {
        calls: Calls,
        ok: bool,
    }

    #[async_trait]
    impl PrintUploader for FakePrinter {
        async fn upload_image(&self, image_url: &str, file_stem: &str) -> Result<String> {
            assert!(file_stem.starts_with("natal-chart-"));
            assert!(!file_stem.contains('.'));
            self.calls.push(format!("upload {image_url}"));
            if self.ok {
                Ok("https://files.print.example/chart.png".to_string())
            } else {
                Err(anyhow!("status 413"))
            }
        }
    }

    fn point(id: u32, sign: &str) -> ChartPoint {
        ChartPoint { point_id: id, sign_name: sign.into() }
    }

    fn paris() -> Location {
        Location { lat: 48.8566, lng: 2.3522, timezone: Some("Europe/Paris".into()) }
    }

    fn full_output() -> ChartOutput {
        ChartOutput {
            image_url: Some(IMAGE.into()),
            points: vec![point(0, "Taurus"), point(1, "Libra"), point(24, "Leo")],
        }
    }

    fn submission() -> BirthSubmission {
        BirthSubmission {
            birth_date: "1990-05-15".into(),
            birth_time: "14:30".into(),
            birth_location: "Paris, France".into(),
            name: None,
        }
    }

    struct Harness {
        calls: Calls,
        location: Option<Location>,
        geocode_fails: bool,
        zone: Option<&'static str>,
        token: Option<&'static str>,
        output: Option<ChartOutput>,
    }

    impl Harness {
        fn happy() -> Self {
            Self {
                calls: Calls::default(),
                location: Some(paris()),
                geocode_fails: false,
                zone: Some("Europe/Paris"),
                token: Some("jwt"),
                output: Some(full_output()),
            }
        }

        fn build(&self) -> ChartOrchestrator {
            ChartOrchestrator::new(
                Box::new(FakeGeocoder {
                    calls: self.calls.clone(),
                    result: self.location.clone(),
                    fail: self.geocode_fails,
                }),
                Box::new(FakeTimezones { calls: self.calls.clone(), zone: self.zone }),
                Box::new(FakeCharts {
                    calls: self.calls.clone(),
                    token: self.token,
                    output: self.output.clone(),
                }),
            )
        }
    }

    #[tokio::test]
    async fn round_trip_paris() {
        let h = Harness::happy();
        let result = h.build().generate_chart(&submission()).await.unwrap();

        assert_eq!(
            result,
            ChartResult {
                image_url: IMAGE.into(),
                sun: "Taurus".into(),
                moon: "Libra".into(),
                rising: "Leo".into(),
            }
        );
    }

    #[tokio::test]
    async fn steps_run_in_order_with_previous_outputs() {
        let h = Harness::happy();
        h.build().generate_chart(&submission()).await.unwrap();

        assert_eq!(
            h.calls.recorded(),
            vec![
                "geocode Paris, France",
                "timezone 48.8566,2.3522",
                "authenticate",
                "chart jwt 1990-05-15T14:30:00 48.8566,2.3522 Europe/Paris",
            ]
        );
    }

    #[tokio::test]
    async fn validation_failure_makes_no_calls() {
        let h = Harness::happy();
        let mut s = submission();
        s.birth_location = "   ".into();

        let err = h.build().generate_chart(&s).await.unwrap_err();
        assert!(matches!(err, ChartError::Validation("birthLocation")));
        assert!(h.calls.recorded().is_empty());
    }

    #[tokio::test]
    async fn zero_geocode_results_stop_the_pipeline() {
        let h = Harness { location: None, ..Harness::happy() };
        let err = h.build().generate_chart(&submission()).await.unwrap_err();

        assert!(matches!(err, ChartError::LocationNotFound(ref q) if q == "Paris, France"));
        assert_eq!(h.calls.recorded(), vec!["geocode Paris, France"]);
    }

    #[tokio::test]
    async fn geocoder_timeout_stops_the_pipeline() {
        let h = Harness { geocode_fails: true, ..Harness::happy() };
        let err = h.build().generate_chart(&submission()).await.unwrap_err();

        assert!(matches!(err, ChartError::Geocode(_)));
        assert!(err.to_string().contains("timed out"));
        assert_eq!(h.calls.recorded().len(), 1);
    }

    #[tokio::test]
    async fn timezone_failure_is_fatal_by_default() {
        let h = Harness { zone: None, ..Harness::happy() };
        let err = h.build().generate_chart(&submission()).await.unwrap_err();

        assert!(matches!(err, ChartError::Timezone(_)));
        assert!(!h.calls.recorded().iter().any(|c| c == "authenticate"));
    }

    #[tokio::test]
    async fn timezone_failure_degrades_when_allowed() {
        let h = Harness { zone: None, ..Harness::happy() };
        let orchestrator = h.build().with_timezone_fallback(TimezoneFallback::Utc);
        orchestrator.generate_chart(&submission()).await.unwrap();
        assert!(h.calls.recorded().last().unwrap().ends_with("Europe/Paris"));

        let h = Harness {
            zone: None,
            location: Some(Location { timezone: None, ..paris() }),
            ..Harness::happy()
        };
        let orchestrator = h.build().with_timezone_fallback(TimezoneFallback::Utc);
        orchestrator.generate_chart(&submission()).await.unwrap();
        assert!(h.calls.recorded().last().unwrap().ends_with(" UTC"));
    }

    #[tokio::test]
    async fn auth_failure_skips_chart_call() {
        let h = Harness { token: None, ..Harness::happy() };
        let err = h.build().generate_chart(&submission()).await.unwrap_err();

        assert!(matches!(err, ChartError::Auth(_)));
        assert!(!h.calls.recorded().iter().any(|c| c.starts_with("chart")));
    }

    #[tokio::test]
    async fn chart_failure_is_reported() {
        let h = Harness { output: None, ..Harness::happy() };
        let err = h.build().generate_chart(&submission()).await.unwrap_err();
        assert!(matches!(err, ChartError::ChartProvider(_)));
    }

    #[tokio::test]
    async fn missing_points_yield_unknown_signs() {
        let h = Harness {
            output: Some(ChartOutput { image_url: Some(IMAGE.into()), points: vec![] }),
            ..Harness::happy()
        };
        let result = h.build().generate_chart(&submission()).await.unwrap();

        assert_eq!(result.image_url, IMAGE);
        assert_eq!(result.sun, UNKNOWN_SIGN);
        assert_eq!(result.moon, UNKNOWN_SIGN);
        assert_eq!(result.rising, UNKNOWN_SIGN);
    }

    #[tokio::test]
    async fn missing_image_url_is_fatal() {
        let h = Harness {
            output: Some(ChartOutput { image_url: None, ..full_output() }),
            ..Harness::happy()
        };
        let err = h.build().generate_chart(&submission()).await.unwrap_err();

        assert!(matches!(err, ChartError::ChartProvider(_)));
        assert!(err.to_string().contains("no image URL"));
    }

    #[tokio::test]
    async fn print_upload_replaces_image_url() {
        let h = Harness::happy();
        let orchestrator = h
            .build()
            .with_print_uploader(Box::new(FakePrinter { calls: h.calls.clone(), ok: true }));

        let result = orchestrator.generate_chart(&submission()).await.unwrap();
        assert_eq!(result.image_url, "https://files.print.example/chart.png");
        assert_eq!(result.sun, "Taurus");
        assert_eq!(h.calls.recorded().last().unwrap(), &format!("upload {IMAGE}"));
    }

    #[tokio::test]
    async fn print_upload_failure_is_reported() {
        let h = Harness::happy();
        let orchestrator = h
            .build()
            .with_print_uploader(Box::new(FakePrinter { calls: h.calls.clone(), ok: false }));

        let err = orchestrator.generate_chart(&submission()).await.unwrap_err();
        assert!(matches!(err, ChartError::Upload(_)));
    }

    #[test]
    fn from_config_reports_missing_credentials() {
        let err = ChartOrchestrator::from_config(&Config::default()).unwrap_err();
        assert!(err.to_string().contains("No API key configured"));
    }
}
