use crate::{
    Config,
    chart::{ChartOutput, ChartRequest, Credential},
    config::Delivery,
    model::Location,
    provider::{
        astroapp::AstroAppProvider, opencage::OpenCageGeocoder, printful::PrintfulUploader,
        timezonedb::TimezoneDbResolver,
    },
};
use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::Client;
use std::{convert::TryFrom, fmt::Debug};
use tracing::warn;

pub mod astroapp;
pub mod opencage;
pub mod printful;
pub mod timezonedb;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProviderId {
    OpenCage,
    TimezoneDb,
    AstroApp,
    Printful,
}

impl ProviderId {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProviderId::OpenCage => "opencage",
            ProviderId::TimezoneDb => "timezonedb",
            ProviderId::AstroApp => "astroapp",
            ProviderId::Printful => "printful",
        }
    }

    pub const fn all() -> &'static [ProviderId] {
        &[
            ProviderId::OpenCage,
            ProviderId::TimezoneDb,
            ProviderId::AstroApp,
            ProviderId::Printful,
        ]
    }

    /// Whether the provider authenticates with an account login on top of
    /// its API key.
    pub fn needs_login(&self) -> bool {
        matches!(self, ProviderId::AstroApp)
    }
}

impl std::fmt::Display for ProviderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ProviderId {
    type Error = anyhow::Error;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let lower = value.to_lowercase();

        match lower.as_str() {
            "opencage" => Ok(ProviderId::OpenCage),
            "timezonedb" => Ok(ProviderId::TimezoneDb),
            "astroapp" => Ok(ProviderId::AstroApp),
            "printful" => Ok(ProviderId::Printful),
            _ => Err(anyhow!(
                "Unknown provider '{value}'. Supported providers: opencage, timezonedb, astroapp, printful."
            )),
        }
    }
}

/// Resolves a free-text place name to coordinates.
#[async_trait]
pub trait Geocoder: Send + Sync + Debug {
    /// `Ok(None)` means the provider answered but found nothing.
    async fn geocode(&self, query: &str) -> Result<Option<Location>>;
}

/// Resolves coordinates to an IANA zone name.
#[async_trait]
pub trait TimezoneResolver: Send + Sync + Debug {
    async fn timezone(&self, lat: f64, lng: f64) -> Result<String>;
}

/// Astrology chart computation.
#[async_trait]
pub trait ChartProvider: Send + Sync + Debug {
    /// Obtain the credential for subsequent chart calls.
    async fn authenticate(&self) -> Result<Credential>;

    async fn compute_chart(
        &self,
        credential: &Credential,
        request: &ChartRequest,
    ) -> Result<ChartOutput>;
}

/// Re-hosts a chart image with a print-on-demand service.
#[async_trait]
pub trait PrintUploader: Send + Sync + Debug {
    /// Returns the hosted file URL. `file_stem` has no extension; the
    /// uploader picks one from the image's content type.
    async fn upload_image(&self, image_url: &str, file_stem: &str) -> Result<String>;
}

/// Shared HTTP client with the configured per-call timeout.
pub fn http_client(config: &Config) -> Result<Client> {
    Client::builder()
        .timeout(config.timeout())
        .user_agent(concat!("natal/", env!("CARGO_PKG_VERSION")))
        .build()
        .context("Failed to build HTTP client")
}

fn require_api_key(config: &Config, id: ProviderId) -> Result<String> {
    config.provider_api_key(id).map(str::to_owned).ok_or_else(|| {
        anyhow!(
            "No API key configured for provider '{id}'.\n\
             Hint: run `natal configure {id}` or set the matching environment variable."
        )
    })
}

fn base_url(config: &Config, id: ProviderId) -> Option<String> {
    config.provider_config(id).and_then(|cfg| cfg.base_url.clone())
}

pub fn geocoder_from_config(config: &Config, http: Client) -> Result<Box<dyn Geocoder>> {
    let api_key = require_api_key(config, ProviderId::OpenCage)?;
    let mut geocoder = OpenCageGeocoder::new(api_key, http);
    if let Some(url) = base_url(config, ProviderId::OpenCage) {
        geocoder = geocoder.with_base_url(url);
    }
    Ok(Box::new(geocoder))
}

pub fn timezone_resolver_from_config(
    config: &Config,
    http: Client,
) -> Result<Box<dyn TimezoneResolver>> {
    let api_key = require_api_key(config, ProviderId::TimezoneDb)?;
    let mut resolver = TimezoneDbResolver::new(api_key, http);
    if let Some(url) = base_url(config, ProviderId::TimezoneDb) {
        resolver = resolver.with_base_url(url);
    }
    Ok(Box::new(resolver))
}

pub fn chart_provider_from_config(config: &Config, http: Client) -> Result<Box<dyn ChartProvider>> {
    let id = ProviderId::AstroApp;
    let api_key = require_api_key(config, id)?;

    let (username, password) = config
        .provider_config(id)
        .and_then(|cfg| Some((cfg.username.clone()?, cfg.password.clone()?)))
        .ok_or_else(|| {
            anyhow!(
                "No account login configured for provider '{id}'.\n\
                 Hint: run `natal configure {id}` or set ASTROAPP_EMAIL and ASTROAPP_PASS."
            )
        })?;

    let mut provider = AstroAppProvider::new(
        api_key,
        username,
        password,
        config.pipeline.auth,
        config.pipeline.response_schema,
        http,
    );
    if let Some(url) = base_url(config, id) {
        provider = provider.with_base_url(url);
    }
    Ok(Box::new(provider))
}

/// `Ok(None)` unless delivery is set to print upload.
pub fn print_uploader_from_config(
    config: &Config,
    http: Client,
) -> Result<Option<Box<dyn PrintUploader>>> {
    if config.pipeline.delivery != Delivery::PrintUpload {
        return Ok(None);
    }

    let api_key = require_api_key(config, ProviderId::Printful)?;
    let mut uploader = PrintfulUploader::new(api_key, http);
    if let Some(url) = base_url(config, ProviderId::Printful) {
        uploader = uploader.with_base_url(url);
    }
    Ok(Some(Box::new(uploader)))
}

/// Reads the response body, turning a non-2xx status into an error that
/// carries the (truncated) upstream payload.
pub(crate) async fn read_success_body(res: reqwest::Response, what: &str) -> Result<String> {
    let status = res.status();
    let body = res
        .text()
        .await
        .with_context(|| format!("Failed to read {what} response body"))?;

    if !status.is_success() {
        let body = truncate_body(&body);
        warn!(%status, upstream = %body, "{what} request failed");
        return Err(anyhow!("{what} request failed with status {status}: {body}"));
    }

    Ok(body)
}

pub(crate) fn truncate_body(body: &str) -> String {
    const MAX: usize = 200;
    match body.char_indices().nth(MAX) {
        Some((idx, _)) => format!("{}...", &body[..idx]),
        None => body.to_string(),
    }
}

pub(crate) fn join_url(base: &str, path: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), path.trim_start_matches('/'))
}
