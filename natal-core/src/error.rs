use thiserror::Error;

/// Failure of a single chart generation request.
///
/// Each variant corresponds to one pipeline step; the first failing step
/// aborts the request and nothing is retried.
#[derive(Debug, Error)]
pub enum ChartError {
    #[error("Missing required field '{0}'")]
    Validation(&'static str),

    /// The zero-results case of a geocoding failure. `Geocode` covers
    /// transport and parse errors.
    #[error("No geocoding results for location '{0}'")]
    LocationNotFound(String),

    #[error("Geocoding failed: {0:#}")]
    Geocode(anyhow::Error),

    #[error("Timezone lookup failed: {0:#}")]
    Timezone(anyhow::Error),

    #[error("Chart provider authentication failed: {0:#}")]
    Auth(anyhow::Error),

    #[error("Chart generation failed: {0:#}")]
    ChartProvider(anyhow::Error),

    #[error("Print upload failed: {0:#}")]
    Upload(anyhow::Error),
}

impl ChartError {
    /// True when the failure was caused by the caller's input rather than an
    /// upstream service.
    pub fn is_client_error(&self) -> bool {
        matches!(self, ChartError::Validation(_) | ChartError::LocationNotFound(_))
    }
}
