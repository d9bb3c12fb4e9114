use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde::Deserialize;
use tracing::{debug, info};

use crate::{
    chart::{ChartOutput, ChartRequest, Credential, parse_chart_response},
    config::{AuthMode, ResponseSchema},
};

use super::{ChartProvider, join_url, read_success_body};

const DEFAULT_BASE_URL: &str = "https://astroapp.com/astro/apis";

/// AstroApp chart API. Every call carries the account API key in a `Key`
/// header in addition to the Basic or bearer credential.
#[derive(Clone)]
pub struct AstroAppProvider {
    api_key: String,
    username: String,
    password: String,
    auth: AuthMode,
    schema: ResponseSchema,
    base_url: String,
    http: Client,
}

impl std::fmt::Debug for AstroAppProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AstroAppProvider")
            .field("username", &self.username)
            .field("auth", &self.auth)
            .field("schema", &self.schema)
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl AstroAppProvider {
    pub fn new(
        api_key: String,
        username: String,
        password: String,
        auth: AuthMode,
        schema: ResponseSchema,
        http: Client,
    ) -> Self {
        Self {
            api_key,
            username,
            password,
            auth,
            schema,
            base_url: DEFAULT_BASE_URL.to_string(),
            http,
        }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    fn post(&self, path: &str) -> RequestBuilder {
        self.http
            .post(join_url(&self.base_url, path))
            .header("Key", &self.api_key)
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: Option<String>,
}

fn parse_token(body: &str) -> Result<String> {
    let parsed: TokenResponse =
        serde_json::from_str(body).context("Failed to parse AstroApp token JSON")?;

    parsed
        .token
        .filter(|t| !t.is_empty())
        .ok_or_else(|| anyhow!("AstroApp authenticate response contained no token"))
}

fn authorize(req: RequestBuilder, credential: &Credential) -> RequestBuilder {
    match credential {
        Credential::Bearer(token) => req.bearer_auth(token),
        Credential::Basic { username, password } => req.basic_auth(username, Some(password)),
    }
}

#[async_trait]
impl ChartProvider for AstroAppProvider {
    async fn authenticate(&self) -> Result<Credential> {
        if self.auth == AuthMode::Basic {
            return Ok(Credential::Basic {
                username: self.username.clone(),
                password: self.password.clone(),
            });
        }

        info!(user = %self.username, "requesting AstroApp token");

        let res = self
            .post("/authenticate")
            .basic_auth(&self.username, Some(&self.password))
            .json(&serde_json::json!({}))
            .send()
            .await
            .context("Failed to send request to AstroApp (authenticate)")?;

        let body = read_success_body(res, "AstroApp authenticate").await?;
        let token = parse_token(&body)?;

        debug!("AstroApp token obtained");
        Ok(Credential::Bearer(token))
    }

    async fn compute_chart(
        &self,
        credential: &Credential,
        request: &ChartRequest,
    ) -> Result<ChartOutput> {
        let res = authorize(self.post("/chart"), credential)
            .json(request)
            .send()
            .await
            .context("Failed to send request to AstroApp (chart)")?;

        let body = read_success_body(res, "AstroApp chart").await?;
        parse_chart_response(&body, self.schema)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider(auth: AuthMode) -> AstroAppProvider {
        AstroAppProvider::new(
            "KEY".into(),
            "me@example.com".into(),
            "hunter2".into(),
            auth,
            ResponseSchema::ChartImageUrl,
            Client::new(),
        )
    }

    #[test]
    fn parses_token() {
        assert_eq!(parse_token(r#"{"token":"abc.def"}"#).unwrap(), "abc.def");
    }

    #[test]
    fn missing_token_is_an_error() {
        let err = parse_token(r#"{"error":"bad login"}"#).unwrap_err();
        assert!(err.to_string().contains("no token"));
        assert!(parse_token(r#"{"token":""}"#).is_err());
    }

    #[tokio::test]
    async fn basic_mode_skips_token_exchange() {
        // Points at an unroutable base URL: any network call would fail.
        let provider = provider(AuthMode::Basic).with_base_url("http://127.0.0.1:9".into());
        let credential = provider.authenticate().await.unwrap();
        assert_eq!(
            credential,
            Credential::Basic { username: "me@example.com".into(), password: "hunter2".into() }
        );
    }

    #[test]
    fn chart_request_carries_key_and_credential() {
        let p = provider(AuthMode::Bearer);
        let req = authorize(p.post("/chart"), &Credential::Bearer("tok".into()))
            .build()
            .unwrap();

        assert_eq!(req.url().as_str(), "https://astroapp.com/astro/apis/chart");
        assert_eq!(req.headers()["key"], "KEY");
        assert_eq!(req.headers()["authorization"], "Bearer tok");
    }

    #[test]
    fn debug_omits_secrets() {
        let dbg = format!("{:?}", provider(AuthMode::Bearer));
        assert!(dbg.contains("me@example.com"));
        assert!(!dbg.contains("hunter2"));
    }
}
