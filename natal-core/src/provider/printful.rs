use anyhow::{Context, Result, anyhow};
use async_trait::async_trait;
use reqwest::{Client, multipart};
use serde::Deserialize;
use tracing::info;

use super::{PrintUploader, join_url, read_success_body};

const DEFAULT_BASE_URL: &str = "https://api.printful.com";

#[derive(Clone)]
pub struct PrintfulUploader {
    api_key: String,
    base_url: String,
    http: Client,
}

impl std::fmt::Debug for PrintfulUploader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PrintfulUploader")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl PrintfulUploader {
    pub fn new(api_key: String, http: Client) -> Self {
        Self { api_key, base_url: DEFAULT_BASE_URL.to_string(), http }
    }

    pub fn with_base_url(mut self, base_url: String) -> Self {
        self.base_url = base_url;
        self
    }

    async fn download(&self, image_url: &str) -> Result<(Vec<u8>, String)> {
        let res = self
            .http
            .get(image_url)
            .send()
            .await
            .context("Failed to download chart image")?;

        let status = res.status();
        if !status.is_success() {
            return Err(anyhow!("Chart image download failed with status {status}"));
        }

        let mime = res
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("image/png")
            .to_string();

        let bytes = res.bytes().await.context("Failed to read chart image bytes")?;
        Ok((bytes.to_vec(), mime))
    }
}

/// `stem` plus an extension matching `mime`, e.g. `chart.jpg` for
/// `image/jpeg`. Unknown types get no extension.
fn file_name_for(stem: &str, mime: &str) -> String {
    let essence = mime.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    let ext = match essence.as_str() {
        "image/png" => Some("png"),
        "image/jpeg" | "image/jpg" => Some("jpg"),
        "image/gif" => Some("gif"),
        "image/webp" => Some("webp"),
        "image/svg+xml" => Some("svg"),
        "application/pdf" => Some("pdf"),
        _ => None,
    };

    match ext {
        Some(ext) => format!("{stem}.{ext}"),
        None => stem.to_string(),
    }
}

#[derive(Debug, Deserialize)]
struct UploadResponse {
    result: Option<UploadResult>,
}

#[derive(Debug, Deserialize)]
struct UploadResult {
    url: Option<String>,
}

fn parse_upload(body: &str) -> Result<String> {
    let parsed: UploadResponse =
        serde_json::from_str(body).context("Failed to parse Printful upload JSON")?;

    parsed
        .result
        .and_then(|r| r.url)
        .filter(|u| !u.is_empty())
        .ok_or_else(|| anyhow!("Printful upload response contained no file URL"))
}

#[async_trait]
impl PrintUploader for PrintfulUploader {
    async fn upload_image(&self, image_url: &str, file_stem: &str) -> Result<String> {
        let (bytes, mime) = self.download(image_url).await?;
        let size = bytes.len();

        let part = multipart::Part::bytes(bytes)
            .file_name(file_name_for(file_stem, &mime))
            .mime_str(&mime)
            .context("Invalid chart image content type")?;
        let form = multipart::Form::new().part("file", part);

        let res = self
            .http
            .post(join_url(&self.base_url, "/files"))
            .bearer_auth(&self.api_key)
            .multipart(form)
            .send()
            .await
            .context("Failed to send request to Printful (file upload)")?;

        let body = read_success_body(res, "Printful upload").await?;
        let url = parse_upload(&body)?;

        info!(size, hosted = %url, "uploaded chart image");
        Ok(url)
    }
}
