//! HTTP client for the app distribution service.
//!
//! Backs the `--publish` and `--mapping` flags: the final IPA and the dSYM
//! DWARF file are sent as multipart uploads authenticated with a bearer token.

use anyhow::{Context, Result, anyhow};
use ipabuild_sdk::{CollaboratorError, FinalArtifact, MappingUpload, MappingUploader, OptionSet, Publisher};
use reqwest::blocking::multipart::Form;
use reqwest::blocking::{Client, Response};
use serde::{Deserialize, de::DeserializeOwned};
use std::path::Path;
use std::time::Instant;
use tracing::info;

const USER_AGENT: &str = concat!("ipabuild/", env!("CARGO_PKG_VERSION"));

/// Format a file size in human-readable format (MB or KB).
fn format_file_size(bytes: u64) -> String {
    if bytes >= 1_000_000 {
        format!("{} MB", bytes / 1_000_000)
    } else if bytes >= 1_000 {
        format!("{} KB", bytes / 1_000)
    } else {
        format!("{} bytes", bytes)
    }
}

/// Get file size from path, returning 0 if unable to read metadata.
fn get_file_size(path: &Path) -> u64 {
    std::fs::metadata(path).map(|m| m.len()).unwrap_or(0)
}

/// Distribution service client.
#[derive(Debug, Clone)]
pub struct DistributionClient {
    http: Client,
    base_url: String,
    token: String,
    project_id: Option<String>,
}

/// Response to an app upload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppUpload {
    pub id: Option<String>,
    pub download_url: Option<String>,
}

/// Response to a mapping upload.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct MappingReceipt {
    pub id: Option<String>,
}

impl DistributionClient {
    pub fn new(
        base_url: impl Into<String>,
        token: impl Into<String>,
        project_id: Option<String>,
    ) -> Result<Self> {
        let http = Client::builder()
            .user_agent(USER_AGENT)
            .build()
            .context("building HTTP client")?;

        Ok(Self {
            http,
            base_url: base_url.into(),
            token: token.into(),
            project_id,
        })
    }

    pub fn project_id(&self) -> Option<&str> {
        self.project_id.as_deref()
    }

    /// Upload a finished IPA along with its metadata and optional changelog.
    pub fn upload_app(&self, artifact: &FinalArtifact, changelog: Option<&str>) -> Result<AppUpload> {
        let ipa = &artifact.ipa_path;
        if !ipa.is_file() {
            return Err(anyhow!("IPA not found at {:?}", ipa));
        }

        info!("Uploading IPA ({})...", format_file_size(get_file_size(ipa)));
        let start = Instant::now();

        let meta = &artifact.metadata;
        let mut form = Form::new()
            .text("name", meta.name.clone())
            .text("version", meta.version.clone())
            .text("build", meta.build.clone())
            .file("file", ipa)
            .with_context(|| format!("attaching {:?}", ipa))?;
        if let Some(changelog) = changelog {
            form = form.text("changelog", changelog.to_string());
        }

        let resp = self
            .http
            .post(self.api("apps"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .context("uploading IPA to distribution service")?;

        let result: AppUpload = parse_response(resp, "app upload")?;
        info!("  Uploaded IPA (took {}s)", start.elapsed().as_secs());
        if let Some(url) = &result.download_url {
            info!("  Download: {}", url);
        }

        Ok(result)
    }

    /// Upload a dSYM DWARF file for crash symbolication.
    pub fn upload_mapping(&self, file: &Path, version: &str, build: &str) -> Result<MappingReceipt> {
        let project_id = self
            .project_id
            .as_deref()
            .ok_or_else(|| anyhow!("mapping upload requires a project id (--project-id)"))?;
        if !file.is_file() {
            return Err(anyhow!("mapping file not found at {:?}", file));
        }

        info!("Uploading mapping file ({})...", format_file_size(get_file_size(file)));
        let start = Instant::now();

        let form = Form::new()
            .text("project_id", project_id.to_string())
            .text("version", version.to_string())
            .text("build", build.to_string())
            .file("file", file)
            .with_context(|| format!("attaching {:?}", file))?;

        let resp = self
            .http
            .post(self.api("mappings"))
            .bearer_auth(&self.token)
            .multipart(form)
            .send()
            .context("uploading mapping file to distribution service")?;

        let result = parse_response(resp, "mapping upload")?;
        info!("  Uploaded mapping file (took {}s)", start.elapsed().as_secs());

        Ok(result)
    }

    fn api(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

impl Publisher for DistributionClient {
    fn publish(&self, artifact: &FinalArtifact, options: &OptionSet) -> Result<(), CollaboratorError> {
        self.upload_app(artifact, options.changelog())
            .map(|_| ())
            .map_err(CollaboratorError::from)
    }
}

impl MappingUploader for DistributionClient {
    fn upload_mapping(&self, upload: &MappingUpload<'_>) -> Result<(), CollaboratorError> {
        DistributionClient::upload_mapping(self, upload.file, upload.version, upload.build)
            .map(|_| ())
            .map_err(CollaboratorError::from)
    }
}

fn parse_response<T: DeserializeOwned>(resp: Response, context: &str) -> Result<T> {
    let status = resp.status();
    let text = resp
        .text()
        .with_context(|| format!("reading distribution API response body for {}", context))?;

    if !status.is_success() {
        return Err(anyhow!(
            "distribution API {} failed (status {}): {}",
            context,
            status,
            text
        ));
    }

    if text.trim().is_empty() {
        return serde_json::from_str("{}").context("parsing empty response");
    }

    serde_json::from_str(&text)
        .with_context(|| format!("parsing distribution API response for {}", context))
}
