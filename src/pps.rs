//! # PPS Archive Client
//!
//! Finds and downloads GPM granules from the NASA Precipitation Processing
//! System (PPS) HTTPS archive. Accounts are created at
//! <https://registration.pps.eosdis.nasa.gov/registration/>; PPS uses the
//! registered e-mail address as both user name and password.
//!
//! Archive directories are organised per observation day, e.g.
//! `https://arthurhouhttps.pps.eosdis.nasa.gov/gpmdata/2021/05/15/radar/`.
//! A search lists the directory of every day touched by the time window and
//! keeps the granules whose scan period overlaps it.

use crate::granule::{GranuleName, TimeWindow};
use chrono::{Datelike, NaiveDate};
use indicatif::{ProgressBar, ProgressStyle};
use log::{debug, info, warn};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;

#[derive(Error, Debug)]
pub enum PpsError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("PPS rejected the credentials for user '{0}'")]
    Unauthorized(String),

    #[error("PPS returned {status} for {url}")]
    Status { status: StatusCode, url: String },

    #[error("Granule '{0}' not found on PPS")]
    NotFound(String),

    #[error("Download of {url} failed after {attempts} attempts: {message}")]
    Exhausted {
        url: String,
        attempts: u32,
        message: String,
    },

    #[error("Downloaded {actual} bytes from {url}, expected {expected}")]
    SizeMismatch {
        url: String,
        expected: u64,
        actual: u64,
    },
}

pub type PpsResult<T> = Result<T, PpsError>;

/// Which PPS archive to query
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PpsServer {
    /// Standard research products (arthurhou)
    #[default]
    Research,
    /// Near-real-time products (jsimpson)
    NearRealTime,
}

impl PpsServer {
    pub fn base_url(&self) -> &'static str {
        match self {
            PpsServer::Research => "https://arthurhouhttps.pps.eosdis.nasa.gov",
            PpsServer::NearRealTime => "https://jsimpsonhttps.pps.eosdis.nasa.gov",
        }
    }

    /// Directory layout with `{year}`, `{month}` and `{day}` placeholders
    pub fn default_directory_template(&self) -> &'static str {
        match self {
            PpsServer::Research => "/gpmdata/{year}/{month}/{day}/radar/",
            PpsServer::NearRealTime => "/text/radar/DprL2/",
        }
    }
}

impl std::str::FromStr for PpsServer {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "research" | "arthurhou" => Ok(PpsServer::Research),
            "nrt" | "nearrealtime" | "near-real-time" | "jsimpson" => Ok(PpsServer::NearRealTime),
            other => Err(format!("Unknown PPS server '{}': expected Research or NRT", other)),
        }
    }
}

/// Connection and search settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PpsConfig {
    #[serde(default)]
    pub server: PpsServer,
    /// Registered PPS e-mail address
    pub username: String,
    /// Defaults to the user name
    #[serde(default)]
    pub password: Option<String>,
    /// Product prefix to keep from listings
    #[serde(default = "default_product")]
    pub product: String,
    /// Where downloaded granules are stored
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    /// Overrides the server's directory layout
    #[serde(default)]
    pub directory_template: Option<String>,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_product() -> String {
    "2A.GPM.DPR".to_string()
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_max_retries() -> u32 {
    3
}

fn default_timeout_secs() -> u64 {
    600
}

impl PpsConfig {
    pub fn new(username: &str) -> Self {
        PpsConfig {
            server: PpsServer::default(),
            username: username.to_string(),
            password: None,
            product: default_product(),
            data_dir: default_data_dir(),
            directory_template: None,
            max_retries: default_max_retries(),
            timeout_secs: default_timeout_secs(),
        }
    }

    pub fn password(&self) -> &str {
        self.password.as_deref().unwrap_or(&self.username)
    }

    /// URL of the archive directory for one observation day
    pub fn directory_url(&self, date: NaiveDate) -> String {
        let template = self
            .directory_template
            .as_deref()
            .unwrap_or_else(|| self.server.default_directory_template());
        let path = template
            .replace("{year}", &format!("{:04}", date.year()))
            .replace("{month}", &format!("{:02}", date.month()))
            .replace("{day}", &format!("{:02}", date.day()));
        format!("{}{}", self.server.base_url(), path)
    }
}

/// Extracts granule file names from an HTML directory index.
///
/// Only `href` targets ending in `.HDF5` are kept, reduced to their last
/// path component, deduplicated in listing order.
pub fn parse_listing(html: &str) -> Vec<String> {
    let mut names: Vec<String> = Vec::new();
    let mut rest = html;
    while let Some(pos) = rest.find("href=") {
        rest = &rest[pos + 5..];
        let quote = match rest.chars().next() {
            Some(q @ ('"' | '\'')) => q,
            _ => continue,
        };
        rest = &rest[1..];
        let Some(end) = rest.find(quote) else { break };
        let target = &rest[..end];
        rest = &rest[end + 1..];

        let name = target.rsplit('/').next().unwrap_or(target);
        if name.to_ascii_uppercase().ends_with(".HDF5") && !names.iter().any(|n| n == name) {
            names.push(name.to_string());
        }
    }
    names
}

/// A granule found on the archive
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteGranule {
    pub url: String,
    pub name: GranuleName,
}

pub struct PpsClient {
    client: Client,
    config: PpsConfig,
}

impl PpsClient {
    pub fn new(config: PpsConfig) -> PpsResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(30))
            .build()?;
        Ok(PpsClient { client, config })
    }

    pub fn config(&self) -> &PpsConfig {
        &self.config
    }

    async fn get(&self, url: &str) -> PpsResult<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .basic_auth(&self.config.username, Some(self.config.password()))
            .send()
            .await?;
        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                Err(PpsError::Unauthorized(self.config.username.clone()))
            }
            StatusCode::NOT_FOUND => Err(PpsError::NotFound(url.to_string())),
            status if !status.is_success() => Err(PpsError::Status {
                status,
                url: url.to_string(),
            }),
            _ => Ok(response),
        }
    }

    /// Granule file names in the archive directory for `date`
    pub async fn list(&self, date: NaiveDate) -> PpsResult<Vec<String>> {
        let url = self.config.directory_url(date);
        debug!("Listing {}", url);
        let html = self.get(&url).await?.text().await?;
        Ok(parse_listing(&html))
    }

    /// Granules of the configured product overlapping `window`, oldest first
    pub async fn search(&self, window: &TimeWindow) -> PpsResult<Vec<RemoteGranule>> {
        let mut found = Vec::new();
        for date in window.dates() {
            let directory = self.config.directory_url(date);
            let names = match self.list(date).await {
                Ok(names) => names,
                Err(PpsError::NotFound(_)) => {
                    warn!("No archive directory for {}", date);
                    continue;
                }
                Err(e) => return Err(e),
            };
            for file in names {
                let Ok(name) = file.parse::<GranuleName>() else {
                    continue;
                };
                if name.matches_product(&self.config.product) && name.overlaps(window) {
                    found.push(RemoteGranule {
                        url: format!("{}{}", directory, file),
                        name,
                    });
                }
            }
        }
        found.sort_by_key(|g| g.name.start);
        found.dedup_by(|a, b| a.url == b.url);
        info!("Found {} granule(s) between {} and {}", found.len(), window.start, window.end);
        Ok(found)
    }

    /// Downloads every granule overlapping `window`
    pub async fn fetch_window(&self, window: &TimeWindow) -> PpsResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for granule in self.search(window).await? {
            paths.push(self.download(&granule).await?);
        }
        Ok(paths)
    }

    /// Downloads one granule by its file name, looking in the directory of its observation date
    pub async fn fetch_named(&self, name: &GranuleName) -> PpsResult<PathBuf> {
        let file = name.to_string();
        let listing = self.list(name.date()).await?;
        if !listing.iter().any(|n| n == &file) {
            return Err(PpsError::NotFound(file));
        }
        let granule = RemoteGranule {
            url: format!("{}{}", self.config.directory_url(name.date()), file),
            name: name.clone(),
        };
        self.download(&granule).await
    }

    /// Downloads into the data directory with retries and exponential
    /// backoff. Existing complete files are reused.
    pub async fn download(&self, granule: &RemoteGranule) -> PpsResult<PathBuf> {
        fs::create_dir_all(&self.config.data_dir).await?;
        let file_name = granule.name.to_string();
        let final_path = self.config.data_dir.join(&file_name);
        if fs::metadata(&final_path).await.is_ok() {
            info!("{} already downloaded", final_path.display());
            return Ok(final_path);
        }
        let partial = self.config.data_dir.join(format!("{}.partial", file_name));

        let mut delay = Duration::from_secs(2);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match self.stream_to_file(&granule.url, &partial).await {
                Ok(()) => break,
                Err(e @ (PpsError::Unauthorized(_) | PpsError::NotFound(_))) => {
                    fs::remove_file(&partial).await.ok();
                    return Err(e);
                }
                Err(e) if attempt > self.config.max_retries => {
                    fs::remove_file(&partial).await.ok();
                    return Err(PpsError::Exhausted {
                        url: granule.url.clone(),
                        attempts: attempt,
                        message: e.to_string(),
                    });
                }
                Err(e) => {
                    warn!(
                        "Download of {} failed (attempt {}): {}; retrying in {}s",
                        file_name,
                        attempt,
                        e,
                        delay.as_secs()
                    );
                    tokio::time::sleep(delay).await;
                    delay = std::cmp::min(delay * 2, Duration::from_secs(120));
                }
            }
        }

        fs::rename(&partial, &final_path).await?;
        info!("Downloaded {}", final_path.display());
        Ok(final_path)
    }

    async fn stream_to_file(&self, url: &str, path: &Path) -> PpsResult<()> {
        let mut response = self.get(url).await?;
        let expected = response.content_length();

        let progress = match expected {
            Some(total) => ProgressBar::new(total),
            None => ProgressBar::new_spinner(),
        };
        if let Ok(style) = ProgressStyle::with_template(
            "{msg} [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec})",
        ) {
            progress.set_style(style.progress_chars("=> "));
        }
        progress.set_message(
            path.file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_default(),
        );

        let mut file = fs::File::create(path).await?;
        let mut written: u64 = 0;
        while let Some(chunk) = response.chunk().await? {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
            progress.set_position(written);
        }
        file.flush().await?;
        progress.finish_and_clear();

        if let Some(expected) = expected
            && expected != written
        {
            return Err(PpsError::SizeMismatch {
                url: url.to_string(),
                expected,
                actual: written,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    const LISTING: &str = r#"
<html><body><table>
<tr><td><a href="../">Parent Directory</a></td></tr>
<tr><td><a href="2A.GPM.DPR.V9-20211125.20210515-S172922-E190154.040977.V07A.HDF5">2A.GPM.DPR...</a></td></tr>
<tr><td><a href='/gpmdata/2021/05/15/radar/2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5'>x</a></td></tr>
<tr><td><a href="2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5">dup</a></td></tr>
<tr><td><a href="2A.GPM.Ku.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5">ku</a></td></tr>
<tr><td><a href="README.txt">readme</a></td></tr>
</table></body></html>
"#;

    #[test]
    fn test_parse_listing_keeps_unique_hdf5_names() {
        let names = parse_listing(LISTING);
        assert_eq!(names.len(), 3);
        assert_eq!(
            names[1],
            "2A.GPM.DPR.V9-20211125.20210515-S204332-E221604.040979.V07A.HDF5"
        );
        assert!(names.iter().all(|n| n.ends_with(".HDF5")));
    }

    #[test]
    fn test_parse_listing_ignores_unquoted_and_truncated_hrefs() {
        assert!(parse_listing("<a href=foo.HDF5>").is_empty());
        assert!(parse_listing("<a href=\"truncated.HDF5").is_empty());
    }

    #[test]
    fn test_directory_url_for_research_server() {
        let config = PpsConfig::new("someone@example.org");
        let date = NaiveDate::from_ymd_opt(2021, 5, 15).unwrap();
        assert_eq!(
            config.directory_url(date),
            "https://arthurhouhttps.pps.eosdis.nasa.gov/gpmdata/2021/05/15/radar/"
        );
        assert_eq!(config.password(), "someone@example.org");
    }

    #[test]
    fn test_directory_template_override() {
        let mut config = PpsConfig::new("someone@example.org");
        config.server = PpsServer::NearRealTime;
        config.directory_template = Some("/gpmdata/{year}/{month}/{day}/Ku/".to_string());
        let date = NaiveDate::from_ymd_opt(2021, 1, 2).unwrap();
        assert_eq!(
            config.directory_url(date),
            "https://jsimpsonhttps.pps.eosdis.nasa.gov/gpmdata/2021/01/02/Ku/"
        );
    }

    #[test]
    fn test_server_parsing_and_config_defaults() {
        assert_eq!("Research".parse::<PpsServer>().unwrap(), PpsServer::Research);
        assert_eq!("NRT".parse::<PpsServer>().unwrap(), PpsServer::NearRealTime);
        assert!("ftp".parse::<PpsServer>().is_err());

        let config: PpsConfig = serde_json::from_str(r#"{"username": "a@b.org"}"#).unwrap();
        assert_eq!(config.product, "2A.GPM.DPR");
        assert_eq!(config.server, PpsServer::Research);
        assert_eq!(config.max_retries, 3);
    }

    #[tokio::test]
    #[ignore] // Needs a registered PPS account in GPM_DPR_PPS_USERNAME
    async fn test_search_real_archive() -> Result<(), Box<dyn std::error::Error>> {
        let Ok(username) = std::env::var("GPM_DPR_PPS_USERNAME") else {
            return Ok(());
        };
        let client = PpsClient::new(PpsConfig::new(&username))?;
        let start = NaiveDate::from_ymd_opt(2021, 5, 15).unwrap().and_hms_opt(20, 43, 0).unwrap();
        let end = NaiveDate::from_ymd_opt(2021, 5, 15).unwrap().and_hms_opt(22, 17, 0).unwrap();
        let found = client.search(&TimeWindow::new(start, end)?).await?;
        assert!(found.iter().any(|g| g.name.orbit == 40979));
        Ok(())
    }
}
