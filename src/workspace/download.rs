//! HTTP downloads with a progress bar.

use anyhow::{bail, Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use std::path::Path;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

/// HTTP client for dataset archives and processor jars.
#[derive(Debug, Clone)]
pub struct Downloader {
    client: reqwest::Client,
    timeout_seconds: u64,
    show_progress: bool,
}

impl Downloader {
    /// Build a client whose requests, body included, give up after
    /// `timeout_seconds`.
    pub fn new(timeout_seconds: u64, show_progress: bool) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_seconds))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self {
            client,
            timeout_seconds,
            show_progress,
        })
    }

    fn request_error(&self, url: &str, e: reqwest::Error) -> anyhow::Error {
        if e.is_timeout() {
            anyhow::anyhow!("Download of {} timed out after {}s", url, self.timeout_seconds)
        } else if e.is_connect() {
            anyhow::anyhow!("Cannot connect to {}", url)
        } else {
            anyhow::anyhow!("Failed to download {}: {}", url, e)
        }
    }

    /// Download `url` to `dest`, replacing any existing file.
    ///
    /// The body is written to a sibling `.part` file first and renamed into
    /// place once complete, so an interrupted download never looks finished.
    pub async fn fetch(&self, url: &str, dest: &Path) -> Result<()> {
        info!("Downloading {}", url);

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        let mut response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| self.request_error(url, e))?;

        if !response.status().is_success() {
            bail!("Download of {} failed with HTTP {}", url, response.status());
        }

        let progress_bar = if self.show_progress {
            let pb = match response.content_length() {
                Some(len) => ProgressBar::new(len),
                None => ProgressBar::new_spinner(),
            };
            pb.set_style(
                ProgressStyle::default_bar()
                    .template(
                        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({eta})",
                    )
                    .unwrap_or_else(|_| ProgressStyle::default_bar())
                    .progress_chars("#>-"),
            );
            Some(pb)
        } else {
            None
        };

        let partial = dest.with_extension("part");
        let mut file = File::create(&partial)
            .await
            .with_context(|| format!("Failed to create {}", partial.display()))?;

        loop {
            let chunk = match response.chunk().await {
                Ok(Some(chunk)) => chunk,
                Ok(None) => break,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&partial).await;
                    return Err(self.request_error(url, e));
                }
            };
            file.write_all(&chunk).await?;
            if let Some(ref pb) = progress_bar {
                pb.inc(chunk.len() as u64);
            }
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&partial, dest)
            .await
            .with_context(|| format!("Failed to move download to {}", dest.display()))?;

        if let Some(pb) = progress_bar {
            pb.finish_with_message("Download complete");
        }

        debug!("Saved {} to {}", url, dest.display());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;
    use tokio::io::AsyncReadExt;
    use tokio::net::TcpListener;

    /// Serve one connection. `body` of `None` accepts and never answers.
    async fn serve_once(body: Option<&'static str>) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}/njr-1_dataset.zip", listener.local_addr().unwrap());

        tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = [0u8; 1024];
            let _ = socket.read(&mut request).await;
            match body {
                Some(body) => {
                    let response = format!(
                        "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                        body.len(),
                        body
                    );
                    socket.write_all(response.as_bytes()).await.unwrap();
                    socket.shutdown().await.unwrap();
                }
                None => tokio::time::sleep(Duration::from_secs(30)).await,
            }
        });

        url
    }

    fn no_proxy(timeout_seconds: u64) -> Downloader {
        Downloader {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(timeout_seconds))
                .no_proxy()
                .build()
                .unwrap(),
            timeout_seconds,
            show_progress: false,
        }
    }

    #[tokio::test]
    async fn test_fetch_writes_destination() {
        let url = serve_once(Some("PK archive")).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("nested/dataset.zip");

        no_proxy(10).fetch(&url, &dest).await.unwrap();

        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "PK archive");
        assert!(!dest.with_extension("part").exists());
    }

    #[tokio::test]
    async fn test_stalled_download_times_out() {
        let url = serve_once(None).await;
        let dir = TempDir::new().unwrap();
        let dest = dir.path().join("dataset.zip");

        let err = no_proxy(1).fetch(&url, &dest).await.unwrap_err();

        assert!(err.to_string().contains("timed out after 1s"), "{:#}", err);
        assert!(!dest.exists());
    }

    #[test]
    fn test_new_builds_client() {
        let downloader = Downloader::new(30, false).unwrap();
        assert_eq!(downloader.timeout_seconds, 30);
    }
}
