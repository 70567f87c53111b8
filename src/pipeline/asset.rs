//! Garment image preloading. Fetch and decode run off the render path; the
//! result is polled.

use std::{
    fs,
    path::Path,
    sync::Arc,
    thread,
    time::Duration,
};

use anyhow::{Context, Result, anyhow};
use crossbeam_channel::{Receiver, RecvTimeoutError, TryRecvError, bounded};
use image::RgbaImage;
use reqwest::blocking::Client;

use crate::types::GarmentState;

/// Retrieves the raw bytes behind an image reference.
pub trait AssetFetcher: Send + Sync {
    fn fetch(&self, url: &str) -> Result<Vec<u8>>;
}

impl<F> AssetFetcher for F
where
    F: Fn(&str) -> Result<Vec<u8>> + Send + Sync,
{
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        self(url)
    }
}

/// HTTP(S) through a credential-less client; anything else is read from
/// disk, with or without a `file://` prefix.
pub struct DefaultFetcher {
    client: Client,
}

impl DefaultFetcher {
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("tryon-mirror/", env!("CARGO_PKG_VERSION")))
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;
        Ok(Self { client })
    }
}

impl AssetFetcher for DefaultFetcher {
    fn fetch(&self, url: &str) -> Result<Vec<u8>> {
        if url.starts_with("http://") || url.starts_with("https://") {
            let response = self
                .client
                .get(url)
                .send()
                .with_context(|| format!("failed to request {url}"))?
                .error_for_status()
                .with_context(|| format!("unexpected status for {url}"))?;
            let bytes = response
                .bytes()
                .with_context(|| format!("failed to read body of {url}"))?;
            return Ok(bytes.to_vec());
        }

        let path = Path::new(url.strip_prefix("file://").unwrap_or(url));
        fs::read(path).with_context(|| format!("failed to read {}", path.display()))
    }
}

/// The decoded garment. Immutable once loaded; clones share the bitmap.
#[derive(Clone, Debug)]
pub struct GarmentAsset {
    pub source_url: String,
    pub image: Option<Arc<RgbaImage>>,
    pub state: GarmentState,
}

pub fn fetch_and_decode(fetcher: &dyn AssetFetcher, url: &str) -> Result<RgbaImage> {
    if url.trim().is_empty() {
        return Err(anyhow!("garment has no image reference"));
    }
    let bytes = fetcher.fetch(url)?;
    let image = image::load_from_memory(&bytes)
        .with_context(|| format!("failed to decode garment image from {url}"))?
        .to_rgba8();
    if image.width() == 0 || image.height() == 0 {
        return Err(anyhow!("garment image from {url} is empty"));
    }
    Ok(image)
}

/// Loads one garment image on a worker thread.
pub struct AssetPreloader {
    asset: GarmentAsset,
    error: Option<String>,
    rx: Option<Receiver<Result<RgbaImage, String>>>,
}

impl AssetPreloader {
    pub fn spawn(url: impl Into<String>, fetcher: Arc<dyn AssetFetcher>) -> Self {
        let url = url.into();
        let (tx, rx) = bounded(1);
        let worker_url = url.clone();
        let spawned = thread::Builder::new()
            .name("garment-preload".into())
            .spawn(move || {
                let result = fetch_and_decode(fetcher.as_ref(), &worker_url)
                    .map_err(|err| format!("{err:#}"));
                let _ = tx.send(result);
            });

        let mut preloader = Self {
            asset: GarmentAsset {
                source_url: url,
                image: None,
                state: GarmentState::Pending,
            },
            error: None,
            rx: Some(rx),
        };
        if let Err(err) = spawned {
            preloader.fail(format!("failed to spawn garment loader: {err}"));
        }
        preloader
    }

    pub fn asset(&self) -> &GarmentAsset {
        &self.asset
    }

    pub fn state(&self) -> GarmentState {
        self.asset.state
    }

    pub fn image(&self) -> Option<&Arc<RgbaImage>> {
        self.asset.image.as_ref()
    }

    pub fn error(&self) -> Option<&str> {
        self.error.as_deref()
    }

    /// Picks up a finished load. Returns the new state when it changed.
    pub fn poll(&mut self) -> Option<GarmentState> {
        let rx = self.rx.as_ref()?;
        match rx.try_recv() {
            Ok(result) => Some(self.settle(result)),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                Some(self.settle(Err("garment loader exited unexpectedly".to_string())))
            }
        }
    }

    /// Blocks for up to `timeout` on a pending load.
    pub fn wait(&mut self, timeout: Duration) -> Option<GarmentState> {
        let rx = self.rx.as_ref()?;
        match rx.recv_timeout(timeout) {
            Ok(result) => Some(self.settle(result)),
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                Some(self.settle(Err("garment loader exited unexpectedly".to_string())))
            }
        }
    }

    fn settle(&mut self, result: Result<RgbaImage, String>) -> GarmentState {
        self.rx = None;
        match result {
            Ok(image) => {
                log::info!(
                    "garment image loaded ({}x{}) from {}",
                    image.width(),
                    image.height(),
                    self.asset.source_url
                );
                self.asset.image = Some(Arc::new(image));
                self.asset.state = GarmentState::Loaded;
            }
            Err(message) => self.fail(message),
        }
        self.asset.state
    }

    fn fail(&mut self, message: String) {
        log::warn!("garment image failed to load: {message}");
        self.rx = None;
        self.asset.state = GarmentState::Failed;
        self.error = Some(message);
    }
}
