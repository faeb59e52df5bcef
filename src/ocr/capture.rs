//! Screenshot capture for sources without an API

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use base64::prelude::*;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{keys, load_vec, save, KvStore};

/// Which dashboard a screenshot shows; selects the extraction prompt
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScreenshotType {
    Debank,
    Jup,
}

impl std::fmt::Display for ScreenshotType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ScreenshotType::Debank => write!(f, "debank"),
            ScreenshotType::Jup => write!(f, "jup"),
        }
    }
}

#[derive(Debug, Clone)]
pub struct CaptureTarget {
    pub url: String,
    pub address: String,
    pub screenshot_type: ScreenshotType,
}

#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub base64: String,
    pub mime: &'static str,
}

impl CapturedImage {
    pub fn data_uri(&self) -> String {
        format!("data:{};base64,{}", self.mime, self.base64)
    }
}

/// Scratch capture context, opened once per update cycle
///
/// Callers must pair every successful `open_context` with `close_context`,
/// on error paths too.
#[async_trait]
pub trait ScreenCapture: Send + Sync {
    async fn open_context(&self) -> Result<()>;

    async fn capture(&self, target: &CaptureTarget) -> Result<CapturedImage>;

    async fn close_context(&self) -> Result<()>;
}

/// Reads `{dir}/{address}.png|.jpg|.jpeg` written by an external capture tool
pub struct FileCapture {
    dir: PathBuf,
    open: AtomicBool,
}

impl FileCapture {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self {
            dir: dir.into(),
            open: AtomicBool::new(false),
        }
    }

    pub fn is_open(&self) -> bool {
        self.open.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ScreenCapture for FileCapture {
    async fn open_context(&self) -> Result<()> {
        tokio::fs::create_dir_all(&self.dir).await?;
        self.open.store(true, Ordering::SeqCst);
        debug!("Capture context opened on {}", self.dir.display());
        Ok(())
    }

    async fn capture(&self, target: &CaptureTarget) -> Result<CapturedImage> {
        if !self.is_open() {
            return Err(Error::Ocr("capture context is not open".to_string()));
        }

        for (ext, mime) in [("png", "image/png"), ("jpg", "image/jpeg"), ("jpeg", "image/jpeg")] {
            let path = self.dir.join(format!("{}.{}", target.address, ext));
            if !path.exists() {
                continue;
            }
            let bytes = tokio::fs::read(&path).await?;
            info!("Captured {} for {} from {}", target.screenshot_type, target.address, path.display());
            return Ok(CapturedImage {
                base64: BASE64_STANDARD.encode(bytes),
                mime,
            });
        }

        Err(Error::Ocr(format!(
            "no screenshot of {} found in {} (expected {}.png)",
            target.url,
            self.dir.display(),
            target.address
        )))
    }

    async fn close_context(&self) -> Result<()> {
        self.open.store(false, Ordering::SeqCst);
        debug!("Capture context closed");
        Ok(())
    }
}

/// Persisted screenshot with its OCR outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScreenshotRecord {
    pub address: String,
    pub screenshot_type: ScreenshotType,
    pub captured_at: DateTime<Utc>,
    pub image_base64: String,
    pub balance: Option<f64>,
}

/// Append to the rolling buffer, dropping the oldest beyond `cap`
pub fn push_screenshot(buffer: &mut Vec<ScreenshotRecord>, record: ScreenshotRecord, cap: usize) {
    buffer.push(record);
    if buffer.len() > cap {
        let excess = buffer.len() - cap;
        buffer.drain(..excess);
    }
}

/// Load, append and persist the screenshot buffer
pub async fn record_screenshot(store: &dyn KvStore, record: ScreenshotRecord, cap: usize) -> Result<()> {
    let mut buffer: Vec<ScreenshotRecord> = load_vec(store, keys::SCREENSHOTS).await?;
    push_screenshot(&mut buffer, record, cap);
    save(store, keys::SCREENSHOTS, &buffer).await
}
