//! Request/response channel delegating OCR to the task that can read AI keys
//!
//! The orchestrator sends `(image, address, type)` and awaits a balance with
//! a deadline. The worker resolves the AI key per request, so a session that
//! unlocks mid-cycle is picked up without restarting anything.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::security::CredentialService;

use super::capture::ScreenshotType;
use super::vision::{parse_balance_text, VisionClient};

/// Turns an image into model text
#[async_trait]
pub trait OcrEngine: Send + Sync {
    async fn recognize(&self, image_base64: &str, screenshot_type: ScreenshotType) -> Result<String>;
}

/// Vision-model engine keyed through the credential service
pub struct VisionOcr {
    vision: VisionClient,
    credentials: Arc<CredentialService>,
}

impl VisionOcr {
    pub fn new(vision: VisionClient, credentials: Arc<CredentialService>) -> Self {
        Self { vision, credentials }
    }
}

#[async_trait]
impl OcrEngine for VisionOcr {
    async fn recognize(&self, image_base64: &str, screenshot_type: ScreenshotType) -> Result<String> {
        let settings = self.credentials.decrypted_settings().await?;
        let key = settings.active_ai_key();
        if key.is_empty() {
            return Err(Error::MissingConfig(settings.active_ai_key_field().to_string()));
        }
        self.vision
            .read_screenshot(settings.ai_provider, key, image_base64, screenshot_type)
            .await
    }
}

struct OcrRequest {
    image_base64: String,
    address: String,
    screenshot_type: ScreenshotType,
    reply: oneshot::Sender<Result<f64>>,
}

/// Cloneable sender side of the bus
#[derive(Clone)]
pub struct OcrHandle {
    tx: mpsc::Sender<OcrRequest>,
    timeout: Duration,
}

impl OcrHandle {
    /// Balance read from a screenshot
    ///
    /// An unreadable reply is `Ok(0.0)`; transport, key and timeout problems
    /// are errors.
    pub async fn process(
        &self,
        image_base64: String,
        address: &str,
        screenshot_type: ScreenshotType,
    ) -> Result<f64> {
        let (reply, response) = oneshot::channel();
        let request = OcrRequest {
            image_base64,
            address: address.to_string(),
            screenshot_type,
            reply,
        };
        self.tx
            .send(request)
            .await
            .map_err(|_| Error::Ocr("OCR worker has stopped".to_string()))?;

        match tokio::time::timeout(self.timeout, response).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::Ocr("OCR worker dropped the request".to_string())),
            Err(_) => Err(Error::Ocr(format!(
                "OCR for {} timed out after {}s",
                address,
                self.timeout.as_secs_f64()
            ))),
        }
    }
}

pub struct OcrBus;

impl OcrBus {
    /// Start the worker; it exits when every handle is dropped
    pub fn spawn(engine: Arc<dyn OcrEngine>, timeout: Duration) -> (OcrHandle, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<OcrRequest>(16);

        let worker = tokio::spawn(async move {
            info!("OCR worker started");
            while let Some(request) = rx.recv().await {
                let result = match engine
                    .recognize(&request.image_base64, request.screenshot_type)
                    .await
                {
                    Ok(text) => match parse_balance_text(&text) {
                        Some(balance) => {
                            debug!("OCR {} -> ${:.2}", request.address, balance);
                            Ok(balance)
                        }
                        None => {
                            warn!(
                                "OCR reply for {} is not numeric ({:?}), using 0",
                                request.address, text
                            );
                            Ok(0.0)
                        }
                    },
                    Err(e) => Err(e),
                };
                if request.reply.send(result).is_err() {
                    debug!("OCR caller for {} went away", request.address);
                }
            }
            info!("OCR worker stopped");
        });

        (OcrHandle { tx, timeout }, worker)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedEngine(&'static str);

    #[async_trait]
    impl OcrEngine for FixedEngine {
        async fn recognize(&self, _: &str, _: ScreenshotType) -> Result<String> {
            Ok(self.0.to_string())
        }
    }

    struct SlowEngine;

    #[async_trait]
    impl OcrEngine for SlowEngine {
        async fn recognize(&self, _: &str, _: ScreenshotType) -> Result<String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("1".to_string())
        }
    }

    struct KeylessEngine;

    #[async_trait]
    impl OcrEngine for KeylessEngine {
        async fn recognize(&self, _: &str, _: ScreenshotType) -> Result<String> {
            Err(Error::MissingConfig("openRouterApiKey".to_string()))
        }
    }

    #[tokio::test]
    async fn test_numeric_reply() {
        let (handle, _) = OcrBus::spawn(Arc::new(FixedEngine("$12,345.67")), Duration::from_secs(1));
        let balance = handle
            .process("AAAA".into(), "0xabc", ScreenshotType::Debank)
            .await
            .unwrap();
        assert_eq!(balance, 12345.67);
    }

    #[tokio::test]
    async fn test_unparseable_reply_is_zero() {
        let (handle, _) = OcrBus::spawn(Arc::new(FixedEngine("no numbers")), Duration::from_secs(1));
        let balance = handle
            .process("AAAA".into(), "0xabc", ScreenshotType::Jup)
            .await
            .unwrap();
        assert_eq!(balance, 0.0);
    }

    #[tokio::test]
    async fn test_missing_key_propagates() {
        let (handle, _) = OcrBus::spawn(Arc::new(KeylessEngine), Duration::from_secs(1));
        let err = handle
            .process("AAAA".into(), "0xabc", ScreenshotType::Debank)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingConfig(_)));
    }

    #[tokio::test]
    async fn test_timeout() {
        let (handle, _) = OcrBus::spawn(Arc::new(SlowEngine), Duration::from_millis(50));
        let err = handle
            .process("AAAA".into(), "0xabc", ScreenshotType::Debank)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ocr(ref m) if m.contains("timed out")));
    }

    #[tokio::test]
    async fn test_worker_exits_when_handles_dropped() {
        let (handle, worker) = OcrBus::spawn(Arc::new(FixedEngine("1")), Duration::from_secs(1));
        drop(handle);
        worker.await.unwrap();
    }
}
