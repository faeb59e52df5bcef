//! Screenshot + vision-model balance path for sources without an API

pub mod bus;
pub mod capture;
pub mod vision;

pub use bus::{OcrBus, OcrEngine, OcrHandle, VisionOcr};
pub use capture::{
    CaptureTarget, CapturedImage, FileCapture, ScreenCapture, ScreenshotRecord, ScreenshotType,
};
pub use vision::{parse_balance_text, VisionClient};
