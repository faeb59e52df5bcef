//! Vision and chat completions over OpenAI-compatible providers

use std::sync::Arc;

use regex::Regex;
use serde_json::{json, Value};
use tracing::debug;

use crate::config::AiConfig;
use crate::error::{Error, Result};
use crate::exchange::transport::{HttpRequest, HttpTransport};
use crate::wallet::AiProvider;

use super::capture::ScreenshotType;

lazy_static::lazy_static! {
    static ref NUMBER: Regex = Regex::new(r"\d[\d,]*(?:\.\d+)?").expect("Invalid number regex");
}

const DEBANK_PROMPT: &str = "This is a screenshot of a DeBank wallet profile. \
Reply with only the total USD net worth shown at the top of the page, as a plain number \
without currency symbols or text.";

const JUP_PROMPT: &str = "This is a screenshot of a Jupiter (jup.ag) portfolio page. \
Reply with only the total portfolio value in USD, as a plain number without currency \
symbols or text.";

const ANALYSIS_PROMPT: &str = "You are a cautious crypto portfolio reviewer. Given the \
holdings summary below, point out concentration, custody and counterparty risks and \
suggest concrete rebalancing steps. Keep it under 200 words.";

pub fn prompt_for(screenshot_type: ScreenshotType) -> &'static str {
    match screenshot_type {
        ScreenshotType::Debank => DEBANK_PROMPT,
        ScreenshotType::Jup => JUP_PROMPT,
    }
}

/// First numeric token of a model reply, `$` and thousands separators ignored
pub fn parse_balance_text(text: &str) -> Option<f64> {
    let token = NUMBER.find(text)?;
    token.as_str().replace(',', "").parse().ok()
}

pub struct VisionClient {
    http: Arc<dyn HttpTransport>,
    config: AiConfig,
}

impl VisionClient {
    pub fn new(http: Arc<dyn HttpTransport>, config: AiConfig) -> Self {
        Self { http, config }
    }

    fn endpoint(&self, provider: AiProvider) -> &str {
        match provider {
            AiProvider::Openrouter => &self.config.openrouter_url,
            AiProvider::Siliconflow => &self.config.siliconflow_url,
        }
    }

    async fn chat(&self, provider: AiProvider, api_key: &str, body: Value) -> Result<String> {
        if api_key.is_empty() {
            return Err(Error::MissingConfig(match provider {
                AiProvider::Openrouter => "openRouterApiKey".to_string(),
                AiProvider::Siliconflow => "siliconFlowApiKey".to_string(),
            }));
        }

        let request = HttpRequest::post_json(self.endpoint(provider), body.to_string())
            .header("Authorization", format!("Bearer {}", api_key));
        let response = self.http.send(request).await?;
        if !response.is_success() {
            return Err(Error::Ocr(format!(
                "{} HTTP {}: {}",
                provider,
                response.status,
                response.body.chars().take(200).collect::<String>()
            )));
        }

        let reply: Value = response.json()?;
        let content = reply["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| Error::Ocr(format!("{} returned no message content", provider)))?;
        debug!("{} replied with {} chars", provider, content.len());
        Ok(content.trim().to_string())
    }

    /// Ask the vision model for the balance shown in a screenshot
    ///
    /// `image` is a data URI or bare base64 PNG.
    pub async fn read_screenshot(
        &self,
        provider: AiProvider,
        api_key: &str,
        image: &str,
        screenshot_type: ScreenshotType,
    ) -> Result<String> {
        let image_url = if image.starts_with("data:") {
            image.to_string()
        } else {
            format!("data:image/png;base64,{}", image)
        };
        let body = json!({
            "model": self.config.vision_model,
            "temperature": 0,
            "max_tokens": 100,
            "messages": [{
                "role": "user",
                "content": [
                    { "type": "text", "text": prompt_for(screenshot_type) },
                    { "type": "image_url", "image_url": { "url": image_url } }
                ]
            }]
        });
        self.chat(provider, api_key, body).await
    }

    /// Free-text review of a holdings summary
    pub async fn analyze_portfolio(&self, provider: AiProvider, api_key: &str, summary: &str) -> Result<String> {
        let body = json!({
            "model": self.config.analysis_model,
            "temperature": 0.3,
            "messages": [
                { "role": "system", "content": ANALYSIS_PROMPT },
                { "role": "user", "content": summary }
            ]
        });
        self.chat(provider, api_key, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::transport::mock::MockTransport;

    fn reply(text: &str) -> String {
        json!({"choices":[{"message":{"role":"assistant","content": text}}]}).to_string()
    }

    #[test]
    fn test_parse_balance_text() {
        assert_eq!(parse_balance_text("$12,345.67"), Some(12345.67));
        assert_eq!(parse_balance_text("Total: 980 USD (approx 1000)"), Some(980.0));
        assert_eq!(parse_balance_text("0"), Some(0.0));
        assert_eq!(parse_balance_text("I cannot read this image"), None);
    }

    #[tokio::test]
    async fn test_read_screenshot_request_shape() {
        let http = Arc::new(MockTransport::new().route("openrouter.ai", 200, reply(" 4,200.5 \n")));
        let client = VisionClient::new(http.clone(), AiConfig::default());

        let text = client
            .read_screenshot(AiProvider::Openrouter, "sk-or", "AAAA", ScreenshotType::Debank)
            .await
            .unwrap();
        assert_eq!(text, "4,200.5");

        let request = &http.requests()[0];
        assert_eq!(request.header_value("Authorization"), Some("Bearer sk-or"));
        let body: Value = serde_json::from_str(request.body.as_deref().unwrap()).unwrap();
        assert_eq!(
            body["messages"][0]["content"][1]["image_url"]["url"],
            "data:image/png;base64,AAAA"
        );
    }

    #[tokio::test]
    async fn test_provider_selects_endpoint() {
        let http = Arc::new(MockTransport::new().route("siliconflow", 200, reply("ok")));
        let client = VisionClient::new(http.clone(), AiConfig::default());
        client
            .analyze_portfolio(AiProvider::Siliconflow, "sk-sf", "BTC 50%")
            .await
            .unwrap();
        assert!(http.requests()[0].url.contains("siliconflow"));
    }

    #[tokio::test]
    async fn test_missing_key() {
        let client = VisionClient::new(Arc::new(MockTransport::new()), AiConfig::default());
        let err = client
            .analyze_portfolio(AiProvider::Openrouter, "", "x")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::MissingConfig(f) if f == "openRouterApiKey"));
    }

    #[tokio::test]
    async fn test_upstream_error() {
        let http = Arc::new(MockTransport::new().route("openrouter.ai", 401, r#"{"error":"bad key"}"#));
        let client = VisionClient::new(http, AiConfig::default());
        let err = client
            .read_screenshot(AiProvider::Openrouter, "k", "AAAA", ScreenshotType::Jup)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Ocr(ref m) if m.contains("401")));
    }
}
