use super::{Generation, GenerationRequest, LlmProvider, ProviderError, Usage, ensure_success};
use crate::catalog::ModelSpec;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
pub const DEFAULT_VERSION: &str = "2023-06-01";

#[derive(Clone)]
pub struct AnthropicProvider {
    client: Client,
    base_url: String,
    api_key: String,
    version: String,
    spec: ModelSpec,
}

impl AnthropicProvider {
    pub fn new(client: Client, base_url: String, api_key: String, version: String, spec: ModelSpec) -> Self {
        Self { client, base_url, api_key, version, spec }
    }
}

#[async_trait]
impl LlmProvider for AnthropicProvider {
    fn name(&self) -> &str { "anthropic" }
    fn model(&self) -> &ModelSpec { &self.spec }

    async fn generate(&self, req: &GenerationRequest) -> Result<Generation, ProviderError> {
        #[derive(Serialize)]
        struct ReqMsg<'a> { role: &'static str, content: &'a str }
        #[derive(Serialize)]
        struct Body<'a> {
            model: &'a str,
            messages: Vec<ReqMsg<'a>>,
            #[serde(skip_serializing_if = "Option::is_none")] system: Option<&'a str>,
            max_tokens: u32,
            temperature: f32,
        }
        #[derive(Deserialize)]
        #[serde(tag = "type", rename_all = "snake_case")]
        enum RespContent {
            Text { text: String },
            #[serde(other)]
            Other,
        }
        #[derive(Deserialize)]
        struct RespUsage { input_tokens: usize, output_tokens: usize }
        #[derive(Deserialize)]
        struct Resp { content: Vec<RespContent>, usage: Option<RespUsage> }

        let system = (!req.system.is_empty()).then_some(req.system.as_str());
        let body = Body {
            model: &self.spec.api_model,
            messages: vec![ReqMsg { role: "user", content: &req.prompt }],
            system,
            max_tokens: req.max_tokens,
            temperature: req.temperature,
        };

        let url = format!("{}/v1/messages", self.base_url.trim_end_matches('/'));
        let resp = self.client
            .post(url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", &self.version)
            .json(&body)
            .send().await?;
        let resp: Resp = ensure_success(resp).await?.json().await?;

        let mut text = String::new();
        for c in resp.content {
            if let RespContent::Text { text: t } = c {
                text.push_str(&t);
            }
        }
        let usage = resp.usage.map(|u| Usage { input_tokens: u.input_tokens, output_tokens: u.output_tokens });
        Generation::non_empty(text, usage)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::ModelCatalog;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn provider(base: String) -> AnthropicProvider {
        let spec = ModelCatalog::builtin().get("claude-3-haiku-latest").cloned().unwrap();
        AnthropicProvider::new(Client::new(), base, "key".into(), DEFAULT_VERSION.into(), spec)
    }

    fn request() -> GenerationRequest {
        GenerationRequest {
            system: "narrate".into(),
            prompt: "Character: hi\nScene: hello\n".into(),
            temperature: 0.5,
            max_tokens: 512,
        }
    }

    #[tokio::test]
    async fn joins_text_blocks_and_reads_usage() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1/messages"))
            .and(header("x-api-key", "key"))
            .and(header("anthropic-version", DEFAULT_VERSION))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "id": "msg_1",
                "type": "message",
                "content": [
                    {"type": "text", "text": "The door "},
                    {"type": "thinking", "thinking": "..."},
                    {"type": "text", "text": "creaks open."}
                ],
                "usage": {"input_tokens": 120, "output_tokens": 30}
            })))
            .expect(1)
            .mount(&server)
            .await;

        let generation = provider(server.uri()).generate(&request()).await.unwrap();
        assert_eq!(generation.text, "The door creaks open.");
        assert_eq!(generation.usage, Some(Usage { input_tokens: 120, output_tokens: 30 }));
    }

    #[tokio::test]
    async fn sends_system_separately() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(move |req: &wiremock::Request| {
                let body: serde_json::Value = serde_json::from_slice(&req.body).unwrap();
                assert_eq!(body["model"], "claude-3-haiku-20240307");
                assert_eq!(body["system"], "narrate");
                assert_eq!(body["messages"].as_array().unwrap().len(), 1);
                assert_eq!(body["max_tokens"], 512);
                ResponseTemplate::new(200).set_body_json(serde_json::json!({
                    "content": [{"type": "text", "text": "ok"}]
                }))
            })
            .mount(&server)
            .await;

        assert!(provider(server.uri()).generate(&request()).await.is_ok());
    }

    #[tokio::test]
    async fn overloaded_is_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(529).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let err = provider(server.uri()).generate(&request()).await.unwrap_err();
        assert!(matches!(err, ProviderError::Api { status: 529, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn bad_request_is_not_retryable() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(400).set_body_string("bad"))
            .mount(&server)
            .await;

        let err = provider(server.uri()).generate(&request()).await.unwrap_err();
        assert!(!err.is_retryable());
    }
}
