use super::{Generation, GenerationRequest, LlmProvider, ProviderError, Usage, ensure_success};
use crate::catalog::ModelSpec;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

#[derive(Clone)]
pub struct OpenAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    spec: ModelSpec,
}

impl OpenAiProvider {
    pub fn new(client: Client, base_url: String, api_key: String, spec: ModelSpec) -> Self {
        Self {
            client,
            base_url,
            api_key,
            spec,
        }
    }
}

#[async_trait]
impl LlmProvider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }
    fn model(&self) -> &ModelSpec {
        &self.spec
    }

    async fn generate(&self, req: &GenerationRequest) -> Result<Generation, ProviderError> {
        #[derive(Serialize)]
        #[serde(tag = "role")]
        enum Msg<'a> {
            #[serde(rename = "system")]
            System { content: &'a str },
            #[serde(rename = "user")]
            User { content: &'a str },
        }
        #[derive(Serialize)]
        struct Body<'a> {
            model: &'a str,
            messages: Vec<Msg<'a>>,
            temperature: f32,
            max_tokens: u32,
        }
        #[derive(Deserialize)]
        struct Choice {
            message: ChoiceMsg,
        }
        #[derive(Deserialize)]
        struct ChoiceMsg {
            content: Option<String>,
        }
        #[derive(Deserialize)]
        struct RespUsage {
            prompt_tokens: usize,
            completion_tokens: usize,
        }
        #[derive(Deserialize)]
        struct Resp {
            choices: Vec<Choice>,
            usage: Option<RespUsage>,
        }

        let mut messages = Vec::with_capacity(2);
        if !req.system.is_empty() {
            messages.push(Msg::System { content: &req.system });
        }
        messages.push(Msg::User { content: &req.prompt });
        let body = Body {
            model: &self.spec.api_model,
            messages,
            temperature: req.temperature,
            max_tokens: req.max_tokens,
        };

        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let resp: Resp = ensure_success(resp).await?.json().await?;

        let text = resp
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        let usage = resp.usage.map(|u| Usage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
        });
        Generation::non_empty(text, usage)
    }
}
