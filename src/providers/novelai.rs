use super::{Generation, GenerationRequest, LlmProvider, ProviderError, ensure_success};
use crate::catalog::ModelSpec;
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

pub const DEFAULT_BASE_URL: &str = "https://text.novelai.net";

/// NovelAI completes raw text: there is no chat format and no usage report,
/// so token counts fall back to the byte-ratio estimate.
#[derive(Clone)]
pub struct NovelAiProvider {
    client: Client,
    base_url: String,
    api_key: String,
    spec: ModelSpec,
}

impl NovelAiProvider {
    pub fn new(client: Client, base_url: String, api_key: String, spec: ModelSpec) -> Self {
        Self {
            client,
            base_url,
            api_key,
            spec,
        }
    }
}

fn compose_input(req: &GenerationRequest) -> String {
    if req.system.is_empty() {
        req.prompt.clone()
    } else {
        format!("{}\n{}", req.system, req.prompt)
    }
}

#[async_trait]
impl LlmProvider for NovelAiProvider {
    fn name(&self) -> &str {
        "novelai"
    }
    fn model(&self) -> &ModelSpec {
        &self.spec
    }

    async fn generate(&self, req: &GenerationRequest) -> Result<Generation, ProviderError> {
        #[derive(Serialize)]
        struct Parameters {
            use_string: bool,
            temperature: f32,
            min_length: u32,
            max_length: u32,
        }
        #[derive(Serialize)]
        struct Body<'a> {
            input: String,
            model: &'a str,
            parameters: Parameters,
        }
        #[derive(Deserialize)]
        struct Resp {
            #[serde(default)]
            output: String,
        }

        let body = Body {
            input: compose_input(req),
            model: &self.spec.api_model,
            parameters: Parameters {
                use_string: true,
                temperature: req.temperature,
                min_length: 1,
                max_length: req.max_tokens,
            },
        };

        let url = format!("{}/ai/generate", self.base_url.trim_end_matches('/'));
        let resp = self
            .client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let resp: Resp = ensure_success(resp).await?.json().await?;
        Generation::non_empty(resp.output, None)
    }
}
