use thiserror::Error;

/// Bad or missing provider/model configuration. Always fatal, raised before
/// any chunking or generation starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown provider '{0}' (use openai|anthropic|gemini|novelai)")]
    UnknownProvider(String),
    #[error("unknown model '{model}'. Must be one of: {known}")]
    UnknownModel { model: String, known: String },
    #[error("model '{model}' belongs to provider '{expected}', not '{provider}'")]
    ProviderMismatch {
        model: String,
        provider: String,
        expected: String,
    },
    #[error("no API key for {provider}: set it in the config or export {env}")]
    MissingApiKey {
        provider: &'static str,
        env: &'static str,
    },
    #[error("pricing override for unknown model '{0}'")]
    UnknownPricingModel(String),
    #[error(
        "max_chunk_tokens = {budget} plus {output} response tokens does not fit the {window}-token window of '{model}'"
    )]
    ChunkBudgetExceedsWindow {
        model: String,
        budget: usize,
        output: usize,
        window: usize,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Malformed transcript input.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
    #[error("transcript is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("transcript must be a JSON array of exchanges, found {0}")]
    NotAnArray(&'static str),
    #[error("exchange {index} must be an object with prompt and response, found {found}")]
    NotAnObject { index: usize, found: &'static str },
    #[error("exchange {index} is missing the `{field}` field")]
    MissingField { index: usize, field: &'static str },
    #[error("exchange {index}: `{field}` must be a string, found {found}")]
    NotAString {
        index: usize,
        field: &'static str,
        found: &'static str,
    },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PlanError {
    #[error("max tokens per chunk must be greater than zero")]
    ZeroBudget,
    #[error("a chunk budget of {budget} tokens leaves no room for exchanges: the prompt template alone is ~{overhead} tokens")]
    BudgetBelowOverhead { budget: usize, overhead: usize },
}
