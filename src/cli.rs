use clap::{ArgAction, Args, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::Config;
use crate::prompt::NarrativeStyle;

#[derive(Parser, Debug)]
#[command(
    name = "rusty-narrative",
    author,
    version,
    about = "Turn roleplay transcripts into narrative prose with an LLM",
    long_about = None
)]
pub struct Cli {
    /// Optional path to a config file (toml/json)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    /// More log output (-v debug, -vv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Convert a transcript into a narrative
    Narrate(NarrateArgs),
    /// Show the chunk plan and estimated cost without calling a provider
    Plan(PlanArgs),
    /// List supported models with context windows and pricing
    Models,
    /// Print the default config path
    ConfigPath,
    /// Create an example config file if missing
    InitConfig,
}

#[derive(Args, Debug)]
pub struct NarrateArgs {
    /// Transcript: JSON array of {"prompt", "response"} objects
    pub input: PathBuf,

    /// Where to write the narrative (.html for an HTML page, anything else is text)
    pub output: PathBuf,

    #[command(flatten)]
    pub overrides: RunOverrides,

    /// Disable reading/writing the chunk cache
    #[arg(long)]
    pub no_cache: bool,

    /// Write a JSON usage report to this path
    #[arg(long, value_name = "PATH")]
    pub usage_report: Option<PathBuf>,
}

#[derive(Args, Debug)]
pub struct PlanArgs {
    /// Transcript: JSON array of {"prompt", "response"} objects
    pub input: PathBuf,

    #[command(flatten)]
    pub overrides: RunOverrides,
}

/// Flags that override the config file for one run.
#[derive(Args, Debug, Default)]
pub struct RunOverrides {
    /// Model key, e.g. gpt-4o, claude-3-haiku-latest, erato
    #[arg(short, long)]
    pub model: Option<String>,

    /// Provider: openai | anthropic | gemini | novelai (inferred from the model if omitted)
    #[arg(short, long)]
    pub provider: Option<String>,

    /// Exchanges from the previous chunk to carry as context
    #[arg(long, value_name = "N")]
    pub context_exchanges: Option<usize>,

    /// Token budget for the exchanges a chunk narrates
    #[arg(long, value_name = "TOKENS")]
    pub max_chunk_tokens: Option<usize>,

    /// Ignore scene boundaries and split on size only
    #[arg(long)]
    pub no_scene_split: bool,

    /// Narrative perspective
    #[arg(long, value_enum)]
    pub style: Option<NarrativeStyle>,

    /// Chunks generated at once
    #[arg(long, value_name = "N")]
    pub concurrency: Option<usize>,

    /// Temperature (0.0 - 2.0)
    #[arg(long)]
    pub temperature: Option<f32>,
}

impl RunOverrides {
    pub fn apply(&self, cfg: &mut Config) {
        if let Some(model) = &self.model {
            cfg.llm.model_version = model.clone();
            // A model given on the command line picks its own provider
            // unless one is given alongside it.
            cfg.llm.provider = self.provider.clone();
        } else if let Some(provider) = &self.provider {
            cfg.llm.provider = Some(provider.clone());
        }
        if let Some(k) = self.context_exchanges {
            cfg.processing.context_exchanges = k;
        }
        if let Some(n) = self.max_chunk_tokens {
            cfg.processing.max_chunk_tokens = Some(n);
        }
        if self.no_scene_split {
            cfg.processing.split_on_scene_changes = false;
        }
        if let Some(style) = self.style {
            cfg.processing.style = style;
        }
        if let Some(n) = self.concurrency {
            cfg.processing.concurrency = n;
        }
        if let Some(t) = self.temperature {
            cfg.llm.temperature = t;
        }
    }
}

impl Cli {
    pub fn parse() -> Self {
        <Self as Parser>::parse()
    }
}
