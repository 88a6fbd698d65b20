use std::path::Path;

use anyhow::Result;
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

use crate::planner::{Chunk, PromptOverhead};
use crate::templating;
use crate::tokens::ModelFamily;
use crate::transcript::Exchange;

const TEMPLATE_NAME: &str = "narrative";

pub const DEFAULT_TEMPLATE: &str = "Convert the following roleplay conversation into a {perspective} narrative story.
{voice}
{{ if context }}
Previous context (already narrated; use it only for continuity and do not retell it):
{{ for item in context }}Character: {item.prompt}
Scene: {item.response}
{{ endfor }}{{ endif }}
Current scene:
{{ for item in exchanges }}Character: {item.prompt}
Scene: {item.response}
{{ endfor }}
Guidelines:
1. {perspective_rule}
2. Show don't tell - use descriptive language
3. Maintain the emotional depth and character voice
4. Include all important details from the conversation
5. Preserve the pacing and tension
6. {opening}
7. {closing}";

#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum NarrativeStyle {
    #[default]
    FirstPerson,
    SecondPerson,
    ThirdPerson,
}

impl NarrativeStyle {
    fn perspective(self) -> &'static str {
        match self {
            Self::FirstPerson => "first-person",
            Self::SecondPerson => "second-person",
            Self::ThirdPerson => "third-person",
        }
    }

    fn voice(self) -> &'static str {
        match self {
            Self::FirstPerson => {
                "Maintain the character's perspective, emotions, and voice throughout the narrative."
            }
            Self::SecondPerson => {
                "Address the reader as the character, keeping their emotions and voice immediate."
            }
            Self::ThirdPerson => {
                "Stay close to the character's point of view while narrating from outside them."
            }
        }
    }

    fn rule(self) -> &'static str {
        match self {
            Self::FirstPerson => "Write in first-person perspective",
            Self::SecondPerson => "Write in second-person perspective",
            Self::ThirdPerson => "Write in third-person past tense",
        }
    }

    pub fn system_prompt(self) -> String {
        format!(
            "You are a skilled narrative writer converting roleplay conversations into engaging {} stories. \
Your task is to maintain the character's voice and perspective while transforming dialogue and scene descriptions \
into flowing narrative prose. Focus on showing rather than telling, and ensure all important details and emotional \
moments are preserved.",
            self.perspective()
        )
    }
}

impl std::fmt::Display for NarrativeStyle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.perspective())
    }
}

/// An exchange exactly as it appears in a prompt. The planner sizes chunks
/// with this, so budget estimates match what is sent.
pub fn format_exchange(exchange: &Exchange) -> String {
    format!("Character: {}\nScene: {}\n", exchange.prompt, exchange.response)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Prompt {
    pub system: String,
    pub user: String,
}

impl Prompt {
    /// Everything the model reads, for input token estimates.
    pub fn full_text(&self) -> String {
        format!("{}\n\n{}", self.system, self.user)
    }
}

#[derive(Serialize)]
struct ExchangeView<'a> {
    prompt: &'a str,
    response: &'a str,
}

impl<'a> From<&'a Exchange> for ExchangeView<'a> {
    fn from(e: &'a Exchange) -> Self {
        Self {
            prompt: &e.prompt,
            response: &e.response,
        }
    }
}

#[derive(Serialize)]
struct PromptContext<'a> {
    perspective: &'static str,
    voice: &'static str,
    perspective_rule: &'static str,
    context: Vec<ExchangeView<'a>>,
    exchanges: Vec<ExchangeView<'a>>,
    opening: &'static str,
    closing: &'static str,
    chunk_number: usize,
    chunk_count: usize,
}

pub struct PromptBuilder {
    style: NarrativeStyle,
    template: String,
}

impl PromptBuilder {
    /// Builds with the default template, or `template` if given. A custom
    /// template is test-rendered here so a broken one fails before any
    /// provider call.
    pub fn new(style: NarrativeStyle, template: Option<String>) -> Result<Self> {
        let builder = Self {
            style,
            template: template.unwrap_or_else(|| DEFAULT_TEMPLATE.to_string()),
        };
        let sample = [Exchange::new("I wave.", "They wave back.")];
        builder.render(&sample, &sample, 1, 2)?;
        Ok(builder)
    }

    pub fn from_template_file(style: NarrativeStyle, path: Option<&Path>) -> Result<Self> {
        let template = path.map(templating::load_template).transpose()?;
        Self::new(style, template)
    }

    pub fn build(&self, chunk: &Chunk, exchanges: &[Exchange], chunk_count: usize) -> Result<Prompt> {
        let user = self.render(
            chunk.carried_exchanges(exchanges),
            chunk.exchanges(exchanges),
            chunk.index + 1,
            chunk_count,
        )?;
        Ok(Prompt {
            system: self.style.system_prompt(),
            user,
        })
    }

    /// Tokens every prompt spends outside its exchanges, taking the largest
    /// over first, middle and last chunk wording.
    pub fn overhead(&self, family: ModelFamily) -> Result<PromptOverhead> {
        let system = self.style.system_prompt();
        let none: &[Exchange] = &[];
        let blank = [Exchange::new("", "")];
        let mut base = 0;
        let mut with_context = 0;
        for (number, count) in [(1, 1), (1, 99_999), (99_998, 99_999), (99_999, 99_999)] {
            let measure = |context: &[Exchange]| -> Result<usize> {
                let prompt = Prompt {
                    system: system.clone(),
                    user: self.render(context, none, number, count)?,
                };
                Ok(family.estimate(&prompt.full_text()))
            };
            base = base.max(measure(none)?);
            with_context = with_context.max(measure(&blank[..])?);
        }
        Ok(PromptOverhead {
            base,
            context: with_context.saturating_sub(base),
        })
    }

    fn render(
        &self,
        context: &[Exchange],
        owned: &[Exchange],
        chunk_number: usize,
        chunk_count: usize,
    ) -> Result<String> {
        let ctx = PromptContext {
            perspective: self.style.perspective(),
            voice: self.style.voice(),
            perspective_rule: self.style.rule(),
            context: context.iter().map(ExchangeView::from).collect(),
            exchanges: owned.iter().map(ExchangeView::from).collect(),
            opening: if chunk_number <= 1 {
                "Begin the story naturally"
            } else {
                "Continue the narrative seamlessly from the previous section"
            },
            closing: if chunk_number >= chunk_count {
                "Conclude the story appropriately"
            } else {
                "Lead naturally into the next section"
            },
            chunk_number,
            chunk_count,
        };
        templating::render(TEMPLATE_NAME, &self.template, &ctx)
    }
}
