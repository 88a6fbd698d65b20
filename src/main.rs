mod cache;
mod carrier;
mod catalog;
mod cli;
mod config;
mod dispatcher;
mod error;
mod export;
mod ledger;
mod pipeline;
mod planner;
mod prompt;
mod providers;
mod scene;
mod templating;
mod tokens;
mod transcript;

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use cache::ChunkCache;
use catalog::{ModelCatalog, ModelSpec, PRICING_VERSION};
use cli::{Cli, Commands, NarrateArgs, PlanArgs, RunOverrides};
use colored::*;
use config::Config;
use dispatcher::{BlockOutcome, DispatchSettings, Dispatcher};
use ledger::UsageLedger;
use providers::registry::build_provider;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

/// Peak request size, as a share of the model window, that earns a warning.
const PEAK_WARN_RATIO: f64 = 0.8;

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();

    let cli = Cli::parse();
    init_tracing(cli.verbose);
    let config_path = cli.config.as_deref();

    match cli.command {
        Commands::Narrate(args) => narrate(config_path, args).await?,
        Commands::Plan(args) => plan(config_path, args)?,
        Commands::Models => {
            let cfg = Config::load(config_path)?;
            let catalog = ModelCatalog::builtin().with_overrides(&cfg.pricing)?;
            println!("{} (prices as of {})", "Available models:".bold(), PRICING_VERSION);
            for m in catalog.iter() {
                println!(
                    "- {:<24} {:<10} {:>9} ctx  {}",
                    m.key, m.provider, m.max_input_tokens, m.pricing
                );
            }
        }
        Commands::ConfigPath => {
            println!("{}", Config::default_path()?.display());
        }
        Commands::InitConfig => {
            let path = Config::write_example_if_absent()?;
            println!("Wrote example config to {}", path.display());
        }
    }
    Ok(())
}

fn init_tracing(verbose: u8) {
    let default = match verbose {
        0 => "rusty_narrative=info",
        1 => "rusty_narrative=debug",
        _ => "rusty_narrative=trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

/// Loads config, applies flags and resolves the model. Every config error
/// surfaces here, before any transcript work.
fn resolve(config_path: Option<&Path>, overrides: &RunOverrides) -> Result<(Config, ModelSpec)> {
    let mut cfg = Config::load(config_path)?;
    overrides.apply(&mut cfg);
    cfg.validate()?;
    let catalog = ModelCatalog::builtin().with_overrides(&cfg.pricing)?;
    let spec = catalog
        .resolve(cfg.llm.provider.as_deref(), &cfg.llm.model_version)?
        .clone();
    pipeline::checked_budget(&cfg.processing, &spec)?;
    Ok((cfg, spec))
}

async fn narrate(config_path: Option<&Path>, args: NarrateArgs) -> Result<()> {
    let (cfg, spec) = resolve(config_path, &args.overrides)?;
    let provider = build_provider(&cfg, &spec)?;

    let exchanges = transcript::load(&args.input)
        .with_context(|| format!("loading transcript {}", args.input.display()))?;
    let prepared = pipeline::prepare(&cfg, &spec, &exchanges)?;
    for warning in &prepared.plan.warnings {
        eprintln!("{} {}", "[warn]".yellow(), warning);
    }
    if prepared.plan.is_empty() {
        eprintln!("{}", "[plan] transcript has no exchanges; writing an empty narrative".yellow());
    }
    let chunk_count = prepared.plan.chunks.len();
    eprintln!(
        "[plan] {} exchanges -> {} chunks (~{} tokens each) with {} {}",
        exchanges.len(),
        chunk_count,
        prepared.budget,
        spec.provider,
        spec.key
    );

    let ledger = Arc::new(UsageLedger::new());
    let settings = DispatchSettings {
        temperature: cfg.llm.temperature,
        concurrency: cfg.processing.concurrency,
        retry: cfg.retry_policy(),
    };
    let mut dispatcher = Dispatcher::new(provider, ledger.clone(), settings);
    if cfg.caching.is_enabled() && !args.no_cache {
        match ChunkCache::open_default() {
            Ok(cache) => {
                tracing::debug!(dir = %cache.dir().display(), "chunk cache enabled");
                dispatcher = dispatcher.with_cache(cache);
            }
            Err(e) => tracing::warn!(error = %e, "chunk cache unavailable"),
        }
    }

    let cancel = CancellationToken::new();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                eprintln!("{}", "[cancel] stopping; in-flight chunks are dropped".yellow());
                cancel.cancel();
            }
        }
    });
    let result = dispatcher.run(prepared.prompts, &cancel).await;
    watcher.abort();

    if result.was_cancelled() {
        print_usage(&ledger, &spec, result.cached_count());
        bail!("cancelled; no output written");
    }

    export::write_narrative(&args.output, &result.render())?;
    eprintln!("{} {}", "[done] wrote".green(), args.output.display());
    print_usage(&ledger, &spec, result.cached_count());

    let failed = result.failed();
    if let Some(path) = &args.usage_report {
        let numbers = failed.iter().map(|b| b.chunk_index + 1).collect();
        export::UsageReport::from_ledger(&ledger, spec.provider.as_str(), &spec.key, numbers)?.save(path)?;
        eprintln!("[usage] report written to {}", path.display());
    }
    if !result.is_complete() {
        for block in &failed {
            if let BlockOutcome::Failed { error, attempts } = &block.outcome {
                eprintln!(
                    "{} chunk {} of {} after {} attempt(s): {}",
                    "[failed]".red(),
                    block.chunk_index + 1,
                    chunk_count,
                    attempts,
                    error
                );
            }
        }
        bail!("{} of {} chunks could not be generated", failed.len(), chunk_count);
    }
    Ok(())
}

fn print_usage(ledger: &UsageLedger, spec: &ModelSpec, cached: usize) {
    eprintln!("{}", "Usage".bold());
    if ledger.is_empty() {
        eprintln!("  no provider requests were made (cached chunks: {cached})");
        return;
    }
    let totals = ledger.running_totals();
    eprintln!("  requests: {} (cached chunks: {})", totals.requests, cached);
    eprintln!(
        "  tokens:   in={} out={} total={}",
        totals.input_tokens,
        totals.output_tokens,
        totals.total_tokens()
    );
    match spec.pricing.subscription_plan() {
        Some(plan) => eprintln!("  cost:     included in subscription ({plan})"),
        None => eprintln!("  cost:     ${:.4} (prices as of {})", totals.cost, PRICING_VERSION),
    }
    if let Some(peak) = ledger.peak() {
        let ratio = peak.tokens as f64 / spec.max_input_tokens as f64;
        let line = format!(
            "  peak:     {} tokens in chunk {} ({:.1}% of the {}-token window)",
            peak.tokens,
            peak.chunk_index + 1,
            ratio * 100.0,
            spec.max_input_tokens
        );
        if ratio > PEAK_WARN_RATIO {
            tracing::warn!(tokens = peak.tokens, window = spec.max_input_tokens, "request close to the context window");
            eprintln!("{}", line.yellow());
        } else {
            eprintln!("{line}");
        }
    }
}

fn plan(config_path: Option<&Path>, args: PlanArgs) -> Result<()> {
    let (cfg, spec) = resolve(config_path, &args.overrides)?;
    let exchanges = transcript::load(&args.input)
        .with_context(|| format!("loading transcript {}", args.input.display()))?;
    let prepared = pipeline::prepare(&cfg, &spec, &exchanges)?;

    println!(
        "{}",
        format!(
            "{} ({}): {} exchanges, {} chunks, budget {} tokens/chunk, {} scene boundaries",
            spec.key,
            spec.provider,
            exchanges.len(),
            prepared.plan.chunks.len(),
            prepared.budget,
            prepared.boundaries.len()
        )
        .bold()
    );
    let estimates = prepared.estimates(&spec);
    for (chunk, estimate) in prepared.plan.chunks.iter().zip(&estimates) {
        let flag = if chunk.oversized { " oversized".yellow().to_string() } else { String::new() };
        println!(
            "  #{:<3} exchanges {:>4}..{:<4} ({:>3})  context {:>2}  owned ~{:>6}  prompt ~{:>6}{}",
            chunk.index + 1,
            chunk.owned.start,
            chunk.owned.end,
            chunk.len(),
            chunk.carried.len(),
            chunk.owned_tokens,
            estimate.input_tokens,
            flag
        );
    }
    let input: usize = estimates.iter().map(|e| e.input_tokens).sum();
    match prepared.estimated_input_cost(&spec) {
        Some(cost) => println!("estimated input: ~{input} tokens, ${cost:.4} before output (prices as of {PRICING_VERSION})"),
        None => println!(
            "estimated input: ~{input} tokens, {}",
            spec.pricing.subscription_plan().unwrap_or("subscription")
        ),
    }
    for warning in &prepared.plan.warnings {
        eprintln!("{} {}", "[warn]".yellow(), warning);
    }
    Ok(())
}
