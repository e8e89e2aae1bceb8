use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use clap::{ArgAction, Args, Parser, Subcommand};
use serde::Deserialize;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use certfill_core::docx::{DocumentModel, TemplatePackage};
use certfill_core::{
    build_placeholders, check_rendered, check_template, list_placeholders, render,
    CanonicalRecord, FillConfig, FillError, MergeOutcome, Overrides, TemplateStore,
    ValidationExpectations, DEFAULT_CONFIG,
};
use certfill_extract::{extract_record, ExtractConfig, ExtractSection, RawExtraction};
use certfill_llm::LlmProvider;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(name = "certfill", version = VERSION, about = "Fill certification report templates from CB test reports")]
struct Cli {
    /// Configuration file; a missing file means defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Extract a canonical record from a PDF extraction dump.
    Extract {
        input: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
        #[arg(short = 'o', long = "out", default_value = "record.json")]
        out: PathBuf,
    },
    /// Render a canonical record into a template.
    Render {
        record: PathBuf,
        #[command(flatten)]
        template: TemplateArgs,
        #[arg(short = 'o', long = "out", default_value = "report.docx")]
        out: PathBuf,
    },
    /// Extract and render in one go.
    Run {
        input: PathBuf,
        #[command(flatten)]
        model: ModelArgs,
        #[command(flatten)]
        template: TemplateArgs,
        #[arg(short = 'o', long = "out", default_value = "report.docx")]
        out: PathBuf,
        #[arg(long = "record-out")]
        record_out: Option<PathBuf>,
    },
    /// List the placeholders of a template, optionally against a record.
    Placeholders {
        template: PathBuf,
        #[arg(long)]
        record: Option<PathBuf>,
        #[arg(long)]
        overrides: Option<PathBuf>,
        #[arg(long, action = ArgAction::SetTrue)]
        json: bool,
    },
    /// Validate an already rendered document against its record.
    Check {
        document: PathBuf,
        #[arg(long)]
        record: PathBuf,
        #[arg(long)]
        overrides: Option<PathBuf>,
    },
}

#[derive(Args, Debug, Clone)]
struct ModelArgs {
    /// openai, azure or local.
    #[arg(long)]
    provider: Option<String>,
    #[arg(long)]
    model: Option<String>,
    #[arg(long = "pages-per-chunk")]
    pages_per_chunk: Option<usize>,
    #[arg(long = "max-concurrency")]
    max_concurrency: Option<usize>,
    #[arg(long = "no-translate", action = ArgAction::SetTrue)]
    no_translate: bool,
    /// Name recorded as the record's source document.
    #[arg(long = "source-name")]
    source_name: Option<String>,
}

#[derive(Args, Debug, Clone)]
struct TemplateArgs {
    /// Template file, or a directory to pick one from.
    #[arg(long, default_value = "templates")]
    template: PathBuf,
    /// JSON object of placeholder values that win over the record.
    #[arg(long)]
    overrides: Option<PathBuf>,
}

/// `certfill.toml`: the render configuration plus an `[extract]` table.
#[derive(Debug, Clone, Default)]
struct AppConfig {
    fill: FillConfig,
    extract: ExtractSection,
}

#[derive(Debug, Default, Deserialize)]
#[serde(default)]
struct ExtractFile {
    extract: ExtractSection,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));
    let app = load_config(&config_path)?;

    match cli.command {
        Commands::Extract { input, model, out } => {
            let outcome = run_extract(&input, &model, &app).await?;
            write_record(&outcome.record, &out)?;
            print_extract_summary(&outcome, &out);
        }
        Commands::Render {
            record,
            template,
            out,
        } => {
            let record = read_record(&record)?;
            run_render(&record, &template, &app, &out)?;
        }
        Commands::Run {
            input,
            model,
            template,
            out,
            record_out,
        } => {
            let outcome = run_extract(&input, &model, &app).await?;
            print_extract_summary(&outcome, &out);
            if let Some(path) = record_out {
                write_record(&outcome.record, &path)?;
            }
            run_render(&outcome.record, &template, &app, &out)?;
        }
        Commands::Placeholders {
            template,
            record,
            overrides,
            json,
        } => {
            let (path, bytes) = TemplateStore::load(&template)?;
            let Some(record) = record else {
                let names = list_placeholders(&bytes)?;
                if json {
                    println!("{}", serde_json::to_string_pretty(&names)?);
                } else {
                    println!("[certfill] {} placeholders in {}", names.len(), path.display());
                    for name in names {
                        println!("  {name}");
                    }
                }
                return Ok(());
            };
            let record = read_record(&record)?;
            let overrides = read_overrides(overrides.as_deref())?;
            let map = build_placeholders(&record, &app.fill, &overrides);
            let report = check_template(&bytes, &map)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&report)?);
            } else {
                println!(
                    "[certfill] {}: {} matched, {} unmatched, {} unused",
                    path.display(),
                    report.matched.len(),
                    report.unmatched.len(),
                    report.unused.len()
                );
                for name in &report.unmatched {
                    println!("  unmatched {name}");
                }
            }
        }
        Commands::Check {
            document,
            record,
            overrides,
        } => {
            let record = read_record(&record)?;
            let overrides = read_overrides(overrides.as_deref())?;
            let bytes = fs::read(&document)
                .with_context(|| format!("failed to read {}", document.display()))?;
            let package = TemplatePackage::open(&bytes)?;
            let doc = DocumentModel::load(&package)?;
            let map = build_placeholders(&record, &app.fill, &overrides);
            let expectations = ValidationExpectations::from_record(&record, &map);
            let failures = check_rendered(&doc, &expectations, &app.fill.validation)?;
            if failures.is_empty() {
                println!("[certfill] {} passed validation", document.display());
            } else {
                for failure in &failures {
                    eprintln!("  {failure}");
                }
                bail!("{} failed validation ({} problems)", document.display(), failures.len());
            }
        }
    }
    Ok(())
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn load_config(path: &Path) -> Result<AppConfig> {
    if !path.exists() {
        return Ok(AppConfig {
            fill: FillConfig::default().with_env(),
            ..AppConfig::default()
        });
    }
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read config {}", path.display()))?;
    parse_config(&contents).with_context(|| format!("invalid config {}", path.display()))
}

fn parse_config(contents: &str) -> Result<AppConfig> {
    let fill = FillConfig::from_toml(contents)?.with_env();
    let extract = toml::from_str::<ExtractFile>(contents)
        .map_err(|e| anyhow!("invalid [extract] table: {e}"))?
        .extract;
    Ok(AppConfig { fill, extract })
}

/// Environment, then `[extract]`, then command-line flags.
fn resolve_extract_config(args: &ModelArgs, app: &AppConfig) -> Result<ExtractConfig> {
    let mut config = app.extract.apply(ExtractConfig::from_env());
    if let Some(provider) = &args.provider {
        config.provider = provider.clone();
    }
    if let Some(model) = &args.model {
        config.model = model.clone();
    }
    if let Some(pages) = args.pages_per_chunk {
        config.pages_per_chunk = pages;
    }
    if let Some(max) = args.max_concurrency {
        config.max_concurrency = max;
    }
    if args.no_translate {
        config.translate = false;
    }
    config.provider()?;
    Ok(config)
}

async fn run_extract(input: &Path, args: &ModelArgs, app: &AppConfig) -> Result<MergeOutcome> {
    let config = resolve_extract_config(args, app)?;
    let contents = fs::read_to_string(input)
        .with_context(|| format!("failed to read {}", input.display()))?;
    let raw: RawExtraction = serde_json::from_str(&contents)
        .with_context(|| format!("{} is not an extraction dump", input.display()))?;
    let client = config.client()?;
    if client.provider() == LlmProvider::Local {
        warn!("local provider returns empty extractions");
    }
    let source = args.source_name.clone().or_else(|| source_name(input));
    info!(input = %input.display(), provider = %client.provider().as_str(), "extracting");
    extract_record(&raw, &client, &config, source.as_deref()).await
}

/// The PDF the dump was made from: `report.json` -> `report.pdf`.
fn source_name(input: &Path) -> Option<String> {
    let stem = input.file_stem()?.to_str()?;
    Some(format!("{stem}.pdf"))
}

fn run_render(
    record: &CanonicalRecord,
    template: &TemplateArgs,
    app: &AppConfig,
    out: &Path,
) -> Result<()> {
    let overrides = read_overrides(template.overrides.as_deref())?;
    let (template_path, bytes) = TemplateStore::load(&template.template)?;
    info!(template = %template_path.display(), "rendering");
    let report = match render(record, &bytes, &overrides, &app.fill) {
        Ok(report) => report,
        Err(err @ FillError::Validation(_)) => {
            for failure in err.validation_failures() {
                eprintln!("  {failure}");
            }
            return Err(anyhow!(err)).context("rendered report rejected");
        }
        Err(err) => return Err(anyhow!(err)).context("render failed"),
    };
    if let Some(parent) = out.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
    }
    fs::write(out, &report.bytes).with_context(|| format!("failed to write {}", out.display()))?;
    let stats = &report.stats;
    println!(
        "[certfill] {} written ({} placeholders, {} checkboxes, {} blocks, {} form controls)",
        out.display(),
        stats.placeholders_filled,
        stats.glyph_checkboxes_ticked,
        stats.blocks_rendered,
        stats.form_controls_patched
    );
    Ok(())
}

fn read_record(path: &Path) -> Result<CanonicalRecord> {
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    serde_json::from_str(&contents)
        .with_context(|| format!("{} is not a canonical record", path.display()))
}

fn write_record(record: &CanonicalRecord, path: &Path) -> Result<()> {
    let json = serde_json::to_string_pretty(record)?;
    fs::write(path, json).with_context(|| format!("failed to write {}", path.display()))
}

fn read_overrides(path: Option<&Path>) -> Result<Overrides> {
    let Some(path) = path else {
        return Ok(Overrides::new());
    };
    let contents =
        fs::read_to_string(path).with_context(|| format!("failed to read {}", path.display()))?;
    parse_overrides(&contents).with_context(|| format!("invalid overrides {}", path.display()))
}

/// A flat JSON object; numbers and booleans are taken as their text.
fn parse_overrides(contents: &str) -> Result<Overrides> {
    let value: serde_json::Value = serde_json::from_str(contents)?;
    let serde_json::Value::Object(object) = value else {
        bail!("overrides must be a JSON object");
    };
    let mut overrides = Overrides::new();
    for (key, value) in object {
        let text = match value {
            serde_json::Value::String(text) => text,
            serde_json::Value::Number(n) => n.to_string(),
            serde_json::Value::Bool(b) => b.to_string(),
            serde_json::Value::Null => String::new(),
            _ => bail!("override {key:?} is not a string"),
        };
        overrides.insert(key, text);
    }
    Ok(overrides)
}

fn print_extract_summary(outcome: &MergeOutcome, out: &Path) {
    let stats = &outcome.stats;
    println!(
        "[certfill] extracted {} ({} of {} chunks failed, {} calls, {} tokens) -> {}",
        outcome.record.basic.model_main,
        stats.failed_chunks,
        stats.total_chunks,
        stats.usage.calls,
        stats.usage.total(),
        out.display()
    );
}
