use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use decor_contracts::design::{
    shopping_links, shopping_url, DesignRequest, FurnitureReport, RoomImage, StylePreset,
};
use decor_contracts::error::DecorError;
use decor_contracts::events::{DesignEvent, EventWriter};
use decor_contracts::models::{Capability, ModelSelection, ModelSelector, ModelSpec};
use decor_engine::{
    extractor_for, synthesizer_for, DecorConfig, DesignEngine, DEFAULT_MAX_ITEMS,
    MAX_ITEMS_LIMIT,
};
use serde_json::{json, Map, Value};

#[derive(Debug, Parser)]
#[command(
    name = "decor",
    version,
    about = "Restyle a room photo and find its furniture online"
)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Redesign a room photo, then list the furniture in the result")]
    Design(DesignArgs),
    #[command(about = "List the furniture in an existing image")]
    Extract(ExtractArgs),
    #[command(about = "Print the shopping search URL for a query")]
    Link(LinkArgs),
    #[command(about = "List the built-in style presets")]
    Styles,
}

#[derive(Debug, Parser)]
struct DesignArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    style: String,
    #[arg(long)]
    notes: Option<String>,
    #[arg(long)]
    out: PathBuf,
    #[arg(long)]
    events: Option<PathBuf>,
    #[arg(long)]
    image_model: Option<String>,
    #[arg(long)]
    vision_model: Option<String>,
    #[arg(long, default_value_t = DEFAULT_MAX_ITEMS, value_parser = parse_max_items)]
    max_items: usize,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct ExtractArgs {
    #[arg(long)]
    image: PathBuf,
    #[arg(long)]
    vision_model: Option<String>,
    #[arg(long, default_value_t = DEFAULT_MAX_ITEMS, value_parser = parse_max_items)]
    max_items: usize,
    #[arg(long)]
    json: bool,
    #[arg(long)]
    dryrun: bool,
}

#[derive(Debug, Parser)]
struct LinkArgs {
    #[arg(required = true, num_args = 1..)]
    query: Vec<String>,
}

const DRYRUN_IMAGE_MODEL: &str = "dryrun-image-1";
const DRYRUN_VISION_MODEL: &str = "dryrun-vision-1";

fn main() {
    dotenvy::dotenv().ok();
    match run(Cli::parse()) {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("decor error: {err:#}");
            std::process::exit(exit_code_for(&err));
        }
    }
}

fn run(cli: Cli) -> Result<i32> {
    match cli.command {
        Command::Design(args) => run_design(args, process_env),
        Command::Extract(args) => run_extract(args, process_env),
        Command::Link(args) => run_link(args),
        Command::Styles => {
            for preset in StylePreset::ALL {
                println!("{preset}");
            }
            Ok(0)
        }
    }
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    match err.downcast_ref::<DecorError>() {
        Some(decor_err) if decor_err.is_setup_error() => 2,
        _ => 1,
    }
}

fn parse_max_items(raw: &str) -> std::result::Result<usize, String> {
    let value: usize = raw
        .trim()
        .parse()
        .map_err(|_| format!("'{raw}' is not a whole number"))?;
    if !(1..=MAX_ITEMS_LIMIT).contains(&value) {
        return Err(format!("must be between 1 and {MAX_ITEMS_LIMIT}"));
    }
    Ok(value)
}

fn process_env(key: &str) -> Option<String> {
    env::var(key).ok()
}

fn run_design(args: DesignArgs, env: impl Fn(&str) -> Option<String>) -> Result<i32> {
    let selector = ModelSelector::default();
    let image_model = select_model(
        &selector,
        args.image_model.as_deref(),
        Capability::Edit,
        args.dryrun.then_some(DRYRUN_IMAGE_MODEL),
    )?;
    let vision_model = select_model(
        &selector,
        args.vision_model.as_deref(),
        Capability::Vision,
        args.dryrun.then_some(DRYRUN_VISION_MODEL),
    )?;
    let config = load_config(&[&image_model.model, &vision_model.model], env)?;
    let request = load_request(&args.image, &args.style, args.notes.as_deref())?;

    fs::create_dir_all(&args.out)
        .with_context(|| format!("failed to create {}", args.out.display()))?;
    let events_path = args
        .events
        .clone()
        .unwrap_or_else(|| args.out.join("events.jsonl"));
    let engine = DesignEngine::new(
        synthesizer_for(&image_model.model, config.as_ref())?,
        extractor_for(&vision_model.model, config.as_ref(), args.max_items)?,
    )
    .with_events(EventWriter::for_new_run(&events_path));
    for (stage, selection) in [("synthesis", &image_model), ("extraction", &vision_model)] {
        engine.emit_event(DesignEvent::ModelSelected, selection_payload(stage, selection));
    }

    let generated = engine.synthesize(&request)?;
    let artifact = args.out.join(format!(
        "design-{}.{}",
        timestamp_millis(),
        generated.image().extension()
    ));
    generated.image().save(&artifact)?;
    if !args.json {
        println!("Redesign saved to {}", artifact.display());
    }

    let report = engine
        .extract(generated.image())
        .with_context(|| format!("redesign kept at {}", artifact.display()))?;
    engine.finish(&report, Some(&artifact));

    if args.json {
        let mut payload = report_json(&report);
        payload.insert("image".to_string(), json!(artifact.to_string_lossy()));
        payload.insert("style".to_string(), json!(request.style_directive()));
        payload.insert("notes".to_string(), json!(request.notes()));
        payload.insert("imageModel".to_string(), json!(generated.model()));
        payload.insert("visionModel".to_string(), json!(vision_model.model.name));
        if let Some(events) = engine.events() {
            payload.insert("runId".to_string(), json!(events.run_id()));
        }
        println!("{}", serde_json::to_string_pretty(&Value::Object(payload))?);
    } else {
        println!(
            "Style: {} ({}x{}, {})",
            request.style_directive(),
            generated.image().width(),
            generated.image().height(),
            generated.model()
        );
        print!("{}", render_report(&report));
    }
    Ok(0)
}

fn run_extract(args: ExtractArgs, env: impl Fn(&str) -> Option<String>) -> Result<i32> {
    let selector = ModelSelector::default();
    let vision_model = select_model(
        &selector,
        args.vision_model.as_deref(),
        Capability::Vision,
        args.dryrun.then_some(DRYRUN_VISION_MODEL),
    )?;
    let config = load_config(&[&vision_model.model], env)?;
    let image = RoomImage::open(&args.image)
        .map_err(|err| DecorError::InvalidRequest(format!("{err:#}")))?;
    let extractor = extractor_for(&vision_model.model, config.as_ref(), args.max_items)?;
    let report = extractor.extract_report(&image)?;

    if args.json {
        let mut payload = report_json(&report);
        payload.insert("visionModel".to_string(), json!(extractor.model()));
        println!("{}", serde_json::to_string_pretty(&Value::Object(payload))?);
    } else {
        print!("{}", render_report(&report));
    }
    Ok(0)
}

fn run_link(args: LinkArgs) -> Result<i32> {
    let query = args.query.join(" ");
    if query.trim().is_empty() {
        return Err(DecorError::InvalidRequest("search query is blank".to_string()).into());
    }
    println!("{}", shopping_url(query.trim()));
    Ok(0)
}

fn load_request(path: &Path, style: &str, notes: Option<&str>) -> Result<DesignRequest> {
    let bytes = fs::read(path).map_err(|err| {
        DecorError::InvalidRequest(format!("failed reading {}: {err}", path.display()))
    })?;
    Ok(DesignRequest::from_encoded(bytes, style, notes)?)
}

fn select_model(
    selector: &ModelSelector,
    requested: Option<&str>,
    capability: Capability,
    forced: Option<&str>,
) -> Result<ModelSelection> {
    let selection = selector.select(forced.or(requested), capability)?;
    if selection.requested.is_some() {
        if let Some(reason) = selection.fallback_reason.as_deref() {
            eprintln!("decor: {reason} Using '{}'.", selection.model.name);
        }
    }
    Ok(selection)
}

// Credentials are checked before any file is read, and only when a
// selected model calls the network.
fn load_config(
    models: &[&ModelSpec],
    env: impl Fn(&str) -> Option<String>,
) -> Result<Option<DecorConfig>> {
    if models.iter().any(|model| model.provider.needs_api_key()) {
        return Ok(Some(DecorConfig::from_lookup(env)?));
    }
    Ok(None)
}

fn selection_payload(stage: &str, selection: &ModelSelection) -> Value {
    json!({
        "stage": stage,
        "model": selection.model.name,
        "provider": selection.model.provider.as_str(),
        "requested": selection.requested,
        "fallback_reason": selection.fallback_reason,
    })
}

fn report_json(report: &FurnitureReport) -> Map<String, Value> {
    let mut payload = Map::new();
    payload.insert("items".to_string(), json!(shopping_links(&report.items)));
    payload.insert("dropped".to_string(), json!(report.dropped));
    payload
}

fn render_report(report: &FurnitureReport) -> String {
    let mut out = String::new();
    if report.items.is_empty() {
        out.push_str("No furniture identified.\n");
    } else {
        out.push_str(&format!("Furniture ({}):\n", report.items.len()));
        for (index, link) in shopping_links(&report.items).iter().enumerate() {
            if link.color.is_empty() {
                out.push_str(&format!("  {}. {}\n", index + 1, link.name));
            } else {
                out.push_str(&format!("  {}. {} ({})\n", index + 1, link.name, link.color));
            }
            out.push_str(&format!("     {}\n", link.url));
        }
    }
    if report.dropped > 0 {
        out.push_str(&format!(
            "Skipped {} incomplete item(s) from the model response.\n",
            report.dropped
        ));
    }
    out
}

fn timestamp_millis() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis())
        .unwrap_or(0)
}
