//! oneof-routing CLI
//!
//! Command-line interface for building requests from schema sources, listing
//! the fields of an operation, and linting sources.

use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{Parser, Subcommand};
use oneof_routing::{
    active_fields, build_batch, build_request, field_choices, lint, load_registry, Channel,
    Discriminant, FieldChoices, FieldRegistry, FileStatus, Invocation, OptionLoader, RawInputs,
    ResolveError, Severity,
};
use serde_json::{json, Value};

#[derive(Parser)]
#[command(name = "oneof-routing")]
#[command(about = "Resolve discriminated-union field schemas into HTTP requests")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Build the request for one operation
    Resolve {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        #[command(flatten)]
        target: Target,

        /// JSON file with raw inputs keyed by field id
        #[arg(long)]
        inputs: Option<PathBuf>,

        /// Raw input as field=value (JSON, or a plain string); repeatable
        #[arg(long = "input", value_name = "FIELD=VALUE")]
        input: Vec<String>,

        /// Override the schema's base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Output file (stdout if not specified)
        #[arg(long)]
        output: Option<PathBuf>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// Build many requests from a JSON array of invocations
    Batch {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        /// JSON file: [{"discriminant": {...}, "inputs": {...}}, ...]
        invocations: PathBuf,

        /// Override the schema's base URL
        #[arg(long)]
        base_url: Option<String>,

        /// Pretty-print JSON output
        #[arg(long)]
        pretty: bool,
    },

    /// List the active fields of an operation
    Fields {
        /// Schema source: file path or URL (http:// or https://)
        schema: String,

        #[command(flatten)]
        target: Target,

        /// Fetch dynamic options from the API at this base URL
        #[arg(long)]
        load_options: Option<String>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Lint schema sources for errors (syntax, schema defects, suspicious fields)
    Lint {
        /// File or directory to lint
        path: PathBuf,

        /// Output format: text (default) or json
        #[arg(long, default_value = "text")]
        format: String,

        /// Treat warnings as errors
        #[arg(long)]
        strict: bool,

        /// Suppress progress output, only show errors
        #[arg(long, short)]
        quiet: bool,
    },
}

/// Resource, operation and variant selections.
#[derive(clap::Args)]
struct Target {
    /// Resource name (e.g., authentications)
    #[arg(long, short)]
    resource: String,

    /// Operation name (e.g., createAuthentication)
    #[arg(long, short)]
    operation: String,

    /// Selector value as field=value; repeatable
    #[arg(long = "select", value_name = "FIELD=VALUE")]
    select: Vec<String>,
}

impl Target {
    fn discriminant(&self) -> Result<Discriminant, String> {
        let mut discriminant = Discriminant::new(&self.resource, &self.operation);
        for pair in &self.select {
            let (field, value) = parse_pair(pair)?;
            discriminant = discriminant.select(field, value);
        }
        Ok(discriminant)
    }
}

fn main() -> ExitCode {
    // Default to warn if RUST_LOG not set
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "warn".into()),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Resolve {
            schema,
            target,
            inputs,
            input,
            base_url,
            output,
            pretty,
        } => run_resolve(ResolveArgs {
            schema,
            target,
            inputs,
            input,
            base_url,
            output,
            pretty,
        }),

        Commands::Batch {
            schema,
            invocations,
            base_url,
            pretty,
        } => run_batch(&schema, &invocations, base_url, pretty),

        Commands::Fields {
            schema,
            target,
            load_options,
            json,
        } => run_fields(&schema, &target, load_options, json),

        Commands::Lint {
            path,
            format,
            strict,
            quiet,
        } => run_lint(&path, &format, strict, quiet),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(code) => ExitCode::from(code),
    }
}

/// Split `field=value`; the value is JSON when it parses, else a string.
fn parse_pair(pair: &str) -> Result<(String, Value), String> {
    let (field, raw) = pair
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=VALUE, got \"{}\"", pair))?;
    if field.is_empty() {
        return Err(format!("empty field name in \"{}\"", pair));
    }
    let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
    Ok((field.to_string(), value))
}

fn open_registry(schema: &str, base_url: Option<String>) -> Result<FieldRegistry, u8> {
    let registry = load_registry(schema).map_err(|e| {
        eprintln!("Error: {}", e);
        e.exit_code() as u8
    })?;
    Ok(match base_url {
        Some(url) => registry.with_base_url(url),
        None => registry,
    })
}

fn to_json(value: &impl serde::Serialize, pretty: bool) -> Result<String, u8> {
    if pretty {
        serde_json::to_string_pretty(value)
    } else {
        serde_json::to_string(value)
    }
    .map_err(|e| {
        eprintln!("Error serializing output: {}", e);
        2u8
    })
}

fn report_resolve_error(e: &ResolveError) -> u8 {
    match e {
        ResolveError::Invalid { issues } => {
            eprintln!("Validation failed:");
            for issue in issues {
                eprintln!("  {}", issue);
            }
        }
        other => eprintln!("Error: {}", other),
    }
    e.exit_code() as u8
}

struct ResolveArgs {
    schema: String,
    target: Target,
    inputs: Option<PathBuf>,
    input: Vec<String>,
    base_url: Option<String>,
    output: Option<PathBuf>,
    pretty: bool,
}

fn run_resolve(args: ResolveArgs) -> Result<(), u8> {
    let ResolveArgs {
        schema,
        target,
        inputs: inputs_path,
        input,
        base_url,
        output,
        pretty,
    } = args;

    let registry = open_registry(&schema, base_url)?;
    let discriminant = target.discriminant().map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;

    let mut inputs = match &inputs_path {
        Some(path) => read_inputs(path)?,
        None => RawInputs::new(),
    };
    for pair in &input {
        let (field, value) = parse_pair(pair).map_err(|e| {
            eprintln!("Error: {}", e);
            2u8
        })?;
        inputs.insert(field, value);
    }

    let request = build_request(&registry, &discriminant, &inputs)
        .map_err(|e| report_resolve_error(&e))?;
    let json_output = to_json(&request, pretty)?;

    match output {
        Some(path) => {
            std::fs::write(&path, &json_output).map_err(|e| {
                eprintln!("Error writing to {}: {}", path.display(), e);
                3u8
            })?;
        }
        None => {
            println!("{}", json_output);
        }
    }

    Ok(())
}

fn read_inputs(path: &Path) -> Result<RawInputs, u8> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        eprintln!("Error reading {}: {}", path.display(), e);
        3u8
    })?;
    match serde_json::from_str::<Value>(&content) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => {
            eprintln!("Error: {} must contain a JSON object", path.display());
            Err(2)
        }
        Err(e) => {
            eprintln!("Error: invalid JSON in {}: {}", path.display(), e);
            Err(2)
        }
    }
}

fn run_batch(
    schema: &str,
    invocations_path: &Path,
    base_url: Option<String>,
    pretty: bool,
) -> Result<(), u8> {
    let registry = open_registry(schema, base_url)?;

    let content = std::fs::read_to_string(invocations_path).map_err(|e| {
        eprintln!("Error reading {}: {}", invocations_path.display(), e);
        3u8
    })?;
    let invocations: Vec<Invocation> = serde_json::from_str(&content).map_err(|e| {
        eprintln!("Error: invalid invocations in {}: {}", invocations_path.display(), e);
        2u8
    })?;

    let results = build_batch(&registry, &invocations);
    let failed = results.iter().filter(|r| r.is_err()).count();
    let output: Vec<Value> = results
        .into_iter()
        .map(|result| match result {
            Ok(request) => json!({ "request": request }),
            Err(ResolveError::Invalid { issues }) => json!({ "error": "invalid", "issues": issues }),
            Err(e) => json!({ "error": e.to_string() }),
        })
        .collect();

    println!("{}", to_json(&output, pretty)?);

    if failed == 0 {
        Ok(())
    } else {
        Err(1)
    }
}

fn run_fields(
    schema: &str,
    target: &Target,
    load_options: Option<String>,
    json_output: bool,
) -> Result<(), u8> {
    let registry = open_registry(schema, None)?;
    let discriminant = target.discriminant().map_err(|e| {
        eprintln!("Error: {}", e);
        2u8
    })?;
    let active = active_fields(&registry, &discriminant).map_err(|e| report_resolve_error(&e))?;
    let loader = option_loader(load_options)?;

    let mut rows = Vec::new();
    for field in active.iter() {
        let choices = field_choices(&active, &field.id, loader.as_deref())
            .map_err(|e| report_resolve_error(&e))?;
        let channel = match &field.channel {
            Channel::Path => "path".to_string(),
            Channel::Query { key, .. } => format!("query:{}", key),
            Channel::Body(path) if field.owner.is_some() => format!("variant:{}", path),
            Channel::Body(path) => format!("body:{}", path),
            Channel::None => "none".to_string(),
        };
        rows.push(json!({
            "id": field.id,
            "name": field.display_name,
            "kind": field.kind.as_str(),
            "required": field.required,
            "channel": channel,
            "selection": active.selection(&field.id),
            "choices": choices.items(),
            "freeText": choices.is_free_text(),
        }));
        if let FieldChoices::FreeText { cause: Some(cause) } = &choices {
            eprintln!("Warning: options for '{}' unavailable: {}", field.id, cause);
        }
    }

    if json_output {
        println!("{}", to_json(&rows, true)?);
        return Ok(());
    }

    for row in &rows {
        let marker = if row["required"] == json!(true) { "*" } else { " " };
        print!(
            "{} {:<24} {:<8} {}",
            marker,
            row["id"].as_str().unwrap_or_default(),
            row["kind"].as_str().unwrap_or_default(),
            row["channel"].as_str().unwrap_or_default()
        );
        if !row["selection"].is_null() {
            print!(" = {}", row["selection"]);
        }
        if let Some(choices) = row["choices"].as_array().filter(|c| !c.is_empty()) {
            let values: Vec<String> = choices.iter().map(|c| c["value"].to_string()).collect();
            print!(" [{}]", values.join(", "));
        }
        println!();
    }
    Ok(())
}

#[cfg(feature = "remote")]
fn option_loader(base_url: Option<String>) -> Result<Option<Box<dyn OptionLoader>>, u8> {
    Ok(base_url.map(|url| {
        Box::new(oneof_routing::HttpOptionLoader::new(url)) as Box<dyn OptionLoader>
    }))
}

#[cfg(not(feature = "remote"))]
fn option_loader(base_url: Option<String>) -> Result<Option<Box<dyn OptionLoader>>, u8> {
    match base_url {
        Some(_) => {
            eprintln!("Error: --load-options requires the `remote` feature");
            Err(2)
        }
        None => Ok(None),
    }
}

fn run_lint(path: &Path, format: &str, strict: bool, quiet: bool) -> Result<(), u8> {
    if !path.exists() {
        eprintln!("Error: path not found: {}", path.display());
        return Err(2);
    }

    let result = lint(path, strict);

    if format == "json" {
        println!("{}", to_json(&result, true)?);
    } else {
        if !quiet {
            println!("Linting {} ...\n", path.display());
        }

        for file_result in &result.results {
            let status_icon = match file_result.status {
                FileStatus::Ok => "\x1b[32m✓\x1b[0m",
                FileStatus::Warning => "\x1b[33m⚠\x1b[0m",
                FileStatus::Error => "\x1b[31m✗\x1b[0m",
            };

            if !quiet || file_result.status != FileStatus::Ok {
                println!("  {} {}", status_icon, file_result.file.display());
            }

            for diag in &file_result.diagnostics {
                let (color, label) = match diag.severity {
                    Severity::Error => ("\x1b[31m", "error"),
                    Severity::Warning => ("\x1b[33m", "warning"),
                };
                if quiet && diag.severity == Severity::Warning {
                    continue;
                }
                match &diag.operation {
                    Some(operation) => println!(
                        "    {}{}[{}]\x1b[0m: {} ({}) - {}",
                        color, label, diag.code, diag.path, operation, diag.message
                    ),
                    None => println!(
                        "    {}{}[{}]\x1b[0m: {} - {}",
                        color, label, diag.code, diag.path, diag.message
                    ),
                }
            }
        }

        let tally: Vec<String> = result
            .counts
            .iter()
            .map(|(code, n)| format!("{} {}", n, code))
            .collect();
        println!();
        match (result.is_ok(), tally.is_empty()) {
            (true, true) => println!(
                "\x1b[32m✓ {} files checked, all passed\x1b[0m",
                result.files_checked
            ),
            (true, false) => println!(
                "\x1b[32m✓ {} files checked, all passed ({})\x1b[0m",
                result.files_checked,
                tally.join(", ")
            ),
            (false, _) => println!(
                "\x1b[31m✗ {} files checked: {} passed, {} failed ({})\x1b[0m",
                result.files_checked,
                result.passed,
                result.failed,
                tally.join(", ")
            ),
        }
    }

    if result.is_ok() {
        Ok(())
    } else {
        Err(1)
    }
}
