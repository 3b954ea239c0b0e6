mod backend;
mod config;
mod errors;
mod params;
mod registry;
mod runner;
mod sandbox;
mod script;

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::{Map, Value};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::backend::HttpBackend;
use crate::config::Config;
use crate::registry::TemplateRegistry;
use crate::runner::{RunError, Runner};

const DEFAULT_CONFIG_PATH: &str = "config/memekit.toml";

fn print_help() {
    println!(
        "\
memekit v{}

Runs meme video templates and custom reel scripts against a media backend.

USAGE:
    memekit [OPTIONS] <COMMAND>

COMMANDS:
    list                        List available templates
    show <TEMPLATE_ID>          Show a template with its schema and code
    run <TEMPLATE_ID> [PARAMS]  Validate PARAMS and run a template
    run-custom <FILE> [PARAMS]  Run a reel script from FILE

    PARAMS is a JSON object, inline or as @path/to/params.json.

OPTIONS:
    -c, --config <PATH>    Configuration file [default: {DEFAULT_CONFIG_PATH}]
        --api-key <KEY>    Media backend API key (a \"Bearer \" prefix is accepted)
    -h, --help             Print this help message and exit
    -V, --version          Print version and exit

ENVIRONMENT VARIABLES:
    RUST_LOG           Log level filter for tracing
                       (e.g. debug, memekit=debug,warn)
    MEMEKIT_API_KEY    Media backend API key, used when --api-key is absent

EXAMPLES:
    memekit list
    memekit run walter_white_falling '{{\"video_id\": \"m-123\", \"text\": \"Me\"}}'
    memekit run-custom my_meme.reel @params.json",
        env!("CARGO_PKG_VERSION"),
    );
}

#[derive(Debug, PartialEq)]
enum Command {
    List,
    Show(String),
    Run { template_id: String, params: Option<String> },
    RunCustom { file: String, params: Option<String> },
}

#[derive(Debug, PartialEq)]
struct Cli {
    config_path: String,
    api_key: Option<String>,
    command: Command,
}

fn parse_args(args: impl IntoIterator<Item = String>) -> Result<Cli> {
    let mut config_path = DEFAULT_CONFIG_PATH.to_string();
    let mut api_key = None;
    let mut positional = Vec::new();

    let mut args = args.into_iter();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "-c" | "--config" => {
                config_path = args.next().ok_or_else(|| anyhow!("{arg} needs a value"))?;
            }
            "--api-key" => {
                api_key = Some(args.next().ok_or_else(|| anyhow!("{arg} needs a value"))?);
            }
            flag if flag.starts_with('-') && flag.len() > 1 => bail!("unknown option {flag}"),
            _ => positional.push(arg),
        }
    }

    let mut positional = positional.into_iter();
    let command = match positional.next().as_deref() {
        Some("list") => Command::List,
        Some("show") => Command::Show(
            positional
                .next()
                .ok_or_else(|| anyhow!("show needs a TEMPLATE_ID"))?,
        ),
        Some("run") => Command::Run {
            template_id: positional
                .next()
                .ok_or_else(|| anyhow!("run needs a TEMPLATE_ID"))?,
            params: positional.next(),
        },
        Some("run-custom") => Command::RunCustom {
            file: positional
                .next()
                .ok_or_else(|| anyhow!("run-custom needs a FILE"))?,
            params: positional.next(),
        },
        Some(other) => bail!("unknown command '{other}'"),
        None => bail!("no command given (try --help)"),
    };
    if let Some(extra) = positional.next() {
        bail!("unexpected argument '{extra}'");
    }

    Ok(Cli {
        config_path,
        api_key,
        command,
    })
}

/// Reads PARAMS: inline JSON, or `@path` to a JSON file. Absent means `{}`.
fn read_params(arg: Option<&str>) -> Result<Map<String, Value>> {
    let Some(arg) = arg else {
        return Ok(Map::new());
    };
    let text = match arg.strip_prefix('@') {
        Some(path) => std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read params file {path}"))?,
        None => arg.to_string(),
    };
    match serde_json::from_str(&text).context("PARAMS is not valid JSON")? {
        Value::Object(map) => Ok(map),
        other => bail!("PARAMS must be a JSON object, got {other}"),
    }
}

fn print_json(value: &Value) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Prints the error envelope and exits non-zero.
fn fail(err: RunError) -> ! {
    error!("Request failed ({}): {err}", err.status());
    println!(
        "{}",
        serde_json::to_string_pretty(&err.to_envelope()).unwrap_or_default()
    );
    std::process::exit(1);
}

async fn run(cli: Cli) -> Result<()> {
    info!("Loading configuration from {}", cli.config_path);
    let config = Config::load(&cli.config_path)
        .with_context(|| format!("Failed to load {}", cli.config_path))?;

    let registry = Arc::new(TemplateRegistry::load(&config.templates.registry)?);
    if registry.is_empty() {
        warn!("Template registry is empty");
    }

    let backend = Arc::new(HttpBackend::new(&config.backend)?);
    let api_key = config.api_key(cli.api_key.as_deref());
    let runner = Runner::new(&config, registry, backend);

    match cli.command {
        Command::List => {
            let items: Vec<Value> = runner.registry().iter().map(|t| t.to_list_item()).collect();
            print_json(&serde_json::json!({ "templates": items }))
        }
        Command::Show(id) => match runner.registry().get(&id) {
            Some(template) => print_json(&template.to_detail()?),
            None => fail(RunError::TemplateNotFound),
        },
        Command::Run {
            template_id,
            params,
        } => {
            let params = read_params(params.as_deref())?;
            match runner
                .run_template(&template_id, api_key.as_deref(), &params)
                .await
            {
                Ok(result) => print_json(&serde_json::to_value(result)?),
                Err(e) => fail(e),
            }
        }
        Command::RunCustom { file, params } => {
            let code = std::fs::read_to_string(&file)
                .with_context(|| format!("Failed to read {file}"))?;
            let params = read_params(params.as_deref())?;
            match runner.run_custom(&code, api_key.as_deref(), params).await {
                Ok(result) => print_json(&serde_json::to_value(result)?),
                Err(e) => fail(e),
            }
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Handle --help / --version before anything else
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--version" | "-V" => {
                println!("memekit v{}", env!("CARGO_PKG_VERSION"));
                std::process::exit(0);
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            _ => {}
        }
    }

    // Initialize logging (RUST_LOG=debug for debug mode). Stdout is reserved
    // for JSON output.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("memekit=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = parse_args(std::env::args().skip(1))?;

    tokio::select! {
        result = run(cli) => result,
        _ = tokio::signal::ctrl_c() => {
            info!("Shutdown signal received, exiting");
            Ok(())
        }
    }
}
