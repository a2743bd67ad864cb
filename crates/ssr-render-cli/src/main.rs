use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use clap::{ArgAction, Parser};
use serde_json::{json, Map, Value};
use ssr_render::{
    CacheBehavior, Package, RenderError, RenderRequest, RenderSettings, Renderer, SecretError,
    SharedSecret,
};
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Render a component from an ordered list of source packages and emit JSON.
#[derive(Parser, Debug)]
#[command(
    name = "ssr-render-cli",
    about = "Render a component from source packages and emit JSON"
)]
struct Args {
    /// Source package as IDENTIFIER=PATH. Repeat in load order.
    #[arg(long = "package", value_name = "ID=PATH", required = true, value_parser = parse_package)]
    packages: Vec<(String, PathBuf)>,

    /// Module path of the component to render
    #[arg(long)]
    entry: String,

    /// JSON file with the component's input, or `-` for stdin (default: {})
    #[arg(long)]
    props: Option<PathBuf>,

    /// JSON object of extra globals, e.g. '{"location": "http://localhost/"}'
    #[arg(long, value_parser = parse_globals)]
    globals: Option<Map<String, Value>>,

    /// default, bypass-read or ignore (overrides SSR_CACHE_BEHAVIOR)
    #[arg(long)]
    cache_behavior: Option<CacheBehavior>,

    /// Context cache capacity in bytes (overrides SSR_CONTEXT_CACHE_BYTES)
    #[arg(long)]
    cache_bytes: Option<usize>,

    /// Render this many times against the same renderer
    #[arg(long, default_value_t = 1)]
    repeat: usize,

    /// File holding the shared secret; requires --secret
    #[arg(long, requires = "secret")]
    secret_file: Option<PathBuf>,

    /// Secret presented by the caller
    #[arg(long, env = "SSR_SECRET", hide_env_values = true)]
    secret: Option<String>,

    /// Increase log verbosity (-v info, -vv debug)
    #[arg(short, long, action = ArgAction::Count)]
    verbose: u8,
}

#[derive(Debug, Error)]
enum CliError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Secret(#[from] SecretError),

    #[error("secret does not match")]
    Unauthorized,

    #[error("cannot read {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid JSON in {what}: {source}")]
    Json {
        what: String,
        #[source]
        source: serde_json::Error,
    },
}

fn parse_package(raw: &str) -> Result<(String, PathBuf), String> {
    match raw.split_once('=') {
        Some((id, path)) if !id.is_empty() && !path.is_empty() => {
            Ok((id.to_string(), PathBuf::from(path)))
        }
        _ => Err(format!("expected IDENTIFIER=PATH, got '{raw}'")),
    }
}

fn parse_globals(raw: &str) -> Result<Map<String, Value>, String> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(_) => Err("globals must be a JSON object".to_string()),
        Err(err) => Err(err.to_string()),
    }
}

fn read_file(path: &Path) -> Result<String, CliError> {
    std::fs::read_to_string(path).map_err(|source| CliError::Read {
        path: path.to_path_buf(),
        source,
    })
}

fn read_props(props: Option<&Path>) -> Result<Value, CliError> {
    let (what, text) = match props {
        None => return Ok(json!({})),
        Some(path) if path == Path::new("-") => {
            let mut buf = String::new();
            io::stdin()
                .read_to_string(&mut buf)
                .map_err(|source| CliError::Read {
                    path: path.to_path_buf(),
                    source,
                })?;
            ("stdin".to_string(), buf)
        }
        Some(path) => (path.display().to_string(), read_file(path)?),
    };
    serde_json::from_str(&text).map_err(|source| CliError::Json { what, source })
}

fn check_secret(args: &Args) -> Result<(), CliError> {
    let Some(path) = &args.secret_file else {
        return Ok(());
    };
    let secret = SharedSecret::from_file(path)?;
    let presented = args.secret.as_deref().unwrap_or_default();
    if secret.matches(presented) {
        Ok(())
    } else {
        Err(CliError::Unauthorized)
    }
}

async fn run(args: Args) -> Result<(), CliError> {
    check_secret(&args)?;

    let packages = args
        .packages
        .iter()
        .map(|(id, path)| Ok(Package::new(id.clone(), read_file(path)?)))
        .collect::<Result<Vec<_>, CliError>>()?;
    let input = read_props(args.props.as_deref())?;

    let mut settings = RenderSettings::from_env();
    if let Some(bytes) = args.cache_bytes {
        settings.cache_capacity_bytes = bytes;
    }
    if let Some(behavior) = args.cache_behavior {
        settings.default_cache_behavior = behavior;
    }

    let renderer = Renderer::new(settings)?;
    let request = RenderRequest::new(packages, args.entry, input)
        .with_globals(args.globals.unwrap_or_default());

    for _ in 0..args.repeat.max(1) {
        let result = renderer.render(request.clone()).await?;
        let line = serde_json::to_string(&result).map_err(|source| CliError::Json {
            what: "render result".to_string(),
            source,
        })?;
        println!("{line}");
    }

    tracing::info!("contexts built: {}", renderer.contexts_built());
    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    // 0 = warn, 1 = info, 2+ = debug; RUST_LOG wins when set.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| match args.verbose {
        0 => EnvFilter::new("ssr_render=warn"),
        1 => EnvFilter::new("ssr_render=info,ssr_render_cli=info"),
        _ => EnvFilter::new("ssr_render=debug,ssr_render_cli=debug"),
    });
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .without_time()
        .init();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            println!("{}", json!({ "error": err.to_string() }));
            ExitCode::FAILURE
        }
    }
}
