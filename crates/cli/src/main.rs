mod config;
mod output;

use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::Value;

use driver::{
    BatchScreenshotOptions, EntityType, ExportFormat, Method, ScreenshotOptions, SupexClient,
};

#[derive(Parser)]
#[command(name = "supex")]
#[command(about = "Drive a running host application through the Supex runtime")]
#[command(version)]
struct Cli {
    /// Host runtime address
    #[arg(short = 'H', long, global = true)]
    host: Option<String>,

    /// Host runtime port
    #[arg(short, long, global = true)]
    port: Option<u16>,

    /// Request timeout in seconds
    #[arg(long, global = true)]
    timeout: Option<f64>,

    /// Print results and failures as single-line JSON
    #[arg(short, long, global = true)]
    raw: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check the connection to the host runtime
    #[command(display_order = 1)]
    Status,
    /// Evaluate Ruby code in the host
    #[command(display_order = 2)]
    Eval {
        /// Ruby code to execute
        code: String,
    },
    /// Evaluate a Ruby file in the host
    #[command(display_order = 3)]
    EvalFile {
        /// Path to the Ruby file
        file: PathBuf,
    },
    /// Show information about the current model
    #[command(display_order = 4)]
    Info,
    /// List entities in the model
    #[command(display_order = 5)]
    Entities {
        /// Which entities to list
        #[arg(value_enum, default_value_t = EntityType::All)]
        entity_type: EntityType,
    },
    /// Show the current selection
    #[command(display_order = 6)]
    Selection,
    /// List layers (tags)
    #[command(display_order = 7)]
    Layers,
    /// List materials
    #[command(display_order = 8)]
    Materials,
    /// Show camera position and orientation
    #[command(display_order = 9)]
    Camera,
    /// Take a screenshot of the current view
    #[command(display_order = 10)]
    Screenshot {
        /// Output file path
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Image width
        #[arg(short, long, default_value = "1920")]
        width: u32,
        /// Image height
        #[arg(long, default_value = "1080")]
        height: u32,
        /// Transparent background
        #[arg(short, long)]
        transparent: bool,
    },
    /// Take several screenshots described by a JSON file
    #[command(display_order = 11)]
    BatchScreenshots {
        /// JSON file holding an array of shot specifications
        shots: PathBuf,
        /// Output directory
        #[arg(short, long)]
        output_dir: Option<PathBuf>,
        /// Base file name
        #[arg(long, default_value = "screenshot")]
        base_name: String,
        /// Default image width
        #[arg(short, long, default_value = "1920")]
        width: u32,
        /// Default image height
        #[arg(long, default_value = "1080")]
        height: u32,
        /// Transparent background
        #[arg(short, long)]
        transparent: bool,
        /// Leave the camera where the last shot put it
        #[arg(long)]
        keep_camera: bool,
    },
    /// Open a model file
    #[command(display_order = 12)]
    Open {
        /// Path to the .skp file
        path: PathBuf,
    },
    /// Save the current model
    #[command(display_order = 13)]
    Save {
        /// Path to save to (default: current location)
        path: Option<PathBuf>,
    },
    /// Export the current scene
    #[command(display_order = 14)]
    Export {
        /// Export format
        #[arg(value_enum, default_value_t = ExportFormat::Skp)]
        format: ExportFormat,
    },
    /// Show console capture status
    #[command(display_order = 15)]
    ConsoleStatus,
    /// Reload the Supex extension without restarting the host
    #[command(display_order = 16)]
    Reload,
    /// Invoke any capability by name with JSON parameters
    #[command(display_order = 17)]
    Call {
        /// Capability name, e.g. `model-info` or `get_model_info`
        method: String,
        /// Parameters as a JSON object
        params: Option<String>,
    },
    /// Configuration management
    #[command(display_order = 20)]
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Initialize supex configuration
    #[command(display_order = 21)]
    Init,
    /// MCP server
    #[command(display_order = 22)]
    Mcp {
        #[command(subcommand)]
        action: McpAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Get a configuration value
    Get { key: String },
    /// Set a configuration value
    Set { key: String, value: String },
    /// Show configuration file path
    Path,
}

#[derive(Subcommand)]
enum McpAction {
    /// Start MCP server on stdio
    Serve,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    let raw = cli.raw;

    // Default to WARN level for quiet CLI output
    // Use RUST_LOG=info or RUST_LOG=debug for verbose output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let outcome = tokio::runtime::Runtime::new()
        .context("Failed to start async runtime")
        .and_then(|rt| rt.block_on(async_main(cli)));

    match outcome {
        Ok(code) => code,
        Err(err) => match err.downcast_ref::<driver::Error>() {
            Some(classified) => output::print_failure(classified, raw),
            None => output::print_usage_error(&err, raw),
        },
    }
}

async fn async_main(cli: Cli) -> Result<ExitCode> {
    let overrides = config::Overrides {
        host: cli.host,
        port: cli.port,
        timeout_secs: cli.timeout,
    };
    let raw = cli.raw;

    match cli.command {
        Commands::Config { action } => handle_config(action).map(|_| ExitCode::SUCCESS),
        Commands::Init => handle_init().map(|_| ExitCode::SUCCESS),
        Commands::Mcp { action } => handle_mcp(action, &overrides)
            .await
            .map(|_| ExitCode::SUCCESS),
        Commands::Status => {
            let cfg = config::load_config()?;
            let conn = config::connection_config(&cfg, &overrides, "user")?;
            let report = driver::status(conn).await;
            Ok(output::print_status(&report, raw))
        }
        command => {
            let cfg = config::load_config()?;
            let conn = config::connection_config(&cfg, &overrides, "user")?;
            handle_capability(command, conn, raw)
                .await
                .map(|_| ExitCode::SUCCESS)
        }
    }
}

/// Run one capability command on a connection of its own
async fn handle_capability(
    command: Commands,
    conn: driver::ConnectionConfig,
    raw: bool,
) -> Result<()> {
    // Local checks happen before anything is sent
    let request = Prepared::from_command(command)?;

    let mut client = SupexClient::new(conn);
    client.connect().await?;
    let result = request.run(&mut client, raw).await;
    client.disconnect();
    result
}

/// A capability command whose arguments have been validated locally
enum Prepared {
    Value(Method, Option<Value>),
    EvalFile(PathBuf),
    Screenshot(ScreenshotOptions),
    BatchScreenshots(BatchScreenshotOptions),
    Open(PathBuf),
    Save(Option<PathBuf>),
    Export(ExportFormat),
    Entities(EntityType),
    Eval(String),
}

impl Prepared {
    fn from_command(command: Commands) -> Result<Self> {
        let prepared = match command {
            Commands::Eval { code } => Prepared::Eval(code),
            Commands::EvalFile { file } => Prepared::EvalFile(existing_file(&file)?),
            Commands::Info => Prepared::Value(Method::ModelInfo, None),
            Commands::Entities { entity_type } => Prepared::Entities(entity_type),
            Commands::Selection => Prepared::Value(Method::Selection, None),
            Commands::Layers => Prepared::Value(Method::Layers, None),
            Commands::Materials => Prepared::Value(Method::Materials, None),
            Commands::Camera => Prepared::Value(Method::CameraInfo, None),
            Commands::ConsoleStatus => Prepared::Value(Method::ConsoleStatus, None),
            Commands::Reload => Prepared::Value(Method::Reload, None),
            Commands::Screenshot {
                output,
                width,
                height,
                transparent,
            } => Prepared::Screenshot(ScreenshotOptions {
                width,
                height,
                transparent,
                output_path: output.as_deref().map(absolute).transpose()?,
            }),
            Commands::BatchScreenshots {
                shots,
                output_dir,
                base_name,
                width,
                height,
                transparent,
                keep_camera,
            } => {
                let mut options = BatchScreenshotOptions::new(read_shots(&shots)?);
                options.output_dir = output_dir.as_deref().map(absolute).transpose()?;
                options.base_name = base_name;
                options.width = width;
                options.height = height;
                options.transparent = transparent;
                options.restore_camera = !keep_camera;
                Prepared::BatchScreenshots(options)
            }
            Commands::Open { path } => Prepared::Open(existing_file(&path)?),
            Commands::Save { path } => Prepared::Save(path.as_deref().map(absolute).transpose()?),
            Commands::Export { format } => Prepared::Export(format),
            Commands::Call { method, params } => {
                let method: Method = method.parse()?;
                Prepared::Value(method, params.as_deref().map(parse_params).transpose()?)
            }
            Commands::Status | Commands::Config { .. } | Commands::Init | Commands::Mcp { .. } => {
                anyhow::bail!("Not a capability command")
            }
        };
        Ok(prepared)
    }

    async fn run(self, client: &mut SupexClient, raw: bool) -> Result<()> {
        match self {
            Prepared::Eval(code) => output::print_value(&client.eval(&code).await?, raw),
            Prepared::EvalFile(path) => output::print_value(&client.eval_file(&path).await?, raw),
            Prepared::Entities(entity_type) => {
                output::print_value(&client.list_entities(entity_type).await?, raw)
            }
            Prepared::Value(method, params) => {
                let params = params.unwrap_or_else(|| Value::Object(Default::default()));
                output::print_value(&client.call(method, params).await?, raw)
            }
            Prepared::Screenshot(options) => {
                output::print_path(&client.screenshot(&options).await?, raw)
            }
            Prepared::BatchScreenshots(options) => {
                output::print_value(&client.batch_screenshots(&options).await?, raw)
            }
            Prepared::Open(path) => output::print_value(&client.open_model(&path).await?, raw),
            Prepared::Save(path) => {
                output::print_value(&client.save_model(path.as_deref()).await?, raw)
            }
            Prepared::Export(format) => output::print_path(&client.export(format).await?, raw),
        }
        Ok(())
    }
}

/// Absolute path of a file that must exist on this machine
fn existing_file(path: &Path) -> Result<PathBuf> {
    let abs = absolute(path)?;
    if !abs.is_file() {
        anyhow::bail!("File not found: {}", abs.display());
    }
    Ok(abs)
}

fn absolute(path: &Path) -> Result<PathBuf> {
    std::path::absolute(path).with_context(|| format!("Invalid path: {}", path.display()))
}

fn read_shots(path: &Path) -> Result<Vec<Value>> {
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read shots file: {}", path.display()))?;
    match serde_json::from_str::<Value>(&contents)
        .with_context(|| format!("Failed to parse shots file: {}", path.display()))?
    {
        Value::Array(shots) if !shots.is_empty() => Ok(shots),
        _ => anyhow::bail!("Shots file must hold a non-empty JSON array: {}", path.display()),
    }
}

fn parse_params(params: &str) -> Result<Value> {
    let value: Value = serde_json::from_str(params).context("Parameters must be valid JSON")?;
    if !value.is_object() {
        anyhow::bail!("Parameters must be a JSON object");
    }
    Ok(value)
}

fn handle_config(action: ConfigAction) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let mut cfg = config::load_config()?;
            if cfg.connection.token.is_some() {
                cfg.connection.token = Some("********".to_string());
            }
            let toml_str = toml::to_string_pretty(&cfg)?;
            println!("{}", toml_str);
            Ok(())
        }
        ConfigAction::Get { key } => {
            let cfg = config::load_config()?;
            match config::get_config_value(&cfg, &key) {
                Some(value) => println!("{}", value),
                None => {
                    if config::CONFIG_KEYS.contains(&key.as_str()) {
                        println!("(not set)");
                    } else {
                        anyhow::bail!("Unknown config key: {}", key);
                    }
                }
            }
            Ok(())
        }
        ConfigAction::Set { key, value } => {
            let mut cfg = config::load_config()?;
            config::set_config_value(&mut cfg, &key, &value)?;
            config::save_config(&cfg)?;
            let shown = if key == "connection.token" { "********" } else { value.as_str() };
            println!("Set {} = {}", key, shown);
            Ok(())
        }
        ConfigAction::Path => {
            let path = config::get_config_file()?;
            println!("{}", path.display());
            Ok(())
        }
    }
}

async fn handle_mcp(action: McpAction, overrides: &config::Overrides) -> Result<()> {
    match action {
        McpAction::Serve => {
            let cfg = config::load_config()?;
            let conn = config::connection_config(&cfg, overrides, "mcp")?;
            mcp::start_server(conn).await
        }
    }
}

fn handle_init() -> Result<()> {
    let config_file = config::get_config_file()?;

    if config_file.exists() {
        println!("Config file already exists: {}", config_file.display());
        return Ok(());
    }

    let cfg = config::Config::default();
    config::save_config(&cfg)?;
    println!("Created config file: {}", config_file.display());

    let conn = config::connection_config(&cfg, &config::Overrides::default(), "user")?;
    println!();
    println!("Effective connection:");
    println!("  Host: {}", conn.host);
    println!("  Port: {}", conn.port);
    println!("  Timeout: {}s", conn.request_timeout.as_secs_f64());

    Ok(())
}
