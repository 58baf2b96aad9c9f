use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{ArgAction, Args, Parser, Subcommand};
use rand::Rng;
use serde_json::{json, Value};
use std::env;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use tracing_subscriber::EnvFilter;

use desktop_pilot::{
    ActionExecutor, ActionLoop, CancelToken, CommandDesktop, JsonLinesSink, LoopState, PilotConfig,
    RemoteDesktop, Resolution, ResponsesPlanner, Scaler, ScreenshotTranscoder, SessionRegistry,
};

#[derive(Parser, Debug)]
#[command(
    name = "desktop-pilot",
    version,
    about = "Drive a remote desktop from a vision-language action planner"
)]
struct Cli {
    /// JSON config file (bounds, planner, desktop settings)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Print supported commands in JSON
    Commands,
    /// Print the scaled resolution and round-trip report for a desktop resolution
    Scale(ScaleArgs),
    /// Capture the desktop, transcode it to the planner resolution, and save a PNG
    Screenshot(ScreenshotArgs),
    /// Execute one model-space action JSON against the desktop
    Exec(ExecArgs),
    /// Run the observe/act loop for a task until the planner finishes
    Run(RunArgs),
}

#[derive(Args, Debug, Clone)]
struct DesktopArgs {
    /// Opaque session identifier
    #[arg(long, default_value = "local")]
    session: String,
    /// Command prefix that reaches the desktop, e.g. "docker exec sandbox"
    #[arg(long)]
    launcher: Option<String>,
    /// X display inside the desktop
    #[arg(long)]
    display: Option<String>,
}

#[derive(Args, Debug)]
struct ScaleArgs {
    /// Desktop resolution as WIDTHxHEIGHT
    resolution: String,
}

#[derive(Args, Debug)]
struct ScreenshotArgs {
    #[command(flatten)]
    desktop: DesktopArgs,
    /// Output PNG path (default: <out-root>/screenshots/...)
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct ExecArgs {
    /// Action JSON in model space, e.g. '{"type":"click","x":10,"y":20}'
    action: String,
    #[command(flatten)]
    desktop: DesktopArgs,
}

#[derive(Args, Debug)]
struct RunArgs {
    /// Natural-language task for the planner
    task: String,
    #[command(flatten)]
    desktop: DesktopArgs,
    /// Planner API key (default: OPENAI_API_KEY)
    #[arg(long)]
    api_key: Option<String>,
    /// Planner model override
    #[arg(long)]
    model: Option<String>,
    /// Overall loop timeout in seconds
    #[arg(long)]
    timeout_secs: Option<u64>,
    /// Stop instead of acknowledging planner safety checks
    #[arg(long, action = ArgAction::SetTrue)]
    no_ack_safety: bool,
}

fn main() {
    init_tracing();
    match run() {
        Ok(code) => std::process::exit(code),
        Err(err) => {
            eprintln!("error: {err:#}");
            std::process::exit(1);
        }
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(io::stderr)
        .init();
}

fn run() -> Result<i32> {
    let cli = Cli::parse();
    let config = match &cli.config {
        Some(path) => PilotConfig::load(path)?,
        None => PilotConfig::default(),
    };

    match cli.command {
        Commands::Commands => print_commands().map(|_| 0),
        Commands::Scale(args) => command_scale(&config, args).map(|_| 0),
        Commands::Screenshot(args) => command_screenshot(config, args).map(|_| 0),
        Commands::Exec(args) => command_exec(config, args).map(|_| 0),
        Commands::Run(args) => command_run(config, args),
    }
}

fn print_commands() -> Result<()> {
    let rows = vec![
        json!({
            "name": "scale",
            "description": "Report the planner-visible resolution and coordinate round-trip error."
        }),
        json!({
            "name": "screenshot",
            "description": "Capture the desktop at planner resolution and save a PNG."
        }),
        json!({
            "name": "exec",
            "description": "Execute one model-space action against the desktop."
        }),
        json!({
            "name": "run",
            "description": "Run the screenshot-verified action loop for a task, emitting JSON-lines events."
        }),
    ];

    println!(
        "{}",
        serde_json::to_string_pretty(&json!({ "commands": rows }))?
    );
    Ok(())
}

fn command_scale(config: &PilotConfig, args: ScaleArgs) -> Result<()> {
    let original: Resolution = args.resolution.parse()?;
    let scaler = Scaler::new(original, &config.bounds)?;
    println!("{}", serde_json::to_string_pretty(scaler.report())?);
    Ok(())
}

fn command_screenshot(config: PilotConfig, args: ScreenshotArgs) -> Result<()> {
    let mut desktop = build_desktop(&config, &args.desktop);
    let original = desktop_resolution(&mut desktop)?;
    let scaler = Scaler::new(original, &config.bounds)?;
    let frame = ScreenshotTranscoder::new(&scaler)
        .capture(&mut desktop)
        .context("screenshot capture failed")?;

    let out = args.out.unwrap_or_else(|| {
        let slug = slugify(&args.desktop.session);
        let rand = rand::thread_rng().gen_range(1000..9999);
        out_root().join("screenshots").join(format!(
            "screen-{slug}-{}-{}-{rand}.png",
            timestamp_compact(),
            std::process::id()
        ))
    });
    ensure_parent_dir(&out)?;
    fs::write(&out, &frame.png)
        .with_context(|| format!("failed to write screenshot: {}", out.display()))?;

    let payload = json!({
        "image_path": abs_path(&out).display().to_string(),
        "session": args.desktop.session,
        "frame": frame.summary(),
        "scale": scaler.report(),
        "captured_at": Utc::now().to_rfc3339(),
    });
    println!("{}", serde_json::to_string(&payload)?);
    Ok(())
}

fn command_exec(config: PilotConfig, args: ExecArgs) -> Result<()> {
    let payload: Value = serde_json::from_str(&args.action).context("action is not valid JSON")?;
    let mut desktop = build_desktop(&config, &args.desktop);
    let original = desktop_resolution(&mut desktop)?;
    let scaler = Scaler::new(original, &config.bounds)?;
    let model = scaler.scaled();

    let executor = ActionExecutor::new(scaler);
    let action = executor.execute_value(&payload, &mut desktop)?;

    let result = json!({
        "session": args.desktop.session,
        "executed": action.kind(),
        "description": action.describe(),
        "desktop_resolution": original,
        "model_resolution": model,
    });
    println!("{}", serde_json::to_string(&result)?);
    Ok(())
}

fn command_run(mut config: PilotConfig, args: RunArgs) -> Result<i32> {
    if args.task.trim().is_empty() {
        bail!("task must not be empty");
    }
    config.planner.api_key = args
        .api_key
        .clone()
        .or_else(|| env::var("OPENAI_API_KEY").ok().filter(|v| !v.trim().is_empty()))
        .or(config.planner.api_key.take());
    if let Some(model) = &args.model {
        config.planner.model = model.clone();
    }
    if let Some(secs) = args.timeout_secs {
        config.loop_timeout_secs = secs;
    }
    if args.no_ack_safety {
        config.planner.acknowledge_safety_checks = false;
    }

    let registry = SessionRegistry::new();
    let session_id = registry.register(Box::new(build_desktop(&config, &args.desktop)))?;
    let lease = registry.lease(&session_id)?;
    let mut desktop = lease.desktop()?;

    let original = desktop
        .resolution()
        .with_context(|| format!("failed to query resolution of session {session_id}"))?;
    let scaler = Scaler::new(original, &config.bounds)?;
    let mut planner = ResponsesPlanner::new(config.planner.clone())?;

    let cancel = CancelToken::new();
    let _timer = cancel.arm_timeout(config.loop_timeout());
    let mut sink = JsonLinesSink::new(io::stdout().lock());

    let outcome = ActionLoop::new(&mut **desktop, &mut planner, scaler)
        .acknowledge_safety_checks(config.planner.acknowledge_safety_checks)
        .run(&args.task, &mut sink, &cancel);

    Ok(match outcome.state {
        LoopState::Done => 0,
        LoopState::Cancelled => 2,
        _ => 1,
    })
}

fn build_desktop(config: &PilotConfig, args: &DesktopArgs) -> CommandDesktop {
    let mut desktop_config = config.desktop.clone();
    if let Some(launcher) = &args.launcher {
        desktop_config.launcher = launcher_argv(launcher);
    }
    if let Some(display) = &args.display {
        desktop_config.display = display.clone();
    }
    CommandDesktop::new(args.session.clone(), desktop_config)
}

fn launcher_argv(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}

fn desktop_resolution(desktop: &mut CommandDesktop) -> Result<Resolution> {
    desktop
        .resolution()
        .context("failed to query desktop resolution")
}

fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).with_context(|| {
                format!("failed to create parent directory: {}", parent.display())
            })?;
        }
    }
    Ok(())
}

fn out_root() -> PathBuf {
    env::var("DESKTOP_PILOT_OUT_DIR")
        .ok()
        .filter(|v| !v.trim().is_empty())
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(".desktop-pilot"))
}

fn abs_path(path: &Path) -> PathBuf {
    if path.is_absolute() {
        return path.to_path_buf();
    }
    env::current_dir()
        .unwrap_or_else(|_| PathBuf::from("."))
        .join(path)
}

fn slugify(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    for ch in input.chars() {
        let lower = ch.to_ascii_lowercase();
        if lower.is_ascii_alphanumeric() || matches!(lower, '.' | '_' | '-') {
            out.push(lower);
        } else if lower.is_ascii_whitespace() {
            out.push('-');
        }
    }
    if out.is_empty() {
        "session".to_string()
    } else {
        out
    }
}

fn timestamp_compact() -> String {
    Utc::now().format("%Y%m%d-%H%M%S").to_string()
}
