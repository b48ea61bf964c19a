use anyhow::{anyhow, Context, Result};
use clap::{CommandFactory, Parser};
use gosim_runner::{
    error_chain, install_signal_shield, is_executable, run_batch, ArchiveOutcome, BatchEvent,
    BatchPlan, BatchReport, ConfigExpander, ExecutionContext, Identity, Orchestrator,
    RepeatExpander, RunnerSettings, ScriptExpander, PROGRAM,
};
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

const USAGE: &str = "\
Run simulations sequentially.
For each config file, a simulation is started in a separate 'run' directory.
Completed runs are moved to the 'park' directory if specified.

Syntax:
    go-sim [OPTIONS] [executable] [repeat] [script.py] [name=NAME] [park=DIR] [base=DIR] config_file [config_file ...]

    [executable] defaults to ./sim
    [repeat] is an integer: the number of runs for each config file.
    [script.py] generates concrete configs from each config file; it is called as
        script.py <config> <repeat> <dest_dir> [key=value ...]
    and prints one generated config path per line.
    name=NAME sets the run directory name (default run0000).
    park=DIR moves each completed run into DIR after verifying the copy.
    base=DIR creates run directories in DIR instead of the current directory.

    Any number of config files can be given (at least one).
    `go-sim help` prints this message.";

#[derive(Parser)]
#[command(name = "go-sim", version, about = "Run simulations sequentially", long_about = USAGE)]
struct Cli {
    /// Start each run and return without waiting; runs are not parked.
    #[arg(long)]
    detach: bool,
    /// Print the batch report as JSON on stdout.
    #[arg(long)]
    json: bool,
    /// Log filter used when RUST_LOG is unset.
    #[arg(long, default_value = "warn")]
    log_level: String,
    /// YAML settings file (falls back to $GOSIM_SETTINGS).
    #[arg(long)]
    settings: Option<PathBuf>,
    /// key=value passed to the config generator script.
    #[arg(long = "set", value_name = "KEY=VALUE")]
    set_values: Vec<String>,
    #[arg(trailing_var_arg = true, value_name = "ARGS")]
    tokens: Vec<String>,
}

/// What the positional tokens asked for.
#[derive(Debug, PartialEq, Eq)]
struct Invocation {
    executable: PathBuf,
    repeat: usize,
    preconf: Option<PathBuf>,
    name: String,
    park: Option<PathBuf>,
    base: PathBuf,
    configs: Vec<PathBuf>,
}

/// How the invocation ended.
enum Outcome {
    Usage,
    Finished,
    Fatal(anyhow::Error),
}

fn main() -> ExitCode {
    match execute(Cli::parse()) {
        Outcome::Usage | Outcome::Finished => ExitCode::SUCCESS,
        Outcome::Fatal(err) => {
            eprintln!("{}: {:#}", PROGRAM, err);
            ExitCode::FAILURE
        }
    }
}

fn wants_usage(tokens: &[String]) -> bool {
    tokens.first().map_or(true, |first| first == "help")
}

fn execute(cli: Cli) -> Outcome {
    if wants_usage(&cli.tokens) {
        let _ = Cli::command().print_long_help();
        println!();
        return Outcome::Usage;
    }
    init_tracing(&cli.log_level);
    let json_mode = cli.json;
    match run(cli) {
        Ok(report) => {
            if json_mode {
                emit_json(&report_to_json(&report));
            }
            Outcome::Finished
        }
        Err(err) => {
            if json_mode {
                emit_json(&json_error("setup_failed", format!("{:#}", err)));
            }
            Outcome::Fatal(err)
        }
    }
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}

fn run(cli: Cli) -> Result<BatchReport> {
    let settings = RunnerSettings::resolve(cli.settings.as_deref())?;
    let cwd = std::env::current_dir().context("cannot read the current directory")?;
    let invocation = classify(&cli.tokens, &cwd, &settings)?;
    let options = parse_set_values(&cli.set_values)?;

    install_signal_shield().context("cannot install signal handlers")?;
    let context = ExecutionContext::detect(&settings.cluster_job_vars);
    if let ExecutionContext::ClusterManaged { variable } = &context {
        tracing::info!(variable = %variable, "cluster job detected, using scratch directories");
    }
    if cli.detach && invocation.park.is_some() {
        eprintln!("{}: detached runs are not parked", PROGRAM);
    }

    let expander: Box<dyn ConfigExpander> = match &invocation.preconf {
        Some(script) => Box::new(ScriptExpander::new(script.clone())),
        None => Box::new(RepeatExpander),
    };
    let plan = BatchPlan {
        executable: invocation.executable,
        base_dir: invocation.base,
        park: invocation.park,
        inputs: invocation.configs,
        repeat: invocation.repeat,
        name: invocation.name,
        expander,
        options,
        detach: cli.detach,
    };
    let orchestrator = Orchestrator::new(settings, context, Identity::from_env());
    let quiet = cli.json;
    let report = run_batch(&orchestrator, &plan, &mut |event| print_event(event, quiet))?;
    Ok(report)
}

fn classify(tokens: &[String], cwd: &Path, settings: &RunnerSettings) -> Result<Invocation> {
    let mut inv = Invocation {
        executable: cwd.join("sim"),
        repeat: 1,
        preconf: None,
        name: settings.default_name.clone(),
        park: None,
        base: cwd.to_path_buf(),
        configs: Vec::new(),
    };
    for token in tokens {
        let path = cwd.join(token);
        if !token.is_empty() && token.chars().all(|c| c.is_ascii_digit()) {
            inv.repeat = token
                .parse()
                .with_context(|| format!("repeat count `{}` is out of range", token))?;
        } else if path.is_file() && token.ends_with(".py") {
            inv.preconf = Some(path);
        } else if is_executable(&path) {
            inv.executable = path;
        } else if path.is_file() {
            inv.configs.push(path);
        } else if let Some(name) = token.strip_prefix("name=") {
            inv.name = name.to_string();
        } else if let Some(park) = token.strip_prefix("park=") {
            let park = cwd.join(park);
            if !park.is_dir() {
                return Err(anyhow!("`{}' is not a directory", park.display()));
            }
            inv.park = Some(park);
        } else if let Some(base) = token.strip_prefix("base=") {
            inv.base = cwd.join(base);
        } else {
            return Err(anyhow!("unexpected argument `{}'", token));
        }
    }
    if inv.configs.is_empty() {
        return Err(anyhow!("you should specify a config file on the command line"));
    }
    if inv.name.is_empty() {
        return Err(anyhow!("name= needs a value"));
    }
    Ok(inv)
}

fn parse_set_values(values: &[String]) -> Result<BTreeMap<String, String>> {
    let mut out = BTreeMap::new();
    for raw in values {
        let (key, value) = raw
            .split_once('=')
            .ok_or_else(|| anyhow!("invalid --set value (expected key=value): {}", raw))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(anyhow!("invalid --set value (empty key): {}", raw));
        }
        out.insert(key.to_string(), value.trim().to_string());
    }
    Ok(out)
}

fn print_event(event: &BatchEvent<'_>, quiet: bool) {
    match event {
        BatchEvent::Expanding { expander, .. } => {
            if !quiet {
                println!("Using {}", expander);
            }
        }
        BatchEvent::ExpandFailed { error } => {
            eprintln!("{}: {}", PROGRAM, error_chain(*error));
        }
        BatchEvent::RunCompleted {
            config,
            working_dir,
            status,
        } => {
            if !quiet {
                println!(
                    "Completed run `{}` in {}",
                    config.display(),
                    working_dir.display()
                );
            }
            if !status.success() {
                eprintln!(
                    "{}: run in {} exited with status {}",
                    PROGRAM,
                    working_dir.display(),
                    status
                );
            }
        }
        BatchEvent::RunDetached {
            config,
            working_dir,
            pid,
        } => {
            if !quiet {
                println!(
                    "Started run `{}` in {} (pid {})",
                    config.display(),
                    working_dir.display(),
                    pid
                );
            }
        }
        BatchEvent::RunFailed { error, .. } => {
            eprintln!("{}: run failed: {}", PROGRAM, error_chain(*error));
        }
        BatchEvent::Parked { to, .. } => {
            if !quiet {
                println!("            ---> parked in {}", to.display());
            }
        }
        BatchEvent::ParkRefused { outcome } => {
            let kept = outcome.location().display();
            match outcome {
                ArchiveOutcome::NoParkingSpace { reason, .. } => eprintln!(
                    "{}: found no parking space for '{}': {}",
                    PROGRAM, kept, reason
                ),
                ArchiveOutcome::Mismatch { copy, .. } => eprintln!(
                    "{}: could not copy '{}' identically, partial copy left in {}",
                    PROGRAM,
                    kept,
                    copy.display()
                ),
                ArchiveOutcome::Parked { .. } | ArchiveOutcome::SameLocation { .. } => {}
            }
        }
        BatchEvent::ParkFailed { error, .. } => {
            eprintln!(
                "{}: cannot move directory: {}",
                PROGRAM,
                error_chain(*error)
            );
        }
    }
}

fn emit_json(value: &Value) {
    match serde_json::to_string(value) {
        Ok(s) => println!("{}", s),
        Err(_) => println!(
            "{{\"ok\":false,\"error\":{{\"code\":\"serialization_error\",\"message\":\"failed to serialize JSON payload\"}}}}"
        ),
    }
}

fn json_error(code: &str, message: String) -> Value {
    json!({
        "ok": false,
        "error": {
            "code": code,
            "message": message,
        }
    })
}

fn report_to_json(report: &BatchReport) -> Value {
    json!({
        "ok": true,
        "failures": report.failures(),
        "report": serde_json::to_value(report).unwrap_or(Value::Null),
    })
}
