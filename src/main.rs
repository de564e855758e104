use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use kiln_config::{EngineConfig, PlanDef};
use kiln_graph::BuildGraph;
use kiln_item::{ItemKind, ItemSnapshot};
use kiln_runtime::{BuildEngine, BuildRequest, MetricsRecorder};

mod dry_run;

use dry_run::{initial_values, item_type, parse_item_key, register_plan};

/// Kiln - a build-step orchestration engine
#[derive(Parser)]
#[command(name = "kiln")]
#[command(version, about, long_about = None)]
struct Cli {
  /// Path to the engine config file (default: ~/.kiln/config.json, if present)
  #[arg(long, global = true)]
  config: Option<PathBuf>,

  /// Maximum number of steps running at once (overrides the config file)
  #[arg(long, global = true)]
  workers: Option<usize>,

  #[command(subcommand)]
  command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
  /// Validate a step manifest: producers, dependencies and cycles
  Check {
    /// Path to the manifest file (JSON)
    manifest: PathBuf,
  },

  /// Show which steps a request would run
  Plan {
    /// Path to the manifest file (JSON)
    manifest: PathBuf,

    /// Requested item, as `Name` or `Name[qualifier]`
    #[arg(long = "request", short = 'r')]
    requests: Vec<String>,
  },

  /// Dry-run a manifest with synthetic step bodies
  Run {
    /// Path to the manifest file (JSON)
    manifest: PathBuf,

    /// Requested item, as `Name` or `Name[qualifier]`
    #[arg(long = "request", short = 'r')]
    requests: Vec<String>,

    /// Write the metrics report to this file
    #[arg(long)]
    metrics: Option<PathBuf>,

    /// Print every item, not only the requested ones
    #[arg(long)]
    full_context: bool,
  },
}

fn main() -> Result<()> {
  init_tracing();
  let cli = Cli::parse();

  let mut config = load_config(cli.config.as_deref())?;
  if cli.workers.is_some() {
    config.max_workers = cli.workers;
    config.validate().context("invalid --workers")?;
  }

  match cli.command {
    Some(Commands::Check { manifest }) => check(&manifest),
    Some(Commands::Plan { manifest, requests }) => plan(&manifest, &requests),
    Some(Commands::Run {
      manifest,
      requests,
      metrics,
      full_context,
    }) => {
      if full_context {
        config.include_full_context = true;
      }
      if metrics.is_some() {
        config.metrics_path = metrics;
      }
      let rt = tokio::runtime::Runtime::new()?;
      rt.block_on(async { run(&manifest, &requests, config).await })
    }
    None => {
      println!("kiln - use --help to see available commands");
      Ok(())
    }
  }
}

/// Log to stderr, filtered by `KILN_LOG` (or `RUST_LOG`), warnings by default.
fn init_tracing() {
  let filter = EnvFilter::try_from_env("KILN_LOG")
    .or_else(|_| EnvFilter::try_from_default_env())
    .unwrap_or_else(|_| EnvFilter::new("warn"));
  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(std::io::stderr)
    .init();
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
  if let Some(path) = path {
    return EngineConfig::load(path)
      .with_context(|| format!("failed to load config: {}", path.display()));
  }

  let default_path = dirs::home_dir().map(|home| home.join(".kiln").join("config.json"));
  match default_path {
    Some(path) if path.is_file() => {
      debug!(path = %path.display(), "loading default config");
      EngineConfig::load(&path)
        .with_context(|| format!("failed to load config: {}", path.display()))
    }
    _ => Ok(EngineConfig::default()),
  }
}

fn load_plan(manifest: &Path) -> Result<PlanDef> {
  let content = std::fs::read_to_string(manifest)
    .with_context(|| format!("failed to read manifest file: {}", manifest.display()))?;
  serde_json::from_str(&content)
    .with_context(|| format!("failed to parse manifest file: {}", manifest.display()))
}

fn load_graph(manifest: &Path) -> Result<(PlanDef, BuildGraph)> {
  let plan = load_plan(manifest)?;
  let chain = register_plan(&plan)?;
  let graph = BuildGraph::build(&chain).context("invalid step graph")?;
  Ok((plan, graph))
}

fn check(manifest: &Path) -> Result<()> {
  let (plan, graph) = load_graph(manifest)?;
  println!(
    "{}: {} steps, {} edges, {} initial items",
    plan.name,
    graph.len(),
    graph.edges().len(),
    graph.initial_items().len()
  );
  Ok(())
}

fn plan(manifest: &Path, requests: &[String]) -> Result<()> {
  let (_, graph) = load_graph(manifest)?;
  let requested = requests
    .iter()
    .map(|r| parse_item_key(r))
    .collect::<Result<Vec<_>>>()?;
  let pruned = graph
    .prune(&requested)
    .context("failed to prune graph for request")?;

  let order = pruned.topological_order();
  println!("retained ({}):", order.len());
  for id in &order {
    println!("  {}", id);
  }

  let skipped: Vec<&str> = graph
    .step_ids()
    .into_iter()
    .filter(|id| !pruned.contains(id))
    .collect();
  println!("pruned ({}):", skipped.len());
  for id in skipped {
    println!("  {}", id);
  }
  Ok(())
}

async fn run(manifest: &Path, requests: &[String], config: EngineConfig) -> Result<()> {
  let (plan, graph) = load_graph(manifest)?;
  eprintln!("Loaded manifest: {}", plan.name);

  let mut request = BuildRequest::new();
  for text in requests {
    request = request.request_key(parse_item_key(text)?);
  }
  for initial in &plan.initial {
    if let Some(value) = &initial.value {
      let item = item_type(&initial.item, initial.qualifier.as_deref(), initial.kind);
      request = request.initial_instances(item.key().clone(), initial_values(initial.kind, value));
    }
  }

  let cancel = CancellationToken::new();
  let ctrl_c = cancel.clone();
  tokio::spawn(async move {
    if tokio::signal::ctrl_c().await.is_ok() {
      ctrl_c.cancel();
    }
  });

  let metrics_path = config.metrics_path.clone();
  let recorder = MetricsRecorder::new();
  let engine = BuildEngine::with_notifier(config, recorder.clone());
  let outcome = engine.execute(&graph, request, cancel).await;

  if let Some(path) = metrics_path {
    recorder
      .report()
      .write_json(&path)
      .with_context(|| format!("failed to write metrics: {}", path.display()))?;
    eprintln!("Metrics written to {}", path.display());
  }

  let result = outcome.context("build failed")?;
  eprintln!("Execution completed: {}", result.execution_id);
  eprintln!("Steps executed: {}", result.executed.len());

  let snapshot = result.context.as_ref().unwrap_or(&result.items);
  println!("{}", serde_json::to_string_pretty(&snapshot_json(snapshot))?);

  Ok(())
}

/// Render dry-run markers: simple items as their value, multi items as arrays.
fn snapshot_json(snapshot: &ItemSnapshot) -> serde_json::Value {
  let mut output = serde_json::Map::new();
  for key in snapshot.keys() {
    let Some(entry) = snapshot.entry(key) else {
      continue;
    };
    let mut values = entry
      .values
      .iter()
      .map(|v| {
        v.downcast::<serde_json::Value>()
          .map(|v| (*v).clone())
          .unwrap_or(serde_json::Value::Null)
      })
      .collect::<Vec<_>>();
    let value = match entry.kind {
      ItemKind::Simple => values.pop().unwrap_or(serde_json::Value::Null),
      ItemKind::Multi => serde_json::Value::Array(values),
    };
    output.insert(key.to_string(), value);
  }
  serde_json::Value::Object(output)
}
