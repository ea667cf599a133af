#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![allow(clippy::uninlined_format_args)]

use clap::{Parser, Subcommand};
use labstat::db::query::ObservationStore;
use labstat::locale::{Labels, Locale};
use labstat::ml::pipeline::{
    AnalysisConfig, Analyzer, BoxRequest, HierarchyRequest, HistogramRequest, HypothesisRequest,
    KmeansRequest, Request, ScatterRequest, StatsRequest,
};
use labstat::structs::{LabError, PlotInput, Renderer, Result};
use serde::de::DeserializeOwned;
use serde_json::{json, Value};
use std::path::{Path, PathBuf};

/// labstat - descriptive statistics, hypothesis tests and clustering of lab results
#[derive(Parser, Debug)]
#[command(name = "labstat")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Observations file (CSV, TSV or JSON)
    #[arg(short, long, global = true, default_value = "observations.csv")]
    observations: PathBuf,

    /// Diagnosis catalog with columns id, code, name
    #[arg(short, long, global = true)]
    diagnoses: Option<PathBuf>,

    /// Treat CSV inputs as TSV
    #[arg(long, global = true)]
    tsv: bool,

    /// Language of titles and messages
    #[arg(long, global = true, value_enum, default_value = "en")]
    locale: Locale,

    /// JSON file overriding individual labels
    #[arg(long, global = true)]
    labels: Option<PathBuf>,

    /// Directory for rendered plot inputs (inline when omitted)
    #[arg(long, global = true)]
    plots_dir: Option<PathBuf>,

    /// Write the payload here instead of stdout
    #[arg(long, global = true)]
    output: Option<PathBuf>,

    /// Seed for k-means and pair-plot sampling
    #[arg(long, global = true, default_value = "42")]
    seed: u64,

    /// Rows drawn into a pair plot at most
    #[arg(long, global = true, default_value = "1000")]
    max_points: usize,

    /// Dendrogram levels kept before collapsing
    #[arg(long, global = true, default_value = "3")]
    dendrogram_levels: usize,

    /// Diagnoses listed per cluster
    #[arg(long, global = true, default_value = "10")]
    top_diagnoses: usize,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Descriptive statistics per sample or per test
    Stats {
        /// Request JSON file
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Correlation, t-tests, median test or one-way ANOVA
    Hypothesis {
        #[arg(short, long)]
        request: PathBuf,
    },
    /// K-means clustering with cluster profiles
    Kmeans {
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Ward hierarchical clustering with cluster profiles
    Hierarchy {
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Histogram or density of one test
    Histogram {
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Box or violin plot of one test across samples
    Box {
        #[arg(short, long)]
        request: PathBuf,
    },
    /// Scatter or hexbin of two tests
    Scatter {
        #[arg(short, long)]
        request: PathBuf,
    },
}

/// Writes each plot input as `<name>.json`, or returns it inline
struct JsonRenderer {
    dir: Option<PathBuf>,
}

impl Renderer for JsonRenderer {
    fn render(&self, name: &str, plot: &PlotInput) -> Result<Value> {
        let value = serde_json::to_value(plot)?;
        let Some(dir) = &self.dir else {
            return Ok(value);
        };

        std::fs::create_dir_all(dir)?;
        let path = dir.join(format!("{name}.json"));
        std::fs::write(&path, serde_json::to_string_pretty(&value)?)?;
        log::info!("Wrote {}", path.display());
        Ok(json!({
            "path": path.display().to_string(),
            "kind": value.get("kind").cloned().unwrap_or(Value::Null),
        }))
    }
}

fn main() {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    if let Err(e) = run() {
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

fn read_request<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        LabError::Config(format!("Cannot read request {}: {e}", path.display()))
    })?;
    serde_json::from_str(&content).map_err(|e| LabError::Validation(format!("Bad request: {e}")))
}

fn parse_request(command: &Commands) -> Result<Request> {
    Ok(match command {
        Commands::Stats { request } => Request::Stats(read_request::<StatsRequest>(request)?),
        Commands::Hypothesis { request } => {
            Request::Hypothesis(read_request::<HypothesisRequest>(request)?)
        }
        Commands::Kmeans { request } => Request::Kmeans(read_request::<KmeansRequest>(request)?),
        Commands::Hierarchy { request } => {
            Request::Hierarchy(read_request::<HierarchyRequest>(request)?)
        }
        Commands::Histogram { request } => {
            Request::Histogram(read_request::<HistogramRequest>(request)?)
        }
        Commands::Box { request } => Request::Box(read_request::<BoxRequest>(request)?),
        Commands::Scatter { request } => {
            Request::Scatter(read_request::<ScatterRequest>(request)?)
        }
    })
}

fn run() -> Result<()> {
    let args = Args::parse();

    let labels = match &args.labels {
        Some(path) => Labels::from_file(path)?,
        None => args.locale.labels(),
    };

    if !args.observations.exists() {
        return Err(LabError::Config(format!(
            "Observations file not found: {}",
            args.observations.display()
        )));
    }
    let store =
        ObservationStore::from_files(&args.observations, args.diagnoses.as_deref(), args.tsv)?;

    let config = AnalysisConfig {
        seed: args.seed,
        max_points_to_draw: args.max_points,
        dendrogram_levels: args.dendrogram_levels,
        top_diagnoses: args.top_diagnoses,
        ..AnalysisConfig::default()
    };
    let renderer = JsonRenderer {
        dir: args.plots_dir.clone(),
    };
    let analyzer = Analyzer::new(&store, &store, &renderer, labels.clone(), config);

    let content = match parse_request(&args.command) {
        Ok(request) => analyzer.run(&request),
        Err(e) => {
            log::warn!("Rejected request: {e}");
            vec![labstat::ml::output::error_content(&e, &labels)]
        }
    };

    let payload = serde_json::to_string_pretty(&content)?;
    match &args.output {
        Some(path) => {
            std::fs::write(path, payload)?;
            log::info!("Payload written to {}", path.display());
        }
        None => println!("{payload}"),
    }
    Ok(())
}
