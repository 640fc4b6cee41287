use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use gridkit::geojson_io::{self, ImportOptions};
use gridkit::stages::{Phase, StageId};
use gridkit::store::{JsonFileStore, NetworkStore};
use gridkit::{Network, Pipeline, PipelineConfig};
use log::info;
use std::path::{Path, PathBuf};

#[cfg(not(target_env = "msvc"))]
use tikv_jemallocator::Jemalloc;

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: Jemalloc = Jemalloc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// JSON file holding the network tables.
    #[arg(long, env = "GRIDKIT_STATE", default_value = "gridkit-state.json")]
    state: PathBuf,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Replace the stored tables with a GeoJSON survey.
    Import {
        input: PathBuf,
        /// Coordinates are lon/lat and get projected to metres.
        #[arg(long)]
        geographic: bool,
    },
    /// Run a contiguous range of stages.
    Run {
        /// First stage to run (default: the first stage).
        #[arg(long)]
        from: Option<StageId>,
        /// Last stage to run, inclusive (default: the last stage).
        #[arg(long)]
        to: Option<StageId>,
        /// RON pipeline configuration.
        #[arg(long, env = "GRIDKIT_CONFIG")]
        config: Option<PathBuf>,
        /// Write the run report as JSON.
        #[arg(long)]
        report: Option<PathBuf>,
    },
    /// Write the network, or its abstracted topology, as GeoJSON.
    Export {
        output: PathBuf,
        #[arg(long)]
        abstraction: bool,
    },
    /// Print the effective pipeline configuration as RON.
    Config {
        #[arg(long, env = "GRIDKIT_CONFIG")]
        config: Option<PathBuf>,
    },
    /// List the stages in pipeline order.
    Stages,
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::from_ron_file(path)
            .with_context(|| format!("loading configuration {}", path.display())),
        None => Ok(PipelineConfig::default()),
    }
}

fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    env_logger::init();

    let args = Args::parse();

    match args.command {
        Command::Import { input, geographic } => {
            let tables = geojson_io::import_file(&input, ImportOptions { geographic })
                .with_context(|| format!("reading {}", input.display()))?;
            let mut store = JsonFileStore::open(&args.state)?;
            store
                .prepare(tables)
                .with_context(|| format!("preparing {}", args.state.display()))?;
            info!("imported {} into {}", input.display(), args.state.display());
        }
        Command::Run {
            from,
            to,
            config,
            report,
        } => {
            let config = load_config(config.as_deref())?;
            let pipeline = Pipeline::new(config)?;
            let from = from.unwrap_or(StageId::ALL[0]);
            let to = to.unwrap_or(StageId::ALL[StageId::ALL.len() - 1]);
            if from > to {
                bail!("--from {} comes after --to {}", from, to);
            }
            let mut store = JsonFileStore::open(&args.state)?;
            let outcome = pipeline
                .run(&mut store, from..=to)
                .with_context(|| format!("running {}..={}", from, to))?;
            for summary in &outcome.stages {
                println!("{:<44} {} ({} ms)", summary.stage, summary.counts, summary.elapsed_ms);
            }
            for conflict in outcome.conflicts() {
                println!("conflict: {}", conflict);
            }
            if let Some(path) = report {
                let file = std::fs::File::create(&path)
                    .with_context(|| format!("creating {}", path.display()))?;
                serde_json::to_writer_pretty(file, &outcome)?;
            }
        }
        Command::Export {
            output,
            abstraction,
        } => {
            let store = JsonFileStore::open(&args.state)?;
            let origin = store.meta().origin;
            let network = Network::from_tables(store.read_all()?)?;
            let collection = if abstraction {
                let Some(topology) = &network.views().abstraction else {
                    bail!("no abstraction recorded; run topology-5-abstraction first");
                };
                geojson_io::export_abstraction(&network, topology, origin)
            } else {
                geojson_io::export_network(&network, origin)
            };
            std::fs::write(&output, geojson_io::to_string(collection))
                .with_context(|| format!("writing {}", output.display()))?;
            info!("exported {}", output.display());
        }
        Command::Config { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", config.to_ron_pretty()?);
        }
        Command::Stages => {
            for phase in Phase::ALL {
                println!("{}", phase);
                for stage in phase.stages() {
                    println!("  {}", stage);
                }
            }
        }
    }
    Ok(())
}
