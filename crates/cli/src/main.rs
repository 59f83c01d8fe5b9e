//! stencilg: fusion and stream scheduling driver
//!
//! Usage:
//!   stencilg dump <GRAPH>
//!   stencilg fuse <GRAPH> --mode dominator|pairwise|merge [-o OUT]
//!   stencilg schedule <GRAPH>
//!   stencilg search <GRAPH> --config cfg.json [--strategy S] [--log PATH]
//!
//! Graphs are JSON-serialized functions. `RUST_LOG` controls log output.

use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand, ValueEnum};

use stencilg::config::StencilgConfig;
use stencilg::graph::IndexedForwardGraph;
use stencilg::harness::CommandHarness;
use stencilg::opt::{
    FuseOps, FunctionPass, IndicatifProgress, PairwiseFusion, PerformanceLog, ProfileGuidedSearch,
    StencilMerge, Strategy,
};
use stencilg::schedule::StreamLeveler;
use stencilg::Function;

/// Fusion and stream scheduling for stencil dataflow graphs
#[derive(Parser, Debug)]
#[command(name = "stencilg")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file (JSON)
    #[arg(short, long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the indexed forward graph
    Dump {
        /// Input graph (use "-" for stdin)
        graph: String,
    },
    /// Run a fusion pass without measurement
    Fuse {
        /// Input graph (use "-" for stdin)
        graph: String,

        /// Fusion pass
        #[arg(short, long, default_value = "dominator")]
        mode: FuseMode,

        /// Output file (stdout when absent)
        #[arg(short, long, value_name = "FILE")]
        output: Option<String>,

        /// Step cap of the pairwise pass
        #[arg(long)]
        max_steps: Option<usize>,

        /// Optimization level of the dominator pass (0 disables fusion)
        #[arg(short = 'O', long = "opt-level", value_parser = clap::value_parser!(u8).range(0..=3))]
        opt_level: Option<u8>,

        /// Print the dominator partition instead of the rewritten graph
        #[arg(long)]
        groups: bool,
    },
    /// Print the stream schedule as JSON
    Schedule {
        /// Input graph (use "-" for stdin)
        graph: String,

        /// Keep every level barrier
        #[arg(long)]
        keep_barriers: bool,
    },
    /// Run the profile-guided search with the command harness
    Search {
        /// Input graph (use "-" for stdin)
        graph: String,

        /// Evaluation strategy
        #[arg(short, long, default_value = "stepwise")]
        strategy: StrategyArg,

        /// Performance log (JSON Lines), appended to
        #[arg(long, value_name = "FILE")]
        log: Option<PathBuf>,

        /// Show a progress bar
        #[arg(short, long)]
        progress: bool,
    },
}

/// Fusion pass
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum FuseMode {
    /// Dominator-tree partitioning
    Dominator,
    /// Reuse-scored pairwise fusion to exhaustion
    Pairwise,
    /// One-shot parallel/serial stencil merge
    Merge,
}

/// Evaluation strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StrategyArg {
    /// No fusion, one stream
    Baseline,
    /// No fusion, leveled streams
    Parallel,
    /// Pairwise fusion measured after every step
    Stepwise,
    /// All of the above, in that order
    All,
}

impl StrategyArg {
    fn strategies(self) -> Vec<Strategy> {
        match self {
            StrategyArg::Baseline => vec![Strategy::Baseline],
            StrategyArg::Parallel => vec![Strategy::ParallelMax],
            StrategyArg::Stepwise => vec![Strategy::StepwiseFusion],
            StrategyArg::All => vec![
                Strategy::Baseline,
                Strategy::ParallelMax,
                Strategy::StepwiseFusion,
            ],
        }
    }
}

fn main() {
    env_logger::init();
    if let Err(e) = run() {
        eprintln!("error: {}", e);
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();

    let config = match &args.config {
        Some(path) => StencilgConfig::load(path)?,
        None => StencilgConfig::default(),
    }
    .apply_env()?;

    match args.command {
        Command::Dump { graph } => {
            let func = read_graph(&graph)?;
            let indexed = IndexedForwardGraph::build(&func, &config.pattern_registry());
            print!("{}", indexed.debug_dump(&func));
        }
        Command::Fuse {
            graph,
            mode,
            output,
            max_steps,
            opt_level,
            groups,
        } => {
            let func = read_graph(&graph)?;
            let mut config = config;
            if let Some(steps) = max_steps {
                config.search.max_steps = steps;
            }
            if let Some(level) = opt_level {
                config.fuse.opt_level = level;
            }

            let registry = config.pattern_registry();
            let text = match mode {
                FuseMode::Dominator if groups => {
                    let (_, partition) = FuseOps::new(registry, config.fuse.clone()).partition(&func);
                    serde_json::to_string_pretty(&partition.groups_summary(&func))?
                }
                FuseMode::Dominator => {
                    let fused = FuseOps::new(registry, config.fuse.clone()).run(&func);
                    serde_json::to_string_pretty(&fused)?
                }
                FuseMode::Pairwise => {
                    let fused = PairwiseFusion::new(&config.search).run(&func);
                    serde_json::to_string_pretty(&fused)?
                }
                FuseMode::Merge => {
                    let fused = StencilMerge::new(registry).run(&func);
                    serde_json::to_string_pretty(&fused)?
                }
            };
            write_output(output.as_deref(), &text)?;
        }
        Command::Schedule {
            graph,
            keep_barriers,
        } => {
            let func = read_graph(&graph)?;
            let leveler = if keep_barriers {
                StreamLeveler::new().without_barrier_elimination()
            } else {
                StreamLeveler::new()
            };
            let schedule = leveler.schedule(&func);
            eprint!("{}", schedule.display(&func));
            println!("{}", serde_json::to_string_pretty(&schedule)?);
        }
        Command::Search {
            graph,
            strategy,
            log,
            progress,
        } => {
            let func = read_graph(&graph)?;
            let log_path = log.or_else(|| config.search.log_path.clone());
            let perf_log = match &log_path {
                Some(path) => PerformanceLog::open(path, config.problem.as_ref())?,
                None => PerformanceLog::disabled(),
            };
            let harness = CommandHarness::new(config.harness.clone())?;
            let search = ProfileGuidedSearch::new(&config.search, harness).with_log(perf_log);

            let show_progress = config.search.show_progress || progress;
            let mut search = if show_progress {
                Box::new(search.with_progress(IndicatifProgress::new()))
                    as Box<dyn StrategyRunner>
            } else {
                Box::new(search) as Box<dyn StrategyRunner>
            };

            for strategy in strategy.strategies() {
                let state = search.evaluate(strategy, &func)?;
                match state.best() {
                    Some(best) => println!(
                        "{:?}: best {} at {:.4} after {} fusion steps",
                        strategy,
                        best.step,
                        best.latency().unwrap_or_default(),
                        state.step()
                    ),
                    None => println!("{:?}: no successful measurement", strategy),
                }
            }
            if let Some(path) = log_path {
                println!("log written to {}", path.display());
            }
        }
    }
    Ok(())
}

/// Object-safe view of the search driver, so the progress sink can be picked
/// at runtime.
trait StrategyRunner {
    fn evaluate(
        &mut self,
        strategy: Strategy,
        func: &Function,
    ) -> Result<stencilg::opt::SearchState, stencilg::SearchError>;
}

impl<P: stencilg::opt::SearchProgress> StrategyRunner for ProfileGuidedSearch<CommandHarness, P> {
    fn evaluate(
        &mut self,
        strategy: Strategy,
        func: &Function,
    ) -> Result<stencilg::opt::SearchState, stencilg::SearchError> {
        ProfileGuidedSearch::evaluate(self, strategy, func)
    }
}

fn read_graph(input: &str) -> Result<Function, Box<dyn std::error::Error>> {
    let text = if input == "-" {
        let mut buf = String::new();
        io::stdin().read_to_string(&mut buf)?;
        buf
    } else {
        fs::read_to_string(Path::new(input))?
    };
    Ok(Function::from_json(&text)?)
}

fn write_output(output: Option<&str>, content: &str) -> Result<(), Box<dyn std::error::Error>> {
    match output {
        None | Some("-") => {
            io::stdout().write_all(content.as_bytes())?;
            io::stdout().write_all(b"\n")?;
        }
        Some(path) => fs::write(path, content)?,
    }
    Ok(())
}
