use anyhow::{bail, Context, Result};
use clap::Parser;
use std::path::PathBuf;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;
use tyflow_core::{InferConfig, Session};

mod report;

/// Infer HM types and constant-propagated flows for a tyflow expression
#[derive(Parser, Debug)]
#[command(name = "tyflow", version, about, long_about = None)]
struct Cli {
    /// Expression to analyze (reads --file when absent)
    expr: Option<String>,

    /// Read the program from a file
    #[arg(short, long, value_name = "PATH", conflicts_with = "expr")]
    file: Option<PathBuf>,

    /// Worklist order; 0 is newest-first
    #[arg(short, long)]
    seed: Option<u64>,

    /// Skip Hindley-Milner unification
    #[arg(long)]
    no_hm: bool,

    /// Skip constant propagation
    #[arg(long)]
    no_gcp: bool,

    /// Load settings from a TOML file; flags override it
    #[arg(short, long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Print the summary as JSON
    #[arg(long)]
    json: bool,

    /// List every syntax node with its type and flow
    #[arg(short, long)]
    all: bool,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Cli {
    fn source(&self) -> Result<String> {
        match (&self.expr, &self.file) {
            (Some(expr), _) => Ok(expr.clone()),
            (None, Some(path)) => {
                std::fs::read_to_string(path).with_context(|| format!("Failed to read {}", path.display()))
            }
            (None, None) => bail!("no program given; pass an expression or --file"),
        }
    }

    fn infer_config(&self) -> Result<InferConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)
                    .with_context(|| format!("Failed to read config {}", path.display()))?;
                toml::from_str(&text).with_context(|| format!("Invalid config {}", path.display()))?
            }
            None => InferConfig::default(),
        };
        if let Some(seed) = self.seed {
            config.seed = seed;
        }
        if self.no_hm {
            config.do_hm = false;
        }
        if self.no_gcp {
            config.do_gcp = false;
        }
        Ok(config)
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { "tyflow=debug,tyflow_core=debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let source = cli.source()?;
    let config = cli.infer_config()?;
    debug!(?config, "configuration");

    let mut session = Session::new(&source, config).context("Failed to parse program")?;
    session.run();
    info!(iterations = session.stats().iterations, "done");

    let summary = session.summary(cli.all);
    if cli.json {
        println!("{}", serde_json::to_string_pretty(&summary)?);
    } else {
        print!("{}", report::render(&summary));
    }
    if !summary.stats.converged {
        bail!("iteration limit reached before the fixpoint");
    }
    Ok(())
}
