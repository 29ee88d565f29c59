use clap::{Parser, Subcommand};
use hub_spoke_reconciler::cache::default_cache_file;
use hub_spoke_reconciler::output::{
    render_drift, render_plan, render_report, render_violations, OutputFormat,
};
use hub_spoke_reconciler::provider::InMemoryProvider;
use hub_spoke_reconciler::validate::has_errors;
use hub_spoke_reconciler::{CancellationHandle, Reconciler, ReconcilerConfig, TopologyDocument};
use std::error::Error;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "hubspoke", version, about = "Reconcile a hub-spoke network topology")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Check the topology against the network invariants
    Validate(CommonArgs),
    /// Show the operations an apply would run
    Plan(CommonArgs),
    /// Execute the plan and save the resulting provider state
    Apply(CommonArgs),
    /// Compare the provider state with the topology
    Drift {
        #[command(flatten)]
        common: CommonArgs,
        /// Keep checking every HUBSPOKE_DRIFT_INTERVAL_SECS until Ctrl-C
        #[arg(long)]
        watch: bool,
    },
}

#[derive(clap::Args, Debug)]
struct CommonArgs {
    /// Topology document (JSON)
    topology: PathBuf,
    /// Simulated provider snapshot, created on first apply; topologies
    /// sharing it only ever see their own resources
    #[arg(long, default_value = "hubspoke_state.json")]
    state: PathBuf,
    #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
    format: OutputFormat,
}

struct Session {
    doc: TopologyDocument,
    provider: Arc<InMemoryProvider>,
    reconciler: Reconciler,
}

fn open(args: &CommonArgs, config: ReconcilerConfig) -> Result<Session, Box<dyn Error>> {
    let doc = TopologyDocument::load(&args.topology)?;
    let provider = Arc::new(InMemoryProvider::load(&args.state)?);
    let reconciler = Reconciler::new(provider.clone(), config);
    Ok(Session {
        doc,
        provider,
        reconciler,
    })
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    // Do as little as possible in main.rs as it can't contain any tests
    log4rs::init_file("log4rs.yml", Default::default())?;
    dotenv::dotenv().ok();
    log::info!("#Start main()");

    let cli = Cli::parse();
    let config = ReconcilerConfig::from_env()?;
    log::debug!("{config:?}");

    match cli.command {
        Command::Validate(args) => {
            let s = open(&args, config)?;
            let violations = s.reconciler.validate(s.doc).await?;
            print!("{}", render_violations(&violations, args.format)?);
            if has_errors(&violations) {
                return Err("topology violates network invariants".into());
            }
        }
        Command::Plan(args) => {
            let s = open(&args, config)?;
            let plan = s.reconciler.plan(s.doc).await?;
            print!("{}", render_plan(&plan, args.format)?);
        }
        Command::Apply(args) => {
            let s = open(&args, config)?;
            let topology_id = s.doc.topology_id.clone();
            let cache_file = default_cache_file(&topology_id);
            if Path::new(&cache_file).exists() {
                s.reconciler.drift().load_cache(&topology_id, &cache_file)?;
            }
            let report = s.reconciler.apply(s.doc, &CancellationHandle::new()).await?;
            s.provider.save(&args.state)?;
            s.reconciler.drift().save_cache(&topology_id, &cache_file)?;
            print!("{}", render_report(&report, args.format)?);
            if !report.is_success() {
                return Err(format!("reconciliation finished {}", report.status).into());
            }
        }
        Command::Drift { common, watch } => {
            let s = open(&common, config)?;
            let topology_id = s.doc.topology_id.clone();
            let cache_file = default_cache_file(&topology_id);
            if Path::new(&cache_file).exists() {
                s.reconciler.drift().load_cache(&topology_id, &cache_file)?;
            }
            let drift = s.reconciler.check_drift(s.doc).await?;
            print!("{}", render_drift(&drift, common.format)?);
            if watch {
                let shutdown = CancellationHandle::new();
                let detector = s.reconciler.drift().clone();
                let interval = s.reconciler.config().drift_interval;
                let task = {
                    let shutdown = shutdown.clone();
                    tokio::spawn(async move { detector.run(interval, shutdown).await })
                };
                tokio::signal::ctrl_c().await?;
                shutdown.cancel();
                task.await?;
                for finding in s.reconciler.drift().pending(&topology_id) {
                    println!("{}", finding.message);
                }
            }
            s.reconciler.drift().save_cache(&topology_id, &cache_file)?;
        }
    }

    log::info!("#End main()");
    Ok(())
}
