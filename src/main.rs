use std::fs;
use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use phyloplace::{Pipeline, PipelineReport, PlaceConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "phyloplace", about = "Place uploaded genomes into a mutation-annotated tree")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Validate, align and place an upload; write VCF, subtrees, JSON and summary.
    Place {
        /// Pipeline configuration (TOML).
        #[arg(long)]
        config: PathBuf,
        /// Uploaded FASTA or VCF.
        input: PathBuf,
        /// Override the configured work directory.
        #[arg(long)]
        work_dir: Option<PathBuf>,
        /// Override the configured subtree size.
        #[arg(long)]
        subtree_size: Option<usize>,
        /// Override the configured engine thread count.
        #[arg(long)]
        threads: Option<usize>,
    },
    /// Validate and align an upload and write the VCF only.
    Vcf {
        /// Pipeline configuration (TOML).
        #[arg(long)]
        config: PathBuf,
        /// Uploaded FASTA.
        input: PathBuf,
        /// Output VCF.
        output: PathBuf,
    },
    /// Manage the placement server.
    Daemon {
        /// Pipeline configuration (TOML).
        #[arg(long)]
        config: PathBuf,
        #[command(subcommand)]
        action: DaemonAction,
    },
}

#[derive(Subcommand, Debug)]
enum DaemonAction {
    /// Report whether the server is running.
    Status,
    /// Start the server.
    Start,
    /// Ask the server to exit.
    Stop,
    /// Ask the server to reload its trees.
    Reload,
    /// Set the server's worker thread count.
    Threads {
        /// Number of threads.
        count: usize,
    },
    /// Set the server's per-request timeout.
    Timeout {
        /// Timeout in seconds.
        seconds: u64,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Place {
            config,
            input,
            work_dir,
            subtree_size,
            threads,
        } => {
            let mut config = load_config(&config)?;
            if let Some(dir) = work_dir {
                config.work_dir = dir;
            }
            if let Some(size) = subtree_size {
                config.subtree_size = size;
            }
            if let Some(threads) = threads {
                config.threads = threads;
            }
            run_place(config, input)?
        }
        Commands::Vcf {
            config,
            input,
            output,
        } => run_vcf(load_config(&config)?, input, output)?,
        Commands::Daemon { config, action } => run_daemon(load_config(&config)?, action)?,
    }

    Ok(())
}

fn load_config(path: &PathBuf) -> Result<PlaceConfig> {
    PlaceConfig::load(path).with_context(|| format!("failed to load config {}", path.display()))
}

fn read_upload(path: &PathBuf) -> Result<String> {
    fs::read_to_string(path).with_context(|| format!("failed to read upload {}", path.display()))
}

fn run_place(config: PlaceConfig, input: PathBuf) -> Result<()> {
    let upload = read_upload(&input)?;
    let pipeline = Pipeline::new(config).context("failed to initialize pipeline")?;
    let report = pipeline.run(&upload).context("placement failed")?;
    print_report(&report);
    Ok(())
}

fn print_report(report: &PipelineReport) {
    for failure in &report.failures {
        println!("{}", failure.reason);
    }
    if let Some(via) = report.via {
        println!("placed {} samples ({:?})", report.samples.len(), via);
    }
    for subtree in report.subtrees.iter().chain(&report.single_subtree) {
        println!(
            "subtree {}\tleaves={}\tuploaded={}\t{}\t{}",
            subtree.number,
            subtree.leaf_count,
            subtree.user_sample_ids.join(","),
            subtree.newick.display(),
            subtree.json.display()
        );
    }
    if let Some(path) = &report.summary_path {
        println!("summary\t{}", path.display());
    }
}

fn run_vcf(config: PlaceConfig, input: PathBuf, output: PathBuf) -> Result<()> {
    let upload = read_upload(&input)?;
    let pipeline = Pipeline::new(config).context("failed to initialize pipeline")?;
    let prepared = pipeline
        .prepare(&upload)
        .with_context(|| format!("failed to process {}", input.display()))?;
    for failure in &prepared.failures {
        println!("{}", failure.reason);
    }
    if prepared.samples.is_empty() {
        bail!("no sequences passed validation and alignment");
    }
    fs::write(&output, &prepared.vcf)
        .with_context(|| format!("failed to write {}", output.display()))?;
    println!("wrote {} samples to {}", prepared.samples.len(), output.display());
    Ok(())
}

fn run_daemon(config: PlaceConfig, action: DaemonAction) -> Result<()> {
    let supervisor = config.supervisor();
    let organism = config.organism.as_str();
    if !supervisor.is_configured(organism) {
        bail!("no [daemon] table for {} in the config", organism);
    }
    let trees = vec![config.tree.clone()];
    match action {
        DaemonAction::Status => match supervisor.recorded_pid(organism) {
            Some(pid) if supervisor.is_running(organism) => {
                println!("running (pid {}, {:?})", pid, supervisor.process_state(organism));
            }
            Some(pid) => println!("not running (last pid {})", pid),
            None => println!("not running"),
        },
        DaemonAction::Start => {
            let pid = supervisor
                .start(organism, &trees)
                .context("failed to start placement server")?;
            println!("started (pid {})", pid);
        }
        DaemonAction::Stop => supervisor.stop(organism).context("stop request failed")?,
        DaemonAction::Reload => supervisor
            .reload(organism, &trees)
            .context("reload request failed")?,
        DaemonAction::Threads { count } => supervisor
            .set_thread_count(organism, count)
            .context("thread-count request failed")?,
        DaemonAction::Timeout { seconds } => supervisor
            .set_timeout(organism, seconds)
            .context("timeout request failed")?,
    }
    Ok(())
}
