use calcium_core::data_source::DirectorySource;
use calcium_core::*;
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "calsup")]
#[command(about = "Calcium supplementation microsimulation", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Configuration file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Override data directory
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the simulation and write the sample history (default)
    Run {
        /// Override the random seed
        #[arg(long)]
        seed: Option<u64>,

        /// Run for this many days from the configured start date
        #[arg(long)]
        days: Option<i64>,

        /// Override the initial population size
        #[arg(long)]
        initial_size: Option<usize>,

        /// Override the sample history output path (.csv or .json)
        #[arg(long)]
        output: Option<PathBuf>,
    },

    /// Build the artifact for a location
    BuildArtifact {
        /// Location name, e.g. "Burkina Faso"
        location: String,

        /// Directory the artifact is written to
        #[arg(long)]
        output_dir: Option<PathBuf>,

        /// Directory of prepared input data
        #[arg(long)]
        input_dir: Option<PathBuf>,

        /// Remove an existing artifact before building
        #[arg(long)]
        erase: bool,
    },

    /// Fill in missing low birth weight and short gestation data
    PatchArtifact {
        /// Artifact file to patch
        path: PathBuf,

        /// Directory of prepared input data
        #[arg(long)]
        input_dir: Option<PathBuf>,
    },

    /// Print the effective configuration as TOML
    ShowConfig,
}

fn main() -> Result<()> {
    // Initialize logging
    calcium_core::logging::init();

    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    if let Some(data_dir) = cli.data_dir {
        config.data.data_dir = data_dir;
    }

    match cli.command {
        Some(Commands::Run {
            seed,
            days,
            initial_size,
            output,
        }) => cmd_run(config, seed, days, initial_size, output),
        Some(Commands::BuildArtifact {
            location,
            output_dir,
            input_dir,
            erase,
        }) => cmd_build_artifact(&config, &location, output_dir, input_dir, erase),
        Some(Commands::PatchArtifact { path, input_dir }) => {
            cmd_patch_artifact(&config, &path, input_dir)
        }
        Some(Commands::ShowConfig) => cmd_show_config(&config),
        None => {
            // Default to "run" command
            cmd_run(config, None, None, None, None)
        }
    }
}

fn cmd_run(
    mut config: Config,
    seed: Option<u64>,
    days: Option<i64>,
    initial_size: Option<usize>,
    output: Option<PathBuf>,
) -> Result<()> {
    if let Some(seed) = seed {
        config.randomness.seed = seed;
    }
    if let Some(days) = days {
        config.time.end = chrono::Duration::try_days(days)
            .and_then(|span| config.time.start.checked_add_signed(span))
            .ok_or_else(|| Error::Config(format!("--days {} is out of range", days)))?;
    }
    if let Some(initial_size) = initial_size {
        config.population.initial_size = initial_size;
    }
    if let Some(output) = output {
        config.metrics.sample_history_observer.path = Some(output);
    }

    let history_path = config.sample_history_path();
    let mut simulation = Simulation::new(config, calcium_core::default_components())?;
    let summary = simulation.run()?;

    println!("✓ Simulation complete");
    println!("  Steps:       {}", summary.steps);
    println!("  Simulants:   {}", summary.population_size);
    println!("  Alive:       {}", summary.alive);
    println!("  Treated:     {}", summary.treated);
    println!("  History:     {}", history_path.display());
    Ok(())
}

fn cmd_build_artifact(
    config: &Config,
    location: &str,
    output_dir: Option<PathBuf>,
    input_dir: Option<PathBuf>,
    erase: bool,
) -> Result<()> {
    let output_dir = output_dir.unwrap_or_else(|| config.artifact_output_dir());
    let source = DirectorySource::new(input_dir.unwrap_or_else(|| config.artifact_input_dir()));
    let reversioned = ReversionedData::from_config(config);

    let report = build_artifact(location, &output_dir, erase, &source, &reversioned)?;

    println!("✓ Artifact for {} at {}", location, report.path.display());
    print_summary(&report.summary);
    Ok(())
}

fn cmd_patch_artifact(config: &Config, path: &Path, input_dir: Option<PathBuf>) -> Result<()> {
    let source = DirectorySource::new(input_dir.unwrap_or_else(|| config.artifact_input_dir()));
    let summary = patch_artifact(path, &source)?;

    println!("✓ Patched {}", path.display());
    print_summary(&summary);
    Ok(())
}

fn cmd_show_config(config: &Config) -> Result<()> {
    config.validate()?;
    print!("{}", config.to_toml()?);
    Ok(())
}

fn print_summary(summary: &WriteSummary) {
    println!("  Written:     {}", summary.written);
    println!("  Skipped:     {}", summary.skipped);
    if summary.conflicts > 0 {
        println!("  Conflicts:   {}", summary.conflicts);
    }
}
