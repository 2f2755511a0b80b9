use std::{path::PathBuf, process::ExitCode};

use anyhow::Result;
use clap::Parser;
use log::{error, warn};
use phpack::{BundleManifest, Bundler, Config};

#[derive(Debug, Parser)]
#[command(
    name = "phpack",
    author,
    version,
    about = "Fold a multi-file PHP web application into a single deployable index.php"
)]
struct Cli {
    /// Bundle manifest listing entry file, modules and declarations
    #[arg(value_name = "MANIFEST")]
    manifest: PathBuf,

    /// Output artifact path
    #[arg(short, long, default_value = "final/index.php")]
    output: PathBuf,

    /// Configuration file (defaults to ./phpack.toml, then the user
    /// configuration directory)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Target PHP version; versions before 5.3.0 produce flattened output
    #[arg(long, value_name = "VERSION")]
    php_version: Option<String>,

    /// Disable error output in the produced artifact
    #[arg(long)]
    no_errors: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level))
        .format_timestamp(None)
        .init();
}

fn run(cli: &Cli) -> Result<()> {
    let mut config = Config::load(cli.config.as_deref())?;
    if let Some(version) = &cli.php_version {
        config.php_version = version.clone();
    }
    if cli.no_errors {
        config.no_errors = true;
    }

    let manifest = BundleManifest::load(&cli.manifest)?;
    let mut bundler = Bundler::new(config);
    let artifact = bundler.bundle(&manifest)?;
    bundler.write_artifact(&artifact, &cli.output)?;

    // Artifact produced either way; degraded inclusions or bootstrap are
    // reported, not fatal.
    for problem in bundler.errors() {
        warn!("{problem}");
    }
    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);
    if let Err(err) = run(&cli) {
        error!("bundling failed: {err:#}");
        return ExitCode::FAILURE;
    }
    ExitCode::SUCCESS
}
