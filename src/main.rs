use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use thumbstack::bundle::{BundlePolicy, ShellRunner};
use thumbstack::{config, output, synth};
use tracing_subscriber::prelude::*;

#[derive(Parser)]
#[command(name = "thumbstack")]
#[command(about = "Bundle and synthesize the thumbnail app's stacks")]
#[command(long_about = "\
Bundle and synthesize the thumbnail app's stacks

Project structure:

  stack.toml                 # Project config (optional)
  lambdas/
  ├── resize/                # Invoked for every upload to the images bucket
  │   ├── handler.py
  │   └── requirements.txt   # Optional: installed for the target platform
  ├── list/                  # Exposed through a function URL
  └── presign/               # Exposed through a function URL
  website/                   # Receives .env.local

Output:

  cdktf.out/
  ├── manifest.json
  ├── assets/<function>/<hash>/archive.zip
  └── stacks/<stack>/cdk.tf.json

Run 'thumbstack gen-config' to generate a documented stack.toml.")]
#[command(version)]
struct Cli {
    /// Project config file; the project root is its directory
    #[arg(long, default_value = config::CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Log debug output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

/// Shared flags for commands that bundle functions.
#[derive(clap::Args, Clone)]
struct CacheArgs {
    /// Ignore the asset manifest; report every function as new
    #[arg(long)]
    no_cache: bool,
}

#[derive(Subcommand)]
enum Command {
    /// Bundle every function, synthesize both stacks and write them
    Synth(CacheArgs),
    /// Bundle and synthesize, print the creation order, write no stacks
    Plan(CacheArgs),
    /// Print a stock stack.toml with all options documented
    GenConfig,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Command::Synth(cache_args) => run_pipeline(&cli.config, &cache_args, true),
        Command::Plan(cache_args) => run_pipeline(&cli.config, &cache_args, false),
        Command::GenConfig => {
            print!("{}", config::stock_config_toml());
            Ok(())
        }
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            output::print_error(&*e);
            ExitCode::FAILURE
        }
    }
}

fn run_pipeline(
    config_path: &Path,
    cache_args: &CacheArgs,
    write: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    let app_config = config::load_config(config_path)?;
    let root = match config_path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    init_thread_pool(&app_config.processing);
    let host = synth::detect_host()?;

    println!("==> Bundling functions ({host} → {})", app_config.bundle.target);
    let (tx, rx) = std::sync::mpsc::channel();
    let printer = std::thread::spawn(move || {
        for event in rx {
            output::print_pipeline_event(&event);
        }
    });
    let result = synth::run(
        &app_config,
        &synth::SynthOptions {
            root,
            use_cache: !cache_args.no_cache,
            write,
        },
        host,
        &ShellRunner,
        &BundlePolicy::standard(),
        Some(tx),
    );
    printer
        .join()
        .map_err(|_| "output printer thread panicked")?;
    let result = result?;

    output::print_summary(&result);
    if write {
        println!("==> Synthesized into {}", result.out_dir.display());
    } else {
        println!("==> Plan complete, nothing written");
    }
    Ok(())
}

/// Log to stderr; `RUST_LOG` wins over `-v`.
fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| default.into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Initialize the rayon thread pool based on processing config.
///
/// Capped at the number of available CPU cores.
fn init_thread_pool(processing: &config::ProcessingConfig) {
    let threads = config::effective_threads(processing);
    rayon::ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .ok();
}
