#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::needless_pass_by_value)]
#![allow(clippy::struct_excessive_bools)]
#![allow(clippy::cast_precision_loss)]

mod commands;
mod logging;

use clap::Parser;
use commands::Context;
use miette::Result;
use sluice_core::ModePolicy;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sluice")]
#[command(author, version, about = "Build and serve a single-entry browser client", long_about = None)]
struct Cli {
    /// Increase logging verbosity (-v for DEBUG, -vv for TRACE)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit JSON output (results on stdout, logs as JSON lines on stderr)
    #[arg(long, global = true)]
    json: bool,

    /// Override the working directory
    #[arg(long, global = true, value_name = "PATH")]
    cwd: Option<PathBuf>,

    /// Config file (default: sluice.config.js etc. in the working directory)
    #[arg(short = 'c', long, global = true, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Build mode: development or production
    #[arg(short = 'm', long, global = true, env = "SLUICE_MODE", value_name = "MODE")]
    mode: Option<String>,

    /// Treat unknown modes as development instead of failing
    #[arg(long, global = true)]
    allow_unknown_mode: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Build the client library into the output directory (default mode: production)
    Build {
        /// Rebuild when files under the root change
        #[arg(long)]
        watch: bool,

        /// Quiet period before a rebuild, in milliseconds
        #[arg(long, default_value = "100", requires = "watch")]
        debounce_ms: u64,
    },

    /// Start the dev server (default mode: development)
    #[command(visible_alias = "serve")]
    Dev {
        /// Port to listen on (overrides config)
        #[arg(long, short = 'p')]
        port: Option<u16>,

        /// Host to bind to (overrides config)
        #[arg(long)]
        host: Option<String>,

        /// Open the browser once the server is listening
        #[arg(long)]
        open: bool,

        /// Try the next ports when the configured one is taken
        #[arg(long)]
        no_strict_port: bool,
    },

    /// Print the resolved configuration
    Config,

    /// Print version information
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    let cwd = cli
        .cwd
        .or_else(|| std::env::current_dir().ok())
        .unwrap_or_else(|| PathBuf::from("."));
    let cwd = dunce::canonicalize(&cwd).unwrap_or(cwd);

    let ctx = Context {
        cwd,
        config_file: cli.config,
        mode: cli.mode,
        policy: if cli.allow_unknown_mode {
            ModePolicy::Lenient
        } else {
            ModePolicy::Strict
        },
        json: cli.json,
    };

    logging::init(cli.verbose, cli.json);

    match cli.command {
        Some(Commands::Build { watch, debounce_ms }) => {
            if watch && ctx.json {
                eprintln!("error: --watch and --json cannot be combined");
                eprintln!("hint: --json prints exactly one result object; watch mode builds repeatedly");
                std::process::exit(2);
            }
            let span = tracing::info_span!("build", cmd = "build", cwd = %ctx.cwd.display());
            let _guard = span.enter();
            if watch {
                commands::build::watch(&ctx, debounce_ms)
            } else {
                commands::build::run(&ctx)
            }
        }
        Some(Commands::Dev {
            port,
            host,
            open,
            no_strict_port,
        }) => {
            let action = commands::dev::DevAction {
                port,
                host,
                open,
                no_strict_port,
            };
            let rt = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|e| miette::miette!("failed to start runtime: {e}"))?;
            rt.block_on(commands::dev::run(&ctx, action))
        }
        Some(Commands::Config) => commands::config::run(&ctx),
        Some(Commands::Version) | None => commands::version::run(),
    }
}
