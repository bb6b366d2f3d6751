mod cli;
mod config;
mod context;
mod drivers;
mod error;
mod exec;
mod group;
mod ops;
mod plan;
mod registry;
mod report;
mod snapshot;
mod storage;
mod template;
mod utils;

use anyhow::Result;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};

fn main() {
    if let Err(err) = run() {
        eprintln!("Error: {}", err);
        std::process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt().with_env_filter(filter).with_writer(std::io::stderr).init();
}

fn run() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let ctx = ops::open_context(&cli.config, cli.env.as_deref())?;

    match cli.command {
        Commands::List { plan } => {
            ops::do_list(&ctx, plan.as_deref())?;
        }
        Commands::Create { target, cleanup } => {
            ops::do_create(&ctx, target.as_deref(), cleanup)?;
        }
        Commands::Load { target, file, use_local_copy, recached, keep_cached, skip_post_commands, drop_tables } => {
            let options = plan::LoadOptions {
                use_local_copy,
                force_download: recached,
                keep_cached,
                skip_post_commands,
                drop_tables,
            };
            ops::do_load(&ctx, target.as_deref(), file.as_deref(), &options)?;
        }
        Commands::Delete { plan, file, yes } => {
            ops::do_delete(&ctx, &plan, &file, yes)?;
        }
        Commands::Cleanup { target, dry_run } => {
            ops::do_cleanup(&ctx, target.as_deref(), dry_run)?;
        }
        Commands::ClearCache { plan, except_file } => {
            ops::do_clear_cache(&ctx, plan.as_deref(), except_file.as_deref())?;
        }
        Commands::Plans => {
            ops::do_plans(&ctx)?;
        }
    }

    Ok(())
}
