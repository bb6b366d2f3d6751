use std::path::PathBuf;

use clap::{Parser, Subcommand};

/// dbsnap: scheduled database snapshots with an archive and a local cache
#[derive(Parser, Debug)]
#[command(name = "dbsnap", version, about = "Create, list, load and prune database snapshots.", long_about = None, arg_required_else_help = true)]
pub struct Cli {
    /// Configuration file
    #[arg(short = 'c', long = "config", env = "DB_SNAPSHOTS_CONFIG", default_value_os_t = crate::config::default_config_path())]
    pub config: PathBuf,

    /// Runtime environment checked against each plan's environment locks
    #[arg(short = 'e', long = "env", env = "DB_SNAPSHOTS_ENV")]
    pub env: Option<String>,

    /// Verbose logging
    #[arg(short = 'v', long = "verbose")]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// List archived snapshots, per plan, plus the local cache
    List {
        /// Only this plan
        plan: Option<String>,
    },

    /// Create a snapshot for a plan or every plan of a group
    Create {
        /// Plan or group name; all plans when omitted
        target: Option<String>,
        /// Prune old snapshots afterwards
        #[arg(long)]
        cleanup: bool,
    },

    /// Load a snapshot into the plan's connection
    Load {
        /// Plan or group name; required when more than one plan exists
        target: Option<String>,
        /// File name or 1-based index in `list`; newest when omitted
        file: Option<String>,
        /// Only use an already cached copy
        #[arg(long)]
        use_local_copy: bool,
        /// Download again even when a cached copy exists
        #[arg(long)]
        recached: bool,
        /// Keep the downloaded file in the local cache
        #[arg(long)]
        keep_cached: bool,
        /// Do not run post-load statements
        #[arg(long)]
        skip_post_commands: bool,
        /// Drop every table of the target database first
        #[arg(long)]
        drop_tables: bool,
    },

    /// Delete one archived snapshot
    Delete {
        plan: String,
        /// File name or 1-based index in `list`
        file: String,
        /// Do not ask for confirmation
        #[arg(short = 'y', long)]
        yes: bool,
    },

    /// Delete snapshots beyond each plan's keep_last
    Cleanup {
        /// Plan or group name; all plans when omitted
        target: Option<String>,
        /// Only report what would be removed
        #[arg(long)]
        dry_run: bool,
    },

    /// Delete files from the local cache
    ClearCache {
        /// Only files belonging to this plan
        plan: Option<String>,
        /// File name to keep
        #[arg(long)]
        except_file: Option<String>,
    },

    /// Show configured plans and groups
    Plans,
}
