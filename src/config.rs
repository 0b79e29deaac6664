use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;

use crate::policy::Policy;

/// Command-line surface: `gittornado --port <int> --gitbase <dir> --accessfile <path> --realm <str>`.
#[derive(Debug, Parser)]
#[command(name = "gittornado", version, about = "Smart HTTP gateway for bare git repositories")]
pub struct Args {
    /// Port to listen on
    #[arg(long, default_value_t = 8080)]
    pub port: u16,

    /// Base directory where bare git repositories are stored
    #[arg(long, default_value = ".")]
    pub gitbase: PathBuf,

    /// INI file with access permissions
    #[arg(long)]
    pub accessfile: Option<PathBuf>,

    /// Basic auth realm
    #[arg(long, default_value = "my git repos")]
    pub realm: String,
}

/// Immutable, process-wide context shared across every request via an `Arc`,
/// rather than the global options object the original source threaded through
/// module-level state.
pub struct ServerContext {
    pub port: u16,
    pub gitbase: PathBuf,
    pub realm: String,
    pub policy: Policy,
}

impl ServerContext {
    pub fn load(args: Args) -> anyhow::Result<Arc<Self>> {
        let gitbase = args
            .gitbase
            .canonicalize()
            .map_err(|e| anyhow::anyhow!("gitbase {:?} is not a valid directory: {e}", args.gitbase))?;

        let policy = match &args.accessfile {
            Some(path) => Policy::load(path)?,
            None => Policy::empty(),
        };

        Ok(Arc::new(Self {
            port: args.port,
            gitbase,
            realm: args.realm,
            policy,
        }))
    }
}
