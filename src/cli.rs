use crate::engine::tokens::TokenTarget;
use authentik::ProxyMode;
use clap::{Args, Parser, Subcommand};
use clap_complete::Shell;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "akrecon")]
#[command(version)]
#[command(about = "Reconcile Authentik proxy providers, applications and outposts")]
#[command(long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Verbosity level
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Suppress non-essential output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    #[command(flatten)]
    pub api: ApiArgs,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Args, Clone, Default)]
pub struct ApiArgs {
    /// Authentik base URL
    #[arg(long, env = "AUTHENTIK_HOST", global = true)]
    pub host: Option<String>,

    /// API token
    #[arg(long, env = "AUTHENTIK_TOKEN", hide_env_values = true, global = true)]
    pub token: Option<String>,

    /// Catalog file (TOML or JSON)
    #[arg(long, env = "AKRECON_CATALOG", global = true)]
    pub catalog: Option<String>,

    /// Attempts per API request
    #[arg(
        long,
        env = "AKRECON_MAX_ATTEMPTS",
        default_value_t = 3,
        value_parser = clap::value_parser!(u32).range(1..=10),
        global = true
    )]
    pub max_attempts: u32,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create or update providers and applications, then assign them to the outpost
    Reconcile(ReconcileArgs),

    /// Check that the API token authenticates
    CheckAuth,

    /// Correct external hosts, OAuth2 redirect URIs and launch URLs
    FixRedirects,

    /// Merge the catalog's outpost config into the live outpost
    OutpostConfig(OutpostConfigArgs),

    /// List outposts and their providers
    Outposts {
        /// Print raw records as JSON
        #[arg(long)]
        json: bool,
    },

    /// Extract outpost API tokens into a JSON file
    ExtractTokens(ExtractTokensArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: Shell,
    },
}

#[derive(Args, Clone, Default)]
pub struct ReconcileArgs {
    /// Target outpost id; skips selection by name
    #[arg(long, env = "OUTPOST_ID")]
    pub outpost_id: Option<String>,

    /// Target outpost name (defaults to the catalog's)
    #[arg(long, env = "OUTPOST_NAME")]
    pub outpost_name: Option<String>,

    /// Provider mode for every service: proxy, forward_single or forward_domain
    #[arg(long)]
    pub mode: Option<ProxyMode>,

    /// Empty other outposts holding the managed providers
    #[arg(long, conflicts_with = "no_detach_conflicts")]
    pub detach_conflicts: bool,

    /// Leave other outposts untouched
    #[arg(long)]
    pub no_detach_conflicts: bool,

    /// Also merge the catalog's outpost config into the target
    #[arg(long)]
    pub outpost_config: bool,

    /// Re-read the outpost until its providers match
    #[arg(long)]
    pub verify: bool,

    /// Read-back attempts for --verify
    #[arg(long, default_value_t = 3)]
    pub verify_attempts: u32,

    /// Exit non-zero when any provider or application failed
    #[arg(long)]
    pub strict: bool,
}

impl ReconcileArgs {
    /// Detach setting from the flags, if either was given.
    pub fn detach_override(&self) -> Option<bool> {
        if self.detach_conflicts {
            Some(true)
        } else if self.no_detach_conflicts {
            Some(false)
        } else {
            None
        }
    }
}

#[derive(Args, Clone, Default)]
pub struct OutpostConfigArgs {
    /// Outpost to update (defaults to the catalog's)
    #[arg(long, env = "OUTPOST_NAME")]
    pub outpost_name: Option<String>,
}

#[derive(Args, Clone, Default)]
pub struct ExtractTokensArgs {
    /// Admin API token (falls back to --token)
    #[arg(long, env = "AUTHENTIK_ADMIN_TOKEN", hide_env_values = true)]
    pub admin_token: Option<String>,

    /// Outpost to extract, as <id>=<expected name>; repeatable
    #[arg(long = "target", value_name = "ID=NAME")]
    pub targets: Vec<TokenTarget>,

    /// Result file
    #[arg(long, default_value = "/tmp/outpost-tokens-extraction.json")]
    pub output: PathBuf,
}
