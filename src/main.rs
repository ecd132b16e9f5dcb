mod cli;
mod commands;
mod config;
mod engine;
mod ui;

use anyhow::Result;
use authentik::{Client, RetryConfig};
use clap::error::ErrorKind;
use clap::{CommandFactory, Parser};
use clap_complete::generate;
use cli::{ApiArgs, Cli, Command};
use config::{ApiSettings, Catalog, CatalogSource, MissingSettings};
use std::io;
use std::process::ExitCode;

/// Global context for the application
pub struct Context {
    pub quiet: bool,
    pub api: ApiArgs,
}

impl Context {
    /// Host and token from flags or environment.
    pub fn settings(&self) -> Result<ApiSettings, MissingSettings> {
        self.settings_with(self.api.token.as_deref(), "AUTHENTIK_TOKEN")
    }

    /// Host from flags or environment, with a caller-chosen token.
    pub fn settings_with(
        &self,
        token: Option<&str>,
        token_var: &'static str,
    ) -> Result<ApiSettings, MissingSettings> {
        ApiSettings::require(self.api.host.as_deref(), token, token_var)
    }

    pub fn client(&self, settings: &ApiSettings) -> Client {
        let retry = RetryConfig {
            max_attempts: self.api.max_attempts,
            ..RetryConfig::default()
        };
        Client::connect(&settings.host, &settings.token).with_retry(retry)
    }

    pub fn catalog(&self) -> Result<(Catalog, CatalogSource)> {
        Catalog::load(self.api.catalog.as_deref())
    }
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e)
            if matches!(
                e.kind(),
                ErrorKind::DisplayHelp
                    | ErrorKind::DisplayVersion
                    | ErrorKind::DisplayHelpOnMissingArgumentOrSubcommand
            ) =>
        {
            e.exit()
        }
        Err(e) => {
            print!("{e}");
            return ExitCode::FAILURE;
        }
    };

    // Initialize logging based on verbosity
    let log_level = match cli.verbose {
        0 => log::LevelFilter::Info,
        1 => log::LevelFilter::Debug,
        _ => log::LevelFilter::Trace,
    };

    env_logger::Builder::new()
        .filter_level(if cli.quiet {
            log::LevelFilter::Error
        } else {
            log_level
        })
        .parse_default_env()
        .format_timestamp(None)
        .init();

    let ctx = Context {
        quiet: cli.quiet,
        api: cli.api,
    };

    let outcome = match cli.command {
        Command::Reconcile(args) => commands::reconcile::run(&ctx, args),
        Command::CheckAuth => commands::check_auth::run(&ctx),
        Command::FixRedirects => commands::redirects::run(&ctx),
        Command::OutpostConfig(args) => commands::outpost_config::run(&ctx, args),
        Command::Outposts { json } => commands::outposts::run(&ctx, json),
        Command::ExtractTokens(args) => commands::tokens::run(&ctx, args),
        Command::Completions { shell } => {
            let mut cmd = Cli::command();
            generate(shell, &mut cmd, "akrecon", &mut io::stdout());
            Ok(true)
        }
    };

    match outcome {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            if let Some(usage) = usage_for(&e) {
                print!("{usage}");
            } else {
                log::error!("{e:#}");
                if let Some(api) = e.downcast_ref::<authentik::Error>() {
                    ui::dim(api.category().advice());
                }
            }
            ExitCode::FAILURE
        }
    }
}

/// Usage text when the error is missing connection settings.
fn usage_for(err: &anyhow::Error) -> Option<String> {
    err.downcast_ref::<MissingSettings>().map(MissingSettings::usage)
}
