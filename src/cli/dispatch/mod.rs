//! Command-line argument dispatch.
//!
//! Maps validated CLI matches to the action the binary executes, currently
//! only starting the API server with its full configuration.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{ARG_DSN, ARG_PORT, admission, auth};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>(ARG_PORT).copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>(ARG_DSN)
        .cloned()
        .context("missing required argument: --dsn")?;

    let auth_opts = auth::Options::parse(matches)?;
    let admission_opts = admission::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        token_secret: auth_opts.token_secret,
        token_algorithm: auth_opts.token_algorithm,
        token_ttl_seconds: auth_opts.token_ttl_seconds,
        argon2_memory_kib: auth_opts.argon2_memory_kib,
        argon2_iterations: auth_opts.argon2_iterations,
        argon2_parallelism: auth_opts.argon2_parallelism,
        rate_limit_max_calls: admission_opts.max_calls,
        rate_limit_period_seconds: admission_opts.period_seconds,
        rate_limit_capacity: admission_opts.capacity,
        trust_forwarded_for: admission_opts.trust_forwarded_for,
    }))
}
