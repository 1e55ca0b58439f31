use clap::{Arg, ArgAction, ArgMatches, Command};

pub const ARG_RATE_LIMIT_MAX_CALLS: &str = "rate-limit-max-calls";
pub const ARG_RATE_LIMIT_PERIOD_SECONDS: &str = "rate-limit-period-seconds";
pub const ARG_RATE_LIMIT_CAPACITY: &str = "rate-limit-capacity";
pub const ARG_TRUST_FORWARDED_FOR: &str = "trust-forwarded-for";

#[derive(Debug, Clone)]
pub struct Options {
    pub max_calls: usize,
    pub period_seconds: u64,
    pub capacity: u64,
    pub trust_forwarded_for: bool,
}

impl Options {
    /// Parse admission control arguments from matches.
    ///
    /// # Errors
    /// Returns an error if a limit is zero.
    pub fn parse(matches: &ArgMatches) -> anyhow::Result<Self> {
        let options = Self {
            max_calls: matches
                .get_one::<usize>(ARG_RATE_LIMIT_MAX_CALLS)
                .copied()
                .unwrap_or(50),
            period_seconds: matches
                .get_one::<u64>(ARG_RATE_LIMIT_PERIOD_SECONDS)
                .copied()
                .unwrap_or(60),
            capacity: matches
                .get_one::<u64>(ARG_RATE_LIMIT_CAPACITY)
                .copied()
                .unwrap_or(100_000),
            trust_forwarded_for: matches.get_flag(ARG_TRUST_FORWARDED_FOR),
        };

        if options.max_calls == 0 {
            anyhow::bail!("--{ARG_RATE_LIMIT_MAX_CALLS} must be greater than zero");
        }

        Ok(options)
    }
}

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RATE_LIMIT_MAX_CALLS)
                .long(ARG_RATE_LIMIT_MAX_CALLS)
                .help("Requests admitted per client within one period")
                .env("ITEMKEEP_RATE_LIMIT_MAX_CALLS")
                .default_value("50")
                .value_parser(clap::value_parser!(usize)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_PERIOD_SECONDS)
                .long(ARG_RATE_LIMIT_PERIOD_SECONDS)
                .help("Length of the sliding admission window in seconds")
                .env("ITEMKEEP_RATE_LIMIT_PERIOD_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_RATE_LIMIT_CAPACITY)
                .long(ARG_RATE_LIMIT_CAPACITY)
                .help("Maximum number of clients tracked at once")
                .long_help(
                    "Maximum number of clients tracked at once.\n\nWhen full, the least recently seen client is forgotten and starts over with an empty window.",
                )
                .env("ITEMKEEP_RATE_LIMIT_CAPACITY")
                .default_value("100000")
                .value_parser(clap::value_parser!(u64).range(1..)),
        )
        .arg(
            Arg::new(ARG_TRUST_FORWARDED_FOR)
                .long(ARG_TRUST_FORWARDED_FOR)
                .help("Identify clients by X-Forwarded-For / X-Real-IP (only behind a trusted proxy)")
                .env("ITEMKEEP_TRUST_FORWARDED_FOR")
                .action(ArgAction::SetTrue),
        )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clear_env<F: FnOnce()>(f: F) {
        temp_env::with_vars(
            [
                ("ITEMKEEP_RATE_LIMIT_MAX_CALLS", None::<&str>),
                ("ITEMKEEP_RATE_LIMIT_PERIOD_SECONDS", None),
                ("ITEMKEEP_RATE_LIMIT_CAPACITY", None),
                ("ITEMKEEP_TRUST_FORWARDED_FOR", None),
            ],
            f,
        );
    }

    #[test]
    fn defaults_apply() {
        clear_env(|| {
            let matches = with_args(Command::new("itemkeep")).get_matches_from(vec!["itemkeep"]);
            let options = Options::parse(&matches);
            assert!(options.is_ok());
            if let Ok(options) = options {
                assert_eq!(options.max_calls, 50);
                assert_eq!(options.period_seconds, 60);
                assert_eq!(options.capacity, 100_000);
                assert!(!options.trust_forwarded_for);
            }
        });
    }

    #[test]
    fn flags_override() {
        clear_env(|| {
            let matches = with_args(Command::new("itemkeep")).get_matches_from(vec![
                "itemkeep",
                "--rate-limit-max-calls",
                "3",
                "--rate-limit-period-seconds",
                "10",
                "--trust-forwarded-for",
            ]);
            let options = Options::parse(&matches);
            assert!(options.is_ok());
            if let Ok(options) = options {
                assert_eq!(options.max_calls, 3);
                assert_eq!(options.period_seconds, 10);
                assert!(options.trust_forwarded_for);
            }
        });
    }

    #[test]
    fn zero_max_calls_is_rejected() {
        clear_env(|| {
            let matches = with_args(Command::new("itemkeep"))
                .get_matches_from(vec!["itemkeep", "--rate-limit-max-calls", "0"]);
            assert!(Options::parse(&matches).is_err());
        });
    }

    #[test]
    fn zero_period_is_rejected_by_parser() {
        clear_env(|| {
            let result = with_args(Command::new("itemkeep")).try_get_matches_from(vec![
                "itemkeep",
                "--rate-limit-period-seconds",
                "0",
            ]);
            assert!(result.is_err());
        });
    }
}
