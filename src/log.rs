//! Setting up logging.
//!
//! All log output goes through `tracing`. The subscriber writes to the
//! stderr of the environment so that tests see the log lines too.

use tracing::level_filters::LevelFilter;
use tracing::subscriber::DefaultGuard;

use crate::env::Env;

/// How much to log.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct Verbosity {
    /// Number of `-v` flags.
    pub verbose: u8,

    /// Only report errors.
    pub quiet: bool,
}

impl Verbosity {
    pub fn level(self) -> LevelFilter {
        if self.quiet {
            return LevelFilter::ERROR;
        }
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }
}

/// Install a subscriber for the current thread.
///
/// Logging stays active until the returned guard is dropped.
pub fn init(env: &impl Env, verbosity: Verbosity) -> DefaultGuard {
    let stderr = env.stderr();
    let ansi = stderr.is_terminal();
    let subscriber = tracing_subscriber::fmt()
        .with_writer(stderr)
        .with_max_level(verbosity.level())
        .with_target(false)
        .with_ansi(ansi)
        .without_time()
        .finish();
    tracing::subscriber::set_default(subscriber)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn levels() {
        assert_eq!(Verbosity::default().level(), LevelFilter::WARN);
        let v = |verbose| Verbosity {
            verbose,
            quiet: false,
        };
        assert_eq!(v(1).level(), LevelFilter::INFO);
        assert_eq!(v(2).level(), LevelFilter::DEBUG);
        assert_eq!(v(9).level(), LevelFilter::TRACE);
        assert_eq!(
            Verbosity {
                verbose: 2,
                quiet: true
            }
            .level(),
            LevelFilter::ERROR
        );
    }
}
