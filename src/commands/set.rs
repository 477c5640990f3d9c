use crate::datastore::Datastore;
use crate::enforcer::UnixTime;
use crate::env::Env;
use crate::error::{ensure, Error};
use crate::parse::{parse_duration, parse_opt_time};

/// An optional point in time, `off` on the command line for none.
type OptUnixTime = Option<UnixTime>;

#[derive(Clone, Debug, PartialEq, Eq, clap::Subcommand)]
pub enum SetCommands {
    /// Set the time between enforcement runs
    RunInterval {
        #[arg(value_parser = parse_duration)]
        interval: u64,
    },

    /// Set how far ahead keys are generated
    KeyGenInterval {
        #[arg(value_parser = parse_duration)]
        interval: u64,
    },

    /// Act as if it were a different time, or `off` to use the clock
    Faketime {
        #[arg(value_parser = parse_opt_time)]
        time: OptUnixTime,
    },
}

impl SetCommands {
    pub fn execute(self, env: &impl Env, ds: &mut Datastore) -> Result<bool, Error> {
        match self {
            Self::RunInterval { interval } => {
                ensure!(interval > 0, "run interval cannot be zero");
                ds.config.run_interval = interval;
            }
            Self::KeyGenInterval { interval } => {
                ds.config.key_gen_interval = interval;
            }
            Self::Faketime { time } => {
                ds.config.faketime = time;
            }
        }
        show(env, ds);
        Ok(true)
    }
}

/// Print the enforcer settings.
pub fn show(env: &impl Env, ds: &Datastore) {
    let mut out = env.stdout();
    writeln!(out, "run interval:     {}s", ds.config.run_interval);
    writeln!(out, "key gen interval: {}s", ds.config.key_gen_interval);
    match ds.config.faketime {
        Some(time) => writeln!(out, "faketime:         {time}"),
        None => writeln!(out, "faketime:         off"),
    }
}

#[cfg(test)]
mod tests {
    use crate::commands::tests::{ok, setup};

    #[test]
    fn set_and_show() {
        let (dir, cmd) = setup();
        let res = ok(cmd.args(["show"]));
        assert_eq!(
            res.stdout,
            "run interval:     3600s\n\
             key gen interval: 31536000s\n\
             faketime:         off\n"
        );

        ok(cmd.args(["set", "run-interval", "2h"]));
        ok(cmd.args(["set", "key-gen-interval", "30d"]));
        let res = ok(cmd.args(["set", "faketime", "2025-01-01T00:00:00Z"]));
        assert_eq!(
            res.stdout,
            "run interval:     7200s\n\
             key gen interval: 2592000s\n\
             faketime:         2025-01-01 00:00:00\n"
        );

        // Fake time applies to generated keys.
        ok(cmd.args(["generate"]));
        let state = crate::commands::tests::state(dir.path());
        assert_eq!(state["tables"]["keypairs"][0]["generate"], 1_735_689_600);

        let res = ok(cmd.args(["set", "faketime", "off"]));
        assert!(res.stdout.ends_with("faketime:         off\n"));

        let res = cmd.args(["set", "run-interval", "0"]).run();
        assert_eq!(res.exit_code, 1);
        let res = cmd.args(["set", "faketime", "soon"]).run();
        assert_eq!(res.exit_code, 2);
    }
}
