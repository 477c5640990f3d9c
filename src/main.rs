use std::process::ExitCode;

use kasp::env::RealEnv;

fn main() -> ExitCode {
    ExitCode::from(kasp::run(RealEnv))
}
