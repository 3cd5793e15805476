//! Process entry point for the random service (§6).

use std::process::ExitCode;

fn main() -> ExitCode {
    dataservice_admin::init_logging();

    let config = match randomservice::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("randomservice: {e:?}");
            return ExitCode::FAILURE;
        }
    };

    match randomservice::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("randomservice: {e:?}");
            ExitCode::FAILURE
        }
    }
}
