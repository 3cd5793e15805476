//! Process entry point: installs logging, reads the process-boundary
//! configuration, and runs the event loop (§6).

use std::process::ExitCode;

fn main() -> ExitCode {
    dataservice_admin::init_logging();

    let config = match dataservice_admin::Config::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("dataservice: {e:?}");
            return ExitCode::FAILURE;
        }
    };

    match dataservice::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("dataservice: {e:?}");
            ExitCode::FAILURE
        }
    }
}
