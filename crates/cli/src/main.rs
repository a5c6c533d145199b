use std::process::ExitCode;

fn main() -> ExitCode {
    fixflow_cli::run()
}
