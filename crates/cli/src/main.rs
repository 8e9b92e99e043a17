use std::process::ExitCode;

fn main() -> ExitCode {
    dialgate_cli::run()
}
