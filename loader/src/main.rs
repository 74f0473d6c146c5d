use std::process::ExitCode;

use clap::Parser;

use elfload::cli::Cli;
use elfload::logger;

fn main() -> ExitCode {
    let cli = Cli::parse();

    if let Err(e) = logger::init(cli.log_level) {
        eprintln!("warning: logger unavailable: {e}");
    }

    // SAFETY: running the named program in-process is this tool's purpose;
    // the user vouches for it by passing it on the command line.
    match unsafe { elfload::load_and_run(&cli.path) } {
        Ok(result) => {
            println!("User _start return value = {result}");
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("error: {} stage: {e}", e.stage());
            e.exit_code()
        }
    }
}
