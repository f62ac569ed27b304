#![forbid(unsafe_code)]

//! zeropad — padding-file daemon entry point.

use clap::Parser;

mod cli_app;

fn main() {
    let args = match cli_app::Cli::try_parse() {
        Ok(args) => args,
        Err(e) => {
            // Help and version go to stdout and are the only successful exits.
            let code = i32::from(e.use_stderr());
            let _ = e.print();
            std::process::exit(code);
        }
    };
    if let Err(e) = cli_app::run(&args) {
        eprintln!("zeropad: {e}");
        std::process::exit(e.exit_code());
    }
}
