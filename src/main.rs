use clap::Parser;
use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    let args = watch_ota_lib::cli::Args::parse();
    match watch_ota_lib::cli::run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("watch-ota: {e}");
            ExitCode::FAILURE
        }
    }
}
