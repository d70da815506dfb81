use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    // `watch` installs its own signal handler and stops at a tick boundary;
    // every other command is short-lived.
    let result = rewind::cli::run().await;

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {:?}", e);
            ExitCode::from(rewind::errors::get_exit_code(&e))
        }
    }
}
