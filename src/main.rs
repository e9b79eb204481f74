use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    match retinet_lib::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "RetiNet stopped with an error");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}
