use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    scalebridge_app_lib::init_logging();

    match scalebridge_app_lib::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("ScaleBridge stopped: {e:#}");
            ExitCode::FAILURE
        }
    }
}
