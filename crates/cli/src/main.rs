use std::process::ExitCode;

#[tokio::main]
async fn main() -> ExitCode {
    sessionq_cli::main_entry().await
}
