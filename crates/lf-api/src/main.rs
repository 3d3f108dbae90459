#[tokio::main]
async fn main() {
    if let Err(err) = lf_api::run().await {
        tracing::error!(error = %err, "lf-api exited with error");
        eprintln!("lf-api: {err}");
        std::process::exit(1);
    }
}
