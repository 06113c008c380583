//! `poolctl` binary entrypoint.

#[tokio::main]
async fn main() {
    std::process::exit(poolctl_cli::run().await);
}
