//! ID photo backend
//!
//! Runs the HTTP service (`serve`) or one pipeline stage on local files.

#[cfg(feature = "cli")]
use idphoto_backend::cli;

#[cfg(feature = "cli")]
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    cli::main().await
}

#[cfg(not(feature = "cli"))]
fn main() {
    eprintln!("CLI feature not enabled. Please rebuild with --features cli");
    std::process::exit(2);
}
