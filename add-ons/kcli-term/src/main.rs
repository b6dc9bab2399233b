//! kcli binary entry point.

use kcli_term::runtime::Output;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() {
    if let Err(e) = dotenvy::dotenv() {
        tracing::debug!("no .env loaded: {e}");
    }

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let argv: Vec<String> = std::env::args().skip(1).collect();
    let output = Output::stdio();

    // Ctrl-C maps to the documented cancellation exit code.
    let code = tokio::select! {
        code = kcli_term::dispatch_captured(argv, output) => code,
        _ = tokio::signal::ctrl_c() => 3,
    };
    std::process::exit(code);
}
