//! relock CLI - run a command while holding a Redis-backed lock
//!
//! Binary name: `relock`

#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::panic))]
#![warn(clippy::pedantic)]

mod cli;
mod run;

use std::process;

#[tokio::main]
async fn main() {
    // Logging goes to stderr; the child owns stdout.
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let invocation = cli::parse();
    let code = run::run(&invocation).await;

    #[allow(clippy::exit)]
    process::exit(code);
}
