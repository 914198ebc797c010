use std::io;

use example_inference::{Client, Config, Error};
use tracing_subscriber::EnvFilter;

fn main() -> Result<(), Error> {
    // stdout is reserved for the completion text.
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    tracing::debug!("using {:?}", config);

    let client = Client::new(&config)?;
    example_inference::run(&client, &config.model, &mut io::stdout().lock())
}
