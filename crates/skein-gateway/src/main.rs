use std::env;

use skein_config::loader::load_config;
use skein_gateway::{ServerBuilder, observability};

#[tokio::main]
async fn main() {
    // A missing .env is normal; a malformed one should be visible.
    match dotenvy::dotenv() {
        Ok(_) => {}
        Err(dotenvy::Error::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => eprintln!("warning: could not read .env: {e}"),
    }

    observability::init_tracing();

    let (config_path, config_source) = config_path();
    let cfg = match load_config(Some(&config_path)) {
        Ok(cfg) => cfg,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(2);
        }
    };
    tracing::info!(path = %config_path, source = config_source, "configuration loaded");
    observability::apply_logging_level(&cfg.logging.level);

    let server = match ServerBuilder::new().with_config(cfg).build() {
        Ok(server) => server,
        Err(e) => {
            eprintln!("Gateway initialization failed: {e}");
            std::process::exit(2);
        }
    };
    if let Err(e) = server.run().await {
        eprintln!("Server error: {e}");
    }
}

/// Where the configuration comes from: `--config <path>` beats the
/// `SKEIN_CONFIG` variable, which beats `skein.toml` in the working
/// directory. The source label only feeds the startup log line.
fn config_path() -> (String, &'static str) {
    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        if arg == "--config"
            && let Some(path) = args.next()
        {
            return (path, "--config");
        }
    }
    match env::var("SKEIN_CONFIG") {
        Ok(path) if !path.is_empty() => (path, "SKEIN_CONFIG"),
        _ => ("skein.toml".to_string(), "default"),
    }
}
