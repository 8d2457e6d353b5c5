extern crate caption_service;
extern crate docopt;
#[macro_use]
extern crate serde_derive;
extern crate tokio;
extern crate tracing_subscriber;

use std::error;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::path;

use caption_service::config::{ModelConfig, ServerConfig, MODEL_OPTIONS};
use caption_service::server::{self, AppState};
use caption_service::{CaptionContext, HistoryStore, InferenceWorker};
use tracing_subscriber::EnvFilter;

const USAGE: &'static str = r#"
Image captioning web service

Usage:
  caption-server [options]
  caption-server (-h | --help)

Options:
  --host=<addr>              Address to bind [default: 0.0.0.0]
  --port=<port>              Port to listen on [default: 5000]
  --history=<path>           History file [default: history.json]
  --history-limit=<n>        Number of captions kept in the history [default: 20]
  -v, --verbose              Debug logging.
  -h, --help                 Show this message.
"#;

#[derive(Debug, Deserialize)]
struct Args {
    flag_host: String,
    flag_port: u16,
    flag_history: path::PathBuf,
    flag_history_limit: usize,
    flag_verbose: bool,
}

impl Args {
    fn server_config(&self) -> Result<ServerConfig, Box<dyn (error::Error)>> {
        let host: IpAddr = self.flag_host.parse()?;
        Ok(ServerConfig {
            addr: SocketAddr::new(host, self.flag_port),
            history_path: self.flag_history.clone(),
            history_limit: self.flag_history_limit,
        })
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn (error::Error)>> {
    let usage = format!("{}{}", USAGE, MODEL_OPTIONS);
    let argv = docopt::Docopt::new(usage)
        .and_then(|d| d.parse())
        .unwrap_or_else(|e| e.exit());
    let model_config = ModelConfig::from_argv(&argv).unwrap_or_else(|e| e.exit());
    let args: Args = argv.deserialize().unwrap_or_else(|e| e.exit());

    let level = if args.flag_verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_target(true)
        .with_writer(io::stderr)
        .init();

    let server_config = args.server_config()?;
    let worker = tokio::task::spawn_blocking(move || {
        InferenceWorker::spawn(move || CaptionContext::load(&model_config))
    })
    .await??;

    let history = HistoryStore::new(server_config.history_path.clone(), server_config.history_limit);
    server::serve(&server_config, AppState::new(worker, history)).await?;
    Ok(())
}
