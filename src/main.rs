extern crate caption_service;
extern crate docopt;
#[macro_use]
extern crate serde_derive;
extern crate tracing;
extern crate tracing_subscriber;

use std::error;
use std::io;
use std::path;
use std::process;

use caption_service::config::{ModelConfig, MODEL_OPTIONS};
use caption_service::features;
use caption_service::CaptionContext;
use tracing::warn;
use tracing_subscriber::EnvFilter;

const USAGE: &'static str = r#"
Image captioning on Menoh

Usage:
  caption [options] <image>
  caption (-h | --help)

Options:
  --no-display               Do not open the image after captioning.
  -v, --verbose              Log progress to stderr.
  -h, --help                 Show this message.
"#;

#[derive(Debug, Deserialize)]
struct Args {
    arg_image: path::PathBuf,
    flag_no_display: bool,
    flag_verbose: bool,
}

fn main() -> Result<(), Box<dyn (error::Error)>> {
    let usage = format!("{}{}", USAGE, MODEL_OPTIONS);
    let argv = docopt::Docopt::new(usage)
        .and_then(|d| d.parse())
        .unwrap_or_else(|e| e.exit());
    let model_config = ModelConfig::from_argv(&argv).unwrap_or_else(|e| e.exit());
    let args: Args = argv.deserialize().unwrap_or_else(|e| e.exit());

    let level = if args.flag_verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)))
        .with_writer(io::stderr)
        .init();

    let context = CaptionContext::load(&model_config)?;
    let img = features::open_image(&args.arg_image)?;
    let caption = context.caption_image(&img)?;
    println!("\nGenerated Caption:\n{}", caption);

    if !args.flag_no_display {
        if let Err(err) = display(&args.arg_image) {
            warn!(error = %err, "could not open an image viewer");
        }
    }

    Ok(())
}

fn display(path: &path::Path) -> io::Result<()> {
    let viewer = if cfg!(target_os = "macos") {
        "open"
    } else if cfg!(target_os = "windows") {
        "explorer"
    } else {
        "xdg-open"
    };
    process::Command::new(viewer).arg(path).spawn().map(|_| ())
}
