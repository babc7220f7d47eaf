//! wx-core binary entry point.

use clap::Parser;
use tracing_subscriber::EnvFilter;
use wx_core::cli::{execute, Cli, LogFormat};

fn init_tracing(verbose: u8, format: LogFormat) {
    let default = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = match format {
        LogFormat::Json => builder.json().try_init(),
        LogFormat::Text => builder.try_init(),
    };
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.global.verbose, cli.global.log_format);
    let code = execute(&cli);
    std::process::exit(code.as_i32());
}
