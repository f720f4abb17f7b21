use clap::Parser;
use extender_bridge::transport::{CHANNEL_ENV, DEFAULT_CHANNEL_NAME};

#[derive(Parser, Debug, Clone)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Channel name, or socket path if it contains '/'.
    #[clap(long, env = CHANNEL_ENV, default_value = DEFAULT_CHANNEL_NAME)]
    pub pipe_name: String,

    /// Optional file for request/response records.
    #[clap(long)]
    pub log_file: Option<std::path::PathBuf>,

    /// Trace every exchange into the log file.
    /// Requires --log-file.
    #[clap(long)]
    pub trace: bool,

    /// Send a single request line to a running bridge, print the response and exit.
    #[clap(long, value_name = "JSON")]
    pub send: Option<String>,
}
