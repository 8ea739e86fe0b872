use clap::Parser;

#[derive(Parser, Debug)]
#[command(name = "ziplinter")]
#[command(version)]
#[command(about = "Map the byte layout of a ZIP archive and flag structural anomalies", long_about = None)]
#[command(after_help = "Examples:\n  \
  ziplinter data.zip                     print the range map and anomalies\n  \
  ziplinter --json data.zip | jq .       machine-readable report\n  \
  ziplinter -a https://example.com/a.zip  anomalies of a remote archive")]
pub struct Cli {
    /// ZIP file path or HTTP URL
    #[arg(value_name = "FILE")]
    pub file: String,

    /// Print the report as JSON
    #[arg(long)]
    pub json: bool,

    /// Only print anomalies (text output)
    #[arg(short = 'a', long = "anomalies-only")]
    pub anomalies_only: bool,

    /// Exit with status 2 when any anomaly is found
    #[arg(long)]
    pub strict: bool,

    /// Quiet mode: no transfer statistics
    #[arg(short = 'q')]
    pub quiet: bool,

    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short = 'v', action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    pub fn is_http_url(&self) -> bool {
        self.file.starts_with("http://") || self.file.starts_with("https://")
    }

    /// Default log filter when `RUST_LOG` is not set
    pub fn log_filter(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "ziplinter=debug",
            _ => "ziplinter=trace",
        }
    }
}
