use crate::http::client::{ClientOptions, MAX_REDIRECTS};
use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug, Clone)]
#[command(author, version, about = "Show where the time of an HTTP request goes", long_about)]
pub struct Cli {
    /// The request url,like http://www.google.com
    pub url: String,
    ///  Specify request method to use
    #[arg(short = 'X', long = "request", value_name = "method")]
    pub method_option: Option<String>,
    /// HTTP POST data.
    #[arg(short = 'd', long = "data", value_name = "data")]
    pub body_option: Option<String>,
    /// The http headers.
    #[arg(short = 'H', long = "header", value_name = "header")]
    pub headers: Vec<String>,
    ///  Send User-Agent <name> to server
    #[arg(short = 'A', long = "user-agent", value_name = "name")]
    pub user_agent_option: Option<String>,
    /// The Cookie option.
    #[arg(short = 'b', long = "cookie", value_name = "data")]
    pub cookie_option: Option<String>,
    /// CA certificate bundle (PEM) to verify peers with.
    #[arg(short = 'c', long = "cacert", value_name = "file")]
    pub certificate_path_option: Option<PathBuf>,
    /// Allow insecure server connections
    #[arg(short = 'k', long = "insecure")]
    pub skip_certificate_validate: bool,
    /// Follow redirects
    #[arg(short = 'L', long = "location")]
    pub follow_redirects: bool,
    /// Maximum number of redirects allowed
    #[arg(long = "max-redirs", value_name = "num", default_value_t = MAX_REDIRECTS)]
    pub max_redirects: u8,
    /// Maximum time allowed for the whole request, in seconds
    #[arg(short = 'm', long = "max-time", value_name = "seconds", default_value_t = 30)]
    pub max_time: u64,
    ///  Write to file instead of stdout.
    #[arg(short = 'o', long = "output", value_name = "file")]
    pub file_path_option: Option<PathBuf>,
    /// Show document info only
    #[arg(short = 'I', long = "head")]
    pub header_option: bool,
    /// Print the timing breakdown as JSON
    #[arg(long = "json")]
    pub json: bool,
    ///  Make the operation more talkative
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbosity: u8,
}

impl Cli {
    pub fn client_options(&self) -> ClientOptions {
        ClientOptions {
            follow_redirects: self.follow_redirects,
            max_redirects: self.max_redirects,
            ca_file: self.certificate_path_option.clone(),
            insecure: self.skip_certificate_validate,
        }
    }
}
