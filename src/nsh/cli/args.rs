use clap::Parser;
use nsh::config::CONFIG_ENV;
use std::path::PathBuf;

/// Returns the version string, including git hash and commit date for non-release builds.
/// Format: "0.3.0" for releases, "0.3.0@abc1234 2024-01-15 14:30" for dev builds
fn get_version() -> &'static str {
    const VERSION: &str = env!("CARGO_PKG_VERSION");
    const GIT_HASH: &str = env!("GIT_HASH");
    const GIT_COMMIT_DATE: &str = env!("GIT_COMMIT_DATE");
    const IS_RELEASE: &str = env!("IS_RELEASE");

    use std::sync::OnceLock;
    static VERSION_STRING: OnceLock<String> = OnceLock::new();

    VERSION_STRING.get_or_init(|| {
        if IS_RELEASE == "true" || GIT_HASH.is_empty() {
            VERSION.to_string()
        } else {
            format!("{}@{} {}", VERSION, GIT_HASH, GIT_COMMIT_DATE)
        }
    })
}

#[derive(Parser, Debug)]
#[command(name = "nsh", bin_name = "nsh", version = get_version())]
#[command(about = "Namespace shell over a remote object store", long_about = None)]
pub struct Cli {
    /// Run the given command line and exit
    #[arg(short, long, conflicts_with = "script")]
    pub command: Option<String>,

    /// Run the commands in a file and exit
    #[arg(short, long)]
    pub script: Option<PathBuf>,

    /// Session variables file
    #[arg(long, env = CONFIG_ENV)]
    pub config: Option<PathBuf>,

    /// Render results as JSON
    #[arg(long)]
    pub json: bool,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    pub verbose: u8,
}

impl Cli {
    /// Log directive used when `RUST_LOG` is not set.
    pub fn log_level(&self) -> &'static str {
        match self.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        }
    }
}
