use std::path::PathBuf;

use ce_client::config::ApiConfig;

fn json_value_parser(raw: &str) -> Result<serde_json::Value, String> {
    serde_json::from_str(raw).map_err(|err| format!("Invalid JSON: {err}"))
}

#[derive(clap::Parser)]
#[command(name = "ce")]
#[command(version)]
#[command(about = "Manage jobs, uploads, and users on a Calculation Engine instance")]
#[command(long_about = "
A command-line client for the Calculation Engine HTTP API.

Connection settings default to the CE_* environment variables
(CE_API_URL_AUTHORITY, CE_API_TOKEN, CE_USERNAME, ...) and can be
overridden per invocation with the flags below.

Examples:
  # Submit a job with an inline configuration
  ce job create --name eos-scan --config '{\"module\": \"cmf\"}'

  # Watch it and download its outputs when it succeeds
  ce monitor <job-uuid> --download-to ./downloads

  # Push an input table and make it public
  ce upload file ./eos.csv --dest inputs/eos.csv --public
")]
pub struct Args {
    #[command(flatten)]
    pub connection: ConnectionArgs,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Args)]
pub struct ConnectionArgs {
    /// Host and port of the engine, e.g. localhost:4000
    #[arg(long, global = true, value_name = "HOST:PORT")]
    pub authority: Option<String>,

    /// URL scheme (http or https)
    #[arg(long, global = true, value_name = "SCHEME")]
    pub protocol: Option<String>,

    /// API base path under the authority
    #[arg(long = "base-path", global = true, value_name = "PATH")]
    pub base_path: Option<String>,

    /// Static API token; skips the credential exchange
    #[arg(long, global = true, value_name = "TOKEN")]
    pub token: Option<String>,

    #[arg(long, global = true, value_name = "NAME")]
    pub username: Option<String>,

    #[arg(long, global = true, value_name = "PASSWORD")]
    pub password: Option<String>,

    /// Requests-per-second budget used to pace 429 retries
    #[arg(long = "rate-limit", global = true, value_name = "N")]
    pub rate_limit: Option<u32>,
}

impl ConnectionArgs {
    /// Environment-derived defaults overridden by whatever flags were
    /// given.
    pub fn into_config(self) -> ApiConfig {
        let mut config = ApiConfig::from_env();
        if let Some(authority) = self.authority {
            config = config.with_authority(authority);
        }
        if let Some(protocol) = self.protocol {
            config = config.with_protocol(protocol);
        }
        if let Some(base_path) = self.base_path {
            config = config.with_basepath(base_path);
        }
        if let Some(token) = self.token {
            config = config.with_token(token);
        }
        if let Some(username) = self.username {
            config.username = username;
        }
        if let Some(password) = self.password {
            config.password = password;
        }
        if let Some(rate_limit) = self.rate_limit {
            config = config.with_rate_limit(rate_limit);
        }
        config
    }
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Manage computation jobs
    Job {
        #[command(subcommand)]
        command: JobCommands,
    },

    /// Manage uploaded files and datasets
    Upload {
        #[command(subcommand)]
        command: UploadCommands,
    },

    /// Manage user accounts
    User {
        #[command(subcommand)]
        command: UserCommands,
    },

    /// List calculation modules installed on the engine
    Modules,

    /// List engine metrics
    Metrics,

    /// Poll a job until it settles, optionally downloading its outputs
    Monitor(MonitorArgs),
}

#[derive(clap::Subcommand)]
pub enum JobCommands {
    /// Submit a new job
    Create {
        /// Job name; left empty, a test-NNNNN placeholder is generated
        #[arg(long, default_value = "")]
        name: String,

        #[arg(long, default_value = "")]
        description: String,

        /// Job configuration as inline JSON
        #[arg(long, value_name = "JSON", value_parser = json_value_parser, default_value = "{}")]
        config: serde_json::Value,
    },

    /// Fetch one job by identifier
    Get { id: String },

    /// List all jobs across every page of results
    List,

    /// Change a job's saved/public flags
    Update {
        id: String,

        #[arg(long)]
        saved: Option<bool>,

        #[arg(long)]
        public: Option<bool>,
    },

    /// Delete one job
    Delete { id: String },

    /// Delete every job the listing returns. No confirmation is asked.
    DeleteAll,
}

#[derive(clap::Subcommand)]
pub enum UploadCommands {
    /// Upload a local file
    File {
        path: PathBuf,

        /// Destination path on the server
        #[arg(long, value_name = "PATH")]
        dest: String,

        #[arg(long, default_value = "")]
        description: String,

        #[arg(long, default_value_t = false)]
        public: bool,
    },

    /// Fetch one upload record by identifier
    Get { id: String },

    /// List all uploads across every page of results
    List,

    /// Change an upload's visibility or description
    Update {
        id: String,

        #[arg(long)]
        public: Option<bool>,

        #[arg(long)]
        description: Option<String>,
    },

    /// Delete one upload
    Delete { id: String },

    /// Download an uploaded file into a local directory
    Download {
        id: String,

        #[arg(long, value_name = "DIR", default_value = "/tmp/ce/uploads")]
        root: PathBuf,
    },
}

#[derive(clap::Subcommand)]
pub enum UserCommands {
    /// List user accounts
    List,

    /// Create a user account
    Create {
        username: String,

        #[arg(long)]
        password: String,

        #[arg(long = "first-name", default_value = "")]
        first_name: String,

        #[arg(long = "last-name", default_value = "")]
        last_name: String,

        /// Whether the account gets staff privileges (--staff false to opt out)
        #[arg(long = "staff", action = clap::ArgAction::Set, default_value_t = true)]
        is_staff: bool,
    },

    /// Delete a user account by username
    Delete { username: String },
}

#[derive(clap::Args)]
pub struct MonitorArgs {
    /// Job identifier to watch
    pub job: String,

    /// Wall-clock budget in seconds before giving up
    #[arg(long = "time-limit", value_name = "SECONDS", default_value_t = 3600)]
    pub time_limit: u64,

    /// Seconds between status checks
    #[arg(long, value_name = "SECONDS", default_value_t = 60)]
    pub interval: u64,

    /// Download the job's outputs here once it succeeds
    #[arg(long = "download-to", value_name = "DIR")]
    pub download_to: Option<PathBuf>,
}
