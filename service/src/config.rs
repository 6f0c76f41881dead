use clap::builder::TypedValueParser as _;
use clap::Parser;
use dotenvy::dotenv;
use log::LevelFilter;
use sse::StreamConfig;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

#[derive(Clone, Debug, PartialEq)]
pub enum RustEnv {
    Development,
    Production,
    Staging,
}

#[derive(Debug, PartialEq, Eq)]
pub struct RustEnvParseError;

impl FromStr for RustEnv {
    type Err = RustEnvParseError;
    fn from_str(level: &str) -> Result<RustEnv, Self::Err> {
        match level.to_lowercase().as_str() {
            "development" => Ok(RustEnv::Development),
            "production" => Ok(RustEnv::Production),
            "staging" => Ok(RustEnv::Staging),
            _ => Err(RustEnvParseError),
        }
    }
}

impl fmt::Display for RustEnv {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            RustEnv::Development => write!(f, "development"),
            RustEnv::Production => write!(f, "production"),
            RustEnv::Staging => write!(f, "staging"),
        }
    }
}

#[derive(Clone, Debug, Parser)]
#[command(author, version, about, long_about = None)]
pub struct Config {
    /// A list of full CORS origin URLs that allowed to receive server responses.
    #[arg(
        long,
        env,
        value_delimiter = ',',
        use_value_delimiter = true,
        default_value = "http://localhost:3000,https://localhost:3000"
    )]
    pub allowed_origins: Vec<String>,

    /// The host interface to listen for incoming connections
    #[arg(short, long, env, default_value = "127.0.0.1")]
    pub interface: Option<String>,

    /// The host TCP port to listen for incoming connections
    #[arg(short, long, env, default_value_t = 4000)]
    pub port: u16,

    /// Set the log level verbosity threshold (level) to control what gets displayed on console output
    #[arg(
        short,
        long,
        env,
        default_value_t = LevelFilter::Info,
        value_parser = clap::builder::PossibleValuesParser::new(["OFF", "ERROR", "WARN", "INFO", "DEBUG", "TRACE"])
            .map(|s| s.parse::<LevelFilter>().unwrap()),
        )]
    pub log_level_filter: LevelFilter,

    /// Set the Rust runtime environment to use.
    #[arg(
    short,
    long,
    env,
    default_value_t = RustEnv::Development,
    value_parser = clap::builder::PossibleValuesParser::new([
        "DEVELOPMENT", "PRODUCTION", "STAGING",
        "development", "production", "staging"
    ])
        .map(|s| s.parse::<RustEnv>().unwrap()),
    )]
    pub runtime_env: RustEnv,

    /// How often each live stream polls its data source, in milliseconds
    #[arg(long, env, default_value_t = 2000, value_parser = clap::value_parser!(u64).range(1..))]
    pub stream_poll_interval_ms: u64,

    /// Maximum lifetime of a single stream connection in seconds, 0 disables the limit
    #[arg(long, env, default_value_t = 3600)]
    pub stream_timeout_secs: u64,

    /// Maximum number of clients connected to one tenant stream
    #[arg(long, env, default_value_t = 100)]
    pub stream_max_connections: usize,

    /// Maximum number of concurrent stream connections a single user may hold
    #[arg(long, env, default_value_t = 5)]
    pub stream_max_connections_per_user: usize,

    /// Emit a heartbeat event to every client on each poll tick
    #[arg(long, env, default_value_t = true, action = clap::ArgAction::Set)]
    pub stream_enable_heartbeat: bool,

    /// Seconds between liveness pings written to each client
    #[arg(long, env, default_value_t = 30, value_parser = clap::value_parser!(u64).range(1..))]
    pub stream_heartbeat_interval_secs: u64,

    /// Upper bound on items delivered per poll. Accepted for compatibility, not enforced.
    #[arg(long, env, default_value_t = 100)]
    pub stream_max_batch_size: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self::new()
    }
}

impl Config {
    pub fn new() -> Self {
        // Load .env file first
        dotenv().ok();
        // Then parse the command line parameters and flags
        Config::parse()
    }

    pub fn runtime_env(&self) -> RustEnv {
        self.runtime_env.clone()
    }

    pub fn is_production(&self) -> bool {
        self.runtime_env() == RustEnv::Production
    }

    /// Builds the settings handed to the streaming core. Engine constants such
    /// as queue sizes and backoff limits keep their defaults.
    pub fn streaming_config(&self) -> StreamConfig {
        StreamConfig {
            poll_interval: Duration::from_millis(self.stream_poll_interval_ms),
            stream_timeout: match self.stream_timeout_secs {
                0 => None,
                secs => Some(Duration::from_secs(secs)),
            },
            max_connections: self.stream_max_connections,
            max_connections_per_user: self.stream_max_connections_per_user,
            enable_heartbeat: self.stream_enable_heartbeat,
            heartbeat_interval: Duration::from_secs(self.stream_heartbeat_interval_secs),
            max_batch_size: self.stream_max_batch_size,
            ..StreamConfig::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Config {
        Config::try_parse_from(std::iter::once("tms_platform").chain(args.iter().copied()))
            .unwrap()
    }

    #[test]
    fn streaming_defaults_match_the_engine_defaults() {
        let config = parse(&[]);
        let streaming = config.streaming_config();

        assert_eq!(streaming.poll_interval, Duration::from_millis(2000));
        assert_eq!(streaming.stream_timeout, Some(Duration::from_secs(3600)));
        assert_eq!(streaming.max_connections, 100);
        assert_eq!(streaming.max_connections_per_user, 5);
        assert!(streaming.enable_heartbeat);
        assert_eq!(streaming.heartbeat_interval, Duration::from_secs(30));
        assert_eq!(streaming.max_batch_size, 100);
    }

    #[test]
    fn zero_stream_timeout_disables_the_limit() {
        let config = parse(&["--stream-timeout-secs", "0"]);

        assert_eq!(config.streaming_config().stream_timeout, None);
    }

    #[test]
    fn zero_intervals_are_rejected() {
        let tms = std::iter::once("tms_platform");

        assert!(Config::try_parse_from(tms.clone().chain(["--stream-poll-interval-ms", "0"])).is_err());
        assert!(
            Config::try_parse_from(tms.chain(["--stream-heartbeat-interval-secs", "0"])).is_err()
        );
    }

    #[test]
    fn heartbeat_can_be_disabled() {
        let config = parse(&["--stream-enable-heartbeat", "false"]);

        assert!(!config.streaming_config().enable_heartbeat);
    }

    #[test]
    fn runtime_env_parses_case_insensitively() {
        assert_eq!("PRODUCTION".parse::<RustEnv>(), Ok(RustEnv::Production));
        assert_eq!("staging".parse::<RustEnv>(), Ok(RustEnv::Staging));
        assert_eq!("qa".parse::<RustEnv>(), Err(RustEnvParseError));
    }
}
