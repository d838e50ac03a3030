//! Agent configuration from command-line flags and `LOADMETER_*` environment
//! variables. Flags win over the environment, the environment over defaults.

use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;

use thiserror::Error;
use tracing::warn;

use crate::error::TelemetryError;
use crate::telemetry::{
    SimulatedPower, DEFAULT_CPU_WINDOW, DEFAULT_POWER_CEILING, DEFAULT_POWER_MAX,
    DEFAULT_POWER_MIN,
};

pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_MAX_DURATION_SECS: u64 = 3600;
pub const DEFAULT_MAX_CONCURRENT_RUNS: usize = 1;

pub const USAGE: &str = "Usage: loadmeter_agent [--port PORT|-p PORT] [--bind ADDR|-b ADDR]

Environment:
  LOADMETER_PORT                 listen port (default 5000)
  LOADMETER_BIND                 listen address (default 0.0.0.0)
  LOADMETER_MAX_DURATION_SECS    longest accepted run (default 3600)
  LOADMETER_MAX_CONCURRENT_RUNS  runs allowed at once (default 1)
  LOADMETER_CPU_WINDOW_MS        first CPU read window (default 200)
  LOADMETER_POWER_MIN            simulated power draw lower bound (default 10.0)
  LOADMETER_POWER_MAX            simulated power draw upper bound (default 20.0)
  LOADMETER_POWER_CEILING        reported max power (default 25.0)
  RUST_LOG                       log filter (default info)";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} requires a value")]
    MissingValue(String),

    #[error("invalid value for {flag}: {value}")]
    InvalidValue { flag: String, value: String },

    #[error("unexpected argument: {0}")]
    UnexpectedArgument(String),

    #[error(transparent)]
    Power(#[from] TelemetryError),
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub bind: IpAddr,
    pub port: u16,
    pub max_duration_secs: u64,
    pub max_concurrent_runs: usize,
    pub cpu_window: Duration,
    pub power: SimulatedPower,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            bind: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            port: DEFAULT_PORT,
            max_duration_secs: DEFAULT_MAX_DURATION_SECS,
            max_concurrent_runs: DEFAULT_MAX_CONCURRENT_RUNS,
            cpu_window: DEFAULT_CPU_WINDOW,
            power: SimulatedPower::default(),
        }
    }
}

impl AgentConfig {
    pub fn listen_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind, self.port)
    }
}

#[derive(Debug)]
pub enum Command {
    Serve(AgentConfig),
    Help,
}

/// Parse from the process arguments and environment.
pub fn from_env_and_args() -> Result<Command, ConfigError> {
    parse(std::env::args(), |k| std::env::var(k).ok())
}

/// `args` includes the program name. `env` looks up an environment variable.
pub fn parse<I, F>(args: I, env: F) -> Result<Command, ConfigError>
where
    I: IntoIterator<Item = String>,
    F: Fn(&str) -> Option<String>,
{
    let mut cfg = AgentConfig {
        bind: env_or(&env, "LOADMETER_BIND", IpAddr::V4(Ipv4Addr::UNSPECIFIED)),
        port: env_or(&env, "LOADMETER_PORT", DEFAULT_PORT),
        max_duration_secs: env_or(&env, "LOADMETER_MAX_DURATION_SECS", DEFAULT_MAX_DURATION_SECS)
            .max(1),
        max_concurrent_runs: env_or(
            &env,
            "LOADMETER_MAX_CONCURRENT_RUNS",
            DEFAULT_MAX_CONCURRENT_RUNS,
        )
        .max(1),
        cpu_window: Duration::from_millis(env_or(
            &env,
            "LOADMETER_CPU_WINDOW_MS",
            DEFAULT_CPU_WINDOW.as_millis() as u64,
        )),
        power: SimulatedPower::new(
            env_or(&env, "LOADMETER_POWER_MIN", DEFAULT_POWER_MIN),
            env_or(&env, "LOADMETER_POWER_MAX", DEFAULT_POWER_MAX),
            env_or(&env, "LOADMETER_POWER_CEILING", DEFAULT_POWER_CEILING),
        )?,
    };

    let mut it = args.into_iter();
    let _ = it.next(); // program name
    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Ok(Command::Help),
            "--port" | "-p" => cfg.port = flag_value(&arg, it.next())?,
            "--bind" | "-b" => cfg.bind = flag_value(&arg, it.next())?,
            _ if arg.starts_with("--port=") => {
                let (flag, v) = arg.split_once('=').unwrap_or((arg.as_str(), ""));
                cfg.port = flag_value(flag, Some(v.to_string()))?;
            }
            _ if arg.starts_with("--bind=") => {
                let (flag, v) = arg.split_once('=').unwrap_or((arg.as_str(), ""));
                cfg.bind = flag_value(flag, Some(v.to_string()))?;
            }
            _ => return Err(ConfigError::UnexpectedArgument(arg)),
        }
    }
    Ok(Command::Serve(cfg))
}

fn flag_value<T: std::str::FromStr>(flag: &str, value: Option<String>) -> Result<T, ConfigError> {
    let value = value.ok_or_else(|| ConfigError::MissingValue(flag.to_string()))?;
    value.parse().map_err(|_| ConfigError::InvalidValue {
        flag: flag.to_string(),
        value,
    })
}

fn env_or<T, F>(env: &F, key: &str, default: T) -> T
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    match env(key) {
        Some(v) if !v.trim().is_empty() => v.trim().parse().unwrap_or_else(|_| {
            warn!("ignoring unparseable {key}={v}, using default");
            default
        }),
        _ => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn args(list: &[&str]) -> Vec<String> {
        std::iter::once("loadmeter_agent")
            .chain(list.iter().copied())
            .map(String::from)
            .collect()
    }

    fn serve(cmd: Command) -> AgentConfig {
        match cmd {
            Command::Serve(c) => c,
            Command::Help => panic!("expected serve"),
        }
    }

    #[test]
    fn defaults_without_args_or_env() {
        let cfg = serve(parse(args(&[]), |_| None).unwrap());
        assert_eq!(cfg.port, 5000);
        assert_eq!(cfg.listen_addr().to_string(), "0.0.0.0:5000");
        assert_eq!(cfg.max_duration_secs, 3600);
        assert_eq!(cfg.max_concurrent_runs, 1);
        assert_eq!(cfg.cpu_window, Duration::from_millis(200));
        assert_eq!(cfg.power.ceiling(), 25.0);
    }

    #[test]
    fn port_long_short_and_assign() {
        assert_eq!(serve(parse(args(&["--port", "9001"]), |_| None).unwrap()).port, 9001);
        assert_eq!(serve(parse(args(&["-p", "9002"]), |_| None).unwrap()).port, 9002);
        assert_eq!(serve(parse(args(&["--port=9003"]), |_| None).unwrap()).port, 9003);
        let cfg = serve(parse(args(&["-b", "127.0.0.1"]), |_| None).unwrap());
        assert_eq!(cfg.listen_addr().to_string(), "127.0.0.1:5000");
    }

    #[test]
    fn flags_override_env() {
        let env: HashMap<&str, &str> = [
            ("LOADMETER_PORT", "7000"),
            ("LOADMETER_MAX_DURATION_SECS", "60"),
            ("LOADMETER_MAX_CONCURRENT_RUNS", "3"),
            ("LOADMETER_CPU_WINDOW_MS", "50"),
        ]
        .into_iter()
        .collect();
        let lookup = |k: &str| env.get(k).map(|v| v.to_string());
        let cfg = serve(parse(args(&[]), lookup).unwrap());
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.max_duration_secs, 60);
        assert_eq!(cfg.max_concurrent_runs, 3);
        assert_eq!(cfg.cpu_window, Duration::from_millis(50));

        let cfg = serve(parse(args(&["-p", "7100"]), lookup).unwrap());
        assert_eq!(cfg.port, 7100);
    }

    #[test]
    fn bad_env_falls_back_to_default() {
        let cfg = serve(
            parse(args(&[]), |k| match k {
                "LOADMETER_PORT" => Some("not-a-port".into()),
                "LOADMETER_MAX_CONCURRENT_RUNS" => Some("0".into()),
                _ => None,
            })
            .unwrap(),
        );
        assert_eq!(cfg.port, 5000);
        // zero would reject every run
        assert_eq!(cfg.max_concurrent_runs, 1);
    }

    #[test]
    fn errors_and_help() {
        assert!(matches!(
            parse(args(&["--port"]), |_| None),
            Err(ConfigError::MissingValue(_))
        ));
        assert!(matches!(
            parse(args(&["-p", "99999"]), |_| None),
            Err(ConfigError::InvalidValue { .. })
        ));
        assert!(matches!(
            parse(args(&["--verbose"]), |_| None),
            Err(ConfigError::UnexpectedArgument(_))
        ));
        assert!(matches!(parse(args(&["-p", "1", "--help"]), |_| None), Ok(Command::Help)));
        assert!(matches!(
            parse(args(&[]), |k| (k == "LOADMETER_POWER_MIN").then(|| "30".to_string())),
            Err(ConfigError::Power(_))
        ));
    }
}
