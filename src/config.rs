/***************************************/
/*        3rd party libraries          */
/***************************************/
use serde::Deserialize;
use std::fmt;
use std::fs;
use std::path::Path;

/***************************************/
/*       Public data structures        */
/***************************************/
#[derive(Deserialize, Clone, Debug)]
pub struct Config {
    pub network: NetworkConfig,
    pub elevator: ElevatorConfig,
    pub hardware: HardwareConfig,
    #[serde(default)]
    pub dispatcher: DispatcherConfig,
}

#[derive(Deserialize, Clone, Debug)]
pub struct NetworkConfig {
    pub id_gen_address: String,
    pub msg_port: u16,
    pub peer_port: u16,
    #[serde(default = "default_id_gen_attempts")]
    pub max_attempts_id_generation: u32,
    #[serde(default = "default_id_gen_delay_ms")]
    pub delay_between_attempts_id_generation_ms: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct ElevatorConfig {
    pub n_floors: u8,
    pub door_open_time_s: u64,
    #[serde(default = "default_motor_watchdog_initial_s")]
    pub motor_watchdog_initial_s: u64,
    #[serde(default = "default_motor_watchdog_resume_s")]
    pub motor_watchdog_resume_s: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct HardwareConfig {
    pub n_floors: u8,
    pub driver_address: String,
    pub driver_port: u16,
    pub hw_thread_sleep_time_ms: u64,
}

#[derive(Deserialize, Clone, Debug)]
pub struct DispatcherConfig {
    /// Path to the hall request assigner executable. Resolved relative to
    /// the running binary's directory when relative, so the same config
    /// works regardless of the process's working directory.
    #[serde(default = "default_oracle_path")]
    pub oracle_path: String,
    #[serde(default = "default_snapshot_path")]
    pub snapshot_path: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        DispatcherConfig {
            oracle_path: default_oracle_path(),
            snapshot_path: default_snapshot_path(),
        }
    }
}

fn default_id_gen_attempts() -> u32 {
    10
}

fn default_id_gen_delay_ms() -> u64 {
    250
}

fn default_motor_watchdog_initial_s() -> u64 {
    5
}

fn default_motor_watchdog_resume_s() -> u64 {
    4
}

fn default_oracle_path() -> String {
    if cfg!(windows) {
        "hall_request_assigner.exe".to_string()
    } else {
        "hall_request_assigner".to_string()
    }
}

fn default_snapshot_path() -> String {
    "world_view.json".to_string()
}

/***************************************/
/*               Errors                */
/***************************************/
#[derive(Debug)]
pub enum ConfigError {
    Read(String, std::io::Error),
    Parse(String, toml::de::Error),
    Invalid(String),
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::Read(path, e) => write!(f, "failed to read config file {}: {}", path, e),
            ConfigError::Parse(path, e) => {
                write!(f, "failed to parse config file {}: {}", path, e)
            }
            ConfigError::Invalid(msg) => write!(f, "invalid configuration: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

/***************************************/
/*             Public API              */
/***************************************/
pub fn load_config(path: &str) -> Result<Config, ConfigError> {
    let config_str = fs::read_to_string(Path::new(path))
        .map_err(|e| ConfigError::Read(path.to_string(), e))?;
    let config: Config =
        toml::from_str(&config_str).map_err(|e| ConfigError::Parse(path.to_string(), e))?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<(), ConfigError> {
    if config.elevator.n_floors != config.hardware.n_floors {
        return Err(ConfigError::Invalid(format!(
            "elevator.n_floors ({}) must match hardware.n_floors ({})",
            config.elevator.n_floors, config.hardware.n_floors
        )));
    }
    if config.elevator.n_floors < 2 {
        return Err(ConfigError::Invalid(
            "n_floors must be at least 2".to_string(),
        ));
    }
    if config.network.msg_port == config.network.peer_port {
        return Err(ConfigError::Invalid(
            "network.msg_port and network.peer_port must differ".to_string(),
        ));
    }
    if config.elevator.door_open_time_s == 0 {
        return Err(ConfigError::Invalid(
            "elevator.door_open_time_s must be non-zero".to_string(),
        ));
    }
    Ok(())
}
