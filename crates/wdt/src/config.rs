use std::path::{Path, PathBuf};
use std::time::SystemTime;

use ini::Ini;
use tracing::{debug, warn};

use crate::fsops;
use crate::reboot::RebootMode;

/// Maximum supported number of supervised programs.
pub const MAX_PROGRAMS: usize = 6;
/// Maximum length of a program name.
pub const MAX_NAME_LEN: usize = 31;
/// Maximum length of a program command line.
pub const MAX_CMD_LEN: usize = 255;
/// UDP port used when the config does not name one.
pub const DEFAULT_UDP_PORT: u16 = 12345;
/// Config path used when `-i` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "config.ini";

const GLOBAL_SECTION: &str = "processWatchdog";
const PROGRAM_SECTION_PREFIX: &str = "app:";

/// One declared program, immutable after load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgramSpec {
    pub name: String,
    pub cmd: String,
    /// Wait from supervisor start before the first launch.
    pub start_delay_sec: u64,
    /// Grace period for the very first heartbeat after a spawn.
    pub heartbeat_delay_sec: u64,
    /// Expected max gap between heartbeats; 0 means no heartbeat required.
    pub heartbeat_interval_sec: u64,
}

/// Validated supervisor configuration.
#[derive(Debug, Clone)]
pub struct WatchdogConfig {
    pub udp_port: u16,
    pub reboot: RebootMode,
    pub programs: Vec<ProgramSpec>,
    pub path: PathBuf,
    pub mtime: Option<SystemTime>,
}

#[derive(Debug)]
pub enum ConfigError {
    Load(String),
    Invalid(String),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Load(msg) => write!(f, "cannot load config: {}", msg),
            ConfigError::Invalid(msg) => write!(f, "invalid config: {}", msg),
        }
    }
}

impl std::error::Error for ConfigError {}

impl WatchdogConfig {
    /// Load and validate the INI file. Any malformed value aborts the load;
    /// configuration problems must never surface mid-run.
    pub fn load(path: &Path) -> Result<WatchdogConfig, ConfigError> {
        let ini = Ini::load_from_file(path)
            .map_err(|e| ConfigError::Load(format!("{}: {}", path.display(), e)))?;

        let mut config = WatchdogConfig {
            udp_port: DEFAULT_UDP_PORT,
            reboot: RebootMode::Disabled,
            programs: Vec::new(),
            path: path.to_path_buf(),
            mtime: fsops::mtime(path).ok(),
        };

        for (section, props) in ini.iter() {
            let Some(section) = section else { continue };

            if section == GLOBAL_SECTION {
                if let Some(value) = props.get("udp_port") {
                    config.udp_port = parse_port(value)?;
                }
                if let Some(value) = props.get("periodic_reboot") {
                    config.reboot = RebootMode::parse(value);
                }
            } else if let Some(raw_name) = section.strip_prefix(PROGRAM_SECTION_PREFIX) {
                if raw_name.is_empty() {
                    return Err(ConfigError::Invalid(format!(
                        "empty program name in section [{}]",
                        section
                    )));
                }
                if config.programs.len() >= MAX_PROGRAMS {
                    warn!(
                        section,
                        max = MAX_PROGRAMS,
                        "program limit reached, ignoring section"
                    );
                    continue;
                }

                let mut name = raw_name.to_string();
                if name.len() > MAX_NAME_LEN {
                    name.truncate(MAX_NAME_LEN);
                }

                let cmd = props
                    .get("cmd")
                    .ok_or_else(|| {
                        ConfigError::Invalid(format!("program {} has no cmd", name))
                    })?
                    .to_string();
                if cmd.is_empty() || cmd.len() > MAX_CMD_LEN {
                    return Err(ConfigError::Invalid(format!(
                        "cmd for program {} must be 1..={} characters",
                        name, MAX_CMD_LEN
                    )));
                }

                config.programs.push(ProgramSpec {
                    start_delay_sec: parse_delay(&name, "start_delay", props.get("start_delay"))?,
                    heartbeat_delay_sec: parse_delay(
                        &name,
                        "heartbeat_delay",
                        props.get("heartbeat_delay"),
                    )?,
                    heartbeat_interval_sec: parse_delay(
                        &name,
                        "heartbeat_interval",
                        props.get("heartbeat_interval"),
                    )?,
                    name,
                    cmd,
                });
            }
        }

        debug!(
            programs = config.programs.len(),
            udp_port = config.udp_port,
            path = %path.display(),
            "configuration loaded"
        );
        Ok(config)
    }
}

fn parse_port(value: &str) -> Result<u16, ConfigError> {
    match value.trim().parse::<u16>() {
        Ok(port) if port >= 1 => Ok(port),
        _ => Err(ConfigError::Invalid(format!(
            "udp_port must be 1..=65535, got {:?}",
            value
        ))),
    }
}

fn parse_delay(program: &str, key: &str, value: Option<&str>) -> Result<u64, ConfigError> {
    let Some(value) = value else { return Ok(0) };
    value.trim().parse::<u64>().map_err(|_| {
        ConfigError::Invalid(format!(
            "{} for program {} must be a non-negative integer, got {:?}",
            key, program, value
        ))
    })
}
