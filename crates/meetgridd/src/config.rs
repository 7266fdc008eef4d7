//! Daemon configuration: an optional TOML file overlaid by command-line
//! flags.
//!
//! ```toml
//! [auth]
//! master_secret_file = "/etc/meetgrid/secret"
//!
//! [coordinator]
//! id = "gc-us-east-1a"
//! region = "us-east"
//! zone = "us-east-1a"
//! listen = "0.0.0.0:8080"
//!
//! [controller]
//! id = "mc-7"
//! coordinator = "10.0.0.5:8080"
//! max_meetings = 200
//! ```

use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use clap::Args;
use serde::Deserialize;

use meetgrid_cluster::{BackoffConfig, MasterSecret};
use meetgrid_placement::RegionFallback;

/// Environment variable holding the master secret when no file is given.
pub const MASTER_SECRET_ENV: &str = "MEETGRID_MASTER_SECRET";

// ── File layout ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    pub auth: AuthSection,
    pub coordinator: CoordinatorSection,
    pub controller: ControllerSection,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AuthSection {
    pub master_secret_file: Option<PathBuf>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CoordinatorSection {
    pub id: Option<String>,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub listen: Option<SocketAddr>,
    pub data_dir: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub max_attempts: Option<u32>,
    pub region_fallback: Option<RegionFallback>,
    pub locality_boost: Option<f64>,
    pub check_interval_secs: Option<u64>,
    pub staleness_threshold_secs: Option<u64>,
    pub fast_heartbeat_interval_secs: Option<u64>,
    pub comprehensive_heartbeat_interval_secs: Option<u64>,
    pub rpc_timeout_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ControllerSection {
    pub id: Option<String>,
    pub region: Option<String>,
    pub zone: Option<String>,
    pub listen: Option<SocketAddr>,
    pub advertise: Option<String>,
    pub coordinator: Option<String>,
    pub data_dir: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub max_meetings: Option<u32>,
    pub max_participants: Option<u32>,
    pub fast_heartbeat_interval_secs: Option<u64>,
    pub comprehensive_heartbeat_interval_secs: Option<u64>,
    pub registration_max_attempts: Option<u32>,
    pub registration_deadline_secs: Option<u64>,
    pub rpc_timeout_secs: Option<u64>,
}

impl FileConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        let config: FileConfig = toml::from_str(&content)
            .with_context(|| format!("parse config {}", path.display()))?;
        Ok(config)
    }

    /// Load `path` if given, otherwise an empty config.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        match path {
            Some(path) => Self::from_file(path),
            None => Ok(Self::default()),
        }
    }

    /// The master secret from the configured file, or the environment.
    pub fn master_secret(&self) -> anyhow::Result<Option<MasterSecret>> {
        if let Some(path) = &self.auth.master_secret_file {
            let bytes = std::fs::read(path)
                .with_context(|| format!("read master secret {}", path.display()))?;
            let trimmed = bytes.trim_ascii().to_vec();
            anyhow::ensure!(!trimmed.is_empty(), "master secret file is empty");
            return Ok(Some(MasterSecret::new(trimmed)));
        }
        Ok(std::env::var(MASTER_SECRET_ENV)
            .ok()
            .filter(|s| !s.is_empty())
            .map(|s| MasterSecret::new(s.into_bytes())))
    }
}

// ── Flags ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Args)]
pub struct CoordinatorArgs {
    /// Coordinator instance id recorded on assignment rows.
    #[arg(long)]
    pub id: Option<String>,
    /// Region this coordinator serves.
    #[arg(long)]
    pub region: Option<String>,
    /// Zone this coordinator runs in (boosts same-zone workers).
    #[arg(long)]
    pub zone: Option<String>,
    /// Address for the RPC and operator API server [default: 0.0.0.0:8080].
    #[arg(long)]
    pub listen: Option<SocketAddr>,
    /// Data directory for the registry database [default: /var/lib/meetgrid].
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Redis URL for the shared fencing store (embedded store if unset).
    #[arg(long)]
    pub redis_url: Option<String>,
    /// Controllers offered a meeting before giving up [default: 3].
    #[arg(long)]
    pub max_attempts: Option<u32>,
    /// Allow cross-region placement when the region has no capacity.
    #[arg(long)]
    pub allow_cross_region: bool,
    /// Seconds between health sweeps [default: 5].
    #[arg(long)]
    pub check_interval_secs: Option<u64>,
    /// Heartbeat age in seconds after which a worker is unhealthy [default: 30].
    #[arg(long)]
    pub staleness_threshold_secs: Option<u64>,
}

#[derive(Debug, Clone, Default, Args)]
pub struct ControllerArgs {
    /// Worker id of this meeting controller.
    #[arg(long)]
    pub id: Option<String>,
    #[arg(long)]
    pub region: Option<String>,
    #[arg(long)]
    pub zone: Option<String>,
    /// Address for the assign RPC server [default: 0.0.0.0:7000].
    #[arg(long)]
    pub listen: Option<SocketAddr>,
    /// host:port the coordinator dials [default: the listen address].
    #[arg(long)]
    pub advertise: Option<String>,
    /// Coordinator host:port.
    #[arg(long)]
    pub coordinator: Option<String>,
    /// Data directory for the local fencing database [default: /var/lib/meetgrid].
    #[arg(long)]
    pub data_dir: Option<PathBuf>,
    /// Redis URL for the shared fencing store.
    #[arg(long)]
    pub redis_url: Option<String>,
    /// Meetings this controller hosts at most [default: 100].
    #[arg(long)]
    pub max_meetings: Option<u32>,
    /// Participants across all meetings at most [default: 1000].
    #[arg(long)]
    pub max_participants: Option<u32>,
}

// ── Resolved settings ──────────────────────────────────────────

fn required(value: Option<String>, name: &str) -> anyhow::Result<String> {
    value.with_context(|| format!("missing required setting `{name}` (flag or config file)"))
}

fn secs(value: Option<u64>, default: u64) -> Duration {
    Duration::from_secs(value.unwrap_or(default))
}

#[derive(Debug, Clone)]
pub struct CoordinatorSettings {
    pub id: String,
    pub region: String,
    pub zone: String,
    pub listen: SocketAddr,
    pub data_dir: PathBuf,
    pub redis_url: Option<String>,
    pub max_attempts: u32,
    pub region_fallback: RegionFallback,
    pub locality_boost: Option<f64>,
    pub check_interval: Duration,
    pub staleness_threshold: Duration,
    /// Interval overrides pushed to workers, when both are set.
    pub heartbeat_overrides: Option<(Duration, Duration)>,
    pub rpc_timeout: Duration,
}

impl CoordinatorSettings {
    /// Flags win over the file; the file wins over defaults.
    pub fn resolve(args: CoordinatorArgs, file: CoordinatorSection) -> anyhow::Result<Self> {
        let region_fallback = if args.allow_cross_region {
            RegionFallback::AnyRegion
        } else {
            file.region_fallback.unwrap_or_default()
        };
        let heartbeat_overrides = match (
            file.fast_heartbeat_interval_secs,
            file.comprehensive_heartbeat_interval_secs,
        ) {
            (Some(fast), Some(comprehensive)) => Some((
                Duration::from_secs(fast),
                Duration::from_secs(comprehensive),
            )),
            _ => None,
        };

        Ok(Self {
            id: required(args.id.or(file.id), "coordinator.id")?,
            region: required(args.region.or(file.region), "coordinator.region")?,
            zone: required(args.zone.or(file.zone), "coordinator.zone")?,
            listen: args
                .listen
                .or(file.listen)
                .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 8080))),
            data_dir: args
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(|| PathBuf::from("/var/lib/meetgrid")),
            redis_url: args.redis_url.or(file.redis_url),
            max_attempts: args
                .max_attempts
                .or(file.max_attempts)
                .unwrap_or(meetgrid_assignment::MAX_ATTEMPTS),
            region_fallback,
            locality_boost: file.locality_boost,
            check_interval: secs(args.check_interval_secs.or(file.check_interval_secs), 5),
            staleness_threshold: secs(
                args.staleness_threshold_secs.or(file.staleness_threshold_secs),
                30,
            ),
            heartbeat_overrides,
            rpc_timeout: secs(file.rpc_timeout_secs, 5),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ControllerSettings {
    pub id: String,
    pub region: String,
    pub zone: String,
    pub listen: SocketAddr,
    pub advertise: String,
    pub coordinator: String,
    pub data_dir: PathBuf,
    pub redis_url: Option<String>,
    pub max_meetings: u32,
    pub max_participants: u32,
    pub fast_heartbeat_interval: Duration,
    pub comprehensive_heartbeat_interval: Duration,
    pub backoff: BackoffConfig,
    pub rpc_timeout: Duration,
}

impl ControllerSettings {
    /// Flags win over the file; the file wins over defaults.
    pub fn resolve(args: ControllerArgs, file: ControllerSection) -> anyhow::Result<Self> {
        let listen = args
            .listen
            .or(file.listen)
            .unwrap_or_else(|| SocketAddr::from(([0, 0, 0, 0], 7000)));
        let defaults = BackoffConfig::default();
        let backoff = BackoffConfig {
            max_attempts: file
                .registration_max_attempts
                .unwrap_or(defaults.max_attempts),
            deadline: file
                .registration_deadline_secs
                .map(Duration::from_secs)
                .unwrap_or(defaults.deadline),
            ..defaults
        };

        Ok(Self {
            id: required(args.id.or(file.id), "controller.id")?,
            region: required(args.region.or(file.region), "controller.region")?,
            zone: required(args.zone.or(file.zone), "controller.zone")?,
            listen,
            advertise: args
                .advertise
                .or(file.advertise)
                .unwrap_or_else(|| listen.to_string()),
            coordinator: required(args.coordinator.or(file.coordinator), "controller.coordinator")?,
            data_dir: args
                .data_dir
                .or(file.data_dir)
                .unwrap_or_else(|| PathBuf::from("/var/lib/meetgrid")),
            redis_url: args.redis_url.or(file.redis_url),
            max_meetings: args.max_meetings.or(file.max_meetings).unwrap_or(100),
            max_participants: args.max_participants.or(file.max_participants).unwrap_or(1000),
            fast_heartbeat_interval: secs(file.fast_heartbeat_interval_secs, 10),
            comprehensive_heartbeat_interval: secs(file.comprehensive_heartbeat_interval_secs, 30),
            backoff,
            rpc_timeout: secs(file.rpc_timeout_secs, 5),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[coordinator]
id = "gc-file"
region = "us-east"
zone = "us-east-1a"
listen = "127.0.0.1:9000"
region_fallback = "any_region"
fast_heartbeat_interval_secs = 5
comprehensive_heartbeat_interval_secs = 15

[controller]
id = "mc-file"
region = "us-east"
zone = "us-east-1b"
coordinator = "127.0.0.1:9000"
max_meetings = 7
registration_max_attempts = 4
"#;

    fn sample() -> FileConfig {
        toml::from_str(SAMPLE).unwrap()
    }

    #[test]
    fn coordinator_file_values_apply() {
        let settings =
            CoordinatorSettings::resolve(CoordinatorArgs::default(), sample().coordinator).unwrap();
        assert_eq!(settings.id, "gc-file");
        assert_eq!(settings.listen, "127.0.0.1:9000".parse::<SocketAddr>().unwrap());
        assert_eq!(settings.region_fallback, RegionFallback::AnyRegion);
        assert_eq!(settings.max_attempts, 3);
        assert_eq!(settings.check_interval, Duration::from_secs(5));
        assert_eq!(settings.staleness_threshold, Duration::from_secs(30));
        assert_eq!(
            settings.heartbeat_overrides,
            Some((Duration::from_secs(5), Duration::from_secs(15)))
        );
    }

    #[test]
    fn flags_override_file() {
        let args = CoordinatorArgs {
            id: Some("gc-flag".to_string()),
            staleness_threshold_secs: Some(60),
            ..Default::default()
        };
        let settings = CoordinatorSettings::resolve(args, sample().coordinator).unwrap();
        assert_eq!(settings.id, "gc-flag");
        assert_eq!(settings.region, "us-east");
        assert_eq!(settings.staleness_threshold, Duration::from_secs(60));
    }

    #[test]
    fn controller_defaults_and_advertise() {
        let settings =
            ControllerSettings::resolve(ControllerArgs::default(), sample().controller).unwrap();
        assert_eq!(settings.max_meetings, 7);
        assert_eq!(settings.max_participants, 1000);
        assert_eq!(settings.advertise, "0.0.0.0:7000");
        assert_eq!(settings.backoff.max_attempts, 4);
        assert_eq!(settings.backoff.deadline, Duration::from_secs(300));
        assert_eq!(settings.fast_heartbeat_interval, Duration::from_secs(10));
    }

    #[test]
    fn missing_required_setting_is_an_error() {
        let err = ControllerSettings::resolve(ControllerArgs::default(), ControllerSection::default())
            .unwrap_err();
        assert!(err.to_string().contains("controller.id"));
    }

    #[test]
    fn unknown_keys_are_rejected() {
        let result: Result<FileConfig, _> = toml::from_str("[coordinator]\nbogus = 1\n");
        assert!(result.is_err());
    }

    #[test]
    fn master_secret_from_file_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("secret");
        std::fs::write(&path, "s3cret\n").unwrap();
        let config = FileConfig {
            auth: AuthSection {
                master_secret_file: Some(path),
            },
            ..Default::default()
        };
        let secret = config.master_secret().unwrap().unwrap();
        assert_eq!(format!("{secret:?}"), "MasterSecret([REDACTED])");
    }
}
