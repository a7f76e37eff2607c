//! Container creation requests and resource-limit translation.

use std::path::PathBuf;

use syncbox_types::ResourceLimits;

/// Platform pinned for every connector container; published connector
/// images are single-arch.
pub const DEFAULT_PLATFORM: &str = "linux/amd64";

/// In-container mount point of the run workspace.
pub const WORKSPACE_MOUNT: &str = "/configs";

const NANO_CPUS_PER_CPU: f64 = 1_000_000_000.0;
const BYTES_PER_MIB: u64 = 1024 * 1024;

/// Opaque container identifier assigned by the runtime.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContainerId(String);

impl ContainerId {
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// First 12 characters, as the engine prints them.
    #[must_use]
    pub fn short(&self) -> &str {
        self.0.get(..12).unwrap_or(&self.0)
    }
}

impl std::fmt::Display for ContainerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Host directory bind-mounted into the container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Bind {
    pub host: PathBuf,
    pub container: String,
}

impl Bind {
    /// `host:container`, the engine's volume syntax.
    #[must_use]
    pub fn to_volume_arg(&self) -> String {
        format!("{}:{}", self.host.display(), self.container)
    }
}

/// Resource limits in the runtime's native units.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HostLimits {
    /// CPU quota in units of 1e-9 CPUs.
    pub nano_cpus: Option<u64>,
    /// Memory ceiling in bytes.
    pub memory_bytes: Option<u64>,
    /// Log rotation size in bytes.
    pub log_max_size_bytes: u64,
}

impl Default for HostLimits {
    fn default() -> Self {
        Self::from_limits(&ResourceLimits::default())
    }
}

impl HostLimits {
    /// Translate operator-facing limits (cores, MiB) into native units.
    #[must_use]
    #[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
    pub fn from_limits(limits: &ResourceLimits) -> Self {
        Self {
            nano_cpus: limits
                .max_cpus
                .filter(|cpus| *cpus > 0.0)
                .map(|cpus| (cpus * NANO_CPUS_PER_CPU).round() as u64),
            memory_bytes: limits
                .max_memory_mb
                .filter(|mb| *mb > 0)
                .map(|mb| mb.saturating_mul(BYTES_PER_MIB)),
            log_max_size_bytes: limits.max_log_size_bytes,
        }
    }

    /// CPU quota formatted as decimal cores (`1.5`), for the `--cpus` flag.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn cpus_arg(&self) -> Option<String> {
        self.nano_cpus
            .map(|nano| format!("{}", nano as f64 / NANO_CPUS_PER_CPU))
    }
}

/// Everything needed to create one connector container.
#[derive(Debug, Clone, PartialEq)]
pub struct ContainerSpec {
    pub image: String,
    pub command: Vec<String>,
    pub env: Vec<(String, String)>,
    pub binds: Vec<Bind>,
    pub platform: String,
    pub network_host: bool,
    /// Keep stdin open so the host can stream into the container.
    pub interactive: bool,
    pub limits: HostLimits,
    /// File that receives the container id once created.
    pub marker_file: Option<PathBuf>,
}

impl ContainerSpec {
    #[must_use]
    pub fn new(image: impl Into<String>, command: Vec<String>) -> Self {
        Self {
            image: image.into(),
            command,
            env: Vec::new(),
            binds: Vec::new(),
            platform: DEFAULT_PLATFORM.to_string(),
            network_host: false,
            interactive: false,
            limits: HostLimits::default(),
            marker_file: None,
        }
    }

    #[must_use]
    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.push((key.into(), value.into()));
        self
    }

    #[must_use]
    pub fn bind(mut self, host: impl Into<PathBuf>, container: impl Into<String>) -> Self {
        self.binds.push(Bind {
            host: host.into(),
            container: container.into(),
        });
        self
    }

    #[must_use]
    pub fn limits(mut self, limits: HostLimits) -> Self {
        self.limits = limits;
        self
    }

    #[must_use]
    pub fn network_host(mut self, enabled: bool) -> Self {
        self.network_host = enabled;
        self
    }

    #[must_use]
    pub fn interactive(mut self, enabled: bool) -> Self {
        self.interactive = enabled;
        self
    }

    #[must_use]
    pub fn marker_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.marker_file = Some(path.into());
        self
    }

    /// First command word (`check`, `read`, `write`, ...).
    #[must_use]
    pub fn subcommand(&self) -> &str {
        self.command.first().map_or("", String::as_str)
    }
}
