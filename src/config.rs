//! Bridge configuration.
//!
//! Configuration is fixed at startup: defaults, then an optional JSON
//! config file, then environment variable overrides, highest priority last.
//!
//! Environment variables:
//!
//! - `EXPR_BRIDGE_ENGINE` - path to the engine executable
//! - `EXPR_BRIDGE_WORKDIR` - engine working directory
//! - `EXPR_BRIDGE_TIMEOUT_SECS` - per-call wall-clock deadline
//! - `EXPR_BRIDGE_MAX_CONCURRENT` - cap on in-flight engine processes
//! - `EXPR_BRIDGE_SOCKET` - Unix socket path for the JSON-RPC server
//! - `EXPR_BRIDGE_CONFIG` - path to a JSON config file

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;
use tracing::{info, warn};

/// Default per-call deadline in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Default cap on concurrent engine invocations.
const DEFAULT_MAX_CONCURRENT: usize = 4;

/// Runtime configuration for the bridge, immutable after load.
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Engine executable; relative paths resolve against `working_dir`.
    pub engine_path: PathBuf,
    pub working_dir: PathBuf,
    pub timeout_secs: u64,
    pub max_concurrent: usize,
    pub socket_path: PathBuf,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            engine_path: PathBuf::from("./expr_engine"),
            working_dir: PathBuf::from("."),
            timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_concurrent: DEFAULT_MAX_CONCURRENT,
            socket_path: default_socket_path(),
        }
    }
}

/// Optional JSON config file; every field may be omitted.
#[derive(Debug, Default, Deserialize)]
struct ConfigFile {
    engine_path: Option<PathBuf>,
    working_dir: Option<PathBuf>,
    timeout_secs: Option<u64>,
    max_concurrent: Option<usize>,
    socket_path: Option<PathBuf>,
}

impl BridgeConfig {
    /// Load configuration: defaults, then the file named by
    /// `EXPR_BRIDGE_CONFIG` (if set), then per-field env overrides.
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(path) = std::env::var("EXPR_BRIDGE_CONFIG") {
            config.apply_file(Path::new(&path))?;
        }

        config.apply_env();
        Ok(config)
    }

    fn apply_file(&mut self, path: &Path) -> Result<()> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let file: ConfigFile = serde_json::from_str(&text)
            .with_context(|| format!("invalid config file {}", path.display()))?;

        info!("loaded config file {}", path.display());

        if let Some(v) = file.engine_path {
            self.engine_path = v;
        }
        if let Some(v) = file.working_dir {
            self.working_dir = v;
        }
        if let Some(v) = file.timeout_secs {
            self.timeout_secs = v;
        }
        if let Some(v) = file.max_concurrent {
            self.max_concurrent = v;
        }
        if let Some(v) = file.socket_path {
            self.socket_path = v;
        }
        Ok(())
    }

    fn apply_env(&mut self) {
        if let Ok(v) = std::env::var("EXPR_BRIDGE_ENGINE") {
            self.engine_path = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("EXPR_BRIDGE_WORKDIR") {
            self.working_dir = PathBuf::from(v);
        }
        if let Ok(v) = std::env::var("EXPR_BRIDGE_TIMEOUT_SECS") {
            match v.parse() {
                Ok(secs) => self.timeout_secs = secs,
                Err(_) => warn!("ignoring invalid EXPR_BRIDGE_TIMEOUT_SECS: {v}"),
            }
        }
        if let Ok(v) = std::env::var("EXPR_BRIDGE_MAX_CONCURRENT") {
            match v.parse() {
                Ok(n) if n > 0 => self.max_concurrent = n,
                _ => warn!("ignoring invalid EXPR_BRIDGE_MAX_CONCURRENT: {v}"),
            }
        }
        if let Ok(v) = std::env::var("EXPR_BRIDGE_SOCKET") {
            self.socket_path = PathBuf::from(v);
        }
    }

    /// Per-call deadline as a `Duration`.
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Engine path with relative paths resolved against the working
    /// directory.
    pub fn resolved_engine_path(&self) -> PathBuf {
        if self.engine_path.is_absolute() {
            self.engine_path.clone()
        } else {
            self.working_dir.join(&self.engine_path)
        }
    }
}

/// Resolve the default socket path for the bridge server.
///
/// Resolution order:
/// 1. `$XDG_RUNTIME_DIR/expr-bridge.sock`
/// 2. platform cache dir (`~/Library/Caches` on macOS)
/// 3. `/tmp/expr-bridge.sock`
pub fn default_socket_path() -> PathBuf {
    if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
        return PathBuf::from(runtime_dir).join("expr-bridge.sock");
    }

    if let Some(cache_dir) = dirs::cache_dir() {
        return cache_dir.join("expr-bridge.sock");
    }

    PathBuf::from("/tmp/expr-bridge.sock")
}
