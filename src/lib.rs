pub mod agent_core;
pub mod commands;
pub mod inference;
pub mod mcp_client;

use std::path::{Path, PathBuf};
use std::sync::Arc;

use agent_core::{BusyChats, ChatStore};
use inference::config::load_gateway_file;
use inference::{GatewayConfig, InferenceError};
use mcp_client::ToolRegistry;

/// Store file name inside the data directory.
pub const STORE_FILE: &str = "databrain.json";

/// Optional gateway overrides inside the data directory.
pub const GATEWAY_FILE: &str = "gateway.yaml";

/// Settings key overriding the MCP tool call timeout.
pub const MCP_CALL_TIMEOUT_KEY: &str = "mcp_call_timeout_ms";

/// Shared state behind every command: the store, the live tool providers,
/// and the per-chat busy flags.
pub struct AppState {
    pub store: Arc<ChatStore>,
    pub registry: Arc<ToolRegistry>,
    pub busy: Arc<BusyChats>,
    pub data_dir: PathBuf,
}

impl AppState {
    /// Open the store under `data_dir`, creating the directory if needed.
    ///
    /// Never fails: an unusable directory or store file degrades to an empty
    /// in-memory store whose writes are logged as failures.
    pub fn open(data_dir: impl Into<PathBuf>) -> Self {
        let data_dir = data_dir.into();
        if let Err(e) = std::fs::create_dir_all(&data_dir) {
            tracing::warn!(dir = %data_dir.display(), error = %e, "failed to create data dir");
        }
        let store = ChatStore::open(data_dir.join(STORE_FILE));

        let mut registry = ToolRegistry::new();
        if let Some(timeout_ms) = store
            .get_settings()
            .get(MCP_CALL_TIMEOUT_KEY)
            .and_then(|v| v.as_u64())
        {
            registry = registry.with_call_timeout(timeout_ms);
        }

        Self {
            store: Arc::new(store),
            registry: Arc::new(registry),
            busy: Arc::new(BusyChats::default()),
            data_dir,
        }
    }

    /// Resolve the model gateway from settings, `gateway.yaml` and the
    /// environment. Re-read on every call so saved settings apply to the
    /// next turn.
    pub fn gateway_config(&self) -> Result<GatewayConfig, InferenceError> {
        let file = load_gateway_file(&self.data_dir.join(GATEWAY_FILE))?;
        GatewayConfig::resolve(&self.store.get_settings(), file.as_ref())
    }

    /// Disconnect every tool provider.
    pub async fn shutdown(&self) {
        self.registry.disconnect_all().await;
        tracing::info!("=== DataBrain stopped ===");
    }
}

/// Return the platform-standard data directory for DataBrain.
///
/// - macOS: `~/Library/Application Support/com.databrain.app/`
/// - Windows: `{FOLDERID_RoamingAppData}\com.databrain.app\`
/// - Linux: `$XDG_DATA_HOME/com.databrain.app/` (fallback `~/.local/share/...`)
///
/// Falls back to `~/.databrain/` only if none of the above can be resolved.
pub fn data_dir() -> PathBuf {
    if let Some(dir) = dirs::data_dir() {
        return dir.join("com.databrain.app");
    }
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".databrain")
}

/// Initialize the tracing subscriber, writing structured logs to the data directory.
///
/// On each startup:
/// 1. Rotates existing logs (databrain.log → .1 → .2 → .3, keeps last 3).
/// 2. Opens a fresh databrain.log with a line-flushing writer for crash resilience.
/// 3. Logs a startup banner with the data directory path for discoverability.
///
/// If the log file cannot be opened, logs go to stderr instead.
pub fn init_tracing(log_dir: &Path) {
    use tracing_subscriber::fmt;
    use tracing_subscriber::EnvFilter;

    let _ = std::fs::create_dir_all(log_dir);
    let log_path = log_dir.join("databrain.log");

    // Rotate: databrain.log.2 → .3, .1 → .2, databrain.log → .1
    rotate_log_file(&log_path, 3);

    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("databrain=info,warn"));

    let opened = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path);

    let installed = match opened {
        Ok(log_file) => fmt::fmt()
            .with_env_filter(filter)
            .with_writer(FlushingWriter::new(log_file))
            .with_ansi(false)
            .with_target(true)
            .with_thread_ids(false)
            .try_init(),
        Err(e) => {
            eprintln!("failed to open {}: {e}; logging to stderr", log_path.display());
            fmt::fmt()
                .with_env_filter(filter)
                .with_writer(std::io::stderr)
                .with_target(true)
                .try_init()
        }
    };
    if installed.is_err() {
        // A subscriber is already set (tests, embedding hosts)
        return;
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %log_dir.display(),
        log_file = %log_path.display(),
        pid = std::process::id(),
        "=== DataBrain starting ==="
    );
}

/// Rotate log files: `databrain.log` → `databrain.log.1` → `.2` → … → `.{keep}`.
///
/// Oldest file beyond `keep` is deleted. Missing files in the chain are skipped.
fn rotate_log_file(base_path: &Path, keep: u32) {
    let oldest = format!("{}.{keep}", base_path.display());
    let _ = std::fs::remove_file(&oldest);

    for i in (1..keep).rev() {
        let from = format!("{}.{i}", base_path.display());
        let to = format!("{}.{}", base_path.display(), i + 1);
        let _ = std::fs::rename(&from, &to);
    }

    if base_path.exists() {
        let to = format!("{}.1", base_path.display());
        let _ = std::fs::rename(base_path, &to);
    }
}

/// A writer that wraps `std::fs::File` and flushes after every write.
///
/// `tracing-subscriber` buffers log output internally. Without explicit
/// flushing, log entries may sit in OS buffers and be lost on crash.
#[derive(Clone)]
struct FlushingWriter {
    file: Arc<std::sync::Mutex<std::fs::File>>,
}

impl FlushingWriter {
    fn new(file: std::fs::File) -> Self {
        Self {
            file: Arc::new(std::sync::Mutex::new(file)),
        }
    }
}

impl std::io::Write for FlushingWriter {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        let n = std::io::Write::write(&mut *f, buf)?;
        std::io::Write::flush(&mut *f)?;
        Ok(n)
    }

    fn flush(&mut self) -> std::io::Result<()> {
        let mut f = self
            .file
            .lock()
            .map_err(|e| std::io::Error::other(format!("lock poisoned: {e}")))?;
        std::io::Write::flush(&mut *f)
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for FlushingWriter {
    type Writer = FlushingWriter;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rotate_log_file_shifts_and_drops_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let base = dir.path().join("databrain.log");
        std::fs::write(&base, "current").unwrap();
        std::fs::write(dir.path().join("databrain.log.1"), "one").unwrap();
        std::fs::write(dir.path().join("databrain.log.3"), "three").unwrap();

        rotate_log_file(&base, 3);

        assert!(!base.exists());
        let read = |suffix: &str| std::fs::read_to_string(dir.path().join(format!("databrain.log{suffix}"))).unwrap();
        assert_eq!(read(".1"), "current");
        assert_eq!(read(".2"), "one");
        assert!(!dir.path().join("databrain.log.3").exists());
    }

    #[test]
    fn test_app_state_gateway_config_reads_settings() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path());
        let mut settings = agent_core::Settings::new();
        settings.insert("ai_provider".into(), "groq".into());
        settings.insert("groq_api_key".into(), "gsk-test".into());
        state.store.save_settings(settings);

        let config = state.gateway_config().unwrap();
        assert_eq!(config.api_key, "gsk-test");
        assert_eq!(config.default_model, "llama-3.3-70b-versatile");
        assert!(dir.path().join(STORE_FILE).exists());
    }

    #[test]
    fn test_gateway_file_applies() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(GATEWAY_FILE),
            "provider: deepseek\napi_key: sk-file\ndefault_model: deepseek-reasoner\n",
        )
        .unwrap();
        let state = AppState::open(dir.path());

        let config = state.gateway_config().unwrap();
        assert_eq!(config.base_url, "https://api.deepseek.com/v1");
        assert_eq!(config.default_model, "deepseek-reasoner");
    }

    #[test]
    fn test_call_timeout_setting_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let state = AppState::open(dir.path());
        let mut settings = agent_core::Settings::new();
        settings.insert(MCP_CALL_TIMEOUT_KEY.into(), 5_000.into());
        state.store.save_settings(settings);

        let reopened = AppState::open(dir.path());
        assert_eq!(reopened.registry.call_timeout_ms(), 5_000);
    }
}
