use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::agent::genesis::DEFAULT_STEP_DELAY;
use crate::agent::registry::DEFAULT_POLL_INTERVAL;

/// 設定檔相對於工作目錄的位置。
pub const SETTINGS_PATH: &str = "config/agentdeck.toml";
/// 覆寫 `api_base` 的環境變數。
pub const API_BASE_ENV: &str = "AGENTDECK_API_BASE";

/// AgentDeck 客戶端設定，對應 `config/agentdeck.toml`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeckSettings {
    /// 後端 HTTP 位址，例如 `http://localhost:8000`。
    pub api_base: String,
    /// 代理列表輪詢間隔（毫秒）。
    pub poll_interval_ms: u64,
    /// genesis 填入每段之間的延遲（毫秒）。
    pub genesis_step_ms: u64,
    /// 會話對照表的 JSON 檔案；相對路徑以工作目錄為基準。
    pub session_store: PathBuf,
    /// 架構師 API 金鑰。只讀不寫：`save_to_file` 不會把金鑰寫回設定檔。
    #[serde(skip_serializing)]
    pub api_key: Option<String>,
    /// 未直接提供金鑰時，從這個環境變數讀取。
    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,
}

impl Default for DeckSettings {
    fn default() -> Self {
        Self {
            api_base: "http://localhost:8000".into(),
            poll_interval_ms: DEFAULT_POLL_INTERVAL.as_millis() as u64,
            genesis_step_ms: DEFAULT_STEP_DELAY.as_millis() as u64,
            session_store: PathBuf::from(".agentdeck/sessions.json"),
            api_key: None,
            api_key_env: Some("ANTHROPIC_API_KEY".into()),
        }
    }
}

impl DeckSettings {
    /// 從工作目錄載入設定；檔案不存在時使用預設值，之後套用環境變數覆寫。
    pub fn load(workspace_root: &Path) -> Result<Self> {
        let config_path = workspace_root.join(SETTINGS_PATH);
        let settings = if config_path.exists() {
            let raw = fs::read_to_string(&config_path)
                .with_context(|| format!("讀取 AgentDeck 設定失敗: {}", config_path.display()))?;
            toml::from_str::<DeckSettings>(&raw)
                .with_context(|| format!("解析 AgentDeck 設定失敗: {}", config_path.display()))?
        } else {
            Self::default()
        };
        Ok(settings
            .with_env_overrides(std::env::var(API_BASE_ENV).ok())
            .normalize(workspace_root))
    }

    /// 將設定寫回 `config/agentdeck.toml`。
    pub fn save_to_file(&self, workspace_root: &Path) -> Result<()> {
        let config_dir = workspace_root.join("config");
        if !config_dir.exists() {
            fs::create_dir_all(&config_dir)
                .with_context(|| format!("建立設定目錄失敗: {}", config_dir.display()))?;
        }
        let config_path = workspace_root.join(SETTINGS_PATH);
        let serialized = toml::to_string_pretty(self).context("序列化 AgentDeck 設定失敗")?;
        fs::write(&config_path, serialized)
            .with_context(|| format!("寫入 AgentDeck 設定失敗: {}", config_path.display()))?;
        Ok(())
    }

    fn with_env_overrides(mut self, api_base: Option<String>) -> Self {
        if let Some(base) = api_base.filter(|base| !base.trim().is_empty()) {
            self.api_base = base;
        }
        self
    }

    fn normalize(mut self, workspace_root: &Path) -> Self {
        self.api_base = self.api_base.trim().trim_end_matches('/').to_string();
        if self.session_store.is_relative() {
            self.session_store = workspace_root.join(&self.session_store);
        }
        self
    }

    /// 明確設定的金鑰優先，其次才是環境變數。
    pub fn resolved_api_key(&self) -> Option<String> {
        if let Some(key) = &self.api_key {
            Some(key.clone())
        } else if let Some(var) = &self.api_key_env {
            std::env::var(var).ok().filter(|key| !key.is_empty())
        } else {
            None
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms.max(1))
    }

    pub fn genesis_step(&self) -> Duration {
        Duration::from_millis(self.genesis_step_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn missing_file_yields_defaults_with_resolved_paths() {
        let dir = tempdir().unwrap();
        let settings = DeckSettings::default().normalize(dir.path());
        assert_eq!(settings.api_base, "http://localhost:8000");
        assert_eq!(settings.poll_interval(), Duration::from_secs(6));
        assert_eq!(settings.genesis_step(), Duration::from_millis(300));
        assert_eq!(settings.session_store, dir.path().join(".agentdeck/sessions.json"));
    }

    #[test]
    fn partial_file_keeps_defaults_for_missing_keys() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(
            dir.path().join(SETTINGS_PATH),
            "api_base = \"https://deck.example/\"\npoll_interval_ms = 1500\n",
        )
        .unwrap();

        let raw = fs::read_to_string(dir.path().join(SETTINGS_PATH)).unwrap();
        let settings = toml::from_str::<DeckSettings>(&raw).unwrap().normalize(dir.path());

        assert_eq!(settings.api_base, "https://deck.example");
        assert_eq!(settings.poll_interval_ms, 1500);
        assert_eq!(settings.genesis_step_ms, 300);
    }

    #[test]
    fn env_override_replaces_api_base() {
        let settings = DeckSettings::default().with_env_overrides(Some("http://10.0.0.5:9000".into()));
        assert_eq!(settings.api_base, "http://10.0.0.5:9000");
        let untouched = DeckSettings::default().with_env_overrides(Some("  ".into()));
        assert_eq!(untouched.api_base, "http://localhost:8000");
    }

    #[test]
    fn explicit_api_key_wins() {
        let settings = DeckSettings {
            api_key: Some("sk-explicit".into()),
            api_key_env: Some("AGENTDECK_TEST_UNSET_KEY".into()),
            ..DeckSettings::default()
        };
        assert_eq!(settings.resolved_api_key().as_deref(), Some("sk-explicit"));
    }

    #[test]
    fn malformed_file_reports_path() {
        let dir = tempdir().unwrap();
        fs::create_dir_all(dir.path().join("config")).unwrap();
        fs::write(dir.path().join(SETTINGS_PATH), "poll_interval_ms = \"soon\"").unwrap();
        let err = DeckSettings::load(dir.path()).unwrap_err();
        assert!(format!("{err:#}").contains("agentdeck.toml"));
    }

    #[test]
    fn save_then_load_round_trips() {
        let dir = tempdir().unwrap();
        let settings = DeckSettings {
            genesis_step_ms: 50,
            ..DeckSettings::default()
        };
        settings.save_to_file(dir.path()).unwrap();
        let raw = fs::read_to_string(dir.path().join(SETTINGS_PATH)).unwrap();
        let loaded: DeckSettings = toml::from_str(&raw).unwrap();
        assert_eq!(loaded.genesis_step_ms, 50);
    }

    #[test]
    fn saved_file_never_contains_the_api_key() {
        let dir = tempdir().unwrap();
        let settings = DeckSettings {
            api_key: Some("sk-secret".into()),
            ..DeckSettings::default()
        };
        settings.save_to_file(dir.path()).unwrap();

        let raw = fs::read_to_string(dir.path().join(SETTINGS_PATH)).unwrap();
        assert!(!raw.contains("sk-secret"));
        assert!(!raw.contains("api_key ="));
        let loaded = DeckSettings::load(dir.path()).unwrap();
        assert_eq!(loaded.api_key, None);
        assert_eq!(loaded.api_key_env.as_deref(), Some("ANTHROPIC_API_KEY"));
    }
}
