use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

use serde::{Deserialize, Serialize};

use super::genesis::GenesisStep;

/// 預設啟用的工具清單，對應工具箱中標記為預設的項目。
pub const DEFAULT_TOOLS: &[&str] = &[
    "Read",
    "Write",
    "Edit",
    "Grep",
    "Glob",
    "Bash",
    "WebSearch",
    "WebFetch",
    "TodoWrite",
    "Task",
    "Skill",
];

/// 允許的權限模式。
pub const PERMISSION_MODES: &[&str] = &["default", "acceptEdits", "plan", "bypassPermissions"];

/// 草稿表單與執行中代理共用的設定格式，也就是送往後端的 `config` JSON。
///
/// 所有欄位皆為可選；缺少的欄位在序列化時會被省略，與後端的預期一致。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// 系統提示詞（System Prompt）。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission_mode: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_turns: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    /// MCP 伺服器設定，內容由後端解讀，這裡保持原始 JSON。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mcp_servers: Option<serde_json::Value>,
    /// 子代理，以名稱為鍵。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agents: Option<BTreeMap<String, SubAgent>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub skills: Option<BTreeMap<String, Skill>>,
    /// 斜線指令，以指令名稱為鍵。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commands: Option<BTreeMap<String, SlashCommand>>,
}

/// 可由主代理透過委派工具呼叫的子代理定義。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SubAgent {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub prompt: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    /// 為 `None` 時沿用主代理的工具設定。
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub allowed_tools: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
}

/// 代理會依描述自動觸發的技能包（SKILL.md）。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Skill {
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub content: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub resources: Vec<String>,
}

/// 由使用者明確觸發的斜線指令。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SlashCommand {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub content: String,
}

/// 草稿表單在 genesis 填入與手動編輯之間共用。
pub type SharedDraft = Arc<Mutex<DraftForm>>;

/// 取得草稿的鎖；若先前持有者 panic，仍沿用其中的資料。
pub fn lock_draft(draft: &SharedDraft) -> MutexGuard<'_, DraftForm> {
    match draft.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// 組裝代理設定用的可變表單狀態。
///
/// 表單本身不會送到後端；每次讀取都透過 [`DraftForm::to_config`] 重新組出一份
/// `AgentConfig`，因此沒有另外保存「已提交」的副本。
#[derive(Debug, Clone, PartialEq)]
pub struct DraftForm {
    pub config_id: String,
    pub name: String,
    pub description: String,
    pub system_prompt: String,
    /// 只有勾選自訂提示詞時，`system_prompt` 才會被放進設定中。
    pub use_custom_prompt: bool,
    pub allowed_tools: Vec<String>,
    pub permission_mode: String,
    /// 保留使用者輸入的原始文字；無法解析為數字時不放進設定。
    pub max_turns: String,
    pub model: String,
    pub mcp_servers_json: String,
    pub mcp_env_json: String,
    pub sub_agents: BTreeMap<String, SubAgent>,
    pub skills: BTreeMap<String, Skill>,
    pub commands: BTreeMap<String, SlashCommand>,
}

impl Default for DraftForm {
    fn default() -> Self {
        Self {
            config_id: String::new(),
            name: String::new(),
            description: String::new(),
            system_prompt: String::new(),
            use_custom_prompt: false,
            allowed_tools: DEFAULT_TOOLS.iter().map(|tool| (*tool).to_string()).collect(),
            permission_mode: String::from("bypassPermissions"),
            max_turns: String::from("40"),
            model: String::new(),
            mcp_servers_json: String::new(),
            mcp_env_json: String::new(),
            sub_agents: BTreeMap::new(),
            skills: BTreeMap::new(),
            commands: BTreeMap::new(),
        }
    }
}

impl DraftForm {
    /// 包裝成可共用的草稿。
    pub fn shared(self) -> SharedDraft {
        Arc::new(Mutex::new(self))
    }

    /// 由目前表單內容組出設定。
    ///
    /// 空白字串會被省略，MCP JSON 解析失敗時同樣省略（錯誤由 [`DraftForm::validate`] 回報）。
    pub fn to_config(&self) -> AgentConfig {
        let system_prompt = if self.use_custom_prompt {
            non_empty(&self.system_prompt)
        } else {
            None
        };
        AgentConfig {
            id: non_empty(&self.config_id),
            name: non_empty(&self.name),
            description: non_empty(&self.description),
            system_prompt,
            permission_mode: non_empty(&self.permission_mode),
            max_turns: self.max_turns.trim().parse::<u32>().ok(),
            model: non_empty(&self.model),
            allowed_tools: Some(self.allowed_tools.clone()),
            mcp_servers: parse_json_field(&self.mcp_servers_json).ok().flatten(),
            agents: non_empty_map(&self.sub_agents),
            skills: non_empty_map(&self.skills),
            commands: non_empty_map(&self.commands),
        }
    }

    /// 檢查兩個 JSON 欄位，回傳第一個錯誤訊息。
    pub fn validate(&self) -> Result<(), String> {
        if let Err(err) = parse_json_field(&self.mcp_servers_json) {
            return Err(format!("MCP servers JSON error: {}", err));
        }
        if let Err(err) = parse_json_field(&self.mcp_env_json) {
            return Err(format!("MCP env JSON error: {}", err));
        }
        Ok(())
    }

    /// 啟動時附帶的 MCP 環境變數；欄位空白時為 `None`。
    pub fn mcp_env(&self) -> Result<Option<serde_json::Value>, String> {
        parse_json_field(&self.mcp_env_json)
            .map_err(|err| format!("MCP env JSON error: {}", err))
    }

    /// 一次把整份設定寫入表單（非分段的填入路徑）。
    pub fn hydrate(&mut self, config: &AgentConfig) {
        self.hydrate_identity(config);
        for step in super::genesis::build_genesis_steps(config) {
            self.apply_step(step);
        }
    }

    /// 只寫入不參與分段動畫的欄位（識別資訊、權限、模型與 MCP）。
    pub fn hydrate_identity(&mut self, config: &AgentConfig) {
        if let Some(id) = &config.id {
            self.config_id = id.clone();
        }
        if let Some(name) = &config.name {
            self.name = name.clone();
        }
        if let Some(description) = &config.description {
            self.description = description.clone();
        }
        if let Some(mode) = &config.permission_mode {
            self.permission_mode = mode.clone();
        }
        if let Some(turns) = config.max_turns {
            self.max_turns = turns.to_string();
        }
        if let Some(model) = &config.model {
            self.model = model.clone();
        }
        if let Some(servers) = &config.mcp_servers {
            self.mcp_servers_json = serde_json::to_string_pretty(servers).unwrap_or_default();
        }
    }

    /// 套用單一 genesis 片段，後到的片段會覆蓋使用者在同欄位的手動編輯。
    pub fn apply_step(&mut self, step: GenesisStep) {
        match step {
            GenesisStep::SystemPrompt(prompt) => {
                self.system_prompt = prompt;
                self.use_custom_prompt = true;
            }
            GenesisStep::AllowedTools(tools) => self.allowed_tools = tools,
            GenesisStep::Agents(agents) => self.sub_agents = agents,
            GenesisStep::Skills(skills) => self.skills = skills,
            GenesisStep::Commands(commands) => self.commands = commands,
        }
    }
}

/// 將以逗號分隔的清單轉成項目陣列，忽略空白項目。
pub fn parse_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(String::from)
        .collect()
}

/// 解析可留白的 JSON 欄位：空白為 `Ok(None)`，格式錯誤時回傳解析器訊息。
fn parse_json_field(value: &str) -> Result<Option<serde_json::Value>, String> {
    if value.trim().is_empty() {
        return Ok(None);
    }
    serde_json::from_str(value)
        .map(Some)
        .map_err(|err| err.to_string())
}

fn non_empty(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn non_empty_map<T: Clone>(map: &BTreeMap<String, T>) -> Option<BTreeMap<String, T>> {
    if map.is_empty() {
        None
    } else {
        Some(map.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_form_builds_minimal_config() {
        let config = DraftForm::default().to_config();
        assert_eq!(config.id, None);
        assert_eq!(config.system_prompt, None);
        assert_eq!(config.permission_mode.as_deref(), Some("bypassPermissions"));
        assert_eq!(config.max_turns, Some(40));
        assert_eq!(config.allowed_tools.as_ref().map(Vec::len), Some(DEFAULT_TOOLS.len()));
        assert!(config.agents.is_none());

        let json = serde_json::to_value(&config).unwrap();
        assert!(json.get("agents").is_none());
        assert!(json.get("name").is_none());
    }

    #[test]
    fn custom_prompt_only_included_when_enabled() {
        let mut form = DraftForm {
            system_prompt: "  Be terse.  ".into(),
            ..DraftForm::default()
        };
        assert_eq!(form.to_config().system_prompt, None);
        form.use_custom_prompt = true;
        assert_eq!(form.to_config().system_prompt.as_deref(), Some("Be terse."));
    }

    #[test]
    fn non_numeric_max_turns_is_dropped() {
        let form = DraftForm {
            max_turns: "lots".into(),
            ..DraftForm::default()
        };
        assert_eq!(form.to_config().max_turns, None);
    }

    #[test]
    fn invalid_mcp_json_is_reported_and_omitted() {
        let form = DraftForm {
            mcp_servers_json: "{not json".into(),
            ..DraftForm::default()
        };
        assert!(form.to_config().mcp_servers.is_none());
        let err = form.validate().unwrap_err();
        assert!(err.starts_with("MCP servers JSON error:"));

        let form = DraftForm {
            mcp_env_json: "[".into(),
            ..DraftForm::default()
        };
        assert!(form.validate().unwrap_err().starts_with("MCP env JSON error:"));
    }

    #[test]
    fn hydrate_fills_form_from_blueprint() {
        let config: AgentConfig = serde_json::from_value(serde_json::json!({
            "id": "researcher",
            "name": "Researcher",
            "system_prompt": "Dig deep.",
            "allowed_tools": ["WebSearch"],
            "agents": { "helper": { "description": "x", "prompt": "y" } },
            "max_turns": 12
        }))
        .unwrap();
        let mut form = DraftForm::default();
        form.hydrate(&config);

        assert_eq!(form.config_id, "researcher");
        assert!(form.use_custom_prompt);
        assert_eq!(form.allowed_tools, vec!["WebSearch".to_string()]);
        assert_eq!(form.max_turns, "12");
        assert!(form.sub_agents.contains_key("helper"));

        let rebuilt = form.to_config();
        assert_eq!(rebuilt.system_prompt.as_deref(), Some("Dig deep."));
        assert_eq!(rebuilt.agents, config.agents);
    }

    #[test]
    fn parse_list_trims_and_skips_blanks() {
        assert_eq!(parse_list(" Read, ,Bash ,"), vec!["Read", "Bash"]);
    }
}
