//! `app` 模組是 AgentDeck 主控台的核心。
//!
//! 它負責保存主控台狀態、解析輸入的指令，並把指令轉交給 `AgentDeck`。

/// `actions` 模組：執行已解析的指令。
mod actions;
/// `commands` 模組：把輸入行解析成 `Command`。
mod commands;
/// `init` 模組：負責 `App` 的初始化與結束。
mod init;
/// `state` 模組：定義 `App` 結構。
mod state;
/// `tick` 模組：處理定時更新（日誌輸出、輪詢錯誤）。
mod tick;

pub use state::{App, LogTail};
