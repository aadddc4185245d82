mod app;
mod event;

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use app::App;
use event::Event;
use tokio::io::{AsyncBufReadExt, BufReader};

#[tokio::main]
async fn main() -> Result<()> {
    let workspace_root = std::env::current_dir().context("無法取得目前工作目錄")?;
    init_logging(&workspace_root);
    let mut app = App::new(workspace_root)?;
    app.print_banner();

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut interval = tokio::time::interval(Duration::from_millis(250));

    while app.running {
        let event = tokio::select! {
            _ = interval.tick() => Event::Tick,
            line = lines.next_line() => {
                match line {
                    Ok(Some(line)) => Event::Line(line),
                    // stdin closed or unreadable
                    Ok(None) | Err(_) => break,
                }
            }
        };

        match event {
            Event::Tick => app.on_tick(),
            Event::Line(line) => app.handle_line(&line).await,
        }
    }

    app.shutdown();
    Ok(())
}

/// 有 `config/log4rs.yaml` 時使用 log4rs，否則以 env_logger 輸出到 stderr。
fn init_logging(workspace_root: &Path) {
    let config_path = workspace_root.join("config/log4rs.yaml");
    if config_path.exists() {
        match log4rs::init_file(&config_path, Default::default()) {
            Ok(()) => return,
            Err(err) => eprintln!("log4rs 設定載入失敗 ({}): {err}", config_path.display()),
        }
    }
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .target(env_logger::Target::Stderr)
        .init();
}
