//! Parsing of console input lines.

/// Draft fields editable with `set <field> <value>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DraftField {
    Id,
    Name,
    Description,
    Prompt,
    Model,
    MaxTurns,
    PermissionMode,
    Tools,
    Mcp,
    Env,
}

impl DraftField {
    fn parse(name: &str) -> Option<Self> {
        Some(match name {
            "id" => Self::Id,
            "name" => Self::Name,
            "description" => Self::Description,
            "prompt" => Self::Prompt,
            "model" => Self::Model,
            "max_turns" => Self::MaxTurns,
            "permission_mode" => Self::PermissionMode,
            "tools" => Self::Tools,
            "mcp" => Self::Mcp,
            "env" => Self::Env,
            _ => return None,
        })
    }
}

/// One console command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Agents,
    Select(String),
    Architect(String),
    Key(String),
    Set(DraftField, String),
    Draft,
    Launch,
    Apply,
    Rollback,
    Start(Option<String>),
    Stop(Option<String>),
    Delete(Option<String>),
    Chat(String),
    Retry,
    Logs(Option<String>),
    State,
    Save,
    Help,
    Quit,
}

pub const HELP: &str = "\
agents                  list agents
select <id>             select an agent
prompt <text>           generate a blueprint and launch it
key <api-key>           set the architect API key
set <field> <value>     edit the draft (id, name, description, prompt, model,
                        max_turns, permission_mode, tools, mcp, env)
draft                   show the draft config
launch                  launch the draft
apply                   hot-reload the draft into the selected agent
rollback                re-apply the last good config
start|stop|delete [id]  agent lifecycle (defaults to the selected agent)
chat <text>             send a message (plain text works too)
retry                   re-send the last message
logs [id]               toggle the container log tail
state                   show workbench state
save                    write config/agentdeck.toml
quit                    exit";

impl Command {
    /// Parses one input line. Blank lines yield `Ok(None)`; any text that does
    /// not start with a known command is sent as a chat message.
    pub fn parse(line: &str) -> Result<Option<Command>, String> {
        let line = line.trim();
        if line.is_empty() {
            return Ok(None);
        }
        let (head, rest) = match line.split_once(char::is_whitespace) {
            Some((head, rest)) => (head, rest.trim()),
            None => (line, ""),
        };
        let optional = |rest: &str| (!rest.is_empty()).then(|| rest.to_string());
        let required = |rest: &str, usage: &str| {
            if rest.is_empty() {
                Err(format!("usage: {usage}"))
            } else {
                Ok(rest.to_string())
            }
        };

        let command = match head {
            "agents" => Command::Agents,
            "select" => Command::Select(required(rest, "select <id>")?),
            "prompt" => Command::Architect(required(rest, "prompt <text>")?),
            "key" => Command::Key(required(rest, "key <api-key>")?),
            "set" => {
                let (field, value) = rest
                    .split_once(char::is_whitespace)
                    .map(|(field, value)| (field, value.trim()))
                    .unwrap_or((rest, ""));
                let field = DraftField::parse(field)
                    .ok_or_else(|| format!("unknown draft field: {field}"))?;
                Command::Set(field, value.to_string())
            }
            "draft" => Command::Draft,
            "launch" => Command::Launch,
            "apply" => Command::Apply,
            "rollback" => Command::Rollback,
            "start" => Command::Start(optional(rest)),
            "stop" => Command::Stop(optional(rest)),
            "delete" => Command::Delete(optional(rest)),
            "chat" => Command::Chat(required(rest, "chat <text>")?),
            "retry" => Command::Retry,
            "logs" => Command::Logs(optional(rest)),
            "state" => Command::State,
            "save" => Command::Save,
            "help" => Command::Help,
            "quit" | "exit" => Command::Quit,
            _ => Command::Chat(line.to_string()),
        };
        Ok(Some(command))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_text_is_chat() {
        assert_eq!(
            Command::parse("what is in the workspace?"),
            Ok(Some(Command::Chat("what is in the workspace?".into())))
        );
        assert_eq!(Command::parse("   "), Ok(None));
    }

    #[test]
    fn optional_ids_default_to_selection() {
        assert_eq!(Command::parse("stop"), Ok(Some(Command::Stop(None))));
        assert_eq!(Command::parse("stop a1"), Ok(Some(Command::Stop(Some("a1".into())))));
    }

    #[test]
    fn set_keeps_spaces_in_value() {
        assert_eq!(
            Command::parse("set prompt You are a careful reviewer."),
            Ok(Some(Command::Set(DraftField::Prompt, "You are a careful reviewer.".into())))
        );
        assert_eq!(
            Command::parse("set tools"),
            Ok(Some(Command::Set(DraftField::Tools, String::new())))
        );
    }

    #[test]
    fn bad_input_reports_usage() {
        assert_eq!(Command::parse("select"), Err("usage: select <id>".into()));
        assert_eq!(Command::parse("set colour red"), Err("unknown draft field: colour".into()));
    }
}
