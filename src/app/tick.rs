use agentdeck::agent::LogEvent;

use super::App;

impl App {
    /// Called on every tick of the main loop.
    ///
    /// Drains pending log lines, reports poller errors and tool suggestions
    /// once, and selects the first agent when the background refresh found one.
    pub fn on_tick(&mut self) {
        let mut closed = false;
        if let Some(tail) = self.log_tail.as_mut() {
            while let Some(event) = tail.stream.poll_event() {
                match event {
                    LogEvent::Line(line) => {
                        for line in line.lines() {
                            println!("[{}] {}", tail.agent_id, line);
                        }
                    }
                    LogEvent::Closed(reason) => {
                        match reason {
                            Some(reason) => println!("log stream for {} closed: {}", tail.agent_id, reason),
                            None => println!("log stream for {} closed", tail.agent_id),
                        }
                        closed = true;
                        break;
                    }
                }
            }
        }
        if closed {
            self.log_tail = None;
        }

        let poll_error = self.deck.registry().last_error();
        if poll_error != self.last_poll_error {
            if let Some(message) = &poll_error {
                println!("! {}", message);
            }
            self.last_poll_error = poll_error;
        }

        if let Some(suggestion) = self.deck.workbench().tool_suggestion() {
            println!(
                "suggested tools: {} {}",
                suggestion.suggested_tools.join(", "),
                suggestion.reason.as_deref().unwrap_or("")
            );
            self.deck.workbench_mut().clear_tool_suggestion();
        }

        self.deck.ensure_selection();
    }
}
