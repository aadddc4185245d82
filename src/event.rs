/// Console events.
#[derive(Debug)]
pub enum Event {
    /// A tick event, sent at a regular interval.
    Tick,
    /// One line read from stdin.
    Line(String),
}
