//! JSON-lines listener printing delivered events to stdout.

use std::io::Write;

use serde::Serialize;
use usage_tracker::{Listener, ListenerError, Payload};

#[derive(Debug, Serialize)]
struct DeliveredLine<'a> {
    event: &'a str,
    data: &'a Payload,
}

/// Render one delivered event as a JSON line.
pub fn render_line(event: &str, data: &Payload) -> Result<String, serde_json::Error> {
    serde_json::to_string(&DeliveredLine { event, data })
}

/// Listener that writes each delivered event to stdout.
pub fn stdout_listener() -> Listener {
    Listener::callback(|event, data| {
        let line = render_line(event, data).map_err(|e| ListenerError::new(e.to_string()))?;
        let mut stdout = std::io::stdout().lock();
        writeln!(stdout, "{line}").map_err(|e| ListenerError::new(e.to_string()))
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_render_line() {
        let mut data = Payload::new();
        data.insert("ts".into(), json!(1));
        let line = render_line("open", &data).unwrap();
        assert_eq!(line, r#"{"event":"open","data":{"ts":1}}"#);
    }
}
