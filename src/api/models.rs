//! API data models

use serde::Serialize;

use crate::engine::RunEvent;
use crate::logging::LogEvent;

/// Health check body
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthInfo {
    pub status: &'static str,
    pub version: &'static str,
    pub scenarios: usize,
    pub active_instances: usize,
}

/// Frame pushed to WebSocket subscribers
#[derive(Debug, Serialize)]
#[serde(tag = "channel", content = "event", rename_all = "camelCase")]
pub enum StreamFrame {
    Log(LogEvent),
    Run(RunEvent),
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_stream_frame_shape() {
        let frame = StreamFrame::Log(LogEvent::LogsCleared);
        assert_eq!(
            serde_json::to_value(frame).unwrap(),
            json!({"channel": "log", "event": {"type": "logsCleared"}})
        );
    }
}
