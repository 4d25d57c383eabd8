//! Per-recipient delivery log and its CSV rendering.

use chrono::{DateTime, SecondsFormat, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendStatus {
    Sent,
    Failed,
}

impl SendStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SendStatus::Sent => "sent",
            SendStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEntry {
    pub recipient: String,
    pub status: SendStatus,
    pub error: Option<String>,
    pub at: DateTime<Utc>,
}

impl LogEntry {
    pub fn sent(recipient: &str) -> Self {
        Self {
            recipient: recipient.to_string(),
            status: SendStatus::Sent,
            error: None,
            at: Utc::now(),
        }
    }

    pub fn failed(recipient: &str, error: impl Into<String>) -> Self {
        Self {
            recipient: recipient.to_string(),
            status: SendStatus::Failed,
            error: Some(error.into()),
            at: Utc::now(),
        }
    }
}

const HEADER: &str = "recipient,status,error,timestamp";

/// Render the log as CSV with a header row.
pub fn render_csv(entries: &[LogEntry]) -> String {
    let mut out = String::with_capacity(HEADER.len() + 1 + entries.len() * 64);
    out.push_str(HEADER);
    out.push('\n');

    for entry in entries {
        let timestamp = entry.at.to_rfc3339_opts(SecondsFormat::Millis, true);
        let fields = [
            escape(&entry.recipient),
            entry.status.as_str().to_string(),
            escape(entry.error.as_deref().unwrap_or("")),
            timestamp,
        ];
        out.push_str(&fields.join(","));
        out.push('\n');
    }

    out
}

/// Quote a field when it contains a delimiter, quote or line break.
fn escape(field: &str) -> String {
    if field.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_render_csv() {
        let at = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        let entries = vec![
            LogEntry {
                recipient: "ana@example.com".to_string(),
                status: SendStatus::Sent,
                error: None,
                at,
            },
            LogEntry {
                recipient: "bo@example.com".to_string(),
                status: SendStatus::Failed,
                error: Some("mailbox full, try \"later\"".to_string()),
                at,
            },
        ];

        let csv = render_csv(&entries);
        let lines: Vec<&str> = csv.lines().collect();
        assert_eq!(lines[0], "recipient,status,error,timestamp");
        assert_eq!(lines[1], "ana@example.com,sent,,2024-05-01T12:00:00.000Z");
        assert_eq!(
            lines[2],
            "bo@example.com,failed,\"mailbox full, try \"\"later\"\"\",2024-05-01T12:00:00.000Z"
        );
    }

    #[test]
    fn test_render_empty_log_has_header() {
        assert_eq!(render_csv(&[]), "recipient,status,error,timestamp\n");
    }
}
