//! Line encoders that render a [`LogEntry`] into the bytes of one log line.
//!
//! Two renderings are supported, matching the two intake content types:
//!
//! - **JSON**: one JSON object per line (`{"level":"info","msg":"...","time":"..."}`)
//! - **Text**: logfmt-style `key=value` pairs (`time="..." level=info msg="..."`)
//!
//! Encoders only render; framing lines for a payload is done by the buffer.

use chrono::SecondsFormat;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

use crate::constants::{CONTENT_TYPE_JSON, CONTENT_TYPE_PLAIN};
use crate::entry::LogEntry;

const LEVEL_KEY: &str = "level";
const MESSAGE_KEY: &str = "msg";
const TIME_KEY: &str = "time";

/// Output mode of the hook: decides line framing, payload shape and content type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Encoding {
    #[default]
    Json,
    Text,
}

impl Encoding {
    pub fn content_type(&self) -> &'static str {
        match self {
            Encoding::Json => CONTENT_TYPE_JSON,
            Encoding::Text => CONTENT_TYPE_PLAIN,
        }
    }

    pub fn is_json(&self) -> bool {
        matches!(self, Encoding::Json)
    }
}

impl std::str::FromStr for Encoding {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "json" => Ok(Encoding::Json),
            "text" | "plain" => Ok(Encoding::Text),
            other => Err(format!("'{}' is not a known log format (json, text)", other)),
        }
    }
}

/// Errors raised while rendering an entry.
#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("failed to serialize log entry: {0}")]
    Json(#[from] serde_json::Error),
}

/// Renders one entry into one line of bytes.
pub trait LineEncoder: Send + Sync {
    fn format(&self, entry: &LogEntry) -> Result<Vec<u8>, EncodeError>;
}

impl<F> LineEncoder for F
where
    F: Fn(&LogEntry) -> Result<Vec<u8>, EncodeError> + Send + Sync,
{
    fn format(&self, entry: &LogEntry) -> Result<Vec<u8>, EncodeError> {
        self(entry)
    }
}

/// Build the encoder matching an output mode.
pub fn encoder_for(encoding: Encoding) -> Box<dyn LineEncoder> {
    match encoding {
        Encoding::Json => Box::new(JsonEncoder::default()),
        Encoding::Text => Box::new(TextEncoder::default()),
    }
}

/// Renders entries as newline-terminated JSON objects.
#[derive(Debug, Clone, Default)]
pub struct JsonEncoder {
    _private: (),
}

impl LineEncoder for JsonEncoder {
    fn format(&self, entry: &LogEntry) -> Result<Vec<u8>, EncodeError> {
        let mut object = Map::with_capacity(entry.fields.len() + 3);
        for (key, value) in &entry.fields {
            object.insert(field_key(key), value.clone());
        }
        object.insert(LEVEL_KEY.to_string(), Value::from(entry.level.as_str()));
        object.insert(MESSAGE_KEY.to_string(), Value::from(entry.message.as_str()));
        object.insert(TIME_KEY.to_string(), Value::from(rfc3339(entry)));

        let mut line = serde_json::to_vec(&object)?;
        line.push(b'\n');
        Ok(line)
    }
}

/// Renders entries as `key=value` text lines without colors.
#[derive(Debug, Clone, Default)]
pub struct TextEncoder {
    _private: (),
}

impl LineEncoder for TextEncoder {
    fn format(&self, entry: &LogEntry) -> Result<Vec<u8>, EncodeError> {
        let mut line = String::with_capacity(64 + entry.message.len());
        append_pair(&mut line, TIME_KEY, &rfc3339(entry));
        append_pair(&mut line, LEVEL_KEY, entry.level.as_str());
        append_pair(&mut line, MESSAGE_KEY, &entry.message);
        for (key, value) in &entry.fields {
            let rendered = match value {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            append_pair(&mut line, &field_key(key), &rendered);
        }
        line.push('\n');
        Ok(line.into_bytes())
    }
}

fn rfc3339(entry: &LogEntry) -> String {
    entry.time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Prefix user fields that collide with the reserved keys.
fn field_key(key: &str) -> String {
    match key {
        LEVEL_KEY | MESSAGE_KEY | TIME_KEY => format!("fields.{}", key),
        _ => key.to_string(),
    }
}

fn append_pair(line: &mut String, key: &str, value: &str) {
    if !line.is_empty() {
        line.push(' ');
    }
    line.push_str(key);
    line.push('=');
    if needs_quoting(value) {
        // JSON string escaping covers quotes, backslashes and control chars.
        line.push_str(&Value::from(value).to_string());
    } else {
        line.push_str(value);
    }
}

fn needs_quoting(value: &str) -> bool {
    value.is_empty()
        || !value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '.' | '_' | '/' | '@' | '^' | '+'))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entry::LogLevel;
    use chrono::{TimeZone, Utc};

    fn fixed_entry() -> LogEntry {
        LogEntry::new(LogLevel::Info, "disk almost full")
            .with_time(Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap())
            .with_field("device", "sda1")
            .with_field("usage", 93)
    }

    #[test]
    fn test_json_encoder_renders_one_object_per_line() {
        let line = JsonEncoder::default().format(&fixed_entry()).unwrap();
        assert_eq!(*line.last().unwrap(), b'\n');

        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["level"], "info");
        assert_eq!(value["msg"], "disk almost full");
        assert_eq!(value["time"], "2024-03-01T12:30:00Z");
        assert_eq!(value["device"], "sda1");
        assert_eq!(value["usage"], 93);
    }

    #[test]
    fn test_json_encoder_prefixes_reserved_fields() {
        let entry = fixed_entry().with_field("msg", "shadowed");
        let line = JsonEncoder::default().format(&entry).unwrap();
        let value: Value = serde_json::from_slice(&line).unwrap();
        assert_eq!(value["msg"], "disk almost full");
        assert_eq!(value["fields.msg"], "shadowed");
    }

    #[test]
    fn test_text_encoder_layout() {
        let line = TextEncoder::default().format(&fixed_entry()).unwrap();
        assert_eq!(
            String::from_utf8(line).unwrap(),
            "time=\"2024-03-01T12:30:00Z\" level=info msg=\"disk almost full\" device=sda1 usage=93\n"
        );
    }

    #[test]
    fn test_text_encoder_escapes_quotes() {
        let entry = LogEntry::new(LogLevel::Warn, "said \"hi\"")
            .with_time(Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap());
        let line = String::from_utf8(TextEncoder::default().format(&entry).unwrap()).unwrap();
        assert!(line.contains(r#"msg="said \"hi\"""#));
        assert!(line.contains("level=warning"));
    }

    #[test]
    fn test_closure_is_an_encoder() {
        let encoder = |entry: &LogEntry| -> Result<Vec<u8>, EncodeError> {
            Ok(entry.message.clone().into_bytes())
        };
        let line = encoder.format(&fixed_entry()).unwrap();
        assert_eq!(line, b"disk almost full");
    }

    #[test]
    fn test_encoding_parse_and_content_type() {
        assert_eq!("JSON".parse::<Encoding>(), Ok(Encoding::Json));
        assert_eq!("plain".parse::<Encoding>(), Ok(Encoding::Text));
        assert!("xml".parse::<Encoding>().is_err());
        assert_eq!(Encoding::Json.content_type(), "application/json");
        assert_eq!(Encoding::Text.content_type(), "text/plain");
    }
}
