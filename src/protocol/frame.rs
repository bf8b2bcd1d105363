//! Newline-delimited framing
//!
//! Every message is the UTF-8 text of either a plain string or a JSON object,
//! followed by a single `\n`. There is no length prefix and no escaping, so a
//! body must never contain the delimiter itself.

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};
use tracing::{debug, info, warn};

use crate::domain::SessionError;

pub const FRAME_DELIMITER: u8 = b'\n';

/// Default length string fields are cut to when outgoing records are logged
pub const DEFAULT_TRUNCATE_TO: usize = 100;

/// Append the delimiter to a message body
pub fn encode_frame(body: &str) -> Result<Vec<u8>, SessionError> {
    if body.as_bytes().contains(&FRAME_DELIMITER) {
        return Err(SessionError::EmbeddedDelimiter);
    }

    let mut frame = Vec::with_capacity(body.len() + 1);
    frame.extend_from_slice(body.as_bytes());
    frame.push(FRAME_DELIMITER);
    Ok(frame)
}

/// Shorten a string for logging, noting how many characters were dropped
pub fn truncate(message: &str, up_to: usize) -> String {
    let len = message.chars().count();
    if len <= up_to {
        return message.to_string();
    }

    let head: String = message.chars().take(up_to).collect();
    format!("{}... ({} symbols truncated)", head, len - up_to)
}

/// Copy of a record for logging: string fields other than `error` are truncated
pub fn log_view(record: &Value, up_to: usize) -> Value {
    match record {
        Value::Object(fields) => Value::Object(
            fields
                .iter()
                .map(|(key, value)| {
                    let shown = match value {
                        Value::String(s) if key != "error" => Value::String(truncate(s, up_to)),
                        other => other.clone(),
                    };
                    (key.clone(), shown)
                })
                .collect(),
        ),
        other => other.clone(),
    }
}

/// Parse an incoming frame as a test descriptor.
///
/// Returns `None` when the frame is not valid JSON or holds an empty value
/// (`null`, `false`, zero, `""`, `[]`, `{}`); either ends the session without
/// an error. Any other value is returned as is, and its shape is checked when
/// the test request is built.
pub fn parse_descriptor(frame: &[u8], up_to: usize) -> Option<Value> {
    match serde_json::from_slice::<Value>(frame) {
        Ok(value) if is_empty_value(&value) => {
            info!("Incoming data is empty: {}", value);
            None
        }
        Ok(value) => Some(value),
        Err(e) => {
            warn!("Incoming data is not valid JSON: {}", e);
            warn!(
                "Incoming data: {}",
                truncate(&String::from_utf8_lossy(frame), up_to)
            );
            None
        }
    }
}

fn is_empty_value(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(items) => items.is_empty(),
        Value::Object(fields) => fields.is_empty(),
    }
}

/// Byte framing over one connection
pub struct FramedStream<R, W> {
    reader: BufReader<R>,
    writer: W,
    truncate_to: usize,
}

impl<R, W> FramedStream<R, W>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    pub fn new(reader: R, writer: W, truncate_to: usize) -> Self {
        Self {
            reader: BufReader::new(reader),
            writer,
            truncate_to,
        }
    }

    /// Read one frame without its delimiter. `None` means the peer closed the
    /// stream; a trailing partial frame is discarded.
    pub async fn read_frame(&mut self) -> Result<Option<Vec<u8>>> {
        let mut frame = Vec::new();
        let read = self
            .reader
            .read_until(FRAME_DELIMITER, &mut frame)
            .await
            .context("Failed to read frame")?;

        if read == 0 {
            return Ok(None);
        }
        if frame.pop() != Some(FRAME_DELIMITER) {
            warn!(
                "Stream closed in the middle of a frame ({} bytes discarded)",
                frame.len() + 1
            );
            return Ok(None);
        }

        Ok(Some(frame))
    }

    /// Send a plain string message
    pub async fn send_text(&mut self, text: &str) -> Result<()> {
        debug!("Sent: {}", truncate(text, self.truncate_to));
        self.write_frame(text).await
    }

    /// Serialize a record to JSON and send it. Only the log line is truncated.
    pub async fn send_record<T: Serialize>(&mut self, record: &T) -> Result<()> {
        let value = serde_json::to_value(record).context("Failed to serialize record")?;
        debug!("Sent: {}", log_view(&value, self.truncate_to));

        let body = serde_json::to_string(&value).context("Failed to encode record")?;
        self.write_frame(&body).await
    }

    async fn write_frame(&mut self, body: &str) -> Result<()> {
        let frame = encode_frame(body)?;
        self.writer
            .write_all(&frame)
            .await
            .context("Failed to write frame")?;
        self.writer.flush().await.context("Failed to flush frame")?;
        Ok(())
    }
}
