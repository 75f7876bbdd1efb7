//! ComfyUI WebSocket frame types and parsers.
//!
//! Text frames are JSON objects of the shape `{"type": "<kind>", "data":
//! {...}}` and deserialize into [`ComfyUIMessage`]. Binary frames carry
//! images and are decoded by [`parse_binary`].

use serde::Deserialize;

use crate::error::TransportError;

/// Text messages the listener understands.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum ComfyUIMessage {
    #[serde(rename = "status")]
    Status(StatusData),

    /// A prompt has been picked from the queue.
    #[serde(rename = "execution_start")]
    ExecutionStart(ExecutionStartData),

    #[serde(rename = "execution_cached")]
    ExecutionCached(ExecutionCachedData),

    /// A node started executing; `node == None` means the prompt is done.
    #[serde(rename = "executing")]
    Executing(ExecutingData),

    /// Sampler step progress.
    #[serde(rename = "progress")]
    Progress(ProgressData),

    #[serde(rename = "executed")]
    Executed(ExecutedData),

    #[serde(rename = "execution_error")]
    ExecutionError(ErrorData),

    /// The prompt was stopped via `POST /interrupt`.
    #[serde(rename = "execution_interrupted")]
    ExecutionInterrupted(InterruptedData),
}

#[derive(Debug, Clone, Deserialize)]
pub struct StatusData {
    pub status: QueueStatus,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QueueStatus {
    pub exec_info: ExecInfo,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecInfo {
    pub queue_remaining: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionStartData {
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutionCachedData {
    pub prompt_id: String,
    #[serde(default)]
    pub nodes: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutingData {
    pub node: Option<String>,
    pub prompt_id: String,
}

/// Step-level progress within a node.
///
/// Older servers omit `prompt_id`; the listener then attributes the
/// update to the prompt announced by the last `execution_start`.
#[derive(Debug, Clone, Deserialize)]
pub struct ProgressData {
    pub value: i32,
    pub max: i32,
    #[serde(default)]
    pub prompt_id: Option<String>,
    #[serde(default)]
    pub node: Option<String>,
}

impl ProgressData {
    /// Progress as a fraction in `0.0..=1.0`.
    pub fn fraction(&self) -> f64 {
        if self.max <= 0 {
            return 0.0;
        }
        (f64::from(self.value) / f64::from(self.max)).clamp(0.0, 1.0)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutedData {
    pub node: String,
    pub output: serde_json::Value,
    pub prompt_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ErrorData {
    pub prompt_id: String,
    pub node_id: String,
    pub exception_message: String,
    pub exception_type: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct InterruptedData {
    pub prompt_id: String,
    #[serde(default)]
    pub node_id: Option<String>,
}

/// Parse a text frame.
///
/// Unknown `type` values and malformed JSON are errors; callers log them
/// and keep reading.
pub fn parse_message(text: &str) -> Result<ComfyUIMessage, serde_json::Error> {
    serde_json::from_str(text)
}

/// Binary event type for an encoded image (`PREVIEW_IMAGE` on the server).
const BINARY_EVENT_IMAGE: u32 = 1;

/// Encoding of an image carried in a binary frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageFormat {
    Jpeg,
    Png,
}

/// A decoded binary frame header plus its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BinaryFrame<'a> {
    Image { format: ImageFormat, data: &'a [u8] },
    /// Any other event type; carried for logging only.
    Other { event: u32 },
}

/// Split a binary frame into its header fields and payload.
///
/// Layout: big-endian `u32` event type, then for images a big-endian
/// `u32` format (`1` JPEG, `2` PNG), then the encoded bytes.
pub fn parse_binary(frame: &[u8]) -> Result<BinaryFrame<'_>, TransportError> {
    let event = read_u32(frame, 0)?;
    if event != BINARY_EVENT_IMAGE {
        return Ok(BinaryFrame::Other { event });
    }
    let format = match read_u32(frame, 4)? {
        1 => ImageFormat::Jpeg,
        2 => ImageFormat::Png,
        other => {
            return Err(TransportError::Protocol(format!(
                "Unknown image format {other} in binary frame"
            )))
        }
    };
    Ok(BinaryFrame::Image {
        format,
        data: &frame[8..],
    })
}

fn read_u32(frame: &[u8], offset: usize) -> Result<u32, TransportError> {
    frame
        .get(offset..offset + 4)
        .and_then(|b| b.try_into().ok())
        .map(u32::from_be_bytes)
        .ok_or_else(|| {
            TransportError::Protocol(format!(
                "Binary frame too short ({} bytes)",
                frame.len()
            ))
        })
}
