//! WebSocket message processing.
//!
//! Reads raw frames from a ComfyUI WebSocket, feeds them through a
//! [`MessageTranslator`] and yields the resulting [`ClientMessage`]s as a
//! stream. The translator keeps track of the prompt currently executing
//! so that image frames and prompt-less progress updates can be
//! attributed to it.

use futures::StreamExt;
use tokio_tungstenite::tungstenite::Message;

use easel_core::{Image, ImageCollection};

use crate::client::MessageStream;
use crate::error::TransportError;
use crate::events::ClientMessage;
use crate::messages::{parse_binary, parse_message, BinaryFrame, ComfyUIMessage};

pub type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

/// Turn a connected WebSocket into a stream of job events.
///
/// The stream ends when the server closes the socket. A receive error is
/// yielded once as [`TransportError::Network`] and then the stream ends.
pub fn message_stream(ws: WsStream, url: String) -> MessageStream {
    let state = Some((ws, MessageTranslator::default()));
    futures::stream::unfold(state, move |state| {
        let url = url.clone();
        async move {
            let (mut ws, mut translator) = state?;
            loop {
                match ws.next().await {
                    Some(Ok(Message::Text(text))) => {
                        if let Some(msg) = translator.on_text(&text) {
                            return Some((Ok(msg), Some((ws, translator))));
                        }
                    }
                    Some(Ok(Message::Binary(data))) => {
                        if let Err(e) = translator.on_binary(&data) {
                            tracing::warn!(error = %e, "Dropping binary frame");
                        }
                    }
                    Some(Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_))) => {}
                    Some(Ok(Message::Close(frame))) => {
                        tracing::info!(?frame, "ComfyUI WebSocket closed");
                        return None;
                    }
                    Some(Err(e)) => {
                        tracing::error!(error = %e, "WebSocket receive error");
                        return Some((Err(TransportError::websocket(url, &e)), None));
                    }
                    None => return None,
                }
            }
        }
    })
    .boxed()
}

/// Folds ComfyUI frames into per-prompt events.
#[derive(Debug, Default)]
pub struct MessageTranslator {
    active: Option<String>,
    images: ImageCollection,
}

impl MessageTranslator {
    /// Prompt currently executing on the server, if any.
    pub fn active_prompt(&self) -> Option<&str> {
        self.active.as_deref()
    }

    /// Handle one text frame, returning the event it completes (if any).
    pub fn on_text(&mut self, text: &str) -> Option<ClientMessage> {
        let msg = match parse_message(text) {
            Ok(msg) => msg,
            Err(e) => {
                tracing::warn!(error = %e, raw_message = %text, "Failed to parse ComfyUI message");
                return None;
            }
        };

        match msg {
            ComfyUIMessage::ExecutionStart(data) => {
                tracing::info!(prompt_id = %data.prompt_id, "Execution started");
                self.start(data.prompt_id);
                None
            }
            ComfyUIMessage::Progress(data) => {
                let prompt_id = data.prompt_id.clone().or_else(|| self.active.clone())?;
                tracing::debug!(
                    prompt_id = %prompt_id,
                    value = data.value,
                    max = data.max,
                    "Generation progress",
                );
                Some(ClientMessage::progress(prompt_id, data.fraction()))
            }
            ComfyUIMessage::Executing(data) => match data.node {
                Some(node) => {
                    tracing::trace!(prompt_id = %data.prompt_id, node = %node, "Executing node");
                    if self.active.is_none() {
                        self.start(data.prompt_id);
                    }
                    None
                }
                None => {
                    let images = self.finish(&data.prompt_id);
                    tracing::info!(
                        prompt_id = %data.prompt_id,
                        images = images.len(),
                        "Execution completed",
                    );
                    Some(ClientMessage::finished(data.prompt_id, images))
                }
            },
            ComfyUIMessage::ExecutionError(data) => {
                tracing::error!(
                    prompt_id = %data.prompt_id,
                    node_id = %data.node_id,
                    error_type = %data.exception_type,
                    error_message = %data.exception_message,
                    "Execution error",
                );
                self.finish(&data.prompt_id);
                Some(ClientMessage::error(
                    data.prompt_id,
                    format!(
                        "Server execution error in node {}: {}",
                        data.node_id, data.exception_message
                    ),
                ))
            }
            ComfyUIMessage::ExecutionInterrupted(data) => {
                tracing::info!(prompt_id = %data.prompt_id, "Execution interrupted");
                self.finish(&data.prompt_id);
                Some(ClientMessage::interrupted(data.prompt_id))
            }
            ComfyUIMessage::ExecutionCached(data) => {
                tracing::debug!(prompt_id = %data.prompt_id, nodes = data.nodes.len(), "Execution used cache");
                None
            }
            ComfyUIMessage::Executed(data) => {
                tracing::debug!(prompt_id = %data.prompt_id, node = %data.node, "Node executed with output");
                None
            }
            ComfyUIMessage::Status(data) => {
                tracing::debug!(
                    queue_remaining = data.status.exec_info.queue_remaining,
                    "ComfyUI queue status",
                );
                None
            }
        }
    }

    /// Handle one binary frame. Images are collected for the active prompt.
    pub fn on_binary(&mut self, frame: &[u8]) -> Result<(), TransportError> {
        match parse_binary(frame)? {
            BinaryFrame::Image { format, data } => {
                if self.active.is_none() {
                    tracing::debug!(?format, "Ignoring image frame outside of a prompt");
                    return Ok(());
                }
                let image = Image::from_encoded(data)
                    .map_err(|e| TransportError::Protocol(format!("Undecodable image: {e}")))?;
                self.images.push(image);
                Ok(())
            }
            BinaryFrame::Other { event } => {
                tracing::trace!(event, "Ignoring binary frame");
                Ok(())
            }
        }
    }

    fn start(&mut self, prompt_id: String) {
        self.active = Some(prompt_id);
        self.images = ImageCollection::new();
    }

    fn finish(&mut self, prompt_id: &str) -> ImageCollection {
        if self.active.as_deref() != Some(prompt_id) {
            tracing::debug!(prompt_id, active = ?self.active, "Prompt finished while another was active");
        }
        self.active = None;
        std::mem::take(&mut self.images)
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use easel_core::Extent;

    use super::*;
    use crate::events::ClientEvent;

    fn png_frame(extent: Extent) -> Vec<u8> {
        let mut frame = vec![0, 0, 0, 1, 0, 0, 0, 2];
        frame.extend(Image::blank(extent).to_png().unwrap());
        frame
    }

    #[test]
    fn progress_is_attributed_to_active_prompt() {
        let mut t = MessageTranslator::default();
        assert!(t
            .on_text(r#"{"type":"execution_start","data":{"prompt_id":"p1"}}"#)
            .is_none());
        let msg = t
            .on_text(r#"{"type":"progress","data":{"value":1,"max":4}}"#)
            .unwrap();
        assert_eq!(msg, ClientMessage::progress("p1", 0.25));
    }

    #[test]
    fn progress_without_any_prompt_is_dropped() {
        let mut t = MessageTranslator::default();
        assert!(t
            .on_text(r#"{"type":"progress","data":{"value":1,"max":4}}"#)
            .is_none());
    }

    #[test]
    fn finished_carries_collected_images() {
        let mut t = MessageTranslator::default();
        t.on_text(r#"{"type":"execution_start","data":{"prompt_id":"p1"}}"#);
        t.on_binary(&png_frame(Extent::new(8, 8))).unwrap();
        t.on_binary(&png_frame(Extent::new(4, 4))).unwrap();

        let msg = t
            .on_text(r#"{"type":"executing","data":{"node":null,"prompt_id":"p1"}}"#)
            .unwrap();
        assert_eq!(msg.prompt_id, "p1");
        match msg.event {
            ClientEvent::Finished(images) => {
                let widths: Vec<_> = images.iter().map(|i| i.extent().width).collect();
                assert_eq!(widths, vec![8, 4]);
            }
            other => panic!("Expected Finished, got {other:?}"),
        }
        assert!(t.active_prompt().is_none());
    }

    #[test]
    fn images_do_not_leak_into_next_prompt() {
        let mut t = MessageTranslator::default();
        t.on_text(r#"{"type":"execution_start","data":{"prompt_id":"p1"}}"#);
        t.on_binary(&png_frame(Extent::new(8, 8))).unwrap();
        t.on_text(r#"{"type":"execution_interrupted","data":{"prompt_id":"p1"}}"#);

        t.on_text(r#"{"type":"execution_start","data":{"prompt_id":"p2"}}"#);
        let msg = t
            .on_text(r#"{"type":"executing","data":{"node":null,"prompt_id":"p2"}}"#)
            .unwrap();
        assert_matches!(msg.event, ClientEvent::Finished(images) if images.is_empty());
    }

    #[test]
    fn execution_error_becomes_error_event() {
        let mut t = MessageTranslator::default();
        t.on_text(r#"{"type":"execution_start","data":{"prompt_id":"p1"}}"#);
        let msg = t
            .on_text(r#"{"type":"execution_error","data":{"prompt_id":"p1","node_id":"5","exception_message":"out of memory","exception_type":"RuntimeError"}}"#)
            .unwrap();
        assert_matches!(msg.event, ClientEvent::Error(ref m) if m.contains("out of memory"));
    }

    #[test]
    fn interrupted_becomes_interrupted_event() {
        let mut t = MessageTranslator::default();
        let msg = t
            .on_text(r#"{"type":"execution_interrupted","data":{"prompt_id":"p9"}}"#)
            .unwrap();
        assert_eq!(msg, ClientMessage::interrupted("p9"));
    }

    #[test]
    fn executing_node_marks_prompt_active() {
        let mut t = MessageTranslator::default();
        t.on_text(r#"{"type":"executing","data":{"node":"3","prompt_id":"p4"}}"#);
        assert_eq!(t.active_prompt(), Some("p4"));
    }

    #[test]
    fn image_outside_prompt_is_ignored() {
        let mut t = MessageTranslator::default();
        t.on_binary(&png_frame(Extent::new(2, 2))).unwrap();
        t.on_text(r#"{"type":"execution_start","data":{"prompt_id":"p1"}}"#);
        let msg = t
            .on_text(r#"{"type":"executing","data":{"node":null,"prompt_id":"p1"}}"#)
            .unwrap();
        assert_matches!(msg.event, ClientEvent::Finished(images) if images.is_empty());
    }

    #[test]
    fn garbage_text_is_ignored() {
        let mut t = MessageTranslator::default();
        assert!(t.on_text("{not json").is_none());
    }
}
