use foundation::math::LocalOrigin;
use thiserror::Error;
use tokio::sync::mpsc;
use tracing::warn;

use crate::packer::PackedBuffer;

/// One `setData` delivery to the renderer side. The buffer is moved, never copied.
#[derive(Debug, Clone, PartialEq)]
pub struct PackedBufferHandoff {
    pub data: PackedBuffer,
    /// Written slots in `data`.
    pub buffer_length: usize,
    pub local_origin: LocalOrigin,
}

impl From<PackedBuffer> for PackedBufferHandoff {
    fn from(data: PackedBuffer) -> Self {
        Self {
            buffer_length: data.buffer_length(),
            local_origin: data.local_origin(),
            data,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("packed buffer consumer has gone away")]
pub struct SinkClosed;

/// Receives every freshly packed buffer.
pub trait BufferSink: Send + 'static {
    fn set_data(&mut self, handoff: PackedBufferHandoff) -> Result<(), SinkClosed>;
}

impl BufferSink for mpsc::UnboundedSender<PackedBufferHandoff> {
    fn set_data(&mut self, handoff: PackedBufferHandoff) -> Result<(), SinkClosed> {
        self.send(handoff).map_err(|_| SinkClosed)
    }
}

/// Bounded consumer: a full queue drops the new pack; the next one replaces it anyway.
impl BufferSink for mpsc::Sender<PackedBufferHandoff> {
    fn set_data(&mut self, handoff: PackedBufferHandoff) -> Result<(), SinkClosed> {
        match self.try_send(handoff) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(dropped)) => {
                warn!(
                    "buffer consumer is busy, dropping pack of {} slots",
                    dropped.buffer_length
                );
                Ok(())
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(SinkClosed),
        }
    }
}

/// Sink for callers that query the layer but never render; packs are dropped.
#[derive(Debug, Clone, Copy, Default)]
pub struct DiscardPacks;

impl BufferSink for DiscardPacks {
    fn set_data(&mut self, _handoff: PackedBufferHandoff) -> Result<(), SinkClosed> {
        Ok(())
    }
}
