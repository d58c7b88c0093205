//! Transfer accounting on both ends of a channel
//!
//! - [`OutgoingTransfer`] turns a file into the frame sequence to send
//! - [`IncomingTransfer`] accumulates chunks for one announced file
//! - [`TransferReceiver`] routes raw channel frames into the accumulator and
//!   reports what happened

use bytes::Bytes;
use tracing::{debug, info, warn};

use crate::error::{ProtocolError, TransferError};
use crate::frame::{chunk_count, reassemble, split_chunks, validate_chunk_size, ControlFrame, Frame};

/// A fully reassembled file
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceivedFile {
    pub name: String,
    pub data: Bytes,
}

/// A file queued for sending
#[derive(Clone, Debug)]
pub struct OutgoingTransfer {
    name: String,
    data: Bytes,
    chunk_size: usize,
}

impl OutgoingTransfer {
    pub fn new(
        name: impl Into<String>,
        data: Bytes,
        chunk_size: usize,
    ) -> Result<Self, ProtocolError> {
        validate_chunk_size(chunk_size)?;
        Ok(Self {
            name: name.into(),
            data,
            chunk_size,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn size(&self) -> u64 {
        self.data.len() as u64
    }

    /// Number of data frames that follow the metadata frame
    pub fn chunk_count(&self) -> u64 {
        chunk_count(self.size(), self.chunk_size)
    }

    pub fn metadata(&self) -> ControlFrame {
        ControlFrame::Metadata {
            name: self.name.clone(),
            size: self.size(),
        }
    }

    /// The metadata text frame followed by every data frame, in send order
    pub fn frames(&self) -> Result<impl Iterator<Item = Frame>, ProtocolError> {
        let header = Frame::control(&self.metadata())?;
        let chunks = split_chunks(self.data.clone(), self.chunk_size).map(Frame::Binary);
        Ok(std::iter::once(header).chain(chunks))
    }
}

/// Accumulator for one announced file
#[derive(Debug)]
pub struct IncomingTransfer {
    name: String,
    declared: u64,
    received: u64,
    chunks: Vec<Bytes>,
}

impl IncomingTransfer {
    pub fn new(name: impl Into<String>, declared: u64) -> Self {
        Self {
            name: name.into(),
            declared,
            received: 0,
            chunks: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn declared(&self) -> u64 {
        self.declared
    }

    pub fn received(&self) -> u64 {
        self.received
    }

    pub fn is_complete(&self) -> bool {
        self.received == self.declared
    }

    /// Append a chunk in arrival order
    ///
    /// A chunk that would take the count past the declared size is refused and
    /// leaves the accumulator untouched.
    pub fn push(&mut self, chunk: Bytes) -> Result<(), TransferError> {
        let received = self.received + chunk.len() as u64;
        if received > self.declared {
            return Err(TransferError::Overflow {
                declared: self.declared,
                received,
            });
        }
        self.received = received;
        self.chunks.push(chunk);
        Ok(())
    }

    /// Concatenate the chunks into the finished file
    pub fn finish(self) -> Result<ReceivedFile, TransferError> {
        if !self.is_complete() {
            return Err(TransferError::Incomplete {
                declared: self.declared,
                received: self.received,
            });
        }
        Ok(ReceivedFile {
            name: self.name,
            data: reassemble(self.chunks),
        })
    }
}

/// What a single inbound frame did to the receiver
#[derive(Debug, PartialEq, Eq)]
pub enum ReceiveOutcome {
    /// A metadata frame opened a new transfer
    Started { name: String, size: u64 },
    /// A chunk was accepted; the transfer is still open
    Progress { received: u64, total: u64 },
    /// The transfer reached its declared size
    Completed(ReceivedFile),
    /// The current transfer was dropped
    Failed(TransferError),
    /// The frame was logged and dropped without affecting any transfer
    Ignored,
}

/// Receiving side of the chunked transfer protocol
///
/// Tracks at most one incoming transfer. A new metadata frame replaces
/// whatever was in flight.
#[derive(Debug)]
pub struct TransferReceiver {
    current: Option<IncomingTransfer>,
    max_size: u64,
}

impl TransferReceiver {
    pub fn new(max_size: u64) -> Self {
        Self {
            current: None,
            max_size,
        }
    }

    /// The transfer in progress, if any
    pub fn current(&self) -> Option<&IncomingTransfer> {
        self.current.as_ref()
    }

    /// Feed one frame from the channel
    pub fn on_frame(&mut self, frame: Frame) -> ReceiveOutcome {
        match frame {
            Frame::Text(text) => self.on_control(&text),
            Frame::Binary(data) => self.on_data(data),
        }
    }

    /// Drop the transfer in progress because the channel went away
    pub fn abandon(&mut self) -> Option<TransferError> {
        self.current.take().map(|transfer| {
            warn!(
                "Discarding partial transfer '{}' ({} of {} bytes)",
                transfer.name, transfer.received, transfer.declared
            );
            TransferError::Interrupted {
                declared: transfer.declared,
                received: transfer.received,
            }
        })
    }

    fn on_control(&mut self, text: &str) -> ReceiveOutcome {
        let control = match ControlFrame::from_json(text) {
            Ok(c) => c,
            Err(e) => {
                warn!("Ignoring unreadable control frame: {}", e);
                return ReceiveOutcome::Ignored;
            }
        };

        match control {
            ControlFrame::Metadata { name, size } => {
                if let Some(previous) = self.current.take() {
                    warn!(
                        "Metadata for '{}' replaces unfinished transfer '{}' ({} of {} bytes)",
                        name, previous.name, previous.received, previous.declared
                    );
                }

                if size > self.max_size {
                    warn!("Refusing '{}': {} bytes exceeds {} byte limit", name, size, self.max_size);
                    return ReceiveOutcome::Failed(TransferError::TooLarge {
                        size,
                        max: self.max_size,
                    });
                }

                info!("Receiving '{}' ({} bytes)", name, size);
                let transfer = IncomingTransfer::new(name, size);
                if transfer.is_complete() {
                    return self.complete(transfer);
                }

                let outcome = ReceiveOutcome::Started {
                    name: transfer.name.clone(),
                    size,
                };
                self.current = Some(transfer);
                outcome
            }
        }
    }

    fn on_data(&mut self, data: Bytes) -> ReceiveOutcome {
        let Some(transfer) = self.current.as_mut() else {
            warn!("Discarding {} byte data frame with no transfer in progress", data.len());
            return ReceiveOutcome::Ignored;
        };

        if let Err(e) = transfer.push(data) {
            warn!("Dropping transfer '{}': {}", transfer.name, e);
            self.current = None;
            return ReceiveOutcome::Failed(e);
        }

        debug!("'{}': {} / {} bytes", transfer.name, transfer.received, transfer.declared);

        if transfer.is_complete() {
            let Some(transfer) = self.current.take() else {
                return ReceiveOutcome::Ignored;
            };
            return self.complete(transfer);
        }

        ReceiveOutcome::Progress {
            received: transfer.received,
            total: transfer.declared,
        }
    }

    fn complete(&mut self, transfer: IncomingTransfer) -> ReceiveOutcome {
        match transfer.finish() {
            Ok(file) => {
                info!("Received '{}' ({} bytes)", file.name, file.data.len());
                ReceiveOutcome::Completed(file)
            }
            Err(e) => ReceiveOutcome::Failed(e),
        }
    }
}
