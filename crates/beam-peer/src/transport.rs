//! File transport strategies
//!
//! A [`FileTransport`] moves one whole file to the remote side, either
//! straight over the data channel or by storing it on the relay, which
//! announces it to the room with `file-shared`.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::multipart::{Form, Part};
use tracing::{debug, info};
use url::Url;

use beam_core::{OutgoingTransfer, ReceivedFile, RoomId, TransferError};
use beam_signal::{SharedFile, UploadResponse};

use crate::connection::DataChannel;

/// What a completed send moved
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferSummary {
    pub name: String,
    pub bytes: u64,
    pub chunks: u64,
    pub elapsed: Duration,
    /// Download path on the relay, for stored transfers
    pub location: Option<String>,
}

impl TransferSummary {
    /// Throughput in bytes per second
    pub fn rate(&self) -> f64 {
        let secs = self.elapsed.as_secs_f64();
        if secs > 0.0 {
            self.bytes as f64 / secs
        } else {
            0.0
        }
    }
}

/// Capability to deliver a file to the remote peer
#[async_trait]
pub trait FileTransport: Send + Sync {
    async fn send_file(&self, name: &str, data: Bytes) -> Result<TransferSummary, TransferError>;
}

/// Sends files straight over the peer data channel
pub struct PeerToPeerTransport {
    channel: Arc<dyn DataChannel>,
    chunk_size: usize,
}

impl PeerToPeerTransport {
    pub fn new(channel: Arc<dyn DataChannel>, chunk_size: usize) -> Self {
        Self { channel, chunk_size }
    }
}

#[async_trait]
impl FileTransport for PeerToPeerTransport {
    async fn send_file(&self, name: &str, data: Bytes) -> Result<TransferSummary, TransferError> {
        if !self.channel.is_open() {
            return Err(TransferError::NotConnected);
        }

        let transfer = OutgoingTransfer::new(name, data, self.chunk_size)?;
        let start = Instant::now();
        info!(
            "Sending '{}' ({} bytes in {} chunks)",
            transfer.name(),
            transfer.size(),
            transfer.chunk_count()
        );

        // Metadata is first in the sequence and each send completes before
        // the next begins
        for frame in transfer.frames()? {
            self.channel
                .send(frame)
                .await
                .map_err(|e| TransferError::Channel(e.to_string()))?;
        }
        self.channel
            .flush()
            .await
            .map_err(|e| TransferError::Channel(e.to_string()))?;

        let summary = TransferSummary {
            name: transfer.name().to_string(),
            bytes: transfer.size(),
            chunks: transfer.chunk_count(),
            elapsed: start.elapsed(),
            location: None,
        };
        debug!("Sent '{}' in {:?}", summary.name, summary.elapsed);
        Ok(summary)
    }
}

fn upload_error(e: impl std::fmt::Display) -> TransferError {
    TransferError::Upload(e.to_string())
}

/// Stores files on the relay for everyone in `room`
pub struct UploadTransport {
    client: reqwest::Client,
    base: Url,
    room: RoomId,
}

impl UploadTransport {
    /// `base` is the relay's HTTP root, see [`beam_core::PeerConfig::upload_base`]
    pub fn new(base: Url, room: RoomId) -> Self {
        Self {
            client: reqwest::Client::new(),
            base,
            room,
        }
    }
}

#[async_trait]
impl FileTransport for UploadTransport {
    async fn send_file(&self, name: &str, data: Bytes) -> Result<TransferSummary, TransferError> {
        let url = self.base.join("upload").map_err(upload_error)?;
        let size = data.len() as u64;
        let start = Instant::now();
        info!("Uploading '{}' ({} bytes) to {}", name, size, url);

        let form = Form::new().text("roomId", self.room.as_str().to_string()).part(
            "file",
            Part::stream_with_length(data, size).file_name(name.to_string()),
        );
        let response = self
            .client
            .post(url)
            .multipart(form)
            .send()
            .await
            .map_err(upload_error)?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(TransferError::Upload(format!("relay answered {}: {}", status, body)));
        }
        let receipt: UploadResponse = response.json().await.map_err(upload_error)?;
        debug!("Relay stored '{}' as {}", name, receipt.file.filename);

        Ok(TransferSummary {
            name: name.to_string(),
            bytes: size,
            chunks: 1,
            elapsed: start.elapsed(),
            location: Some(receipt.file.path),
        })
    }
}

/// Fetch a file the relay announced with `file-shared`
pub async fn download_shared(
    base: &Url,
    file: &SharedFile,
    max_bytes: u64,
) -> Result<ReceivedFile, TransferError> {
    let url = base.join(&file.path).map_err(upload_error)?;
    debug!("Downloading '{}' from {}", file.originalname, url);

    let response = reqwest::get(url)
        .await
        .and_then(|r| r.error_for_status())
        .map_err(upload_error)?;
    if let Some(size) = response.content_length().filter(|size| *size > max_bytes) {
        return Err(TransferError::TooLarge { size, max: max_bytes });
    }

    let data = response.bytes().await.map_err(upload_error)?;
    if data.len() as u64 > max_bytes {
        return Err(TransferError::TooLarge {
            size: data.len() as u64,
            max: max_bytes,
        });
    }
    Ok(ReceivedFile {
        name: file.originalname.clone(),
        data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;

    use beam_core::{ControlFrame, Frame, ReceiveOutcome, TransferReceiver};

    use crate::connection::ConnectionError;

    /// Records every frame; optionally fails after `fail_after` frames
    struct RecordingChannel {
        frames: Mutex<Vec<Frame>>,
        open: AtomicBool,
        fail_after: Option<usize>,
    }

    impl RecordingChannel {
        fn new(fail_after: Option<usize>) -> Arc<Self> {
            Arc::new(Self {
                frames: Mutex::new(Vec::new()),
                open: AtomicBool::new(true),
                fail_after,
            })
        }

        fn frames(&self) -> Vec<Frame> {
            self.frames.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl DataChannel for RecordingChannel {
        async fn send(&self, frame: Frame) -> Result<(), ConnectionError> {
            let mut frames = self.frames.lock().unwrap();
            if Some(frames.len()) == self.fail_after {
                return Err(ConnectionError::Closed);
            }
            frames.push(frame);
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::SeqCst)
        }
    }

    fn sample(len: usize) -> Bytes {
        (0..len).map(|i| (i * 7 % 256) as u8).collect::<Vec<u8>>().into()
    }

    #[tokio::test]
    async fn test_send_forty_kib() {
        let channel = RecordingChannel::new(None);
        let transport = PeerToPeerTransport::new(channel.clone(), 16 * 1024);

        let summary = transport.send_file("report.pdf", sample(40 * 1024)).await.unwrap();
        assert_eq!(summary.bytes, 40960);
        assert_eq!(summary.chunks, 3);

        let frames = channel.frames();
        assert_eq!(frames.len(), 4);
        match &frames[0] {
            Frame::Text(text) => assert_eq!(
                ControlFrame::from_json(text).unwrap(),
                ControlFrame::Metadata {
                    name: "report.pdf".into(),
                    size: 40960
                }
            ),
            other => panic!("expected metadata first, got {:?}", other),
        }
        let sizes: Vec<usize> = frames[1..].iter().map(|f| f.len()).collect();
        assert_eq!(sizes, vec![16384, 16384, 8192]);
    }

    #[tokio::test]
    async fn test_frames_reassemble_on_receiver() {
        let channel = RecordingChannel::new(None);
        let transport = PeerToPeerTransport::new(channel.clone(), 1000);
        let data = sample(4321);

        transport.send_file("notes.txt", data.clone()).await.unwrap();

        let mut receiver = TransferReceiver::new(u64::MAX);
        let mut completed = None;
        for frame in channel.frames() {
            if let ReceiveOutcome::Completed(file) = receiver.on_frame(frame) {
                completed = Some(file);
            }
        }
        let file = completed.expect("transfer should complete");
        assert_eq!(file.name, "notes.txt");
        assert_eq!(file.data, data);
    }

    #[tokio::test]
    async fn test_empty_file_is_metadata_only() {
        let channel = RecordingChannel::new(None);
        let transport = PeerToPeerTransport::new(channel.clone(), 16 * 1024);

        let summary = transport.send_file("empty.txt", Bytes::new()).await.unwrap();
        assert_eq!(summary.chunks, 0);
        assert_eq!(channel.frames().len(), 1);
    }

    #[tokio::test]
    async fn test_closed_channel() {
        let channel = RecordingChannel::new(None);
        channel.open.store(false, Ordering::SeqCst);
        let transport = PeerToPeerTransport::new(channel.clone(), 16 * 1024);

        let result = transport.send_file("a.txt", sample(10)).await;
        assert_eq!(result, Err(TransferError::NotConnected));
        assert!(channel.frames().is_empty());
    }

    #[tokio::test]
    async fn test_send_failure_mid_transfer() {
        let channel = RecordingChannel::new(Some(2));
        let transport = PeerToPeerTransport::new(channel.clone(), 16 * 1024);

        let result = transport.send_file("a.bin", sample(40 * 1024)).await;
        assert!(matches!(result, Err(TransferError::Channel(_))));
        assert_eq!(channel.frames().len(), 2);
    }

    #[tokio::test]
    async fn test_invalid_chunk_size() {
        let channel = RecordingChannel::new(None);
        let transport = PeerToPeerTransport::new(channel.clone(), 0);

        let result = transport.send_file("a.bin", sample(10)).await;
        assert!(matches!(result, Err(TransferError::Protocol(_))));
    }
}
