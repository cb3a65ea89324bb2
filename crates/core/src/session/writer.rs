use std::sync::Arc;

use tokio::sync::{mpsc, oneshot};

use super::SessionError;
use crate::store::{FileMapping, NewMapping, SessionStore, StoreError};

/// A mapping write waiting its turn, with the channel to report the result on.
enum MappingRequest {
    /// Record a pending mapping before its file is committed.
    Begin {
        mapping: NewMapping,
        ack: oneshot::Sender<Result<FileMapping, StoreError>>,
    },
    /// Complete or discard a pending mapping.
    Settle {
        mapping_id: i64,
        committed: bool,
        ack: oneshot::Sender<Result<(), StoreError>>,
    },
}

/// Handle for writing mappings.
///
/// Cheaply cloneable. Every write is serialized through the
/// [`MappingWriter`] and acknowledged only once it is durable.
#[derive(Clone)]
pub struct MappingHandle {
    tx: mpsc::Sender<MappingRequest>,
}

impl MappingHandle {
    /// Record the intent to commit a file and wait for it to be written.
    pub async fn begin(&self, mapping: NewMapping) -> Result<FileMapping, SessionError> {
        let (ack, rx) = oneshot::channel();
        self.send(MappingRequest::Begin { mapping, ack }).await?;
        rx.await.map_err(|_| SessionError::WriterClosed)?.map_err(Into::into)
    }

    /// Mark a pending mapping completed once its file is in place.
    pub async fn complete(&self, mapping_id: i64) -> Result<(), SessionError> {
        self.settle(mapping_id, true).await
    }

    /// Drop a pending mapping whose commit did not happen.
    pub async fn discard(&self, mapping_id: i64) -> Result<(), SessionError> {
        self.settle(mapping_id, false).await
    }

    async fn settle(&self, mapping_id: i64, committed: bool) -> Result<(), SessionError> {
        let (ack, rx) = oneshot::channel();
        self.send(MappingRequest::Settle {
            mapping_id,
            committed,
            ack,
        })
        .await?;
        rx.await.map_err(|_| SessionError::WriterClosed)?.map_err(Into::into)
    }

    async fn send(&self, request: MappingRequest) -> Result<(), SessionError> {
        self.tx
            .send(request)
            .await
            .map_err(|_| SessionError::WriterClosed)
    }
}

/// Background task that owns all mapping writes.
pub struct MappingWriter {
    rx: mpsc::Receiver<MappingRequest>,
    store: Arc<dyn SessionStore>,
}

impl MappingWriter {
    /// Consume requests until every handle is dropped.
    ///
    /// Spawn this as a background task.
    pub async fn run(mut self) {
        tracing::debug!("Mapping writer started");

        // The requester may have given up; the write happens regardless.
        while let Some(request) = self.rx.recv().await {
            match request {
                MappingRequest::Begin { mapping, ack } => {
                    let result = self.store.begin_mapping(mapping);
                    if let Err(e) = &result {
                        tracing::error!("Failed to record pending mapping: {}", e);
                    }
                    let _ = ack.send(result);
                }
                MappingRequest::Settle {
                    mapping_id,
                    committed,
                    ack,
                } => {
                    let result = if committed {
                        self.store.complete_mapping(mapping_id)
                    } else {
                        self.store.discard_mapping(mapping_id)
                    };
                    if let Err(e) = &result {
                        tracing::error!("Failed to settle mapping {}: {}", mapping_id, e);
                    }
                    let _ = ack.send(result);
                }
            }
        }

        tracing::debug!("Mapping writer shutting down");
    }
}

/// Create a mapping handle and the writer that serves it.
///
/// Spawn the writer with `tokio::spawn(writer.run())`.
pub fn create_mapping_writer(
    store: Arc<dyn SessionStore>,
    buffer_size: usize,
) -> (MappingHandle, MappingWriter) {
    let (tx, rx) = mpsc::channel(buffer_size);
    (MappingHandle { tx }, MappingWriter { rx, store })
}
