use rollcall_core::{
    AttendanceService, FaceEmbedder, ImageResolver, RecognizeOutcome, ResolutionError,
    ServiceError, ServiceStatus, StorageLayout, TrainSummary,
};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error("model load failed: {0}")]
    Models(#[from] rollcall_vision::LoadError),
    #[error("image resolver: {0}")]
    Resolver(#[from] ResolutionError),
    #[error(transparent)]
    Service(#[from] ServiceError),
    #[error("cannot spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Capabilities the engine thread builds for itself at startup.
pub type Capabilities = (Box<dyn FaceEmbedder>, Box<dyn ImageResolver>);

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Train {
        roster: Vec<u8>,
        filename: Option<String>,
        reply: oneshot::Sender<Result<TrainSummary, ServiceError>>,
    },
    Recognize {
        image: Vec<u8>,
        filename: Option<String>,
        reply: oneshot::Sender<Result<RecognizeOutcome, ServiceError>>,
    },
    ViewAttendance {
        reply: oneshot::Sender<Result<Vec<u8>, ServiceError>>,
    },
    Status {
        reply: oneshot::Sender<ServiceStatus>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
}

impl EngineHandle {
    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<T>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        reply_rx.await.map_err(|_| EngineError::ChannelClosed)
    }

    /// Rebuild the gallery from a roster workbook.
    pub async fn train(&self, roster: Vec<u8>, filename: Option<String>) -> Result<TrainSummary, EngineError> {
        Ok(self
            .call(|reply| EngineRequest::Train {
                roster,
                filename,
                reply,
            })
            .await??)
    }

    /// Recognize a snapshot and rewrite the ledger.
    pub async fn recognize(&self, image: Vec<u8>, filename: Option<String>) -> Result<RecognizeOutcome, EngineError> {
        Ok(self
            .call(|reply| EngineRequest::Recognize {
                image,
                filename,
                reply,
            })
            .await??)
    }

    pub async fn view_attendance(&self) -> Result<Vec<u8>, EngineError> {
        Ok(self.call(|reply| EngineRequest::ViewAttendance { reply }).await??)
    }

    pub async fn status(&self) -> Result<ServiceStatus, EngineError> {
        self.call(|reply| EngineRequest::Status { reply }).await
    }
}

/// Spawn the engine on a dedicated OS thread.
///
/// `capabilities` runs on that thread, so blocking clients and model sessions
/// are created and dropped outside the async runtime. Startup is fail-fast:
/// this resolves only after the service is open, or with the reason it could
/// not be. Waiting for readiness does not block the runtime.
pub async fn spawn_engine<F>(layout: StorageLayout, tolerance: f32, capabilities: F) -> Result<EngineHandle, EngineError>
where
    F: FnOnce() -> Result<Capabilities, EngineError> + Send + 'static,
{
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(4);
    let (ready_tx, ready_rx) = oneshot::channel::<Result<(), EngineError>>();

    std::thread::Builder::new()
        .name("rollcall-engine".into())
        .spawn(move || {
            let opened = capabilities().and_then(|(embedder, resolver)| {
                Ok(AttendanceService::open(layout, tolerance, embedder, resolver)?)
            });
            let mut service = match opened {
                Ok(service) => {
                    let _ = ready_tx.send(Ok(()));
                    service
                }
                Err(e) => {
                    let _ = ready_tx.send(Err(e));
                    return;
                }
            };

            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Train {
                        roster,
                        filename,
                        reply,
                    } => {
                        let result = service.train(&roster, filename.as_deref());
                        match &result {
                            Ok(summary) => tracing::info!(
                                rows = summary.rows,
                                enrolled = summary.enrolled,
                                skipped = summary.skipped.len(),
                                "training complete"
                            ),
                            Err(e) => tracing::warn!(error = %e, "training rejected"),
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::Recognize {
                        image,
                        filename,
                        reply,
                    } => {
                        let result = service.recognize(&image, filename.as_deref());
                        if let Err(e) = &result {
                            tracing::warn!(error = %e, "recognition rejected");
                        }
                        let _ = reply.send(result);
                    }
                    EngineRequest::ViewAttendance { reply } => {
                        let _ = reply.send(service.view_attendance());
                    }
                    EngineRequest::Status { reply } => {
                        let _ = reply.send(service.status());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    ready_rx.await.map_err(|_| EngineError::ChannelClosed)??;
    Ok(EngineHandle { tx })
}
