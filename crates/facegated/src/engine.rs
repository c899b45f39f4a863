use facegate_core::{FaceGate, FaceGateError, FaceRecord, FaceSummary, LoginOutcome, MatcherConfig};
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};

#[derive(Error, Debug)]
pub enum EngineError {
    #[error(transparent)]
    Gate(#[from] FaceGateError),
    #[error("failed to spawn engine thread: {0}")]
    Spawn(#[source] std::io::Error),
    #[error("engine thread exited")]
    ChannelClosed,
}

/// Messages sent from HTTP handlers to the engine thread.
enum EngineRequest {
    Register {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<FaceRecord, FaceGateError>>,
    },
    Login {
        image: Vec<u8>,
        reply: oneshot::Sender<Result<LoginOutcome, FaceGateError>>,
    },
    ListFaces {
        reply: oneshot::Sender<Result<Vec<FaceSummary>, FaceGateError>>,
    },
    GallerySize {
        reply: oneshot::Sender<Result<usize, FaceGateError>>,
    },
}

/// Clone-safe handle to the engine thread.
#[derive(Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<EngineRequest>,
    matcher: MatcherConfig,
}

impl EngineHandle {
    /// Register the face in an encoded photo.
    pub async fn register(&self, image: Vec<u8>) -> Result<FaceRecord, EngineError> {
        self.call(|reply| EngineRequest::Register { image, reply }).await
    }

    /// Identify the face in an encoded photo.
    pub async fn login(&self, image: Vec<u8>) -> Result<LoginOutcome, EngineError> {
        self.call(|reply| EngineRequest::Login { image, reply }).await
    }

    pub async fn list_faces(&self) -> Result<Vec<FaceSummary>, EngineError> {
        self.call(|reply| EngineRequest::ListFaces { reply }).await
    }

    pub async fn gallery_size(&self) -> Result<usize, EngineError> {
        self.call(|reply| EngineRequest::GallerySize { reply }).await
    }

    pub fn matcher_config(&self) -> MatcherConfig {
        self.matcher
    }

    async fn call<T>(
        &self,
        request: impl FnOnce(oneshot::Sender<Result<T, FaceGateError>>) -> EngineRequest,
    ) -> Result<T, EngineError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(request(reply_tx))
            .await
            .map_err(|_| EngineError::ChannelClosed)?;
        let result = reply_rx.await.map_err(|_| EngineError::ChannelClosed)?;
        Ok(result?)
    }
}

/// Move the gate onto a dedicated OS thread and serve requests one at a time.
///
/// Inference and SQLite calls block, so they never run on the async runtime.
pub fn spawn_engine(gate: FaceGate, queue_depth: usize) -> Result<EngineHandle, EngineError> {
    let matcher = *gate.matcher_config();
    let (tx, mut rx) = mpsc::channel::<EngineRequest>(queue_depth.max(1));

    std::thread::Builder::new()
        .name("facegate-engine".into())
        .spawn(move || {
            tracing::info!("engine thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    EngineRequest::Register { image, reply } => {
                        let _ = reply.send(gate.register(&image));
                    }
                    EngineRequest::Login { image, reply } => {
                        let _ = reply.send(gate.login(&image));
                    }
                    EngineRequest::ListFaces { reply } => {
                        let _ = reply.send(gate.faces());
                    }
                    EngineRequest::GallerySize { reply } => {
                        let _ = reply.send(gate.gallery_size());
                    }
                }
            }
            tracing::info!("engine thread exiting");
        })
        .map_err(EngineError::Spawn)?;

    Ok(EngineHandle { tx, matcher })
}
