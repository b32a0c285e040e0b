//! Central state-update pipeline: the single serialization point through
//! which every new root is produced and programmed.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, oneshot, watch};
use tracing::{debug, warn};

use super::SwitchState;

#[derive(Debug, Error)]
pub enum UpdateError {
    #[error("hardware programming failed: {0}")]
    Programming(String),
    #[error("state update pipeline closed")]
    PipelineClosed,
}

/// Programs a freshly computed root into hardware. Called on the pipeline
/// worker with updates already serialized; a failure leaves the published
/// root untouched.
pub trait HwProgrammer: Send + Sync {
    fn program(&self, old: &SwitchState, new: &SwitchState) -> Result<(), UpdateError>;
}

impl<F> HwProgrammer for F
where
    F: Fn(&SwitchState, &SwitchState) -> Result<(), UpdateError> + Send + Sync,
{
    fn program(&self, old: &SwitchState, new: &SwitchState) -> Result<(), UpdateError> {
        (self)(old, new)
    }
}

/// Accepts every root unconditionally.
pub struct NullProgrammer;

impl HwProgrammer for NullProgrammer {
    fn program(&self, _old: &SwitchState, _new: &SwitchState) -> Result<(), UpdateError> {
        Ok(())
    }
}

type Transform = Box<dyn FnOnce(&SwitchState) -> Option<SwitchState> + Send>;

struct UpdateRequest {
    name: String,
    transform: Transform,
    done: oneshot::Sender<Result<Arc<SwitchState>, UpdateError>>,
}

/// Cloneable handle onto the pipeline worker.
#[derive(Clone)]
pub struct StateUpdater {
    tx: mpsc::UnboundedSender<UpdateRequest>,
    state_rx: watch::Receiver<Arc<SwitchState>>,
}

impl StateUpdater {
    /// Spawns the pipeline worker. Must be called within a tokio runtime.
    pub fn spawn(programmer: Arc<dyn HwProgrammer>) -> Self {
        let (tx, mut rx) = mpsc::unbounded_channel::<UpdateRequest>();
        let (state_tx, state_rx) = watch::channel(Arc::new(SwitchState::new()));
        tokio::spawn(async move {
            let mut current = Arc::new(SwitchState::new());
            while let Some(req) = rx.recv().await {
                let reply = match (req.transform)(&current) {
                    None => {
                        debug!(update = %req.name, "no-op state update");
                        Ok(Arc::clone(&current))
                    }
                    Some(next) => {
                        let next = Arc::new(next);
                        match programmer.program(&current, &next) {
                            Ok(()) => {
                                current = Arc::clone(&next);
                                let _ = state_tx.send(Arc::clone(&current));
                                debug!(update = %req.name, "state update applied");
                                Ok(next)
                            }
                            Err(err) => {
                                warn!(update = %req.name, error = %err, "state update rejected");
                                Err(err)
                            }
                        }
                    }
                };
                let _ = req.done.send(reply);
            }
        });
        Self { tx, state_rx }
    }

    /// Submits one transaction. The transform must be pure: it sees the
    /// current root and either returns the next root or `None` for "nothing
    /// to change". Resolves once the pipeline has sequenced and programmed
    /// the transaction.
    pub async fn submit(
        &self,
        name: impl Into<String>,
        transform: impl FnOnce(&SwitchState) -> Option<SwitchState> + Send + 'static,
    ) -> Result<Arc<SwitchState>, UpdateError> {
        let (done, done_rx) = oneshot::channel();
        let req = UpdateRequest {
            name: name.into(),
            transform: Box::new(transform),
            done,
        };
        self.tx
            .send(req)
            .map_err(|_| UpdateError::PipelineClosed)?;
        done_rx.await.map_err(|_| UpdateError::PipelineClosed)?
    }

    /// The most recently programmed root.
    pub fn state(&self) -> Arc<SwitchState> {
        self.state_rx.borrow().clone()
    }

    pub fn watch(&self) -> watch::Receiver<Arc<SwitchState>> {
        self.state_rx.clone()
    }
}
