use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::debug;

use super::{Engine, EngineError};
use crate::command::{Command, Outcome};

type Reply = oneshot::Sender<Result<Outcome, EngineError>>;

/// Commands waiting for the engine task before senders are pushed back.
const QUEUE_SIZE: usize = 64;

#[derive(Debug, Error)]
pub enum HandleError {
    #[error(transparent)]
    Engine(#[from] EngineError),
    #[error("engine task has stopped")]
    Closed,
}

/// Cloneable sender side of an engine running on its own task.
///
/// Every command goes through one channel and is applied in arrival order,
/// so concurrent callers never interleave inside an operation.
#[derive(Debug, Clone)]
pub struct EngineHandle {
    tx: mpsc::Sender<(Command, Reply)>,
}

impl EngineHandle {
    /// Move `engine` onto a tokio task. The task ends, returning the engine,
    /// once every handle is dropped.
    pub fn spawn(engine: Engine) -> (Self, JoinHandle<Engine>) {
        let (tx, rx) = mpsc::channel(QUEUE_SIZE);
        let task = tokio::spawn(serve(engine, rx));
        (Self { tx }, task)
    }

    pub async fn execute(&self, command: Command) -> Result<Outcome, HandleError> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send((command, reply))
            .await
            .map_err(|_| HandleError::Closed)?;
        let result = response.await.map_err(|_| HandleError::Closed)?;
        Ok(result?)
    }
}

async fn serve(mut engine: Engine, mut rx: mpsc::Receiver<(Command, Reply)>) -> Engine {
    while let Some((command, reply)) = rx.recv().await {
        let result = engine.apply(command);
        if reply.send(result).is_err() {
            debug!("caller went away before the reply");
        }
    }
    engine
}
