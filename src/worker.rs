//! Serialized access to the inference backends.
//!
//! The context is built and used on one dedicated thread; requests queue up on a
//! bounded channel and are answered one at a time, so the backends never see
//! concurrent calls.

use std::panic::{self, AssertUnwindSafe};
use std::sync::mpsc as std_mpsc;
use std::thread;

use tokio::sync::{mpsc, oneshot};
use tracing::{error, info, warn};

use crate::context::CaptionContext;
use crate::error::{CaptionError, LoadError, ModelError};

const QUEUE_DEPTH: usize = 32;

struct Job {
    image: Vec<u8>,
    reply: oneshot::Sender<Result<String, CaptionError>>,
}

#[derive(Clone)]
pub struct InferenceWorker {
    jobs: mpsc::Sender<Job>,
}

impl InferenceWorker {
    /// Starts the worker thread and waits until `factory` has built the context on it.
    pub fn spawn<F>(factory: F) -> Result<Self, LoadError>
    where
        F: FnOnce() -> Result<CaptionContext, LoadError> + Send + 'static,
    {
        let (jobs, mut queue) = mpsc::channel::<Job>(QUEUE_DEPTH);
        let (ready_tx, ready_rx) = std_mpsc::channel();

        thread::Builder::new()
            .name("inference".to_string())
            .spawn(move || {
                let ctx = match factory() {
                    Ok(ctx) => {
                        let _ = ready_tx.send(Ok(()));
                        ctx
                    }
                    Err(err) => {
                        let _ = ready_tx.send(Err(err));
                        return;
                    }
                };

                while let Some(job) = queue.blocking_recv() {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| {
                        ctx.caption_bytes(&job.image)
                    }))
                    .unwrap_or_else(|_| {
                        error!("caption job panicked");
                        Err(ModelError::Backend("inference panicked".to_string()).into())
                    });
                    if job.reply.send(result).is_err() {
                        warn!("caption requester left before the reply");
                    }
                }
                info!("inference worker stopped");
            })
            .map_err(LoadError::WorkerSpawn)?;

        match ready_rx.recv() {
            Ok(Ok(())) => Ok(Self { jobs }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(LoadError::WorkerExited),
        }
    }

    pub async fn caption(&self, image: Vec<u8>) -> Result<String, CaptionError> {
        let (reply, answer) = oneshot::channel();
        self.jobs
            .send(Job { image, reply })
            .await
            .map_err(|_| CaptionError::WorkerUnavailable)?;
        answer.await.map_err(|_| CaptionError::WorkerUnavailable)?
    }
}
