//! Background task owning a [`RateController`].
//!
//! Callers on any task talk to the controller through a cloneable
//! [`ControllerHandle`]. Requests are queued on one channel and executed one
//! at a time in arrival order, each with its own reply channel. A request
//! that has started always runs to completion, even when the caller stops
//! waiting for the reply.

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::controller::{RateController, ResetReport};
use crate::error::{ControllerError, UpdateError};
use crate::link::CommandSink;
use crate::state::PersistedState;
use crate::submissions::SubmissionRecord;
use crate::transaction::RateUpdate;
use crate::types::ChannelCode;

const QUEUE_DEPTH: usize = 64;

enum Request<S: CommandSink> {
    Connect {
        reply: oneshot::Sender<Result<(), ControllerError>>,
    },
    SetRate {
        code: ChannelCode,
        rate: String,
        reply: oneshot::Sender<Result<RateUpdate, UpdateError>>,
    },
    FullValue {
        code: ChannelCode,
        reply: oneshot::Sender<Option<String>>,
    },
    Snapshot {
        reply: oneshot::Sender<PersistedState>,
    },
    Reset {
        reply: oneshot::Sender<Result<ResetReport, ControllerError>>,
    },
    Submit {
        raw_input: String,
        reply: oneshot::Sender<SubmissionRecord>,
    },
    Submissions {
        reply: oneshot::Sender<Vec<SubmissionRecord>>,
    },
    Status {
        reply: oneshot::Sender<Vec<String>>,
    },
    Shutdown {
        reply: oneshot::Sender<RateController<S>>,
    },
}

/// Cloneable front end of the controller task
pub struct ControllerHandle<S: CommandSink> {
    tx: mpsc::Sender<Request<S>>,
}

impl<S: CommandSink> Clone for ControllerHandle<S> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
        }
    }
}

impl<S> ControllerHandle<S>
where
    S: CommandSink + Send + 'static,
{
    /// Move the controller into its own task
    pub fn spawn(controller: RateController<S>) -> (Self, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        let task = tokio::spawn(run(controller, rx));
        (Self { tx }, task)
    }

    async fn call<T>(
        &self,
        make: impl FnOnce(oneshot::Sender<T>) -> Request<S>,
    ) -> Result<T, ControllerError> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(make(reply))
            .await
            .map_err(|_| ControllerError::WorkerStopped)?;
        rx.await.map_err(|_| ControllerError::WorkerStopped)
    }

    /// Open the link ahead of the first update
    pub async fn connect(&self) -> Result<(), ControllerError> {
        self.call(|reply| Request::Connect { reply }).await?
    }

    pub async fn set_rate(
        &self,
        code: ChannelCode,
        rate: impl Into<String>,
    ) -> Result<RateUpdate, ControllerError> {
        let rate = rate.into();
        Ok(self
            .call(|reply| Request::SetRate { code, rate, reply })
            .await??)
    }

    pub async fn get_full_value(&self, code: ChannelCode) -> Result<Option<String>, ControllerError> {
        self.call(|reply| Request::FullValue { code, reply }).await
    }

    pub async fn get_state_snapshot(&self) -> Result<PersistedState, ControllerError> {
        self.call(|reply| Request::Snapshot { reply }).await
    }

    pub async fn reset_all(&self) -> Result<ResetReport, ControllerError> {
        self.call(|reply| Request::Reset { reply }).await?
    }

    pub async fn submit(&self, raw_input: impl Into<String>) -> Result<SubmissionRecord, ControllerError> {
        let raw_input = raw_input.into();
        self.call(|reply| Request::Submit { raw_input, reply }).await
    }

    pub async fn submissions(&self) -> Result<Vec<SubmissionRecord>, ControllerError> {
        self.call(|reply| Request::Submissions { reply }).await
    }

    pub async fn status_lines(&self) -> Result<Vec<String>, ControllerError> {
        self.call(|reply| Request::Status { reply }).await
    }

    /// Finish everything queued before this call, close the link and hand
    /// the controller back. Later requests from other handles fail with
    /// [`ControllerError::WorkerStopped`].
    pub async fn shutdown(self) -> Result<RateController<S>, ControllerError> {
        self.call(|reply| Request::Shutdown { reply }).await
    }
}

async fn run<S: CommandSink>(mut controller: RateController<S>, mut rx: mpsc::Receiver<Request<S>>) {
    info!("Worker: Started");

    while let Some(request) = rx.recv().await {
        // a caller that stopped waiting drops its receiver; the work still happens
        match request {
            Request::Connect { reply } => {
                let _ = reply.send(controller.connect().await);
            }
            Request::SetRate { code, rate, reply } => {
                let result = controller.set_rate(code, &rate).await;
                let _ = reply.send(result);
            }
            Request::FullValue { code, reply } => {
                let _ = reply.send(controller.get_full_value(code));
            }
            Request::Snapshot { reply } => {
                let _ = reply.send(controller.get_state_snapshot());
            }
            Request::Reset { reply } => {
                let result = controller.reset_all().await;
                let _ = reply.send(result);
            }
            Request::Submit { raw_input, reply } => {
                let record = controller.submit(&raw_input).await;
                let _ = reply.send(record);
            }
            Request::Submissions { reply } => {
                let _ = reply.send(controller.submissions().to_vec());
            }
            Request::Status { reply } => {
                let _ = reply.send(controller.status_lines());
            }
            Request::Shutdown { reply } => {
                rx.close();
                controller.shutdown().await;
                info!("Worker: Stopped on request");
                if reply.send(controller).is_err() {
                    debug!("Worker: Shutdown caller went away");
                }
                return;
            }
        }
    }

    controller.shutdown().await;
    info!("Worker: All handles dropped, stopped");
}
