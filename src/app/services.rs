use std::future::Future;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc, oneshot, watch};

use crate::adapters::authority::AuthorityError;
use crate::app::controller::{ControllerError, FillAction, FillView, Notification};
use crate::domain::sequencer::SequencerError;

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Rejected(SequencerError),
    #[error("remote authority call failed: {0}")]
    Remote(AuthorityError),
    #[error("fill controller is not running")]
    Unavailable,
}

impl From<ControllerError> for ServiceError {
    fn from(error: ControllerError) -> Self {
        match error {
            ControllerError::Sequencer(error) => Self::Rejected(error),
            ControllerError::Authority(error) => Self::Remote(error),
        }
    }
}

pub trait FillCommandHandler {
    fn execute(&self, action: FillAction) -> impl Future<Output = Result<FillView, ServiceError>>;
    fn current_view(&self) -> FillView;
}

/// Messages accepted by the controller event loop.
#[derive(Debug)]
pub enum Command {
    Apply {
        action: FillAction,
        reply: oneshot::Sender<Result<FillView, ControllerError>>,
    },
    Shutdown,
}

/// Cloneable entry point to a running controller loop.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    commands: mpsc::Sender<Command>,
    view: watch::Receiver<FillView>,
    notifications: broadcast::Sender<Notification>,
}

impl ControllerHandle {
    pub fn new(
        commands: mpsc::Sender<Command>,
        view: watch::Receiver<FillView>,
        notifications: broadcast::Sender<Notification>,
    ) -> Self {
        Self {
            commands,
            view,
            notifications,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.notifications.subscribe()
    }

    /// Asks the loop to stop; a loop that is already gone is fine.
    pub fn shutdown(&self) {
        if self.commands.try_send(Command::Shutdown).is_err() {
            tracing::debug!("controller loop already stopped or busy");
        }
    }
}

impl FillCommandHandler for ControllerHandle {
    async fn execute(&self, action: FillAction) -> Result<FillView, ServiceError> {
        let (reply, response) = oneshot::channel();
        self.commands
            .send(Command::Apply { action, reply })
            .await
            .map_err(|_| ServiceError::Unavailable)?;

        let result = response.await.map_err(|_| ServiceError::Unavailable)?;
        result.map_err(ServiceError::from)
    }

    fn current_view(&self) -> FillView {
        self.view.borrow().clone()
    }
}
