use tokio::sync::oneshot;

use crate::error::PersistenceError;

#[derive(Debug)]
pub(crate) enum Command {
	ForceReconnect,
	Refresh(oneshot::Sender<Result<usize, PersistenceError>>),
	Shutdown(oneshot::Sender<()>),
}
