use tokio::sync::oneshot;

use crate::{Error, ErrorKind, Response, Result, WaiterCleaner};

/// The waiting half of a pending request.
pub struct Receiver<'a> {
    rx: oneshot::Receiver<Response>,
    cleaner: WaiterCleaner<'a>,
}

impl<'a> Receiver<'a> {
    pub(crate) fn new(rx: oneshot::Receiver<Response>, cleaner: WaiterCleaner<'a>) -> Self {
        Self { rx, cleaner }
    }

    /// # Errors
    ///
    /// Fails if the waiter is dropped before a response arrives.
    pub async fn recv(self) -> Result<Response> {
        // dropping the cleaner after a post is a no-op.
        let Self { rx, cleaner: _cleaner } = self;
        rx.await
            .map_err(|e| Error::new(ErrorKind::NotConnected, e.to_string()))
    }
}
