use foldhash::fast::RandomState;
use tokio::sync::oneshot;

use crate::{Id, Receiver, Response};

/// Pending requests of one client, keyed by request id.
///
/// A response is delivered to the caller that registered its id and the
/// entry is consumed. Responses for unknown ids (timed out, never sent, or
/// duplicated) are dropped.
///
/// Ids are issued by the client's [`crate::IdGenerator`]; the waiter only
/// matches them, so correlation never depends on arrival order.
///
/// # Examples
///
/// ```rust
/// # use wirecall::{Id, Response, Waiter};
/// # #[tokio::main]
/// # async fn main() {
/// let waiter = Waiter::default();
/// let receiver = waiter.alloc(Id::Num(1));
/// waiter.post(Response::success(Id::Num(1), serde_json::json!("pong")));
/// let rsp = receiver.recv().await.unwrap();
/// assert_eq!(rsp.result, Some(serde_json::json!("pong")));
/// assert!(waiter.is_empty());
/// # }
/// ```
#[derive(Default)]
pub struct Waiter {
    /// Response channel per pending request id.
    id_map: dashmap::DashMap<Id, oneshot::Sender<Response>, RandomState>,
}

/// RAII guard that removes a pending entry when the waiting side gives up.
///
/// Dropping it after the response was posted is a no-op, so a timed-out
/// caller and a late response never race into a stale entry.
pub struct WaiterCleaner<'a> {
    waiter: &'a Waiter,
    id: Id,
}

impl Drop for WaiterCleaner<'_> {
    fn drop(&mut self) {
        self.waiter.remove(&self.id);
    }
}

impl Waiter {
    /// Registers `id` as pending.
    ///
    /// The entry lives until a response is posted for it or the returned
    /// receiver is dropped. Registering an id that is already pending
    /// replaces the older entry and logs a warning.
    ///
    /// # Arguments
    ///
    /// * `id` - The request id the response will carry
    ///
    /// # Returns
    ///
    /// Returns a [`Receiver`] that resolves with the matching response.
    pub fn alloc(&self, id: Id) -> Receiver<'_> {
        let (tx, rx) = oneshot::channel();
        if self.id_map.insert(id.clone(), tx).is_some() {
            tracing::warn!("request id {id} was already pending");
        }
        Receiver::new(rx, WaiterCleaner { waiter: self, id })
    }

    /// Delivers a response to the caller waiting for its id.
    ///
    /// A response nobody waits for, e.g. one that arrived after its caller
    /// timed out, is dropped with a debug log.
    ///
    /// # Arguments
    ///
    /// * `rsp` - The decoded response
    pub fn post(&self, rsp: Response) {
        if let Some((_, tx)) = self.id_map.remove(&rsp.id) {
            let _ = tx.send(rsp);
        } else {
            tracing::debug!("drop response for unknown request id {}", rsp.id);
        }
    }

    /// Checks whether `id` is still waiting for a response.
    #[must_use]
    pub fn contains(&self, id: &Id) -> bool {
        self.id_map.contains_key(id)
    }

    /// Number of pending requests.
    #[must_use]
    pub fn len(&self) -> usize {
        self.id_map.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.id_map.is_empty()
    }

    fn remove(&self, id: &Id) {
        self.id_map.remove(id);
    }
}

impl std::fmt::Debug for Waiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Waiter").field("pending", &self.len()).finish()
    }
}
