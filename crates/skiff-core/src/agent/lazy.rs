//! Build-once shared resources with singleflight construction.
//!
//! The first caller starts construction; callers arriving while it is in
//! flight await the same future; the finished value is cached for the life of
//! the owner. A failed construction is reported to every waiter and the slot
//! is cleared so the next call retries.

use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;
use tracing::{debug, warn};

use crate::error::AgentError;

type Pending<T> = Shared<BoxFuture<'static, Result<Arc<T>, Arc<anyhow::Error>>>>;

enum Slot<T> {
    Empty,
    Pending(Pending<T>),
    Ready(Arc<T>),
}

pub struct LazyShared<T> {
    name: &'static str,
    slot: Mutex<Slot<T>>,
}

impl<T: Send + Sync + 'static> LazyShared<T> {
    pub fn new(name: &'static str) -> Self {
        Self {
            name,
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// Return the cached value, joining or starting construction as needed.
    pub async fn get_or_init<F, Fut>(&self, init: F) -> Result<Arc<T>, AgentError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let pending = {
            let mut slot = self.slot.lock();
            match &*slot {
                Slot::Ready(value) => return Ok(value.clone()),
                Slot::Pending(pending) => pending.clone(),
                Slot::Empty => {
                    debug!(resource = self.name, "Constructing shared resource");
                    let pending = init()
                        .map(|result| result.map(Arc::new).map_err(Arc::new))
                        .boxed()
                        .shared();
                    *slot = Slot::Pending(pending.clone());
                    pending
                }
            }
        };

        let result = pending.clone().await;

        let mut slot = self.slot.lock();
        let still_ours = matches!(&*slot, Slot::Pending(current) if current.ptr_eq(&pending));
        match result {
            Ok(value) => {
                if still_ours {
                    *slot = Slot::Ready(value.clone());
                }
                Ok(value)
            }
            Err(e) => {
                if still_ours {
                    warn!(resource = self.name, error = %e, "Shared resource construction failed");
                    *slot = Slot::Empty;
                }
                Err(AgentError::Init {
                    name: self.name.to_string(),
                    message: format!("{:#}", e),
                })
            }
        }
    }

    /// Cached value, if construction already finished
    pub fn get(&self) -> Option<Arc<T>> {
        match &*self.slot.lock() {
            Slot::Ready(value) => Some(value.clone()),
            _ => None,
        }
    }

    /// Drop the cached value. Test harnesses only.
    pub fn reset(&self) {
        *self.slot.lock() = Slot::Empty;
    }
}
