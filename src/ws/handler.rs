use std::fmt;
use std::sync::Arc;

use super::message::Message;
use crate::error::Error;

pub type MessageCallback = Arc<dyn Fn(Message) + Send + Sync>;
pub type ErrorCallback = Arc<dyn Fn(&Error) + Send + Sync>;
/// Receives the number of reconnect attempts that were made.
pub type ExhaustedCallback = Arc<dyn Fn(u32) + Send + Sync>;

/// Consumer callbacks. Every slot is optional.
///
/// Registering through [`ConnectionManager::connect`](super::ConnectionManager::connect) is
/// per slot: a filled slot replaces the current handler, an empty slot leaves it alone.
#[derive(Clone, Default)]
pub struct Handlers {
    pub(crate) on_message: Option<MessageCallback>,
    pub(crate) on_error: Option<ErrorCallback>,
    pub(crate) on_retries_exhausted: Option<ExhaustedCallback>,
}

impl Handlers {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Called for every inbound frame.
    #[must_use]
    pub fn on_message<F>(mut self, f: F) -> Self
    where
        F: Fn(Message) + Send + Sync + 'static,
    {
        self.on_message = Some(Arc::new(f));
        self
    }

    /// Called for transport errors and for failed reconnect attempts.
    #[must_use]
    pub fn on_error<F>(mut self, f: F) -> Self
    where
        F: Fn(&Error) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(f));
        self
    }

    /// Called once when an abnormal closure finds the retry budget spent.
    #[must_use]
    pub fn on_retries_exhausted<F>(mut self, f: F) -> Self
    where
        F: Fn(u32) + Send + Sync + 'static,
    {
        self.on_retries_exhausted = Some(Arc::new(f));
        self
    }

    /// Overlay the filled slots of `other` onto `self`.
    pub(crate) fn merge(&mut self, other: Handlers) {
        if let Some(f) = other.on_message {
            self.on_message = Some(f);
        }
        if let Some(f) = other.on_error {
            self.on_error = Some(f);
        }
        if let Some(f) = other.on_retries_exhausted {
            self.on_retries_exhausted = Some(f);
        }
    }
}

impl fmt::Debug for Handlers {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handlers")
            .field("on_message", &self.on_message.is_some())
            .field("on_error", &self.on_error.is_some())
            .field("on_retries_exhausted", &self.on_retries_exhausted.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use super::*;

    #[test]
    fn merge_keeps_slots_that_are_not_supplied() {
        let first = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&first);
        let mut handlers = Handlers::new().on_message(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        handlers.merge(Handlers::new().on_error(|_| {}));

        let on_message = handlers.on_message.clone().unwrap();
        on_message(Message::Text("hi".to_owned()));
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert!(handlers.on_error.is_some(), "error slot should be filled");
        assert!(handlers.on_retries_exhausted.is_none());
    }

    #[test]
    fn merge_last_registration_wins() {
        let hits = Arc::new(AtomicUsize::new(0));
        let mut handlers = Handlers::new().on_message(|_| {});

        let counter = Arc::clone(&hits);
        handlers.merge(Handlers::new().on_message(move |_| {
            counter.fetch_add(10, Ordering::SeqCst);
        }));

        let on_message = handlers.on_message.clone().unwrap();
        on_message(Message::Binary(vec![1]));
        assert_eq!(hits.load(Ordering::SeqCst), 10);
    }
}
