use parking_lot::Mutex;

/// A single-slot hand-off between the tick thread and a worker.
///
/// Depositing replaces whatever is in the slot; claiming empties it. The lock is held only
/// for the swap, so neither side ever waits on the other's work.
///
/// ```
/// use nodedsp::nodes::Mailbox;
///
/// let mailbox = Mailbox::new();
/// assert_eq!(mailbox.deposit(1), None);
/// assert_eq!(mailbox.deposit(2), Some(1)); // 1 was never claimed, it is dropped
/// assert_eq!(mailbox.claim(), Some(2));
/// assert_eq!(mailbox.claim(), None);
/// ```
#[derive(Debug)]
pub struct Mailbox<T> {
    slot: Mutex<Option<T>>,
}

impl<T> Default for Mailbox<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Mailbox<T> {
    pub const fn new() -> Self {
        Self { slot: Mutex::new(None) }
    }

    /// Put `value` in the slot. Returns the value it displaced, if the worker had not
    /// claimed it yet.
    pub fn deposit(&self, value: T) -> Option<T> {
        self.slot.lock().replace(value)
    }

    /// Take the slot's contents, leaving it empty.
    pub fn claim(&self) -> Option<T> {
        self.slot.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.lock().is_none()
    }
}
