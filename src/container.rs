//! The capability traits shared by every pipeline container.
//!
//! The queue and the stores have different value surfaces (positional
//! push/pop versus keyed insert/lookup) but an identical lifecycle: they
//! start open, accept writes, and make a one-way transition to closed that
//! wakes every waiter. [`Container`] is that shared lifecycle surface.
//!
//! [`Drain`] is the read-side capability barrier stages need on top of it:
//! once a container has closed, its full contents can be consumed exactly
//! once. Splitting the two keeps "can be waited on" and "can be emptied"
//! as separate obligations, in the same spirit as the write-side/read-side
//! trait split a latch api uses.

/// The shared open/closed lifecycle of a pipeline container.
///
/// `closed` is monotonic: once a container closes it never reopens, and
/// every blocked producer, consumer, and waiter is woken by the transition.
pub trait Container: Send + Sync + 'static {
    /// Transitions the container to closed. Idempotent.
    fn close(&self);

    /// Blocks until the container is closed.
    fn wait(&self);

    /// Blocks until the container is closed *and* drained.
    fn wait_for_empty(&self);

    /// Returns `true` while the container is open, or closed but still
    /// holding items. This is the loop guard for drain-to-completion
    /// consumers.
    fn can_receive(&self) -> bool;

    /// The number of items currently held, reported under the container's
    /// lock.
    fn len(&self) -> usize;

    /// Returns `true` when the container holds nothing.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Containers whose full contents can be consumed after they close.
///
/// Barrier stages (transform, collect, partition, reduce) first
/// [`wait`](Container::wait) on their input and then drain it; implementing
/// this trait is what makes a container usable as a barrier-stage input.
pub trait Drain: Container {
    /// The element handed to the drain callback. For queues this is the
    /// queued value; for keyed stores it is a key/value pair.
    type Item: Send + 'static;

    /// Removes every element, invoking `f` on each. Ordering follows the
    /// container: insertion order for queues, key order for stores.
    fn drain_each(&self, f: &mut dyn FnMut(Self::Item));
}
