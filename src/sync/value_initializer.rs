use parking_lot::RwLock;
use smallvec::SmallVec;
use std::cell::RefCell;
use triomphe::Arc as TrioArc;

use crate::common::error::ComputeError;

pub(crate) enum WaiterValue<V> {
    Computing,
    Ready(Result<V, ComputeError>),
    Panicked,
}

/// Coordinates the callers of a single in-flight computation.
///
/// The computing thread holds the write lock from the moment the ticket is
/// published in the segment index until the outcome is stored, so waiters
/// park on `read()`.
pub(crate) type Ticket<V> = TrioArc<RwLock<WaiterValue<V>>>;

pub(crate) fn new_ticket<V>() -> Ticket<V> {
    TrioArc::new(RwLock::new(WaiterValue::Computing))
}

pub(crate) fn ticket_id<V>(ticket: &Ticket<V>) -> usize {
    &**ticket as *const RwLock<WaiterValue<V>> as usize
}

pub(crate) fn same_ticket<V>(a: &Ticket<V>, b: &Ticket<V>) -> bool {
    ticket_id(a) == ticket_id(b)
}

thread_local! {
    // Tickets of the computations running on this thread, innermost last.
    static IN_FLIGHT: RefCell<SmallVec<[usize; 4]>> = RefCell::new(SmallVec::new());
}

/// Marks a ticket as computed by the current thread until dropped.
pub(crate) struct InFlight {
    id: usize,
}

impl InFlight {
    pub(crate) fn enter<V>(ticket: &Ticket<V>) -> Self {
        let id = ticket_id(ticket);
        IN_FLIGHT.with(|ids| ids.borrow_mut().push(id));
        Self { id }
    }
}

impl Drop for InFlight {
    fn drop(&mut self) {
        IN_FLIGHT.with(|ids| {
            let mut ids = ids.borrow_mut();
            if let Some(pos) = ids.iter().rposition(|id| *id == self.id) {
                ids.remove(pos);
            }
        });
    }
}

fn is_in_flight(id: usize) -> bool {
    IN_FLIGHT.with(|ids| ids.borrow().contains(&id))
}

pub(crate) enum WaitOutcome<V> {
    Value(V),
    Failed(ComputeError),
    /// The computation panicked or was abandoned. Look the key up again.
    Retry,
}

/// Blocks until the computation behind `ticket` finishes.
///
/// Must be called without holding any segment lock.
pub(crate) fn wait_for<V: Clone>(ticket: &Ticket<V>) -> WaitOutcome<V> {
    if is_in_flight(ticket_id(ticket)) {
        return WaitOutcome::Failed(ComputeError::Recursive);
    }
    let value = ticket.read();
    match &*value {
        WaiterValue::Ready(Ok(v)) => WaitOutcome::Value(v.clone()),
        WaiterValue::Ready(Err(e)) => WaitOutcome::Failed(e.clone()),
        WaiterValue::Computing | WaiterValue::Panicked => WaitOutcome::Retry,
    }
}

#[cfg(test)]
mod tests {
    use super::{new_ticket, same_ticket, wait_for, InFlight, WaitOutcome, WaiterValue};
    use crate::common::error::ComputeError;

    use std::{sync::Barrier, thread};
    use triomphe::Arc as TrioArc;

    #[test]
    fn waiters_receive_the_outcome() {
        let ticket = new_ticket::<u32>();
        let barrier = Barrier::new(2);

        thread::scope(|s| {
            let mut value = ticket.write();
            let waiter = s.spawn(|| {
                barrier.wait();
                match wait_for(&ticket) {
                    WaitOutcome::Value(v) => v,
                    _ => panic!("unexpected outcome"),
                }
            });
            barrier.wait();
            *value = WaiterValue::Ready(Ok(7));
            drop(value);
            assert_eq!(waiter.join().expect("waiter panicked"), 7);
        });
    }

    #[test]
    fn abandoned_tickets_are_retried() {
        let ticket = new_ticket::<u32>();
        *ticket.write() = WaiterValue::Panicked;
        assert!(matches!(wait_for(&ticket), WaitOutcome::Retry));

        let other = new_ticket::<u32>();
        assert!(!same_ticket(&ticket, &other));
        assert!(same_ticket(&ticket, &TrioArc::clone(&ticket)));
    }

    #[test]
    fn own_ticket_is_recursive() {
        let ticket = new_ticket::<u32>();
        {
            let _in_flight = InFlight::enter(&ticket);
            assert!(matches!(
                wait_for(&ticket),
                WaitOutcome::Failed(ComputeError::Recursive)
            ));
        }
        *ticket.write() = WaiterValue::Ready(Ok(1));
        assert!(matches!(wait_for(&ticket), WaitOutcome::Value(1)));
    }
}
