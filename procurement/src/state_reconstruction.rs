//! Rebuilding command state from stored events.
//!
//! State is never persisted. Every command, and every read of an order,
//! starts from `Default` and folds the full ordered history, so a partially
//! failed write can never leave a stale derived value behind.

use crate::command::Command;
use crate::event_store::StreamData;

/// Folds every event in `stream_data`, in commit order, into a fresh state.
pub fn reconstruct_state<C>(command: &C, stream_data: &StreamData<C::Event>) -> C::State
where
    C: Command,
{
    stream_data
        .events
        .iter()
        .fold(C::State::default(), |mut state, event| {
            command.apply(&mut state, event);
            state
        })
}
