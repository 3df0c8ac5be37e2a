//! Event bus: SPSC ring buffer and the event dispatcher
//!
//! One producer path (serialized by the execution core), one consumer
//! thread fanning events out to typed subscribers.

#![warn(missing_docs)]
#![warn(clippy::all)]
// Unsafe is denied crate-wide and re-allowed only inside the ring, whose
// slot access cannot be expressed in safe code; the dispatcher and
// everything above it stay safe.
#![deny(unsafe_code)]

pub mod dispatcher;
#[allow(unsafe_code)]
pub mod ring;

pub use dispatcher::{DispatcherStats, EventDispatcher, Handler, SubscriptionId};
pub use ring::{spsc, Consumer, Producer};
