//! Subscription lifecycle: the connection state machine and its reconnect backoff.

mod backoff;
mod machine;

pub use backoff::{
	BackoffPolicy, RetryState, DEFAULT_BASE_DELAY, DEFAULT_MAX_ATTEMPTS, DEFAULT_MAX_DELAY,
};
pub use machine::{ConnectionMachine, ConnectionState, Effect, Input};
