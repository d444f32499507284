use std::time::Duration;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::event::{ChannelStatus, StatusEvent};

use super::backoff::{BackoffPolicy, RetryState};

/// Health of the change feed subscription, as shown to the user.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConnectionState {
	#[default]
	Idle,
	Connecting,
	Connected,
	/// Waiting `delay` before retry number `attempt`.
	Reconnecting { attempt: u32, delay: Duration },
	/// Retries exhausted, only a forced reconnect leaves this state.
	Errored { reason: String },
	Closed,
}

impl ConnectionState {
	/// Only events delivered while connected are applied to the mirror.
	#[must_use]
	pub const fn is_live(&self) -> bool {
		matches!(self, Self::Connected)
	}

	#[must_use]
	pub const fn is_terminal(&self) -> bool {
		matches!(self, Self::Errored { .. } | Self::Closed)
	}

	const fn expects_status(&self) -> bool {
		matches!(self, Self::Connecting | Self::Connected)
	}
}

/// Something that happened to the subscription.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Input {
	Subscribe,
	Status(StatusEvent),
	TimerFired,
	ForceReconnect,
	Teardown,
}

/// Work the driver has to carry out after a transition, in order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Effect {
	OpenChannel,
	CloseChannel,
	StartTimer(Duration),
	CancelTimer,
	RefreshSnapshot,
}

/// Connection lifecycle of a single topic subscription.
///
/// Holds no I/O: every input yields the effects to run, the driver runs them.
/// Keeps track of whether a channel is open so `OpenChannel` is always preceded by
/// a `CloseChannel` for the previous one, and of whether a timer is pending so
/// that only one ever is.
#[derive(Debug)]
pub struct ConnectionMachine {
	state: ConnectionState,
	retry: RetryState,
	policy: BackoffPolicy,
	channel_open: bool,
	timer_pending: bool,
}

impl ConnectionMachine {
	#[must_use]
	pub fn new(policy: BackoffPolicy) -> Self {
		Self {
			state: ConnectionState::Idle,
			retry: RetryState::default(),
			policy,
			channel_open: false,
			timer_pending: false,
		}
	}

	#[must_use]
	pub const fn state(&self) -> &ConnectionState {
		&self.state
	}

	#[must_use]
	pub const fn retry(&self) -> RetryState {
		self.retry
	}

	#[must_use]
	pub const fn policy(&self) -> &BackoffPolicy {
		&self.policy
	}

	#[must_use]
	pub const fn channel_open(&self) -> bool {
		self.channel_open
	}

	#[must_use]
	pub const fn timer_pending(&self) -> bool {
		self.timer_pending
	}

	pub fn handle(&mut self, input: Input) -> Vec<Effect> {
		match input {
			Input::Subscribe => self.open(),

			Input::ForceReconnect => {
				info!(
					attempt = self.retry.attempt,
					"Forced reconnect, resetting retry state"
				);
				self.retry.reset();
				self.open()
			}

			Input::TimerFired => {
				self.timer_pending = false;
				if matches!(self.state, ConnectionState::Reconnecting { .. }) {
					self.open()
				} else {
					debug!(state = ?self.state, "Ignoring stale reconnect timer");
					vec![]
				}
			}

			Input::Teardown => {
				let mut effects = Vec::with_capacity(2);
				self.cancel_timer(&mut effects);
				self.close_channel(&mut effects);
				self.state = ConnectionState::Closed;
				effects
			}

			Input::Status(event) if !self.state.expects_status() => {
				debug!(
					status = %event.status,
					state = ?self.state,
					"Ignoring channel status outside of an active subscription"
				);
				vec![]
			}

			Input::Status(StatusEvent {
				status: ChannelStatus::Subscribed,
				..
			}) => self.subscribed(),

			Input::Status(event) => self.failed(&event),
		}
	}

	fn open(&mut self) -> Vec<Effect> {
		let mut effects = Vec::with_capacity(3);
		self.cancel_timer(&mut effects);
		self.close_channel(&mut effects);

		effects.push(Effect::OpenChannel);
		self.channel_open = true;
		self.state = ConnectionState::Connecting;

		effects
	}

	fn subscribed(&mut self) -> Vec<Effect> {
		if self.state.is_live() {
			debug!("Ignoring duplicate subscription acknowledgment");
			return vec![];
		}

		info!(
			after_attempts = self.retry.attempt,
			"Subscription established"
		);

		let mut effects = Vec::with_capacity(2);
		self.cancel_timer(&mut effects);
		effects.push(Effect::RefreshSnapshot);

		self.retry.reset();
		self.state = ConnectionState::Connected;

		effects
	}

	fn failed(&mut self, event: &StatusEvent) -> Vec<Effect> {
		let mut effects = Vec::with_capacity(3);
		self.close_channel(&mut effects);
		self.cancel_timer(&mut effects);

		if self.policy.is_exhausted(self.retry.attempt) {
			let reason = event.reason();
			warn!(
				attempts = self.retry.attempt,
				last_delay_ms = self.retry.last_delay.as_millis(),
				%reason,
				"Reconnect attempts exhausted, giving up until a manual reconnect"
			);
			self.state = ConnectionState::Errored { reason };
			return effects;
		}

		let delay = self.policy.delay_for(self.retry.attempt);
		self.retry.attempt += 1;
		self.retry.last_delay = delay;

		warn!(
			status = %event.status,
			detail = ?event.detail,
			attempt = self.retry.attempt,
			delay_ms = delay.as_millis(),
			"Subscription lost, scheduling reconnect"
		);

		effects.push(Effect::StartTimer(delay));
		self.timer_pending = true;
		self.state = ConnectionState::Reconnecting {
			attempt: self.retry.attempt,
			delay,
		};

		effects
	}

	fn cancel_timer(&mut self, effects: &mut Vec<Effect>) {
		if self.timer_pending {
			effects.push(Effect::CancelTimer);
			self.timer_pending = false;
		}
	}

	fn close_channel(&mut self, effects: &mut Vec<Effect>) {
		if self.channel_open {
			effects.push(Effect::CloseChannel);
			self.channel_open = false;
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn error() -> Input {
		Input::Status(StatusEvent::with_detail(
			ChannelStatus::ChannelError,
			"socket reset",
		))
	}

	fn subscribed() -> Input {
		Input::Status(StatusEvent::new(ChannelStatus::Subscribed))
	}

	fn scheduled_delay(effects: &[Effect]) -> Option<Duration> {
		effects.iter().find_map(|effect| match effect {
			Effect::StartTimer(delay) => Some(*delay),
			_ => None,
		})
	}

	#[test]
	fn subscribe_then_ack_refreshes() {
		let mut machine = ConnectionMachine::new(BackoffPolicy::default());

		assert_eq!(machine.handle(Input::Subscribe), vec![Effect::OpenChannel]);
		assert_eq!(machine.state(), &ConnectionState::Connecting);

		assert_eq!(machine.handle(subscribed()), vec![Effect::RefreshSnapshot]);
		assert!(machine.state().is_live());
	}

	#[test]
	fn resubscribing_closes_previous_channel_first() {
		let mut machine = ConnectionMachine::new(BackoffPolicy::default());
		machine.handle(Input::Subscribe);
		machine.handle(subscribed());

		assert_eq!(
			machine.handle(Input::Subscribe),
			vec![Effect::CloseChannel, Effect::OpenChannel]
		);
	}

	#[test]
	fn backoff_until_errored() {
		let mut machine = ConnectionMachine::new(BackoffPolicy::default());
		machine.handle(Input::Subscribe);

		let mut delays = vec![];
		for _ in 0..5 {
			let effects = machine.handle(error());
			assert_eq!(effects.first(), Some(&Effect::CloseChannel));
			delays.push(scheduled_delay(&effects).expect("a retry is scheduled"));

			assert_eq!(machine.handle(Input::TimerFired), vec![Effect::OpenChannel]);
		}

		assert_eq!(
			delays,
			[2_000, 4_000, 8_000, 16_000, 30_000].map(Duration::from_millis)
		);
		assert_eq!(
			machine.retry(),
			RetryState {
				attempt: 5,
				last_delay: Duration::from_secs(30),
			}
		);

		let effects = machine.handle(error());
		assert_eq!(scheduled_delay(&effects), None);
		assert!(!machine.timer_pending());
		assert_eq!(
			machine.state(),
			&ConnectionState::Errored {
				reason: "CHANNEL_ERROR: socket reset".to_string()
			}
		);

		// A timer firing late must not revive the subscription
		assert!(machine.handle(Input::TimerFired).is_empty());
		assert!(machine.state().is_terminal());
	}

	#[test]
	fn success_resets_retry_counter() {
		let mut machine = ConnectionMachine::new(BackoffPolicy::default());
		machine.handle(Input::Subscribe);

		for _ in 0..3 {
			machine.handle(error());
			machine.handle(Input::TimerFired);
		}
		assert_eq!(machine.retry().attempt, 3);
		assert_eq!(machine.retry().last_delay, Duration::from_secs(8));

		machine.handle(subscribed());
		assert_eq!(machine.retry(), RetryState::default());

		let effects = machine.handle(error());
		assert_eq!(scheduled_delay(&effects), Some(Duration::from_secs(2)));
	}

	#[test]
	fn timeouts_and_closures_count_as_failures() {
		let mut machine = ConnectionMachine::new(BackoffPolicy::default());
		machine.handle(Input::Subscribe);
		machine.handle(subscribed());

		machine.handle(Input::Status(StatusEvent::new(ChannelStatus::TimedOut)));
		assert_eq!(
			machine.state(),
			&ConnectionState::Reconnecting {
				attempt: 1,
				delay: Duration::from_secs(2)
			}
		);

		machine.handle(Input::TimerFired);
		machine.handle(Input::Status(StatusEvent::new(ChannelStatus::Closed)));
		assert_eq!(
			machine.state(),
			&ConnectionState::Reconnecting {
				attempt: 2,
				delay: Duration::from_secs(4)
			}
		);
	}

	#[test]
	fn force_reconnect_leaves_errored_immediately() {
		let mut machine = ConnectionMachine::new(BackoffPolicy {
			max_attempts: 1,
			..Default::default()
		});
		machine.handle(Input::Subscribe);
		machine.handle(error());
		machine.handle(Input::TimerFired);
		machine.handle(error());
		assert!(matches!(machine.state(), ConnectionState::Errored { .. }));

		assert_eq!(
			machine.handle(Input::ForceReconnect),
			vec![Effect::OpenChannel]
		);
		assert_eq!(machine.retry().attempt, 0);
		assert_eq!(machine.state(), &ConnectionState::Connecting);
	}

	#[test]
	fn force_reconnect_cancels_pending_timer() {
		let mut machine = ConnectionMachine::new(BackoffPolicy::default());
		machine.handle(Input::Subscribe);
		machine.handle(error());
		assert!(machine.timer_pending());

		assert_eq!(
			machine.handle(Input::ForceReconnect),
			vec![Effect::CancelTimer, Effect::OpenChannel]
		);
		assert!(!machine.timer_pending());
	}

	#[test]
	fn teardown_is_idempotent() {
		let mut machine = ConnectionMachine::new(BackoffPolicy::default());
		machine.handle(Input::Subscribe);
		machine.handle(error());

		assert_eq!(machine.handle(Input::Teardown), vec![Effect::CancelTimer]);
		assert_eq!(machine.state(), &ConnectionState::Closed);

		assert!(machine.handle(Input::Teardown).is_empty());
		assert!(machine.handle(Input::Teardown).is_empty());
		assert_eq!(machine.state(), &ConnectionState::Closed);

		let mut idle = ConnectionMachine::new(BackoffPolicy::default());
		assert!(idle.handle(Input::Teardown).is_empty());
	}

	#[test]
	fn teardown_while_connected_closes_channel() {
		let mut machine = ConnectionMachine::new(BackoffPolicy::default());
		machine.handle(Input::Subscribe);
		machine.handle(subscribed());

		assert_eq!(machine.handle(Input::Teardown), vec![Effect::CloseChannel]);
		assert!(!machine.channel_open());
	}

	#[test]
	fn stale_statuses_are_ignored() {
		let mut machine = ConnectionMachine::new(BackoffPolicy::default());
		assert!(machine.handle(error()).is_empty());
		assert_eq!(machine.state(), &ConnectionState::Idle);

		machine.handle(Input::Subscribe);
		machine.handle(Input::Teardown);
		assert!(machine
			.handle(Input::Status(StatusEvent::new(ChannelStatus::Closed)))
			.is_empty());
		assert!(machine.handle(subscribed()).is_empty());
		assert_eq!(machine.state(), &ConnectionState::Closed);
	}

	#[test]
	fn duplicate_ack_does_not_refresh_twice() {
		let mut machine = ConnectionMachine::new(BackoffPolicy::default());
		machine.handle(Input::Subscribe);
		machine.handle(subscribed());

		assert!(machine.handle(subscribed()).is_empty());
	}
}
