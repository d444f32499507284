use std::{collections::VecDeque, pin::Pin, sync::Arc};

use async_channel as chan;
use futures::future::pending;
use tokio::time::{sleep, Sleep};
use tracing::{debug, info, instrument, warn};

use crate::{
	backend::{Channel, ChangeFeed, Persistence},
	config::TopicConfig,
	connection::{ConnectionMachine, Effect, Input},
	dispatch::Dispatcher,
	error::PersistenceError,
	event::{ChannelStatus, FeedMessage, RawChangeEvent, StatusEvent},
};

use super::{message::Command, Shared};

/// Owns the subscription and everything that mutates the mirror from the feed side.
///
/// Runs as a single task, so feed messages, timer firings and commands are handled
/// one at a time and in the order they were picked up.
pub(super) struct Driver {
	pub(super) topic: Arc<TopicConfig>,
	pub(super) feed: Arc<dyn ChangeFeed>,
	pub(super) persistence: Arc<dyn Persistence>,
	pub(super) shared: Arc<Shared>,
	pub(super) machine: ConnectionMachine,
	pub(super) dispatcher: Dispatcher,
	pub(super) commands_rx: chan::Receiver<Command>,
	pub(super) channel: Option<Channel>,
	pub(super) timer: Option<Pin<Box<Sleep>>>,
}

impl Driver {
	#[instrument(skip_all, fields(topic = %self.topic.table))]
	pub(super) async fn run(mut self) {
		self.handle(Input::Subscribe).await;

		loop {
			tokio::select! {
				biased;

				command = self.commands_rx.recv() => match command {
					Ok(Command::ForceReconnect) => self.handle(Input::ForceReconnect).await,

					Ok(Command::Refresh(ack)) => {
						let res = self.refresh().await;
						if ack.send(res).is_err() {
							debug!("Refresh requester went away before the result");
						}
					}

					Ok(Command::Shutdown(ack)) => {
						self.handle(Input::Teardown).await;
						if ack.send(()).is_err() {
							debug!("Shutdown requester went away before the ack");
						}
						break;
					}

					Err(_) => {
						debug!("All sync handles dropped, tearing down");
						self.handle(Input::Teardown).await;
						break;
					}
				},

				() = wait_timer(&mut self.timer) => {
					self.timer = None;
					self.handle(Input::TimerFired).await;
				}

				message = next_message(self.channel.as_ref()) => match message {
					Some(FeedMessage::Status(status)) => self.handle(Input::Status(status)).await,
					Some(FeedMessage::Change(raw)) => self.on_change(raw).await,
					None => {
						warn!("Change feed channel ended unexpectedly");
						self.handle(Input::Status(StatusEvent::with_detail(
							ChannelStatus::Closed,
							"event stream ended",
						)))
						.await;
					}
				},
			}
		}

		info!("Sync driver stopped");
	}

	/// Feeds an input to the state machine and carries out the resulting effects.
	///
	/// Effects can produce further inputs (a subscribe call failing is a channel
	/// error), those are handled after the current batch of effects is done.
	async fn handle(&mut self, input: Input) {
		let mut inputs = VecDeque::from([input]);

		while let Some(input) = inputs.pop_front() {
			let effects = self.machine.handle(input);
			self.publish_state();

			for effect in effects {
				if let Some(follow_up) = self.execute(effect).await {
					inputs.push_back(follow_up);
				}
			}
		}
	}

	async fn execute(&mut self, effect: Effect) -> Option<Input> {
		match effect {
			Effect::OpenChannel => return self.open_channel().await,

			Effect::CloseChannel => self.close_channel().await,

			Effect::StartTimer(delay) => self.timer = Some(Box::pin(sleep(delay))),

			Effect::CancelTimer => self.timer = None,

			Effect::RefreshSnapshot => {
				if let Err(e) = self.refresh().await {
					warn!(?e, "Snapshot refresh after subscribing failed, keeping current mirror");
				}
			}
		}

		None
	}

	async fn open_channel(&mut self) -> Option<Input> {
		let filter = self.topic.event_filter();

		match self.feed.subscribe(&self.topic.table, &filter).await {
			Ok(channel) => {
				debug!(channel = %channel.id(), "Channel opened");
				self.channel = Some(channel);
				None
			}
			Err(e) => {
				warn!(?e, "Failed to open channel");
				Some(Input::Status(StatusEvent::with_detail(
					ChannelStatus::ChannelError,
					e.to_string(),
				)))
			}
		}
	}

	async fn close_channel(&mut self) {
		if let Some(channel) = self.channel.take() {
			let id = channel.id();
			drop(channel);

			if let Err(e) = self.feed.unsubscribe(id).await {
				warn!(?e, channel = %id, "Failed to remove channel");
			} else {
				debug!(channel = %id, "Channel removed");
			}
		}
	}

	async fn refresh(&mut self) -> Result<usize, PersistenceError> {
		let snapshot = self.persistence.fetch_all(&self.topic.table).await?;

		let summary = self.shared.store.write().await.replace_all(snapshot);

		info!(
			records = summary.records,
			preserved_edits = summary.preserved_edits,
			cancelled_edits = summary.cancelled_edits,
			"Mirror refreshed from snapshot"
		);

		self.shared.invalidate();

		Ok(summary.records)
	}

	async fn on_change(&mut self, raw: RawChangeEvent) {
		if !self.machine.state().is_live() {
			self.dispatcher.discard_not_live(&raw);
		} else if let Some(event) = self.dispatcher.classify(raw) {
			let outcome = self.shared.store.write().await.apply(event);

			if outcome.changed_mirror() {
				self.shared.invalidate();
			}
		}

		self.shared.stats_tx.send_replace(self.dispatcher.stats());
	}

	fn publish_state(&self) {
		let state = self.machine.state();

		self.shared.state_tx.send_if_modified(|current| {
			if *current == *state {
				false
			} else {
				current.clone_from(state);
				true
			}
		});
	}
}

async fn wait_timer(timer: &mut Option<Pin<Box<Sleep>>>) {
	match timer {
		Some(delay) => delay.as_mut().await,
		None => pending().await,
	}
}

async fn next_message(channel: Option<&Channel>) -> Option<FeedMessage> {
	match channel {
		Some(channel) => channel.recv().await,
		None => pending().await,
	}
}
