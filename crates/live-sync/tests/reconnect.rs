use od_live_sync::{
	memory::MemoryFeed, ChannelStatus, ConnectionState, Operation, RawChangeEvent, StatusEvent,
	SyncConfig,
};

use std::time::Duration;

use pretty_assertions::assert_eq;
use tokio::time::{sleep, Instant};
use tracing_test::traced_test;

mod common;

use common::{order, order_json, settle, Harness};

fn gaps(instants: &[Instant]) -> Vec<Duration> {
	instants
		.windows(2)
		.map(|pair| pair[1].duration_since(pair[0]))
		.collect()
}

async fn subscribe_times(harness: &Harness) -> Vec<Instant> {
	harness
		.feed
		.calls()
		.await
		.into_iter()
		.map(|call| call.at)
		.collect()
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn backs_off_exponentially_then_gives_up() {
	let harness = Harness::start(
		MemoryFeed::with_default_reply(Some(ChannelStatus::ChannelError)),
		[],
	);
	settle().await;

	assert_eq!(
		harness.sync.connection_state(),
		ConnectionState::Reconnecting {
			attempt: 1,
			delay: Duration::from_secs(2),
		}
	);

	sleep(Duration::from_secs(120)).await;

	let times = subscribe_times(&harness).await;
	assert_eq!(times.len(), 6);
	assert_eq!(
		gaps(&times),
		[2, 4, 8, 16, 30].map(Duration::from_secs).to_vec()
	);

	assert!(matches!(
		harness.sync.connection_state(),
		ConnectionState::Errored { reason } if reason == "CHANNEL_ERROR"
	));
	assert_eq!(harness.feed.open_channels().await, 0);

	// Nothing is scheduled anymore
	sleep(Duration::from_secs(600)).await;
	assert_eq!(harness.feed.calls().await.len(), 6);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn custom_backoff_from_config() {
	let config = SyncConfig::from_toml_str(
		r#"
		[topic]
		table = "menu_items"

		[reconnect]
		base_delay_ms = 100
		max_delay_ms = 250
		max_attempts = 3
		"#,
	)
	.unwrap();

	let harness = Harness::start_with(
		&config,
		MemoryFeed::with_default_reply(Some(ChannelStatus::TimedOut)),
		[],
	);

	sleep(Duration::from_secs(5)).await;

	let calls = harness.feed.calls().await;
	assert!(calls.iter().all(|call| call.topic == "menu_items"));

	let times = calls.into_iter().map(|call| call.at).collect::<Vec<_>>();
	assert_eq!(
		gaps(&times),
		[100, 200, 250].map(Duration::from_millis).to_vec()
	);
	assert!(harness.sync.connection_state().is_terminal());
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn force_reconnect_recovers_from_errored() {
	let harness = Harness::start(
		MemoryFeed::with_default_reply(Some(ChannelStatus::ChannelError)),
		[order(1, "Pending")],
	);
	sleep(Duration::from_secs(120)).await;
	assert!(matches!(
		harness.sync.connection_state(),
		ConnectionState::Errored { .. }
	));
	assert_eq!(harness.persistence.count_calls(Operation::FetchAll).await, 0);

	harness
		.feed
		.set_default_reply(Some(ChannelStatus::Subscribed))
		.await;

	let forced_at = Instant::now();
	harness.sync.force_reconnect().await.unwrap();
	settle().await;

	let times = subscribe_times(&harness).await;
	assert_eq!(times.len(), 7);
	assert_eq!(times[6], forced_at);

	assert_eq!(harness.sync.connection_state(), ConnectionState::Connected);
	assert_eq!(harness.sync.get_mirror().await, vec![order(1, "Pending")]);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn retry_counter_resets_after_resubscribing() {
	let feed = MemoryFeed::new();
	feed.script_replies([ChannelStatus::ChannelError, ChannelStatus::ChannelError])
		.await;

	let harness = Harness::start(feed, []);
	sleep(Duration::from_secs(10)).await;
	assert_eq!(harness.sync.connection_state(), ConnectionState::Connected);

	let closed_at = Instant::now();
	assert!(
		harness
			.feed
			.push(StatusEvent::with_detail(ChannelStatus::Closed, "server restart"))
			.await
	);
	settle().await;
	assert_eq!(
		harness.sync.connection_state(),
		ConnectionState::Reconnecting {
			attempt: 1,
			delay: Duration::from_secs(2),
		}
	);

	sleep(Duration::from_secs(10)).await;

	let times = subscribe_times(&harness).await;
	assert_eq!(times.len(), 4);
	assert_eq!(gaps(&times)[..2], [2, 4].map(Duration::from_secs));
	// Back to the base delay, not the 8s that would follow two earlier failures
	assert_eq!(times[3].duration_since(closed_at), Duration::from_secs(2));
	assert_eq!(harness.sync.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn refused_subscribe_is_retried() {
	let feed = MemoryFeed::new();
	feed.refuse_next(1).await;

	let harness = Harness::start(feed, [order(1, "Pending")]);
	settle().await;

	assert!(matches!(
		harness.sync.connection_state(),
		ConnectionState::Reconnecting { attempt: 1, .. }
	));
	assert_eq!(harness.feed.calls().await[0].channel, None);

	sleep(Duration::from_secs(3)).await;

	assert_eq!(harness.sync.connection_state(), ConnectionState::Connected);
	assert_eq!(harness.sync.get_mirror().await.len(), 1);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn ended_stream_triggers_reconnect() {
	let harness = Harness::connected([]).await;

	harness.feed.drop_latest().await;
	settle().await;

	assert!(matches!(
		harness.sync.connection_state(),
		ConnectionState::Reconnecting { attempt: 1, .. }
	));

	sleep(Duration::from_secs(3)).await;
	assert_eq!(harness.sync.connection_state(), ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn never_more_than_one_open_channel() {
	let harness = Harness::connected([]).await;

	for _ in 0..3 {
		harness.sync.force_reconnect().await.unwrap();
		settle().await;
		assert_eq!(harness.feed.open_channels().await, 1);
	}

	assert!(
		harness
			.feed
			.push(StatusEvent::new(ChannelStatus::ChannelError))
			.await
	);
	settle().await;
	assert_eq!(harness.feed.open_channels().await, 0);

	harness.sync.force_reconnect().await.unwrap();
	settle().await;
	assert_eq!(harness.feed.open_channels().await, 1);
	assert_eq!(harness.sync.connection_state(), ConnectionState::Connected);

	// The cancelled reconnect timer must not open a second channel later on
	sleep(Duration::from_secs(5)).await;
	assert_eq!(harness.feed.open_channels().await, 1);
	assert_eq!(harness.feed.calls().await.len(), 5);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn state_changes_are_observable() {
	let harness = Harness::connected([]).await;
	let mut state = harness.sync.watch_connection();

	assert!(
		harness
			.feed
			.push(StatusEvent::new(ChannelStatus::TimedOut))
			.await
	);

	// Well before the first retry fires
	settle().await;
	assert!(state.has_changed().unwrap());
	assert_eq!(
		*state.borrow_and_update(),
		ConnectionState::Reconnecting {
			attempt: 1,
			delay: Duration::from_secs(2),
		}
	);

	let connected = state.wait_for(ConnectionState::is_live).await.unwrap();
	assert_eq!(*connected, ConnectionState::Connected);
}

#[tokio::test(start_paused = true)]
#[traced_test]
async fn events_on_stale_channel_are_ignored() {
	let harness = Harness::connected([]).await;

	assert!(
		harness
			.feed
			.push(StatusEvent::new(ChannelStatus::ChannelError))
			.await
	);
	settle().await;

	// The channel was removed when the error came in
	assert!(
		!harness
			.feed
			.push(RawChangeEvent::insert(order_json(1, "Pending")))
			.await
	);
	assert!(harness.sync.get_mirror().await.is_empty());
}
