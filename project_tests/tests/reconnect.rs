use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_studio::core::{MessagePipeline, PipelineConfig, PlayerConfig, PlayerPresence, RenderState};
use lib_studio::ingestors::{ChannelSource, ChannelSourceFeed, SourceError, SourceEvent};
use lib_studio::message_path::{evaluate_single, parse};
use lib_studio::model::{Capabilities, Datatypes, StructuredValue, Timestamp, Topic};
use lib_studio::SubscribeOptions;
use tokio::sync::watch;

const TOPIC: &str = "/counter";

fn fast_config(max_reconnect_attempts: u32) -> PipelineConfig {
    PipelineConfig {
        player: PlayerConfig {
            frame_interval: Duration::from_millis(1),
            reconnect_base_delay: Duration::from_millis(1),
            reconnect_max_delay: Duration::from_millis(4),
            max_reconnect_attempts,
            ..PlayerConfig::default()
        },
        ..PipelineConfig::default()
    }
}

#[derive(Debug, Default)]
struct Observed {
    /// (session, seq, did_seek, counter values in the frame)
    frames: Vec<(u64, u64, bool, Vec<i64>)>,
    presences: Vec<PlayerPresence>,
}

async fn advertise(feed: &ChannelSourceFeed) {
    feed.topics(vec![Topic::new(TOPIC, "std/Counter")], Datatypes::new())
        .await
        .unwrap();
}

async fn send_counter(feed: &ChannelSourceFeed, n: u32) {
    let data = StructuredValue::mapping([("n", StructuredValue::Int(i64::from(n)))]);
    feed.message(TOPIC, Timestamp::new(n, 0), data).await.unwrap();
}

async fn wait_presence(pipeline: &MessagePipeline, presence: PlayerPresence) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while pipeline.snapshot().presence != presence {
            tokio::time::sleep(Duration::from_millis(1)).await;
        }
    })
    .await
    .unwrap_or_else(|_| panic!("presence never became {:?}", presence));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn thousand_frames_across_two_reconnects() {
    let pipeline = MessagePipeline::new(fast_config(10));
    let panel = pipeline.panel_context();
    panel.subscribe_topic(TOPIC, SubscribeOptions::default());

    let observed = Arc::new(Mutex::new(Observed::default()));
    let (last_tx, mut last_rx) = watch::channel(0i64);
    {
        let observed = Arc::clone(&observed);
        let path = parse("/counter.n").unwrap();
        panel.on_frame(move |render: &RenderState<'_>| {
            let mut observed = observed.lock().unwrap();
            let presence = render.snapshot.presence;
            if observed.presences.last() != Some(&presence) {
                observed.presences.push(presence);
            }
            let Some(frame) = render.frame else {
                return;
            };
            let values: Vec<i64> = frame
                .messages
                .iter()
                .filter_map(|m| match evaluate_single(m, &path) {
                    Ok(Some(value)) => value.as_f64().map(|v| v as i64),
                    _ => None,
                })
                .collect();
            if let Some(max) = values.iter().max() {
                last_tx.send_replace(*max);
            }
            observed
                .frames
                .push((frame.session, frame.seq, frame.did_seek, values));
        });
    }

    let (source, feed) = ChannelSource::new("robot", Capabilities::none());
    pipeline.connect(Arc::new(source)).await;
    advertise(&feed).await;

    for n in 1..=1000u32 {
        if n == 334 || n == 667 {
            feed.drop_connection();
            feed.wait_connected().await;
            advertise(&feed).await;
        }
        send_counter(&feed, n).await;
        tokio::time::timeout(Duration::from_secs(5), last_rx.wait_for(|last| *last >= i64::from(n)))
            .await
            .unwrap_or_else(|_| panic!("message {} was never dispatched", n))
            .unwrap();
    }
    wait_presence(&pipeline, PlayerPresence::Present).await;
    pipeline.disconnect().await;

    let observed = observed.lock().unwrap();
    let delivered: Vec<i64> = observed
        .frames
        .iter()
        .flat_map(|(_, _, _, values)| values.iter().copied())
        .collect();
    assert_eq!(delivered, (1..=1000).collect::<Vec<i64>>());
    assert_eq!(
        observed.frames.iter().filter(|(_, _, _, v)| !v.is_empty()).count(),
        1000
    );

    let session = observed.frames[0].0;
    assert!(observed.frames.iter().all(|(s, _, _, _)| *s == session));
    assert!(observed.frames.windows(2).all(|w| w[0].1 < w[1].1));
    assert_eq!(observed.frames.iter().filter(|f| f.2).count(), 2);

    let reconnects = observed
        .presences
        .iter()
        .filter(|p| **p == PlayerPresence::Reconnecting)
        .count();
    assert_eq!(reconnects, 2);
    assert_eq!(observed.presences.first(), Some(&PlayerPresence::Initializing));
    assert_eq!(feed.connect_count(), 3);
}

#[tokio::test]
async fn transient_connect_failures_are_retried() {
    let pipeline = MessagePipeline::new(fast_config(5));
    let panel = pipeline.panel_context();
    panel.subscribe_topic(TOPIC, SubscribeOptions::default());
    let (source, feed) = ChannelSource::new("robot", Capabilities::none());
    feed.fail_next_connect(SourceError::Transport("connection refused".into()));
    feed.fail_next_connect(SourceError::Transport("connection refused".into()));
    pipeline.connect(Arc::new(source)).await;

    advertise(&feed).await;
    send_counter(&feed, 1).await;
    wait_presence(&pipeline, PlayerPresence::Present).await;
    assert_eq!(feed.connect_count(), 3);
    pipeline.disconnect().await;
}

#[tokio::test]
async fn exhausted_retries_end_in_error() {
    let pipeline = MessagePipeline::new(fast_config(2));
    let (source, feed) = ChannelSource::new("robot", Capabilities::none());
    for _ in 0..3 {
        feed.fail_next_connect(SourceError::Transport("no route to host".into()));
    }
    pipeline.connect(Arc::new(source)).await;

    wait_presence(&pipeline, PlayerPresence::Error).await;
    let error = pipeline.snapshot().error.clone().unwrap();
    assert!(error.contains("giving up after 3 attempts"), "{}", error);
    assert_eq!(feed.connect_count(), 3);
}

#[tokio::test]
async fn fatal_event_stops_delivery() {
    let pipeline = MessagePipeline::new(fast_config(5));
    let frames = Arc::new(Mutex::new(0usize));
    let panel = pipeline.panel_context();
    panel.subscribe_topic(TOPIC, SubscribeOptions::default());
    {
        let frames = Arc::clone(&frames);
        panel.on_frame(move |render| {
            if render.frame.is_some() {
                *frames.lock().unwrap() += 1;
            }
        });
    }
    let (source, feed) = ChannelSource::new("robot", Capabilities::none());
    pipeline.connect(Arc::new(source)).await;
    advertise(&feed).await;
    send_counter(&feed, 1).await;
    wait_presence(&pipeline, PlayerPresence::Present).await;

    feed.send(SourceEvent::Fatal("bag index corrupted".into()))
        .await
        .unwrap();
    wait_presence(&pipeline, PlayerPresence::Error).await;
    let delivered = *frames.lock().unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(*frames.lock().unwrap(), delivered);
    assert_eq!(
        pipeline.snapshot().error.as_deref(),
        Some("bag index corrupted")
    );
    assert!(!feed.is_connected());
}
