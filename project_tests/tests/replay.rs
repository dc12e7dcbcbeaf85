use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_studio::core::{MessagePipeline, PanelError, PipelineConfig, PlayerConfig, PlayerPresence};
use lib_studio::ingestors::{Recording, ReplaySource};
use lib_studio::panels::{LatestValueConfig, LatestValuePanel, Level};
use lib_studio::topics::SearchHitKind;
use lib_studio::{Capability, StructuredValue, Timestamp};

const RECORDING: &str = r#"{
    topics: [
        { name: "/battery", schemaName: "sensor/Battery" },
        { name: "/imu", schemaName: "sensor/Imu" },
    ],
    datatypes: [
        { name: "sensor/Battery", fields: [
            { name: "voltage", type: "float64" },
            { name: "cells", type: "sensor/Cell", isArray: true },
        ] },
        { name: "sensor/Cell", fields: [{ name: "charge", type: "float64" }] },
        { name: "sensor/Imu", fields: [{ name: "x", type: "float64" }] },
    ],
    messages: [
        { topic: "/battery", receiveTime: { sec: 1, nsec: 0 }, data: { voltage: 12.5, cells: [{ charge: 0.9 }, { charge: 0.8 }] } },
        { topic: "/imu", receiveTime: { sec: 1, nsec: 500 }, data: { x: 0.1 } },
        { topic: "/battery", receiveTime: { sec: 2, nsec: 0 }, data: { voltage: 12.4, cells: [{ charge: 0.7 }, { charge: 0.6 }] } },
        { topic: "/battery", receiveTime: { sec: 3, nsec: 0 }, data: { voltage: 12.3, cells: [{ charge: 0.5 }, { charge: 0.4 }] } },
        { topic: "/imu", receiveTime: { sec: 3, nsec: 500 }, data: { x: 0.2 } },
        { topic: "/battery", receiveTime: { sec: 4, nsec: 0 }, data: { voltage: 11.2, cells: [{ charge: 0.3 }, { charge: 0.1 }] } },
    ],
}"#;

fn fast_pipeline() -> Arc<MessagePipeline> {
    MessagePipeline::new(PipelineConfig {
        player: PlayerConfig {
            frame_interval: Duration::from_millis(2),
            ..PlayerConfig::default()
        },
        ..PipelineConfig::default()
    })
}

async fn eventually<F>(what: &str, mut condition: F)
where
    F: FnMut() -> bool,
{
    let waited = tokio::time::timeout(Duration::from_secs(5), async {
        while !condition() {
            tokio::time::sleep(Duration::from_millis(2)).await;
        }
    })
    .await;
    assert!(waited.is_ok(), "timed out waiting for {}", what);
}

fn value_is(panel: &LatestValuePanel, expected: f64) -> bool {
    panel.state().value().and_then(StructuredValue::as_f64) == Some(expected)
}

#[tokio::test]
async fn replay_drives_latest_value_panel_and_seek() {
    let pipeline = fast_pipeline();
    let source = Arc::new(ReplaySource::unpaced(
        "battery-run",
        Recording::parse(RECORDING).unwrap(),
    ));

    let panel = LatestValuePanel::mount(
        pipeline.panel_context(),
        LatestValueConfig {
            path: "/battery.voltage".into(),
            min_value: 11.0,
            max_value: 13.0,
        },
    );

    let topics_seen = Arc::new(Mutex::new(BTreeSet::new()));
    let observer = pipeline.panel_context();
    {
        let topics_seen = Arc::clone(&topics_seen);
        observer.on_frame(move |render| {
            if let Some(frame) = render.frame {
                let mut seen = topics_seen.lock().unwrap();
                seen.extend(frame.messages.iter().map(|m| m.topic.clone()));
            }
        });
    }

    pipeline.connect(source.clone()).await;
    eventually("the last battery reading", || {
        source.position().is_none() && value_is(&panel, 11.2)
    })
    .await;

    assert_eq!(pipeline.snapshot().presence, PlayerPresence::Present);
    assert_eq!(
        *topics_seen.lock().unwrap(),
        BTreeSet::from(["/battery".to_string()])
    );
    let reading = panel.reading().unwrap();
    assert!((reading.scaled - 0.1).abs() < 1e-9);
    assert_eq!(reading.level(), Level::Low);

    let context = panel.context();
    assert!(context.capabilities().contains(Capability::PlaybackControl));
    context.pause().await.unwrap();
    context.seek(Timestamp::new(2, 0)).await.unwrap();
    eventually("the seek to clear the panel", || panel.state().value().is_none()).await;
    assert_eq!(source.position(), Some(Timestamp::new(2, 0)));

    context.play().await.unwrap();
    eventually("delivery to resume after the seek", || value_is(&panel, 11.2)).await;
    assert_eq!(
        pipeline.snapshot().current_time,
        Some(Timestamp::new(4, 0))
    );

    panel.set_path("/battery.cells[1].charge");
    assert!(value_is(&panel, 0.1));

    pipeline.disconnect().await;
    assert_eq!(pipeline.snapshot().presence, PlayerPresence::NotPresent);
}

#[tokio::test]
async fn topic_search_covers_recording_schemas() {
    let pipeline = fast_pipeline();
    let source = Arc::new(ReplaySource::unpaced(
        "battery-run",
        Recording::parse(RECORDING).unwrap(),
    ));
    let panel = pipeline.panel_context();
    pipeline.connect(source).await;
    eventually("the topic list", || pipeline.snapshot().topics.len() == 2).await;

    let hits = panel.search_topics("charge");
    let top = hits.first().expect("a field hit for 'charge'");
    assert_eq!(top.kind, SearchHitKind::Field);
    assert_eq!(top.item.path(), "/battery.cells[:].charge");

    let topics: Vec<String> = panel
        .search_topics("")
        .into_iter()
        .filter(|hit| hit.kind == SearchHitKind::Topic)
        .map(|hit| hit.item.path())
        .collect();
    assert_eq!(topics, vec!["/battery", "/imu"]);

    pipeline.disconnect().await;
    assert!(panel.search_topics("").is_empty());
}

#[tokio::test]
async fn panel_commands_need_a_player() {
    let pipeline = fast_pipeline();
    let panel = pipeline.panel_context();
    assert_eq!(panel.seek(Timestamp::new(1, 0)).await, Err(PanelError::NoPlayer));
    assert_eq!(
        panel.call_service("/reset", StructuredValue::Null).await,
        Err(PanelError::NoPlayer)
    );
}
