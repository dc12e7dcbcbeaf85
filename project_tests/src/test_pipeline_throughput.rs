use anyhow::Result;
use clap::Parser;
use futures_util::future::join_all;
use lib_studio::core::{MessagePipeline, PipelineConfig, PlayerConfig, SubscriptionPayload};
use lib_studio::ingestors::ChannelSource;
use lib_studio::model::{Capabilities, Datatypes, StructuredValue, Timestamp, Topic};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

#[derive(Parser, Debug)]
#[clap(author, version, about = "Push a synthetic high-rate source through the message pipeline", long_about = None)]
struct Args {
    /// Number of topics, each fed by its own task
    #[clap(short, long, default_value_t = 8)]
    topics: usize,

    /// Messages sent on every topic
    #[clap(short, long, default_value_t = 20_000)]
    messages: u32,

    /// Frame interval in milliseconds
    #[clap(short, long, default_value_t = 16)]
    frame_interval_ms: u64,
}

#[derive(Default)]
struct Stats {
    frames: u64,
    messages: u64,
    per_topic: HashMap<String, u64>,
    largest_frame: usize,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let pipeline = MessagePipeline::new(PipelineConfig {
        player: PlayerConfig {
            frame_interval: Duration::from_millis(args.frame_interval_ms.max(1)),
            ..PlayerConfig::default()
        },
        ..PipelineConfig::default()
    });

    let names: Vec<String> = (0..args.topics).map(|i| format!("/sensor_{}", i)).collect();
    let panel = pipeline.panel_context();
    let payloads: Vec<SubscriptionPayload> = names.iter().map(SubscriptionPayload::new).collect();
    panel.subscribe(&payloads);

    let stats = Arc::new(Mutex::new(Stats::default()));
    let stats_listener = Arc::clone(&stats);
    panel.on_frame(move |render| {
        let Some(frame) = render.frame else {
            return;
        };
        let mut data = stats_listener.lock().unwrap();
        data.frames += 1;
        data.messages += frame.messages.len() as u64;
        data.largest_frame = data.largest_frame.max(frame.messages.len());
        for message in &frame.messages {
            *data.per_topic.entry(message.topic.clone()).or_insert(0) += 1;
        }
    });

    let (source, feed) = ChannelSource::new("synthetic", Capabilities::none());
    pipeline.connect(Arc::new(source.with_buffer(4096))).await;

    let topics: Vec<Topic> = names.iter().map(|n| Topic::new(n.as_str(), "std/Float64")).collect();
    feed.topics(topics, Datatypes::new()).await?;

    println!(
        "Sending {} message(s) on each of {} topic(s)...",
        args.messages, args.topics
    );
    let started = Instant::now();
    let feeders = names.iter().cloned().map(|topic| {
        let feed = feed.clone();
        let count = args.messages;
        tokio::spawn(async move {
            for n in 0..count {
                let data = StructuredValue::mapping([("data", StructuredValue::Float(f64::from(n)))]);
                let time = Timestamp::from_nanos(u64::from(n) * 1_000_000);
                if feed.message(&topic, time, data).await.is_err() {
                    return n;
                }
            }
            count
        })
    });
    let sent: u64 = join_all(feeders)
        .await
        .into_iter()
        .map(|r| r.map(u64::from).unwrap_or(0))
        .sum();
    let send_elapsed = started.elapsed();

    // Wait for the player to drain, stopping once nothing moves for a while.
    let mut last_seen = 0;
    let mut idle_since = Instant::now();
    loop {
        tokio::time::sleep(Duration::from_millis(args.frame_interval_ms.max(1))).await;
        let seen = stats.lock().unwrap().messages;
        if seen >= sent {
            break;
        }
        if seen != last_seen {
            last_seen = seen;
            idle_since = Instant::now();
        } else if idle_since.elapsed() > Duration::from_secs(2) {
            break;
        }
    }
    let elapsed = started.elapsed();
    pipeline.disconnect().await;

    let data = stats.lock().unwrap();
    let secs = elapsed.as_secs_f64().max(f64::EPSILON);
    let mut rates: Vec<(&String, &u64)> = data.per_topic.iter().collect();
    rates.sort_by(|a, b| b.1.cmp(a.1).then_with(|| a.0.cmp(b.0)));
    let report = rates
        .iter()
        .map(|(t, n)| format!("{}: {}", t, n))
        .collect::<Vec<_>>()
        .join(", ");

    println!("\n----- Pipeline Throughput -----");
    println!("Sent:       {} msg in {:.2?}", sent, send_elapsed);
    println!("Delivered:  {} msg in {} frame(s)", data.messages, data.frames);
    println!("Evicted:    {} msg", sent.saturating_sub(data.messages));
    println!("Rate:       {:.0} msg/s, {:.1} frames/s", data.messages as f64 / secs, data.frames as f64 / secs);
    println!("Max frame:  {} msg", data.largest_frame);
    println!("Topics:     {}", if report.is_empty() { "No data" } else { &report });
    println!("-------------------------------\n");
    Ok(())
}
