use anyhow::{Context, Result};
use clap::Parser;
use lib_studio::ingestors::Recording;
use lib_studio::topics::{SearchHitKind, TopicIndex};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "topic-search",
    version,
    about = "Fuzzy-search the topics and schema fields of a recording"
)]
struct Args {
    /// Recording file (JSON/JSON5)
    #[arg(required = true)]
    recording: PathBuf,

    /// Search text; lists everything when empty
    #[arg(default_value = "")]
    query: String,

    /// Maximum number of hits to print (0 = all)
    #[arg(short, long, default_value_t = 20)]
    limit: usize,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let recording = Recording::load(&args.recording)
        .context(format!("Failed to load recording: {:?}", args.recording))?;
    let index = TopicIndex::build(&recording.topics, &recording.datatypes);

    let hits = index.search(&args.query);
    let shown = if args.limit == 0 { hits.len() } else { args.limit.min(hits.len()) };
    for hit in &hits[..shown] {
        let kind = match hit.kind {
            SearchHitKind::Topic => "topic",
            SearchHitKind::Field => "field",
        };
        println!(
            "{:>5}  {:<5}  {}  ({})",
            hit.score,
            kind,
            hit.item.path(),
            hit.item.topic().schema_name
        );
    }
    if hits.is_empty() {
        println!("No topics or datatypes matching \"{}\"", args.query);
    } else if shown < hits.len() {
        println!("... {} more", hits.len() - shown);
    }
    Ok(())
}
