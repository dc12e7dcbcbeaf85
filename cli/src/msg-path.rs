use anyhow::{Context, Result, bail};
use clap::Parser;
use lib_studio::model::{Message, StructuredValue, Timestamp};
use lib_studio::{evaluate, evaluate_single, parse};
use serde_json::Value;
use std::fs;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(
    name = "msg-path",
    version,
    about = "Parse a message path and optionally evaluate it against a JSON/JSON5 message"
)]
struct Args {
    /// Message path, e.g. `/odom.pose.position.x`
    #[arg(required = true)]
    path: String,

    /// JSON/JSON5 file holding the decoded message payload
    #[arg(short, long)]
    message: Option<PathBuf>,

    /// Fail unless the path selects at most one value
    #[arg(long)]
    single: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();

    let parsed = match parse(&args.path) {
        Ok(parsed) => parsed,
        Err(e) => {
            let caret_start = args.path[..e.span.start.min(args.path.len())].chars().count();
            let caret_len = e.snippet(&args.path).chars().count().max(1);
            eprintln!("{}", args.path);
            eprintln!("{}{}", " ".repeat(caret_start), "^".repeat(caret_len));
            bail!("invalid message path: {}", e);
        }
    };
    println!("{}", parsed);

    let Some(message_path) = args.message else {
        return Ok(());
    };

    let content = fs::read_to_string(&message_path)
        .context(format!("Failed to read file: {:?}", message_path))?;
    let data: Value = serde_json5::from_str(&content).context("Failed to parse JSON/JSON5")?;
    let message = Message::new(
        parsed.topic_name.clone(),
        "",
        Timestamp::ZERO,
        StructuredValue::from(data),
    );

    if args.single {
        let value = evaluate_single(&message, &parsed)?;
        match value {
            Some(value) => println!("{}", value.to_json()),
            None => println!("(no value)"),
        }
        return Ok(());
    }

    let mut count = 0usize;
    for value in evaluate(&message, &parsed) {
        println!("{}", value.to_json());
        count += 1;
    }
    if count == 0 {
        println!("(no value)");
    }
    Ok(())
}
