//! Runs batches of writer DST seeds.
//!
//! Usage: blobsink-dst [calm|moderate|chaos] [--seed N] [--count N] [--ops N]
//!                     [--scratch] [--entropy] [--json]

use blobsink::writer::dst::{run_dst_batch, summarize_batch, WriterDSTConfig};
use std::env;
use std::process::ExitCode;
use tracing_subscriber::EnvFilter;

struct Args {
    mode: String,
    seed: u64,
    count: usize,
    ops: usize,
    scratch: bool,
    entropy: bool,
    json: bool,
}

fn parse_args() -> Result<Args, String> {
    let mut args = Args {
        mode: "moderate".to_string(),
        seed: 0,
        count: 50,
        ops: 500,
        scratch: false,
        entropy: false,
        json: false,
    };

    let mut iter = env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "calm" | "moderate" | "chaos" => args.mode = arg,
            "--seed" => args.seed = value(&mut iter, "--seed")?,
            "--count" => args.count = value(&mut iter, "--count")?,
            "--ops" => args.ops = value(&mut iter, "--ops")?,
            "--scratch" => args.scratch = true,
            "--entropy" => args.entropy = true,
            "--json" => args.json = true,
            other => return Err(format!("unknown argument: {}", other)),
        }
    }
    Ok(args)
}

const USAGE: &str = "usage: blobsink-dst [calm|moderate|chaos] [--seed N] [--count N] [--ops N] \
                     [--scratch] [--entropy] [--json]";

fn value<T: std::str::FromStr>(
    iter: &mut impl Iterator<Item = String>,
    flag: &str,
) -> Result<T, String> {
    let raw = iter.next().ok_or_else(|| format!("{} needs a value", flag))?;
    raw.parse().map_err(|_| format!("invalid value for {}: {}", flag, raw))
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();

    let args = match parse_args() {
        Ok(args) => args,
        Err(e) => {
            eprintln!("{}", e);
            eprintln!("{}", USAGE);
            return ExitCode::from(2);
        }
    };

    println!("Writer DST");
    println!("==========");
    println!("  Mode:    {}", args.mode);
    println!("  Seeds:   {}..{}", args.seed, args.seed + args.count as u64);
    println!("  Ops/run: {}", args.ops);
    println!("  Scratch: {}", args.scratch);
    println!("  Entropy: {}", args.entropy);
    println!();

    let mode = args.mode.clone();
    let (scratch, entropy) = (args.scratch, args.entropy);
    let results = run_dst_batch(args.seed, args.count, args.ops, move |seed| {
        let mut config = match mode.as_str() {
            "calm" => WriterDSTConfig::calm(seed),
            "chaos" => WriterDSTConfig::chaos(seed),
            _ => WriterDSTConfig::moderate(seed),
        };
        if scratch {
            config = config.with_scratch_bucket();
        }
        if entropy {
            config = config.with_entropy_injection();
        }
        config
    })
    .await;

    for result in &results {
        if args.json {
            match serde_json::to_string(result) {
                Ok(line) => println!("{}", line),
                Err(e) => eprintln!("seed {}: {}", result.seed, e),
            }
        } else if !result.is_success() {
            println!("{}", result.summary());
        }
    }
    println!("{}", summarize_batch(&results));

    if results.iter().all(|r| r.is_success()) {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    }
}
