//! # SwarmSync CLI
//!
//! Command-line utilities for encoding, inspecting, and debugging
//! timestamps and specifiers.

use anyhow::{Context, Result};
use chrono::{TimeZone, Utc};
use serde_json::{json, Value};
use std::env;
use swarmsync_core::{base64x64, calendar, Base64x64, Specifier, Stamp, Token};

fn main() -> Result<()> {
    let args: Vec<String> = env::args().collect();

    if args.len() < 2 {
        print_help();
        return Ok(());
    }

    match args[1].as_str() {
        "encode" => {
            if args.len() < 3 {
                eprintln!("Usage: swarmsync encode <number> [min-length]");
                std::process::exit(1);
            }
            let min_length = args
                .get(3)
                .map_or(Ok(1), |n| n.parse())
                .context("Invalid min-length")?;
            println!("{}", encode(&args[2], min_length)?);
        }
        "decode" => {
            if args.len() < 3 {
                eprintln!("Usage: swarmsync decode <base64x64>");
                std::process::exit(1);
            }
            let value = base64x64::decode(&args[2]).context("Failed to decode")?;
            println!("{value}");
        }
        "compare" => {
            if args.len() < 4 {
                eprintln!("Usage: swarmsync compare <a> <b>");
                std::process::exit(1);
            }
            println!("{}", compare(&args[2], &args[3])?);
        }
        "stamp" => {
            let origin = match args.get(2) {
                Some(origin) => Base64x64::parse(origin).context("Invalid origin")?,
                None => Base64x64::ZERO,
            };
            let stamp = Stamp::now(origin).context("System clock outside the calendar")?;
            println!("{stamp}");
        }
        "spec" => {
            if args.len() < 3 {
                eprintln!("Usage: swarmsync spec <specifier>");
                std::process::exit(1);
            }
            let explained = explain(&args[2])?;
            println!("{}", serde_json::to_string_pretty(&explained)?);
        }
        "help" | "--help" | "-h" => {
            print_help();
        }
        cmd => {
            eprintln!("Unknown command: {cmd}");
            print_help();
            std::process::exit(1);
        }
    }

    Ok(())
}

fn encode(number: &str, min_length: usize) -> Result<String> {
    let value: u64 = number.parse().context("Not a decimal number")?;
    base64x64::encode(value, min_length).context("Failed to encode")
}

fn compare(a: &str, b: &str) -> Result<&'static str> {
    let ordering = base64x64::compare(a, b).context("Failed to compare")?;
    Ok(match ordering {
        std::cmp::Ordering::Less => "<",
        std::cmp::Ordering::Equal => "=",
        std::cmp::Ordering::Greater => ">",
    })
}

fn explain(text: &str) -> Result<Value> {
    let spec = Specifier::parse(text).context("Failed to parse specifier")?;

    let tokens: Vec<Value> = spec
        .tokens()
        .iter()
        .map(|token| match token {
            Token::Type(word) => json!({ "type": word.as_str() }),
            Token::Id(stamp) => json!({ "id": explain_stamp(stamp) }),
            Token::Member(word) => json!({ "member": word.as_str() }),
            Token::Stamp(stamp) => json!({ "stamp": explain_stamp(stamp) }),
        })
        .collect();

    Ok(json!({
        "specifier": spec.to_string(),
        "object": spec.object().to_string(),
        "tokens": tokens,
    }))
}

fn explain_stamp(stamp: &Stamp) -> Value {
    // not every value is a calendar instant
    let time = calendar::decode(&stamp.value())
        .ok()
        .and_then(|reading| {
            Utc.timestamp_millis_opt(reading.ms)
                .single()
                .map(|at| json!({
                    "utc": at.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
                    "seq": reading.seq,
                }))
        });

    json!({
        "value": stamp.value().as_str(),
        "origin": stamp.origin().as_str(),
        "time": time,
    })
}

fn print_help() {
    println!(
        r#"SwarmSync CLI

USAGE:
    swarmsync <COMMAND> [OPTIONS]

COMMANDS:
    encode <n> [len]   Encode a number as Base64x64, padded to at least len symbols
    decode <b64>       Decode a Base64x64 value to a number
    compare <a> <b>    Compare two Base64x64 values (<, = or >)
    stamp [origin]     Issue a timestamp from the system clock
    spec <specifier>   Parse a specifier and explain its tokens
    help               Show this help message

EXAMPLES:
    swarmsync encode 1234
    swarmsync compare 1A 1A0
    swarmsync stamp alice
    swarmsync spec "/Model#1ABCDE-alice.title!1ABCDF-bob"
"#
    );
}
