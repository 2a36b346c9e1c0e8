//! Line-oriented driver for a replica.
//!
//! Each input line is one request:
//!
//! - `+<specifier>\t<value>` emits a local operation; replies `new <op>`
//! - `?<stream>\t<version vector>` asks for what a peer is missing;
//!   replies one `op <op>` line per operation, then `end <count>`
//! - any other non-empty line is an operation to apply; replies
//!   `ok <stamp>` or `dup <stamp>`
//!
//! Requests that cannot be parsed are answered with `err <reason>` and do
//! not stop the loop.

use crate::persistence::ReplicaStore;
use crate::replica::{Applied, ModelSink, Replica};
use anyhow::{Context, Result};
use std::future::Future;
use swarmsync_core::{Op, Specifier, Stamp, TimeSource, VersionVector};
use swarmsync_proto::Handshake;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};

/// Serve requests from `input` until it ends or `shutdown` resolves.
///
/// # Errors
///
/// Returns error if reading, writing or persisting fails.
pub async fn run<S, M, T, R, W>(
    replica: &mut Replica<S, M, T>,
    input: R,
    mut output: W,
    shutdown: impl Future<Output = ()>,
) -> Result<()>
where
    S: ReplicaStore,
    M: ModelSink,
    T: TimeSource,
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    tracing::info!(origin = %replica.origin(), "Replica running");

    let mut lines = input.lines();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("Failed to read request")? else {
                    tracing::debug!("Input closed");
                    break;
                };
                for reply in respond(replica, &line)? {
                    output.write_all(reply.as_bytes()).await?;
                    output.write_all(b"\n").await?;
                }
                output.flush().await?;
            }

            () = &mut shutdown => {
                tracing::info!("Shutdown signal received");
                break;
            }
        }
    }

    tracing::info!(last = %replica.last(), "Replica stopped");
    Ok(())
}

/// Answer one request line.
///
/// # Errors
///
/// Returns error only if persisting fails; malformed requests get an
/// `err` reply.
pub fn respond<S, M, T>(replica: &mut Replica<S, M, T>, line: &str) -> Result<Vec<String>>
where
    S: ReplicaStore,
    M: ModelSink,
    T: TimeSource,
{
    let line = line.trim_end_matches('\r');

    if line.is_empty() {
        return Ok(Vec::new());
    }

    if let Some(request) = line.strip_prefix('+') {
        let (spec, value) = request.split_once('\t').unwrap_or((request, ""));
        let spec = match Specifier::parse(spec) {
            Ok(spec) => spec,
            Err(err) => return Ok(vec![format!("err {err}")]),
        };
        let op = replica.emit(spec, value)?;
        return Ok(vec![format!("new {op}")]);
    }

    if let Some(request) = line.strip_prefix('?') {
        let (stream, vv) = request.split_once('\t').unwrap_or((request, ""));
        let hello = match (Specifier::parse(stream), VersionVector::parse(vv)) {
            (Ok(stream), Ok(vv)) => Handshake::new(stream, Stamp::ZERO, vv),
            (Err(err), _) | (_, Err(err)) => return Ok(vec![format!("err {err}")]),
        };
        let batch = replica.missing_for(&hello)?;
        let mut replies: Vec<String> = batch.ops.iter().map(|op| format!("op {op}")).collect();
        replies.push(format!("end {}", batch.len()));
        return Ok(replies);
    }

    let op = match Op::parse(line) {
        Ok(op) => op,
        Err(err) => {
            tracing::warn!(request = line, error = %err, "Malformed request");
            return Ok(vec![format!("err {err}")]);
        }
    };

    let reply = match replica.apply(&op)? {
        Applied::New => format!("ok {}", op.stamp()),
        Applied::Duplicate => format!("dup {}", op.stamp()),
    };
    Ok(vec![reply])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryStore;
    use swarmsync_core::{Base64x64, Clock, ClockOptions, ManualTime};

    // 2024-05-06 07:08:09.000 UTC
    const NOW_MS: i64 = 1_714_979_289_000;

    fn replica() -> TestReplica {
        let initial = Stamp::new(Base64x64::ZERO, Base64x64::parse("bob").unwrap());
        let clock =
            Clock::with_time_source(initial, ClockOptions::default(), ManualTime::new(NOW_MS))
                .unwrap();
        Replica::with_clock(clock, MemoryStore::new(), Vec::new()).unwrap()
    }

    type TestReplica = Replica<MemoryStore, Vec<Op>, ManualTime>;

    async fn serve(replica: &mut TestReplica, input: &str) -> Vec<String> {
        let mut output = Vec::new();
        run(replica, input.as_bytes(), &mut output, std::future::pending())
            .await
            .unwrap();
        String::from_utf8(output)
            .unwrap()
            .lines()
            .map(ToString::to_string)
            .collect()
    }

    #[tokio::test]
    async fn applies_and_filters_ops() {
        let mut bob = replica();
        let replies = serve(
            &mut bob,
            "/Model#1A-alice!1ABCDE-alice\tx=1\n\
             /Model#1A-alice!1ABCDE-alice\tx=1\n\
             \n\
             /Model#1A-alice.set\n",
        )
        .await;

        assert_eq!(replies.len(), 3);
        assert_eq!(replies[0], "ok 1ABCDE-alice");
        assert_eq!(replies[1], "dup 1ABCDE-alice");
        assert!(replies[2].starts_with("err "), "{}", replies[2]);
        assert_eq!(bob.sink().len(), 1);
    }

    #[tokio::test]
    async fn emits_local_ops() {
        let mut bob = replica();
        let replies = serve(&mut bob, "+/Model#1A-alice.set\tx=2\n+/Model%\n").await;

        assert_eq!(replies.len(), 2);
        let op = Op::parse(replies[0].strip_prefix("new ").unwrap()).unwrap();
        assert_eq!(op.origin().as_str(), "bob");
        assert_eq!(op.value(), "x=2");
        assert_eq!(op.spec().member(), "set");
        assert!(replies[1].starts_with("err "));
    }

    #[tokio::test]
    async fn lists_missing_ops() {
        let mut bob = replica();
        let replies = serve(
            &mut bob,
            "/Model#1A-alice!1ABCDF-carol\tc\n\
             /Model#1A-alice!1ABCDE-alice\ta\n\
             ?/Model#1A-alice\tcarol:1ABCDF\n\
             ?/Model#1A-alice\tcarol\n",
        )
        .await;

        assert_eq!(
            replies,
            [
                "ok 1ABCDF-carol",
                "ok 1ABCDE-alice",
                "op /Model#1A-alice!1ABCDE-alice\ta",
                "end 1",
                replies[4].as_str(),
            ]
        );
        assert!(replies[4].starts_with("err "));
    }

    #[tokio::test]
    async fn stops_on_shutdown() {
        let mut bob = replica();
        let (_writer, reader) = tokio::io::duplex(64);
        let mut output = Vec::new();
        run(
            &mut bob,
            tokio::io::BufReader::new(reader),
            &mut output,
            std::future::ready(()),
        )
        .await
        .unwrap();
        assert!(output.is_empty());
    }
}
