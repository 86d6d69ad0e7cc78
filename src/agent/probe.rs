use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use bytes::Bytes;
use futures_util::Stream;
use tokio::sync::watch;
use tokio::time::Instant;

use crate::control::TestKind;

use super::peer::PeerReader;
use super::runner::ErrorLog;

/// Streaming request body for one probe.
///
/// The first poll records time-to-first-byte, so the measurement reflects
/// when the transport began consuming the payload. Stream probes cycle the
/// chunk list until the test is cancelled; Latency and Request probes send
/// the payload once.
struct ProbePayload {
    reader: Arc<PeerReader>,
    cancel: watch::Receiver<bool>,
    started: Instant,
    ttfb_recorded: bool,
    position: usize,
}

impl Stream for ProbePayload {
    type Item = Result<Bytes, std::io::Error>;

    fn poll_next(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        let this = self.get_mut();
        if !this.ttfb_recorded {
            this.ttfb_recorded = true;
            this.reader.record_ttfb(micros_since(this.started));
        }
        if *this.cancel.borrow() {
            return Poll::Ready(None);
        }

        let chunks = &this.reader.chunks;
        let chunk = match this.reader.kind {
            TestKind::Stream => {
                let chunk = chunks[this.position % chunks.len()].clone();
                this.position = this.position.wrapping_add(1);
                chunk
            }
            TestKind::Latency | TestKind::Request => {
                if this.position >= chunks.len() {
                    return Poll::Ready(None);
                }
                let chunk = chunks[this.position].clone();
                this.position += 1;
                chunk
            }
        };
        this.reader.add_tx(chunk.len() as u64);
        Poll::Ready(Some(Ok(chunk)))
    }
}

/// Issue one request against the peer and record its measurements.
pub(super) async fn run_probe(
    reader: &Arc<PeerReader>,
    errors: &Arc<ErrorLog>,
    cancel: &watch::Receiver<bool>,
) {
    if !reader.request_delay.is_zero() {
        tokio::time::sleep(reader.request_delay).await;
    }
    if *cancel.borrow() {
        return;
    }

    let started = Instant::now();
    let payload = ProbePayload {
        reader: Arc::clone(reader),
        cancel: cancel.clone(),
        started,
        ttfb_recorded: false,
        position: 0,
    };
    let scheme = if reader.insecure { "http" } else { "https" };
    let url = format!("{}://{}{}", scheme, reader.addr, reader.kind.route());

    reader.mark_issued();
    let response = match reader
        .client
        .put(url)
        .body(reqwest::Body::wrap_stream(payload))
        .send()
        .await
    {
        Ok(response) => response,
        Err(err) => {
            if *cancel.borrow() {
                return;
            }
            errors.record(format!("{}: {}", reader.addr, err), "network-error");
            // Hold the token through DialTimeout so failures cannot spin.
            tokio::time::sleep(reader.dial_timeout).await;
            return;
        }
    };

    if response.status() != reqwest::StatusCode::OK {
        errors.record(
            format!(
                "Status code was {}, expected 200 from host {}",
                response.status().as_u16(),
                reader.addr
            ),
            "invalid-status-code",
        );
        tokio::time::sleep(reader.dial_timeout).await;
        return;
    }

    reader.record_round_trip(micros_since(started));

    let mut response = response;
    while let Ok(Some(_)) = response.chunk().await {}
}

fn micros_since(started: Instant) -> i64 {
    i64::try_from(started.elapsed().as_micros()).unwrap_or(i64::MAX)
}
