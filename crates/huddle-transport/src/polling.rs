//! HTTP long-polling transport.
//!
//! - `POST {poll_path}` opens a session and answers `{"sid": "..."}`.
//! - `GET {poll_path}?sid=..` blocks until the server has events and answers a
//!   JSON array of envelopes (`[]` on an idle timeout).
//! - `POST {poll_path}?sid=..` with one envelope as the body sends an event.
//!
//! Any HTTP error or non-success status on the poll loop ends the link.

use crate::{Link, TransportError};
use futures_util::{Stream, sink};
use huddle::config::{ClientConfig, TransportKind};
use huddle::protocol::Frame;
use reqwest::{Client, Url};
use serde::Deserialize;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::wrappers::ReceiverStream;

#[derive(Debug, Deserialize)]
struct Handshake {
    sid: String,
}

/// Open a long-polling link using `client` (which carries the cookie store).
pub async fn open(config: &ClientConfig, client: Client) -> Result<Link, TransportError> {
    let url = crate::endpoint(&config.server_url, &config.poll_path)?;

    let handshake: Handshake = client
        .post(url.clone())
        .send()
        .await?
        .error_for_status()?
        .json()
        .await?;
    let sid = handshake.sid;
    tracing::debug!(url = %url, sid = %sid, "polling session open");

    let (tx, rx) = mpsc::channel(256);
    let poll_task = tokio::spawn(poll_loop(
        client.clone(),
        url.clone(),
        sid.clone(),
        config.poll_timeout(),
        tx,
    ));

    let send = sink::unfold(
        (client, url, sid),
        |(client, url, sid), frame: Frame| async move {
            client
                .post(url.clone())
                .query(&[("sid", sid.as_str())])
                .json(&frame)
                .send()
                .await?
                .error_for_status()?;
            Ok::<_, TransportError>((client, url, sid))
        },
    );

    Ok(Link {
        transport: TransportKind::Polling.as_str(),
        sink: Box::pin(send),
        stream: Box::pin(PollStream {
            inner: ReceiverStream::new(rx),
            task: poll_task,
        }),
    })
}

async fn poll_loop(
    client: Client,
    url: Url,
    sid: String,
    timeout: Duration,
    tx: mpsc::Sender<Result<Frame, TransportError>>,
) {
    loop {
        let batch = async {
            let frames: Vec<serde_json::Value> = client
                .get(url.clone())
                .query(&[("sid", sid.as_str())])
                .timeout(timeout)
                .send()
                .await?
                .error_for_status()?
                .json()
                .await?;
            Ok::<_, TransportError>(frames)
        }
        .await;

        match batch {
            Ok(frames) => {
                for raw in frames {
                    match serde_json::from_value::<Frame>(raw) {
                        Ok(frame) => {
                            if tx.send(Ok(frame)).await.is_err() {
                                return; // link dropped
                            }
                        }
                        Err(e) => tracing::warn!(err = %e, "dropping malformed polled frame"),
                    }
                }
            }
            Err(e) => {
                tracing::debug!(sid = %sid, err = %e, "poll failed, closing link");
                let _ = tx.send(Err(e)).await;
                return;
            }
        }
    }
}

/// Inbound half of a polling link. Stops the poll loop when dropped.
struct PollStream {
    inner: ReceiverStream<Result<Frame, TransportError>>,
    task: JoinHandle<()>,
}

impl Stream for PollStream {
    type Item = Result<Frame, TransportError>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        Pin::new(&mut self.inner).poll_next(cx)
    }
}

impl Drop for PollStream {
    fn drop(&mut self) {
        self.task.abort();
    }
}
