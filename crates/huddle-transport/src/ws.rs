use crate::{Link, TransportError};
use futures_util::{SinkExt, StreamExt, future};
use huddle::config::{ClientConfig, TransportKind};
use huddle::protocol::Frame;
use reqwest::Url;
use reqwest::cookie::{CookieStore, Jar};
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::http::header::{COOKIE, SET_COOKIE};

/// `ws(s)://` URL for the configured server and path.
pub fn websocket_url(config: &ClientConfig) -> Result<Url, TransportError> {
    let mut url = crate::endpoint(&config.server_url, &config.ws_path)?;
    let scheme = if url.scheme() == "https" { "wss" } else { "ws" };
    url.set_scheme(scheme)
        .map_err(|()| TransportError::InvalidUrl {
            url: url.to_string(),
            reason: format!("cannot switch scheme to {scheme}"),
        })?;
    Ok(url)
}

/// Open a WebSocket link. One JSON envelope per text frame.
///
/// When a cookie jar is given, its cookies for the server origin are sent
/// with the upgrade request, and cookies set by the handshake response are
/// stored back into it.
pub async fn open(config: &ClientConfig, jar: Option<&Jar>) -> Result<Link, TransportError> {
    let url = websocket_url(config)?;
    let origin = crate::endpoint(&config.server_url, "/")?;
    let mut request = url.as_str().into_client_request()?;

    if let Some(jar) = jar
        && let Some(cookies) = jar.cookies(&origin)
        && let Ok(value) = HeaderValue::from_bytes(cookies.as_bytes())
    {
        request.headers_mut().insert(COOKIE, value);
    }

    let (socket, response) = connect_async(request).await?;
    if let Some(jar) = jar {
        jar.set_cookies(&mut response.headers().get_all(SET_COOKIE).iter(), &origin);
    }
    tracing::debug!(url = %url, "websocket open");

    let (write, read) = socket.split();

    let sink = write.with(|frame: Frame| {
        future::ready(
            frame
                .encode()
                .map(Message::text)
                .map_err(TransportError::from),
        )
    });

    let stream = read.filter_map(|message| {
        future::ready(match message {
            Ok(Message::Text(text)) => match Frame::decode(&text) {
                Ok(frame) => Some(Ok(frame)),
                Err(e) => {
                    tracing::warn!(err = %e, "dropping malformed websocket frame");
                    None
                }
            },
            Ok(Message::Close(reason)) => {
                tracing::debug!(?reason, "websocket closed by server");
                None
            }
            Ok(_) => None,
            Err(e) => Some(Err(TransportError::from(e))),
        })
    });

    Ok(Link {
        transport: TransportKind::Websocket.as_str(),
        sink: Box::pin(sink),
        stream: Box::pin(stream),
    })
}
