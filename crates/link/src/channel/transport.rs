// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

use std::future::{ready, Future};
use std::pin::Pin;

use futures_util::{SinkExt, StreamExt};
use tokio_tungstenite::tungstenite::Message;

use super::{Link, WsConnector};
use crate::gateway::transport::ensure_crypto;

/// WebSocket connector over tokio-tungstenite. Only text frames are surfaced;
/// the stream ends at the first close frame.
#[derive(Debug, Default, Clone, Copy)]
pub struct TungsteniteConnector;

impl WsConnector for TungsteniteConnector {
    fn connect(&self, url: String) -> Pin<Box<dyn Future<Output = anyhow::Result<Link>> + Send + '_>> {
        Box::pin(async move {
            ensure_crypto();
            let (ws_stream, _) = tokio_tungstenite::connect_async(url.as_str()).await?;
            let (write, read) = ws_stream.split();

            let sink = write.with(|text: String| ready(Ok::<_, anyhow::Error>(Message::Text(text.into()))));
            let stream = read
                .take_while(|msg| ready(!matches!(msg, Ok(Message::Close(_)))))
                .filter_map(|msg| {
                    ready(match msg {
                        Ok(Message::Text(text)) => Some(Ok(text.to_string())),
                        Ok(_) => None, // ping/pong/binary ignored
                        Err(e) => Some(Err(anyhow::Error::from(e))),
                    })
                });

            Ok(Link { sink: Box::pin(sink), stream: stream.boxed() })
        })
    }
}
