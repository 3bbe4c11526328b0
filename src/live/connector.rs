//! Transport seam for the push channel.

use async_trait::async_trait;
use futures_util::{future, Sink, SinkExt, Stream, StreamExt};
use std::pin::Pin;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;

use crate::error::LiveError;

pub type FrameStream = Pin<Box<dyn Stream<Item = Result<String, LiveError>> + Send>>;
pub type FrameSink = Pin<Box<dyn Sink<String, Error = LiveError> + Send>>;

/// An open push connection as a pair of text-frame halves. The stream ends
/// when the server closes the connection.
pub struct PushConnection {
  pub sink: FrameSink,
  pub stream: FrameStream,
}

#[async_trait]
pub trait Connector: Send + Sync {
  async fn connect(&self, token: Option<&str>) -> Result<PushConnection, LiveError>;
}

/// WebSocket connector. The bearer token travels in the upgrade request.
pub struct WsConnector {
  url: String,
}

impl WsConnector {
  pub fn new(url: &str) -> Self {
    let url = if url.starts_with("ws://") || url.starts_with("wss://") {
      url.into()
    } else {
      format!("ws://{}", url)
    };
    Self { url }
  }

  pub fn url(&self) -> &str {
    &self.url
  }
}

#[async_trait]
impl Connector for WsConnector {
  async fn connect(&self, token: Option<&str>) -> Result<PushConnection, LiveError> {
    let mut request = self.url.as_str().into_client_request()?;
    if let Some(token) = token {
      let value = HeaderValue::from_str(&format!("Bearer {}", token))
        .map_err(|e| LiveError::Connect(e.to_string()))?;
      request.headers_mut().insert(AUTHORIZATION, value);
    }

    let (ws, _) = tokio_tungstenite::connect_async(request)
      .await
      .map_err(|e| LiveError::Connect(e.to_string()))?;
    let (sink, stream) = ws.split();

    let sink = sink
      .sink_map_err(LiveError::from)
      .with(|text: String| future::ready(Ok::<_, LiveError>(Message::Text(text.into()))));

    let stream = stream
      .take_while(|msg| future::ready(!matches!(msg, Ok(Message::Close(_)))))
      .filter_map(|msg| {
        future::ready(match msg {
          Ok(Message::Text(text)) => Some(Ok(text.to_string())),
          Ok(_) => None,
          Err(e) => Some(Err(LiveError::from(e))),
        })
      });

    Ok(PushConnection {
      sink: Box::pin(sink),
      stream: Box::pin(stream),
    })
  }
}
