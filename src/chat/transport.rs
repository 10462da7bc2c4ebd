//! Transport to the streaming chat endpoint.
//!
//! The endpoint answers with a plain text body produced incrementally: no
//! framing, no end marker. [`TextFragments`] turns the raw chunks into a
//! lazy, finite sequence of decoded text.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, ready};

use futures::{Stream, StreamExt};
use reqwest::Client;
use tracing::debug;
use url::Url;

use super::decoder::Utf8ChunkDecoder;
use super::error::{ChatError, ChatResult};

/// Raw body chunks in arrival order.
pub type ChunkStream = Pin<Box<dyn Stream<Item = ChatResult<Vec<u8>>> + Send>>;

/// Boxed future returned by [`ChatTransport::open_stream`].
pub type TransportFuture<'a> = Pin<Box<dyn Future<Output = ChatResult<ChunkStream>> + Send + 'a>>;

/// Something able to send a question and hand back the answer body.
pub trait ChatTransport: Send + Sync {
    /// Send `question`; resolves once the response body starts.
    ///
    /// # Errors
    /// Returns an error on network failure or a non-success status.
    fn open_stream(&self, question: &str) -> TransportFuture<'_>;
}

/// HTTP transport for `POST /api/rag/chat?question=...`.
#[derive(Clone, Debug)]
pub struct HttpChatTransport {
    client: Client,
    endpoint: Url,
}

impl HttpChatTransport {
    /// Create a transport posting to `endpoint`.
    #[must_use]
    pub const fn new(client: Client, endpoint: Url) -> Self {
        Self { client, endpoint }
    }
}

impl ChatTransport for HttpChatTransport {
    fn open_stream(&self, question: &str) -> TransportFuture<'_> {
        let question = question.to_string();
        Box::pin(async move {
            let response = self
                .client
                .post(self.endpoint.clone())
                .query(&[("question", question.as_str())])
                .send()
                .await?;

            let status = response.status();
            if !status.is_success() {
                return Err(ChatError::HttpStatus(status.as_u16()));
            }
            debug!(status = status.as_u16(), "Chat stream opened");

            let chunks = response
                .bytes_stream()
                .map(|item| item.map(|bytes| bytes.to_vec()).map_err(ChatError::from));
            Ok(Box::pin(chunks) as ChunkStream)
        })
    }
}

/// Decoded text fragments of a chunk stream.
///
/// Each item is the text completed by one chunk; chunks that only carry the
/// start of a multi-byte character yield nothing until it completes. The
/// sequence ends after the first error or when the body ends.
pub struct TextFragments {
    chunks: ChunkStream,
    decoder: Utf8ChunkDecoder,
    finished: bool,
}

impl TextFragments {
    /// Wrap a chunk stream.
    #[must_use]
    pub const fn new(chunks: ChunkStream) -> Self {
        Self {
            chunks,
            decoder: Utf8ChunkDecoder::new(),
            finished: false,
        }
    }
}

impl Stream for TextFragments {
    type Item = ChatResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if self.finished {
            return Poll::Ready(None);
        }

        loop {
            match ready!(self.chunks.poll_next_unpin(cx)) {
                Some(Ok(bytes)) => {
                    let text = self.decoder.decode(&bytes);
                    if !text.is_empty() {
                        return Poll::Ready(Some(Ok(text)));
                    }
                }
                Some(Err(err)) => {
                    self.finished = true;
                    return Poll::Ready(Some(Err(err)));
                }
                None => {
                    self.finished = true;
                    let tail = self.decoder.finish();
                    return Poll::Ready((!tail.is_empty()).then_some(Ok(tail)));
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::convert::Infallible;

    use axum::Router;
    use axum::body::Body;
    use axum::extract::Query;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use futures::stream;
    use serde::Deserialize;

    fn chunks_of(parts: &[&[u8]]) -> ChunkStream {
        let owned: Vec<ChatResult<Vec<u8>>> = parts.iter().map(|p| Ok(p.to_vec())).collect();
        Box::pin(stream::iter(owned))
    }

    #[tokio::test]
    async fn test_fragments_preserve_order() {
        let fragments: Vec<String> = TextFragments::new(chunks_of(&[b"Bon".as_slice(), b"jour".as_slice(), b"!".as_slice()]))
            .filter_map(|item| async move { item.ok() })
            .collect()
            .await;
        assert_eq!(fragments, vec!["Bon", "jour", "!"]);
    }

    #[tokio::test]
    async fn test_fragments_join_split_character() {
        // "é" split across two chunks yields a single fragment.
        let fragments: Vec<String> = TextFragments::new(chunks_of(&[b"caf\xC3".as_slice(), b"\xA9".as_slice()]))
            .filter_map(|item| async move { item.ok() })
            .collect()
            .await;
        assert_eq!(fragments, vec!["caf", "é"]);
    }

    #[tokio::test]
    async fn test_fragments_stop_after_error() {
        let source: ChunkStream = Box::pin(stream::iter(vec![
            Ok(b"a".to_vec()),
            Err(ChatError::HttpStatus(500)),
            Ok(b"b".to_vec()),
        ]));
        let items: Vec<ChatResult<String>> = TextFragments::new(source).collect().await;
        assert_eq!(items.len(), 2);
        assert!(matches!(items[1], Err(ChatError::HttpStatus(500))));
    }

    #[derive(Deserialize)]
    struct QuestionParams {
        question: String,
    }

    async fn streaming_answer(Query(params): Query<QuestionParams>) -> Response {
        if params.question == "panne" {
            return (StatusCode::INTERNAL_SERVER_ERROR, "boom").into_response();
        }
        let parts: Vec<Result<String, Infallible>> = vec![
            Ok("Réponse à ".to_string()),
            Ok(params.question),
            Ok(".".to_string()),
        ];
        Body::from_stream(stream::iter(parts)).into_response()
    }

    async fn spawn_server() -> Option<Url> {
        let app = Router::new().route("/api/rag/chat", post(streaming_answer));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.ok()?;
        let addr = listener.local_addr().ok()?;
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        Url::parse(&format!("http://{addr}/api/rag/chat")).ok()
    }

    #[tokio::test]
    async fn test_http_transport_streams_body() {
        let Some(endpoint) = spawn_server().await else {
            return;
        };
        let transport = HttpChatTransport::new(Client::new(), endpoint);

        let chunks = transport.open_stream("Qui es-tu ?").await;
        assert!(chunks.is_ok());
        let Ok(chunks) = chunks else { return };

        let text: String = TextFragments::new(chunks)
            .filter_map(|item| async move { item.ok() })
            .collect::<Vec<_>>()
            .await
            .concat();
        assert_eq!(text, "Réponse à Qui es-tu ?.");
    }

    #[tokio::test]
    async fn test_http_transport_reports_status() {
        let Some(endpoint) = spawn_server().await else {
            return;
        };
        let transport = HttpChatTransport::new(Client::new(), endpoint);

        let result = transport.open_stream("panne").await;
        assert!(matches!(result, Err(ChatError::HttpStatus(500))));
    }
}
