//! Router dispatching requests by verb and path.
//!
//! Routes are exact matches on `(VERB, path)`; verbs are compared
//! case-insensitively. Unmatched requests get `404 Not Found`, or the
//! fallback handler if one is set.

use std::collections::HashMap;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use serde::de::DeserializeOwned;

use super::{BoxFuture, HandlerResult, RequestHandler};
use crate::message::{ReceivedRequest, StreamingResponse};

/// Wrapper that decodes the first body stream as JSON before calling the handler.
///
/// A body that does not decode as `T` is answered with `400 Bad Request`
/// without invoking the handler.
pub struct JsonHandler<F, T, Fut>
where
    F: Fn(T, ReceivedRequest) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: Arc<F>,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> JsonHandler<F, T, Fut>
where
    F: Fn(T, ReceivedRequest) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    /// Create a new JSON handler.
    pub fn new(handler: F) -> Self {
        Self {
            handler: Arc::new(handler),
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> RequestHandler for JsonHandler<F, T, Fut>
where
    F: Fn(T, ReceivedRequest) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, mut request: ReceivedRequest) -> BoxFuture<'static, HandlerResult> {
        let handler = self.handler.clone();
        Box::pin(async move {
            let parsed: T = match request.read_body_json().await {
                Ok(v) => v,
                Err(e) => {
                    tracing::debug!(
                        "Rejecting {} {}: body is not valid JSON: {}",
                        request.verb(),
                        request.path(),
                        e
                    );
                    return Ok(StreamingResponse::bad_request());
                }
            };
            (*handler)(parsed, request).await
        })
    }
}

/// Routes requests to handlers by verb and path.
#[derive(Default)]
pub struct Router {
    routes: HashMap<(String, String), Box<dyn RequestHandler>>,
    fallback: Option<Box<dyn RequestHandler>>,
}

impl Router {
    /// Create an empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for `verb` and `path`, replacing any earlier one.
    pub fn route(
        mut self,
        verb: &str,
        path: impl Into<String>,
        handler: impl RequestHandler,
    ) -> Self {
        self.routes
            .insert((verb.to_ascii_uppercase(), path.into()), Box::new(handler));
        self
    }

    /// Register a `GET` handler.
    pub fn get(self, path: impl Into<String>, handler: impl RequestHandler) -> Self {
        self.route("GET", path, handler)
    }

    /// Register a `POST` handler.
    pub fn post(self, path: impl Into<String>, handler: impl RequestHandler) -> Self {
        self.route("POST", path, handler)
    }

    /// Register a `PUT` handler.
    pub fn put(self, path: impl Into<String>, handler: impl RequestHandler) -> Self {
        self.route("PUT", path, handler)
    }

    /// Register a `DELETE` handler.
    pub fn delete(self, path: impl Into<String>, handler: impl RequestHandler) -> Self {
        self.route("DELETE", path, handler)
    }

    /// Register a handler whose first body stream is decoded as JSON `T`.
    pub fn json<F, T, Fut>(self, verb: &str, path: impl Into<String>, handler: F) -> Self
    where
        F: Fn(T, ReceivedRequest) -> Fut + Send + Sync + 'static,
        T: DeserializeOwned + Send + 'static,
        Fut: Future<Output = HandlerResult> + Send + 'static,
    {
        self.route(verb, path, JsonHandler::new(handler))
    }

    /// Handler for requests no route matches.
    pub fn fallback(mut self, handler: impl RequestHandler) -> Self {
        self.fallback = Some(Box::new(handler));
        self
    }

    /// Whether a route exists for `verb` and `path`.
    pub fn has_route(&self, verb: &str, path: &str) -> bool {
        self.routes
            .contains_key(&(verb.to_ascii_uppercase(), path.to_string()))
    }

    /// Number of registered routes.
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether no routes are registered.
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}

impl RequestHandler for Router {
    fn call(&self, request: ReceivedRequest) -> BoxFuture<'static, HandlerResult> {
        let key = (request.verb().to_ascii_uppercase(), request.path().to_string());
        match self.routes.get(&key).or(self.fallback.as_ref()) {
            Some(handler) => handler.call(request),
            None => {
                tracing::debug!("No route for {} {}", key.0, key.1);
                Box::pin(async { Ok(StreamingResponse::not_found()) })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::assembler::StreamTable;
    use crate::message::RequestHeader;
    use bytes::Bytes;
    use serde::Deserialize;
    use uuid::Uuid;

    fn request(verb: &str, path: &str, body: Option<&'static [u8]>) -> ReceivedRequest {
        let table = StreamTable::new();
        let streams = body
            .map(|bytes| {
                let id = Uuid::new_v4();
                table.feed(id, Bytes::from_static(bytes), true).unwrap();
                vec![table.consume(id).unwrap()]
            })
            .unwrap_or_default();

        ReceivedRequest::new(
            Uuid::new_v4(),
            RequestHeader {
                verb: verb.to_string(),
                path: path.to_string(),
                headers: Default::default(),
                streams: Vec::new(),
            },
            streams,
        )
    }

    #[derive(Deserialize)]
    struct Greeting {
        name: String,
    }

    #[tokio::test]
    async fn test_routes_by_verb_and_path() {
        let router = Router::new()
            .get("/a", |_req: ReceivedRequest| async { Ok(StreamingResponse::new(201)) })
            .post("/a", |_req: ReceivedRequest| async { Ok(StreamingResponse::new(202)) });

        assert_eq!(router.len(), 2);
        assert!(router.has_route("get", "/a"));

        let get = router.call(request("GET", "/a", None)).await.unwrap();
        assert_eq!(get.status_code(), 201);
        let post = router.call(request("post", "/a", None)).await.unwrap();
        assert_eq!(post.status_code(), 202);
    }

    #[tokio::test]
    async fn test_unmatched_is_not_found() {
        let router = Router::new().get("/a", |_req: ReceivedRequest| async {
            Ok(StreamingResponse::ok())
        });

        let response = router.call(request("GET", "/b", None)).await.unwrap();
        assert_eq!(response.status_code(), 404);
        let response = router.call(request("DELETE", "/a", None)).await.unwrap();
        assert_eq!(response.status_code(), 404);
    }

    #[tokio::test]
    async fn test_fallback() {
        let router = Router::new().fallback(|_req: ReceivedRequest| async {
            Ok(StreamingResponse::new(418))
        });

        let response = router.call(request("GET", "/anything", None)).await.unwrap();
        assert_eq!(response.status_code(), 418);
    }

    #[tokio::test]
    async fn test_json_route() {
        let router = Router::new().json("POST", "/greet", |g: Greeting, _req| async move {
            Ok(StreamingResponse::ok().header("greeting", format!("hello {}", g.name)))
        });

        let response = router
            .call(request("POST", "/greet", Some(br#"{"name":"ada"}"#)))
            .await
            .unwrap();
        assert_eq!(response.status_code(), 200);
        assert_eq!(
            response.headers().get("greeting").map(String::as_str),
            Some("hello ada")
        );

        let rejected = router
            .call(request("POST", "/greet", Some(b"not json")))
            .await
            .unwrap();
        assert_eq!(rejected.status_code(), 400);
    }
}
