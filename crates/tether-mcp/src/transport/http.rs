//! Placeholder for a streamable-HTTP transport.

use super::{BoxFuture, Transport};
use crate::dispatcher::Dispatcher;
use crate::error::McpError;
use std::sync::Arc;

const NOT_IMPLEMENTED: &str = "HTTP transport is not implemented";

/// HTTP transport stub. Selecting it yields a clean `Unsupported` error.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    url: String,
}

impl HttpTransport {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

impl Transport for HttpTransport {
    fn connect(&self, _dispatcher: Arc<Dispatcher>) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async move {
            tracing::warn!("Refusing to connect to {}: {NOT_IMPLEMENTED}", self.url);
            Err(McpError::Unsupported(NOT_IMPLEMENTED.to_string()))
        })
    }

    fn send_message(&self, _line: String) -> BoxFuture<'_, Result<(), McpError>> {
        Box::pin(async { Err(McpError::Unsupported(NOT_IMPLEMENTED.to_string())) })
    }

    fn disconnect(&self) -> BoxFuture<'_, ()> {
        Box::pin(async {})
    }

    fn kind(&self) -> &'static str {
        "http"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn connect_is_unsupported() {
        let transport = HttpTransport::new("http://localhost:9/mcp");
        let dispatcher = Arc::new(Dispatcher::new("remote", true));
        let err = transport.connect(dispatcher).await.unwrap_err();
        assert!(matches!(err, McpError::Unsupported(_)));
        assert!(matches!(
            transport.send_message("{}".into()).await,
            Err(McpError::Unsupported(_))
        ));
        transport.disconnect().await;
        assert_eq!(transport.url(), "http://localhost:9/mcp");
    }
}
