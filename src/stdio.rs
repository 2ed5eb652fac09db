//! Line-delimited stdio front end.
//!
//! Reads one JSON-RPC message per line from stdin, posts it to the backend
//! and writes the response as one line on stdout. No handshake of its own:
//! the client's `initialize` goes straight through.

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use url::Url;

use crate::protocol::{JsonRpcError, JsonRpcRequest, JsonRpcResponse, Transport, TransportError};
use crate::upstream::HttpTransport;

#[derive(Debug, Error)]
pub enum StdioError {
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error("stdio failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Bridge stdin/stdout to the backend at `url` until stdin closes.
pub async fn run(url: Url) -> Result<(), StdioError> {
    let transport = HttpTransport::new(url)?;
    tracing::info!(endpoint = %transport.endpoint(), "Stdio bridge started");

    let stdin = BufReader::new(tokio::io::stdin());
    let stdout = tokio::io::stdout();
    let handled = pump(&transport, stdin, stdout).await?;

    transport.close().await?;
    tracing::info!(messages = handled, "Stdio bridge finished");
    Ok(())
}

/// Forward every line of `input` and write responses to `output`.
/// Returns the number of messages forwarded.
pub async fn pump<R, W>(transport: &dyn Transport, input: R, mut output: W) -> std::io::Result<usize>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut lines = input.lines();
    let mut forwarded = 0;

    while let Some(line) = lines.next_line().await? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        let request: JsonRpcRequest = match serde_json::from_str(line) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!(error = %e, "Undecodable input line");
                let response = JsonRpcResponse::failure(None, JsonRpcError::parse_error(e));
                write_line(&mut output, &response).await?;
                continue;
            }
        };

        forwarded += 1;
        let response = match transport.send(&request).await {
            Ok(response) => response,
            Err(e) if request.is_notification() => {
                tracing::warn!(method = %request.method, error = %e, "Notification not delivered");
                None
            }
            Err(e) => Some(JsonRpcResponse::failure(
                request.id.clone(),
                JsonRpcError::internal(format!("HTTP request failed: {}", e)),
            )),
        };

        if let Some(response) = response {
            write_line(&mut output, &response).await?;
        }
    }

    Ok(forwarded)
}

async fn write_line<W>(output: &mut W, response: &JsonRpcResponse) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut text = serde_json::to_string(response)?;
    text.push('\n');
    output.write_all(text.as_bytes()).await?;
    output.flush().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::transport::scripted::ScriptedTransport;
    use serde_json::Value;

    async fn run_lines(transport: &ScriptedTransport, input: &str) -> (usize, Vec<Value>) {
        let mut output = Vec::new();
        let forwarded = pump(transport, input.as_bytes(), &mut output).await.unwrap();
        let responses = String::from_utf8(output)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        (forwarded, responses)
    }

    #[tokio::test]
    async fn test_forwards_each_line() {
        let transport = ScriptedTransport::echo();
        let input = "{\"jsonrpc\":\"2.0\",\"id\":1,\"method\":\"tools/list\"}\n\n\
                     {\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n\
                     {\"jsonrpc\":\"2.0\",\"id\":\"b\",\"method\":\"prompts/list\"}\n";

        let (forwarded, responses) = run_lines(&transport, input).await;
        assert_eq!(forwarded, 3);
        assert_eq!(responses.len(), 2);
        assert_eq!(responses[0]["id"], 1);
        assert_eq!(responses[0]["result"]["method"], "tools/list");
        assert_eq!(responses[1]["id"], "b");
    }

    #[tokio::test]
    async fn test_undecodable_line_is_parse_error() {
        let transport = ScriptedTransport::echo();
        let (forwarded, responses) = run_lines(&transport, "{oops\n").await;

        assert_eq!(forwarded, 0);
        assert_eq!(responses[0]["error"]["code"], JsonRpcError::PARSE_ERROR);
        assert_eq!(responses[0]["id"], Value::Null);
        assert!(transport.methods().is_empty());
    }

    #[tokio::test]
    async fn test_transport_failure_keeps_request_id() {
        let transport = ScriptedTransport::new(|_| Err(TransportError::Connect("refused".into())));
        let input = "{\"jsonrpc\":\"2.0\",\"id\":42,\"method\":\"tools/call\"}\n\
                     {\"jsonrpc\":\"2.0\",\"method\":\"notifications/initialized\"}\n";

        let (_, responses) = run_lines(&transport, input).await;
        assert_eq!(responses.len(), 1);
        assert_eq!(responses[0]["id"], 42);
        assert_eq!(responses[0]["error"]["code"], JsonRpcError::INTERNAL_ERROR);
        assert!(responses[0]["error"]["message"]
            .as_str()
            .unwrap()
            .starts_with("HTTP request failed"));
    }
}
