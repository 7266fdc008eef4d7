//! JSON-over-HTTP/1.1 call helper for the RPC clients.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Full};
use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::debug;

use crate::error::{RpcError, RpcResult};

/// POST `body` as JSON to `http://{addr}{path}` and decode the JSON answer.
///
/// One connection per call; the whole exchange is bounded by `timeout`.
pub(crate) async fn post_json<Req, Resp>(
    addr: &str,
    path: &str,
    headers: &[(&'static str, String)],
    body: &Req,
    timeout: Duration,
) -> RpcResult<Resp>
where
    Req: Serialize,
    Resp: DeserializeOwned,
{
    let uri = format!("http://{addr}{path}");
    let payload = serde_json::to_vec(body).map_err(|e| RpcError::Codec(e.to_string()))?;

    let exchange = async {
        let stream = tokio::net::TcpStream::connect(addr)
            .await
            .map_err(|e| connect_error(addr, e))?;
        let io = hyper_util::rt::TokioIo::new(stream);
        let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
            .await
            .map_err(|e| connect_error(addr, e))?;

        // Drive the connection in the background.
        tokio::spawn(async move {
            let _ = conn.await;
        });

        let mut builder = http::Request::builder()
            .method("POST")
            .uri(&uri)
            .header("host", addr)
            .header("content-type", "application/json")
            .header("user-agent", "meetgrid-cluster/0.1");
        for (name, value) in headers {
            builder = builder.header(*name, value.as_str());
        }
        let req = builder
            .body(Full::new(Bytes::from(payload)))
            .map_err(|e| RpcError::Codec(e.to_string()))?;

        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| connect_error(addr, e))?;
        let status = resp.status();
        let bytes = resp
            .into_body()
            .collect()
            .await
            .map_err(|e| connect_error(addr, e))?
            .to_bytes();

        if !status.is_success() {
            debug!(%uri, %status, "rpc non-2xx");
            return Err(RpcError::Status {
                addr: addr.to_string(),
                status: status.as_u16(),
                body: String::from_utf8_lossy(&bytes).into_owned(),
            });
        }
        serde_json::from_slice(&bytes).map_err(|e| RpcError::Codec(e.to_string()))
    };

    match tokio::time::timeout(timeout, exchange).await {
        Ok(result) => result,
        Err(_) => {
            debug!(%uri, "rpc timed out");
            Err(RpcError::Timeout {
                addr: addr.to_string(),
            })
        }
    }
}

fn connect_error(addr: &str, e: impl std::fmt::Display) -> RpcError {
    RpcError::Connect {
        addr: addr.to_string(),
        reason: e.to_string(),
    }
}
