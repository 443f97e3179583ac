use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use http_body_util::Full;
use hyper::{body::Bytes, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use bs_metrics::ActivityCounter;

/// Info endpoint for the relay: processed count + last activity.
pub struct InfoServer {
    listen: String,
    stats: Arc<ActivityCounter>,
}

impl InfoServer {
    pub fn new(listen: String, stats: Arc<ActivityCounter>) -> Self {
        Self { listen, stats }
    }

    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self.listen.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("relay api listening on http://{}", addr);

        let stats = self.stats;

        loop {
            let (stream, _) = listener.accept().await?;
            let stats = stats.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = hyper::service::service_fn(move |req: Request<hyper::body::Incoming>| {
                    let stats = stats.clone();
                    async move { handle(req, stats).await }
                });

                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await;
            });
        }
    }
}

async fn handle(
    req: Request<hyper::body::Incoming>,
    stats: Arc<ActivityCounter>,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let (status, body) = match req.uri().path() {
        "/healthz" => (StatusCode::OK, json!({"status": "ok"})),
        "/info" => (
            StatusCode::OK,
            json!({
                "info": {
                    "items_processed": stats.count(),
                    "last_update": stats.last_update(),
                }
            }),
        ),
        _ => (StatusCode::NOT_FOUND, json!({"error": "not found"})),
    };

    Ok(Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default())
}
