use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use http_body_util::Full;
use hyper::{body::Bytes, Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use bs_metrics::ActivityCounter;
use bs_store::IndexStore;

use crate::ConnectionHandle;

const SEARCH_LIMIT: i64 = 50;

pub struct InfoServer<I> {
    listen: String,
    stats: Arc<ActivityCounter>,
    conn: ConnectionHandle,
    index: I,
}

impl<I: IndexStore + Clone + 'static> InfoServer<I> {
    pub fn new(
        listen: String,
        stats: Arc<ActivityCounter>,
        conn: ConnectionHandle,
        index: I,
    ) -> Self {
        Self {
            listen,
            stats,
            conn,
            index,
        }
    }

    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self.listen.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("consumer api listening on http://{}", addr);

        let stats = self.stats;
        let conn = self.conn;
        let index = self.index;

        loop {
            let (stream, _) = listener.accept().await?;
            let stats = stats.clone();
            let conn = conn.clone();
            let index = index.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = hyper::service::service_fn(move |req: Request<hyper::body::Incoming>| {
                    let stats = stats.clone();
                    let conn = conn.clone();
                    let index = index.clone();
                    async move { handle(req, stats, conn, index).await }
                });

                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await;
            });
        }
    }
}

async fn handle<I: IndexStore>(
    req: Request<hyper::body::Incoming>,
    stats: Arc<ActivityCounter>,
    conn: ConnectionHandle,
    index: I,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    match (req.method(), req.uri().path()) {
        (&Method::GET, "/healthz") => Ok(json_response(StatusCode::OK, json!({"status": "ok"}))),

        (&Method::GET, "/info") => Ok(json_response(
            StatusCode::OK,
            json!({
                "info": {
                    "items_consumed": stats.count(),
                    "last_update": stats.last_update(),
                    "connection": conn.state().as_str(),
                }
            }),
        )),

        (&Method::POST, "/refresh-connection") => {
            conn.request_refresh();
            Ok(json_response(
                StatusCode::ACCEPTED,
                json!({"status": "reconnect requested"}),
            ))
        }

        (&Method::GET, "/items") => {
            let term = req
                .uri()
                .query()
                .and_then(|qs| qs.split('&').find_map(|kv| kv.strip_prefix("q=")))
                .unwrap_or("");

            match index.search(term, SEARCH_LIMIT).await {
                Ok(items) => Ok(json_response(StatusCode::OK, json!({"items": items}))),
                Err(e) => Ok(json_response(
                    StatusCode::SERVICE_UNAVAILABLE,
                    json!({"error": e.to_string()}),
                )),
            }
        }

        _ => Ok(json_response(
            StatusCode::NOT_FOUND,
            json!({"error": "not found"}),
        )),
    }
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default()
}
