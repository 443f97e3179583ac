use std::{net::SocketAddr, sync::Arc};

use anyhow::Result;
use http_body_util::Full;
use hyper::{body::Bytes, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::json;
use tokio::net::TcpListener;
use tracing::info;

use bs_store::ItemsRepo;

use crate::service::ItemsProducer;

pub struct InfoServer<R> {
    listen: String,
    max_batch: usize,
    producer: Arc<ItemsProducer<R>>,
}

impl<R: ItemsRepo + 'static> InfoServer<R> {
    pub fn new(listen: String, max_batch: usize, producer: Arc<ItemsProducer<R>>) -> Self {
        Self {
            listen,
            max_batch,
            producer,
        }
    }

    pub async fn serve(self) -> Result<()> {
        let addr: SocketAddr = self.listen.parse()?;
        let listener = TcpListener::bind(addr).await?;
        info!("producer api listening on http://{}", addr);

        let producer = self.producer;
        let max_batch = self.max_batch;

        loop {
            let (stream, _) = listener.accept().await?;
            let producer = producer.clone();

            tokio::spawn(async move {
                let io = TokioIo::new(stream);

                let service = hyper::service::service_fn(move |req: Request<hyper::body::Incoming>| {
                    let producer = producer.clone();
                    async move { handle(req, producer, max_batch).await }
                });

                let _ = hyper::server::conn::http1::Builder::new()
                    .serve_connection(io, service)
                    .await;
            });
        }
    }
}

async fn handle<R: ItemsRepo>(
    req: Request<hyper::body::Incoming>,
    producer: Arc<ItemsProducer<R>>,
    max_batch: usize,
) -> Result<Response<Full<Bytes>>, hyper::Error> {
    let path = req.uri().path().to_string();

    if path == "/healthz" {
        return Ok(json_response(StatusCode::OK, json!({"status": "ok"})));
    }

    if path == "/info" {
        return Ok(json_response(StatusCode::OK, json!({"info": producer.info()})));
    }

    if let Some(raw) = path.strip_prefix("/add-items/") {
        let count: usize = match raw.parse() {
            Ok(n) => n,
            Err(_) => {
                return Ok(json_response(
                    StatusCode::BAD_REQUEST,
                    json!({"error": "count must be a positive integer"}),
                ))
            }
        };
        if count == 0 || count > max_batch {
            return Ok(json_response(
                StatusCode::BAD_REQUEST,
                json!({"error": format!("count must be between 1 and {max_batch}")}),
            ));
        }

        return match producer.generate_items(count).await {
            Ok(ids) => Ok(json_response(
                StatusCode::OK,
                json!({"status": "ok", "items": ids}),
            )),
            Err(e) => Ok(json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                json!({"error": e.to_string()}),
            )),
        };
    }

    Ok(json_response(
        StatusCode::NOT_FOUND,
        json!({"error": "not found"}),
    ))
}

fn json_response(status: StatusCode, body: serde_json::Value) -> Response<Full<Bytes>> {
    Response::builder()
        .status(status)
        .header("content-type", "application/json")
        .body(Full::new(Bytes::from(body.to_string())))
        .unwrap_or_default()
}
