//! REST ingress: the create endpoint and the streaming query endpoint.
//!
//! Both handlers sit behind an access logger and a panic catcher. The
//! query response is streamed: records leave the executor through a
//! bounded channel and are written as they are produced, so the
//! historical 302 status and the
//! `{"results":[…],"complete":…,"count":…}` envelope hold even for very
//! large result sets.

use std::convert::Infallible;
use std::net::SocketAddr;
use std::time::Instant;

use axum::body::{Body, Bytes};
use axum::extract::{ConnectInfo, DefaultBodyLimit, Query, State};
use axum::http::{header, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Extension, Json, Router};
use serde::Deserialize;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tower::ServiceExt;
use tower_http::catch_panic::CatchPanicLayer;
use tracing::{debug, error, info};

use slogger_core::{Error, LogRecord};

use crate::pipeline::{append, stream_records, QUERY_STREAM_DEPTH};
use crate::query::{order_by_clause, parse_sort, translate};
use crate::SharedState;

/// Create bodies are bounded to 1 MiB.
pub const MAX_BODY_BYTES: usize = 1024 * 1024;

/// TLS client identity attached to requests arriving over HTTPS.
#[derive(Debug, Clone)]
pub struct ClientIdentity {
    pub common_name: Option<String>,
}

/// Error wrapper giving the shared taxonomy its HTTP form.
pub struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(err: Error) -> Self {
        ApiError(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::BadInput(_) | Error::BadQuery(_) => StatusCode::UNPROCESSABLE_ENTITY,
            Error::Storage(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            error!(error = %self.0, "request failed");
        }
        (status, format!("{}\n", self.0)).into_response()
    }
}

pub fn router(state: SharedState) -> Router {
    Router::new()
        .route("/logitem/create", post(create_log_item))
        .route("/logitem/query", get(query_log_items))
        .layer(DefaultBodyLimit::max(MAX_BODY_BYTES))
        .layer(CatchPanicLayer::new())
        .layer(middleware::from_fn(access_log))
        .with_state(state)
}

/// Method, URI, route name and elapsed time for every request.
async fn access_log(req: axum::extract::Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().clone();
    let uri = req.uri().clone();
    let route = route_name(uri.path());
    let response = next.run(req).await;
    info!(%method, %uri, route, elapsed = ?start.elapsed(), "request");
    response
}

fn route_name(path: &str) -> &'static str {
    match path {
        "/logitem/create" => "CreateLogItem",
        "/logitem/query" => "QueryLogItem",
        _ => "-",
    }
}

async fn create_log_item(
    State(state): State<SharedState>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    identity: Option<Extension<ClientIdentity>>,
    body: Bytes,
) -> Result<(StatusCode, Json<LogRecord>), ApiError> {
    let mut record: LogRecord =
        serde_json::from_slice(&body).map_err(|_| Error::bad_input("cannot parse JSON"))?;

    // The transport, not the payload, decides the originator address.
    record.originator_ip = String::new();
    record.originator_port = 0;
    if let Some(ConnectInfo(addr)) = connect_info {
        record.originator_ip = addr.ip().to_string();
        record.originator_port = addr.port().into();
    }
    if let Some(Extension(identity)) = identity {
        if let Some(common_name) = identity.common_name {
            record.client_name = common_name;
        }
    }

    record.normalise();
    append(&state.store, &state.hasher, state.shard_group, &mut record).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

#[derive(Debug, Default, Deserialize)]
struct QueryParams {
    query: Option<String>,
    sort: Option<String>,
    limit: Option<String>,
}

async fn query_log_items(
    State(state): State<SharedState>,
    Query(params): Query<QueryParams>,
) -> Result<Response, ApiError> {
    let query_doc = match params.query.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => serde_json::from_str::<serde_json::Value>(raw)
            .map_err(|err| Error::bad_query(err.to_string()))?,
        None => serde_json::Value::Object(serde_json::Map::new()),
    };
    let store_query = translate(&query_doc)?;

    let limit = match params.limit.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => raw
            .parse::<i64>()
            .map_err(|_| Error::bad_query("cannot parse limit"))?,
        None => 0,
    };

    let sort_keys = match params.sort.as_deref().filter(|s| !s.is_empty()) {
        Some(raw) => parse_sort(raw)?,
        None => Vec::new(),
    };
    let order_by = order_by_clause(&sort_keys);

    let (record_tx, mut record_rx) = mpsc::channel::<LogRecord>(QUERY_STREAM_DEPTH);
    let (byte_tx, byte_rx) = mpsc::channel::<Result<Bytes, Infallible>>(QUERY_STREAM_DEPTH);

    let worker_state = state.clone();
    let producer = tokio::task::spawn_blocking(move || {
        stream_records(
            &worker_state.store,
            &worker_state.hasher,
            &store_query,
            &order_by,
            limit,
            &record_tx,
        )
    });

    tokio::spawn(async move {
        let _ = byte_tx
            .send(Ok(Bytes::from_static(b"{\"results\":[\n")))
            .await;
        let mut first = true;
        while let Some(record) = record_rx.recv().await {
            let mut chunk = if first { String::new() } else { ",\n".to_string() };
            first = false;
            match serde_json::to_string(&record) {
                Ok(json) => chunk.push_str(&json),
                Err(err) => {
                    error!(%err, "cannot encode record");
                    break;
                }
            }
            if byte_tx.send(Ok(Bytes::from(chunk))).await.is_err() {
                break;
            }
        }
        // Unblock the producer if we bailed out early.
        drop(record_rx);

        match producer.await {
            Ok(Ok((count, complete))) => {
                let footer = format!("],\"complete\":{complete},\"count\":{count}}}\n");
                let _ = byte_tx.send(Ok(Bytes::from(footer))).await;
            }
            Ok(Err(err)) => {
                // Headers are long gone; truncating the body is the only
                // way left to signal the failure.
                error!(error = %err, "query iteration failed");
            }
            Err(err) => {
                error!(%err, "query worker panicked");
            }
        }
    });

    debug!("query stream started");
    Ok((
        StatusCode::FOUND,
        [(header::CONTENT_TYPE, "application/json; charset=UTF-8")],
        Body::from_stream(ReceiverStream::new(byte_rx)),
    )
        .into_response())
}

/// Serve plain HTTP.
pub async fn serve_http(
    listener: tokio::net::TcpListener,
    router: Router,
) -> std::io::Result<()> {
    axum::serve(
        listener,
        router.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
}

/// Serve HTTPS with optional mutual TLS.
///
/// The accept loop is hand-rolled so the leaf client certificate is in
/// hand when the connection is served; its CommonName rides along as a
/// request extension for `create` to record.
pub async fn serve_https(
    listener: tokio::net::TcpListener,
    acceptor: tokio_rustls::TlsAcceptor,
    router: Router,
) -> std::io::Result<()> {
    use hyper_util::rt::{TokioExecutor, TokioIo};

    loop {
        let (tcp, addr) = listener.accept().await?;
        let acceptor = acceptor.clone();
        let router = router.clone();
        tokio::spawn(async move {
            let tls = match acceptor.accept(tcp).await {
                Ok(stream) => stream,
                Err(err) => {
                    debug!(%err, "tls handshake failed");
                    return;
                }
            };
            let identity = ClientIdentity {
                common_name: tls
                    .get_ref()
                    .1
                    .peer_certificates()
                    .and_then(|certs| certs.first())
                    .and_then(crate::tls::peer_common_name),
            };

            let service = hyper::service::service_fn(move |mut req: hyper::Request<hyper::body::Incoming>| {
                req.extensions_mut().insert(ConnectInfo(addr));
                req.extensions_mut().insert(identity.clone());
                let router = router.clone();
                async move { router.oneshot(req.map(Body::new)).await }
            });

            if let Err(err) = hyper_util::server::conn::auto::Builder::new(TokioExecutor::new())
                .serve_connection_with_upgrades(TokioIo::new(tls), service)
                .await
            {
                debug!(error = %err, "https connection error");
            }
        });
    }
}
