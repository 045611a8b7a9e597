use crate::status_bridge::model::StatusModel;
use chrono::{DateTime, Utc};
use log::{error, info};
use serde_json::json;
use spectrumcore::ingest::MessageQueue;
use spectrumcore::IngestContext;
use std::net::SocketAddr;
use std::sync::Arc;
use warp::{http::StatusCode, hyper::body::Bytes, Filter};

/// Failure and health rows returned by `GET /status`.
const RECENT_ROWS: usize = 50;

#[derive(Debug)]
struct BridgeError;

impl warp::reject::Reject for BridgeError {}

/// HTTP window onto a running worker: counters and recent rows out, raw
/// queue envelopes in.
#[derive(Clone)]
pub struct StatusBridge {
    ctx: Arc<IngestContext>,
    queue: Arc<dyn MessageQueue>,
}

impl StatusBridge {
    pub fn new(ctx: Arc<IngestContext>, queue: Arc<dyn MessageQueue>) -> Self {
        Self { ctx, queue }
    }

    pub async fn snapshot(&self) -> anyhow::Result<StatusModel> {
        let mut failures = self
            .ctx
            .metadata
            .failures_since(DateTime::<Utc>::MIN_UTC)
            .await?;
        let mut health = self.ctx.metadata.health_statuses().await?;
        keep_latest(&mut failures);
        keep_latest(&mut health);
        Ok(StatusModel {
            metrics: self.ctx.metrics.snapshot(),
            queue_depth: self.queue.len().await?,
            stations: self.ctx.stations.len(),
            failures,
            health,
        })
    }

    pub fn routes(&self) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
        let bridge = self.clone();
        let bridge_filter = warp::any().map(move || bridge.clone());

        let status_route = warp::path("status")
            .and(warp::get())
            .and(bridge_filter.clone())
            .and_then(|bridge: StatusBridge| async move {
                match bridge.snapshot().await {
                    Ok(model) => Ok::<_, warp::Rejection>(warp::reply::json(&model)),
                    Err(err) => {
                        error!("status snapshot failed: {:#}", err);
                        Err(warp::reject::custom(BridgeError))
                    }
                }
            });

        let enqueue_route = warp::path("enqueue")
            .and(warp::post())
            .and(warp::body::bytes())
            .and(bridge_filter)
            .and_then(|body: Bytes, bridge: StatusBridge| async move {
                let Ok(text) = String::from_utf8(body.to_vec()) else {
                    return Ok::<_, warp::Rejection>(warp::reply::with_status(
                        warp::reply::json(&json!({"status": "rejected", "reason": "body is not UTF-8"})),
                        StatusCode::BAD_REQUEST,
                    ));
                };
                match bridge.queue.push(text).await {
                    Ok(()) => Ok(warp::reply::with_status(
                        warp::reply::json(&json!({"status": "queued"})),
                        StatusCode::ACCEPTED,
                    )),
                    Err(err) => {
                        error!("enqueue failed: {}", err);
                        Err(warp::reject::custom(BridgeError))
                    }
                }
            });

        status_route.or(enqueue_route)
    }

    pub async fn serve(self, addr: SocketAddr) {
        info!("status bridge listening on {}", addr);
        warp::serve(self.routes()).run(addr).await;
    }
}

fn keep_latest<T>(rows: &mut Vec<T>) {
    if rows.len() > RECENT_ROWS {
        let excess = rows.len() - RECENT_ROWS;
        rows.drain(..excess);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workflow::config::WorkerConfig;
    use crate::workflow::runner::Runner;
    use spectrumcore::WorkerMessage;

    fn bridge() -> StatusBridge {
        let runner = Runner::new(WorkerConfig::default()).unwrap();
        StatusBridge::new(runner.context().clone(), runner.queue())
    }

    #[tokio::test]
    async fn enqueue_pushes_the_raw_body() {
        let bridge = bridge();
        let body = WorkerMessage::RetentionSweep.encode().unwrap();
        let reply = warp::test::request()
            .method("POST")
            .path("/enqueue")
            .body(body)
            .reply(&bridge.routes())
            .await;
        assert_eq!(reply.status(), StatusCode::ACCEPTED);
        assert_eq!(bridge.queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn status_reports_queue_depth_and_counters() {
        let bridge = bridge();
        bridge.queue.push("{}".into()).await.unwrap();
        let reply = warp::test::request()
            .method("GET")
            .path("/status")
            .reply(&bridge.routes())
            .await;
        assert_eq!(reply.status(), StatusCode::OK);
        let value: serde_json::Value = serde_json::from_slice(reply.body()).unwrap();
        assert_eq!(value["queue_depth"], 1);
        assert_eq!(value["stations"], 1);
        assert_eq!(value["metrics"]["dispatched"], 0);
    }
}
