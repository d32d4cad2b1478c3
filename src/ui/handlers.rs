//! HTTP API handlers

use axum::{extract::State, Json};
use serde::Serialize;

use crate::directory::HostRecord;
use crate::transport::snapshot::{StreamInfo, SubscriptionInfo};
use crate::transport::TransportStats;
use crate::ui::server::SharedSnapshot;

/// API response wrapper
#[derive(Debug, Serialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(msg.into()),
        }
    }
}

/// Node status
#[derive(Debug, Serialize)]
pub struct NodeStatus {
    pub hostname: String,
    pub uptime_ms: u64,
    pub hosts: usize,
    pub streams_in: usize,
    pub streams_out: usize,
    pub subscriptions: usize,
    pub stats: TransportStats,
}

/// Inbound and outbound streams
#[derive(Debug, Serialize)]
pub struct StreamList {
    pub inbound: Vec<StreamInfo>,
    pub outbound: Vec<StreamInfo>,
}

pub async fn get_status(State(snapshot): State<SharedSnapshot>) -> Json<ApiResponse<NodeStatus>> {
    let snap = snapshot.read();
    Json(ApiResponse::ok(NodeStatus {
        hostname: snap.hostname.clone(),
        uptime_ms: snap.now_ms,
        hosts: snap.hosts.len(),
        streams_in: snap.streams_in.len(),
        streams_out: snap.streams_out.len(),
        subscriptions: snap.subscriptions.len(),
        stats: snap.stats,
    }))
}

/// Known hosts
pub async fn get_hosts(
    State(snapshot): State<SharedSnapshot>,
) -> Json<ApiResponse<Vec<HostRecord>>> {
    Json(ApiResponse::ok(snapshot.read().hosts.clone()))
}

pub async fn get_streams(State(snapshot): State<SharedSnapshot>) -> Json<ApiResponse<StreamList>> {
    let snap = snapshot.read();
    Json(ApiResponse::ok(StreamList {
        inbound: snap.streams_in.clone(),
        outbound: snap.streams_out.clone(),
    }))
}

pub async fn get_subscriptions(
    State(snapshot): State<SharedSnapshot>,
) -> Json<ApiResponse<Vec<SubscriptionInfo>>> {
    Json(ApiResponse::ok(snapshot.read().subscriptions.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::Snapshot;
    use parking_lot::RwLock;
    use std::sync::Arc;

    fn shared() -> SharedSnapshot {
        Arc::new(RwLock::new(Snapshot {
            hostname: "studio".into(),
            now_ms: 1234,
            ..Snapshot::default()
        }))
    }

    #[tokio::test]
    async fn test_status_reads_snapshot() {
        let Json(resp) = get_status(State(shared())).await;
        assert!(resp.success);
        let status = resp.data.unwrap();
        assert_eq!(status.hostname, "studio");
        assert_eq!(status.uptime_ms, 1234);
        assert_eq!(status.streams_in, 0);
    }

    #[tokio::test]
    async fn test_empty_lists() {
        let snapshot = shared();
        let Json(hosts) = get_hosts(State(snapshot.clone())).await;
        assert_eq!(hosts.data.unwrap().len(), 0);
        let Json(streams) = get_streams(State(snapshot)).await;
        let streams = streams.data.unwrap();
        assert!(streams.inbound.is_empty() && streams.outbound.is_empty());
    }

    #[test]
    fn test_error_response_shape() {
        let resp: ApiResponse<()> = ApiResponse::error("no such stream");
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "no such stream");
        assert!(json.get("data").is_none());
    }
}
