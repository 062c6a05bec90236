//! Bulk submission channel / 批量提交通道
//!
//! Buffers index mutations and flushes them asynchronously through a
//! bounded worker pool. Delivery is at-least-once; every operation is
//! keyed by claim id, so replays are idempotent. Per-item failures are
//! reported to the log, never retried automatically. Callers must
//! `flush` and then `close` before treating a run as complete.

use futures::stream::{FuturesUnordered, StreamExt};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};

use super::{index, EsClient, EsError};

/// An index mutation intent keyed by claim id / 以claim id为键的变更意图
#[derive(Debug, Clone, PartialEq)]
pub enum BulkOperation {
    /// Full upsert of a document / 整文档写入
    Index { id: String, doc: Value },
    /// Partial update, only the given fields change / 部分更新
    Update { id: String, doc: Value },
    /// Removal of a document / 删除
    Delete { id: String },
}

/// Encode operations as an `_bulk` ndjson payload / 编码为ndjson载荷
pub fn encode_ops(ops: &[BulkOperation]) -> String {
    let mut out = String::new();
    for op in ops {
        match op {
            BulkOperation::Index { id, doc } => {
                out.push_str(&json!({"index": {"_index": index::CLAIMS, "_id": id}}).to_string());
                out.push('\n');
                out.push_str(&doc.to_string());
                out.push('\n');
            }
            BulkOperation::Update { id, doc } => {
                out.push_str(&json!({"update": {"_index": index::CLAIMS, "_id": id}}).to_string());
                out.push('\n');
                out.push_str(&json!({ "doc": doc }).to_string());
                out.push('\n');
            }
            BulkOperation::Delete { id } => {
                out.push_str(&json!({"delete": {"_index": index::CLAIMS, "_id": id}}).to_string());
                out.push('\n');
            }
        }
    }
    out
}

enum BulkMessage {
    Op(BulkOperation),
    Flush(oneshot::Sender<()>),
}

/// Batching asynchronous submitter / 批处理异步提交器
pub struct BulkProcessor {
    tx: mpsc::Sender<BulkMessage>,
    handle: tokio::task::JoinHandle<()>,
}

impl BulkProcessor {
    /// Start the processor with `workers` concurrent flushes of up to
    /// `flush_size` operations each / 启动处理器
    pub fn start(client: EsClient, name: &str, workers: usize, flush_size: usize) -> Self {
        let (tx, rx) = mpsc::channel(flush_size * 2);
        let name = name.to_string();
        let handle = tokio::spawn(run_processor(client, name, workers, flush_size, rx));
        Self { tx, handle }
    }

    /// Queue one operation / 入队一个操作
    pub async fn add(&self, op: BulkOperation) {
        if self.tx.send(BulkMessage::Op(op)).await.is_err() {
            tracing::error!("bulk channel closed, operation dropped");
        }
    }

    /// Drain the buffer and wait for all in-flight flushes / 清空缓冲并等待
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(BulkMessage::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Shut the channel down, flushing whatever remains / 关闭通道
    pub async fn close(self) {
        drop(self.tx);
        let _ = self.handle.await;
    }
}

async fn run_processor(
    client: EsClient,
    name: String,
    workers: usize,
    flush_size: usize,
    mut rx: mpsc::Receiver<BulkMessage>,
) {
    let mut buffer: Vec<BulkOperation> = Vec::with_capacity(flush_size);
    let mut in_flight = FuturesUnordered::new();

    loop {
        tokio::select! {
            Some(result) = in_flight.next(), if !in_flight.is_empty() => {
                log_flush_result(&name, result);
            }
            message = rx.recv() => match message {
                Some(BulkMessage::Op(op)) => {
                    buffer.push(op);
                    if buffer.len() >= flush_size {
                        // Bound in-flight submissions to the worker count
                        while in_flight.len() >= workers {
                            if let Some(result) = in_flight.next().await {
                                log_flush_result(&name, result);
                            }
                        }
                        in_flight.push(submit(client.clone(), std::mem::take(&mut buffer)));
                    }
                }
                Some(BulkMessage::Flush(ack)) => {
                    if !buffer.is_empty() {
                        in_flight.push(submit(client.clone(), std::mem::take(&mut buffer)));
                    }
                    while let Some(result) = in_flight.next().await {
                        log_flush_result(&name, result);
                    }
                    let _ = ack.send(());
                }
                None => {
                    if !buffer.is_empty() {
                        in_flight.push(submit(client.clone(), std::mem::take(&mut buffer)));
                    }
                    while let Some(result) = in_flight.next().await {
                        log_flush_result(&name, result);
                    }
                    break;
                }
            }
        }
    }
}

async fn submit(client: EsClient, ops: Vec<BulkOperation>) -> Result<(usize, Value), EsError> {
    let count = ops.len();
    let body = encode_ops(&ops);
    let response = client.bulk_raw(body).await?;
    Ok((count, response))
}

fn log_flush_result(name: &str, result: Result<(usize, Value), EsError>) {
    match result {
        Ok((count, response)) => {
            tracing::debug!("{}: flushed {} operations", name, count);
            if response["errors"].as_bool().unwrap_or(false) {
                for item in response["items"].as_array().into_iter().flatten() {
                    // Each item is a single-key object: {"index": {...}} etc.
                    for (_, detail) in item.as_object().into_iter().flatten() {
                        if !detail["error"].is_null() {
                            tracing::error!(
                                "{}: operation on {} failed: {}",
                                name,
                                detail["_id"].as_str().unwrap_or("?"),
                                detail["error"]
                            );
                        }
                    }
                }
            }
        }
        Err(e) => tracing::error!("{}: bulk flush failed: {}", name, e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_index_op() {
        let ops = vec![BulkOperation::Index {
            id: "abc".to_string(),
            doc: json!({"name": "cats"}),
        }];
        let body = encode_ops(&ops);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["index"]["_id"], "abc");
        assert_eq!(action["index"]["_index"], "claims");
        let doc: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(doc["name"], "cats");
    }

    #[test]
    fn test_encode_update_op() {
        let ops = vec![BulkOperation::Update {
            id: "abc".to_string(),
            doc: json!({"view_cnt": 7}),
        }];
        let body = encode_ops(&ops);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 2);
        let payload: Value = serde_json::from_str(lines[1]).unwrap();
        assert_eq!(payload["doc"]["view_cnt"], 7);
    }

    #[test]
    fn test_encode_delete_op() {
        let ops = vec![BulkOperation::Delete {
            id: "abc".to_string(),
        }];
        let body = encode_ops(&ops);
        let lines: Vec<&str> = body.lines().collect();
        assert_eq!(lines.len(), 1);
        let action: Value = serde_json::from_str(lines[0]).unwrap();
        assert_eq!(action["delete"]["_id"], "abc");
    }

    #[test]
    fn test_encode_trailing_newline() {
        // The bulk API requires the payload to end with a newline
        let ops = vec![BulkOperation::Delete {
            id: "x".to_string(),
        }];
        assert!(encode_ops(&ops).ends_with('\n'));
    }
}
