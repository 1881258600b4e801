use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::future::BoxFuture;

use super::*;
use crate::bus::{BusError, FinalResult};

struct CountingHandler(Arc<AtomicUsize>);

impl MessageHandler for CountingHandler {
    fn handle(&self, _message: Arc<WorkflowMessage>) -> BoxFuture<'static, std::result::Result<(), BusError>> {
        let count = Arc::clone(&self.0);
        Box::pin(async move {
            count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

/// Fails its first delivery, as a handler hitting a locked database would.
struct FailOnceHandler {
    attempts: Arc<AtomicUsize>,
    applied: Arc<AtomicUsize>,
}

impl MessageHandler for FailOnceHandler {
    fn handle(&self, _message: Arc<WorkflowMessage>) -> BoxFuture<'static, std::result::Result<(), BusError>> {
        let first = self.attempts.fetch_add(1, Ordering::SeqCst) == 0;
        let applied = Arc::clone(&self.applied);
        Box::pin(async move {
            if first {
                return Err(BusError::HandlerFailed {
                    kind: "final_result".to_string(),
                    message: "transient".to_string(),
                });
            }
            applied.fetch_add(1, Ordering::SeqCst);
            Ok(())
        })
    }
}

fn final_result(verdict: &str) -> Arc<WorkflowMessage> {
    Arc::new(WorkflowMessage::FinalResult(FinalResult {
        correlation_id: "AAAAAAAAAAEAAAAAAAAAAg".to_string(),
        verdict: verdict.to_string(),
    }))
}

async fn wait_for(count: &AtomicUsize, expected: usize) {
    for _ in 0..100 {
        if count.load(Ordering::SeqCst) >= expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_channel_publish_no_receivers() {
    let bus = ChannelCallbackBus::new();
    assert!(bus.publish(final_result("pass")).await.is_ok());
}

#[tokio::test]
async fn test_channel_subscribe_and_receive() {
    let bus = ChannelCallbackBus::new();
    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe(Arc::new(CountingHandler(count.clone())))
        .await
        .unwrap();
    bus.start_consuming().await.unwrap();

    bus.publish(final_result("pass")).await.unwrap();
    bus.publish(final_result("reject")).await.unwrap();

    wait_for(&count, 2).await;
    assert_eq!(count.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_start_consuming_is_idempotent() {
    let bus = ChannelCallbackBus::new();
    let count = Arc::new(AtomicUsize::new(0));
    bus.subscribe(Arc::new(CountingHandler(count.clone())))
        .await
        .unwrap();
    bus.start_consuming().await.unwrap();
    bus.start_consuming().await.unwrap();

    bus.publish(final_result("pass")).await.unwrap();
    wait_for(&count, 1).await;
    tokio::time::sleep(Duration::from_millis(20)).await;

    // A second consumer task would have delivered twice.
    assert_eq!(count.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_failed_delivery_is_applied_on_redelivery() {
    let bus = ChannelCallbackBus::new();
    let attempts = Arc::new(AtomicUsize::new(0));
    let applied = Arc::new(AtomicUsize::new(0));
    bus.subscribe(Arc::new(FailOnceHandler {
        attempts: attempts.clone(),
        applied: applied.clone(),
    }))
    .await
    .unwrap();
    bus.start_consuming().await.unwrap();

    bus.publish(final_result("pass")).await.unwrap();

    wait_for(&applied, 1).await;
    assert_eq!(applied.load(Ordering::SeqCst), 1);
    assert_eq!(attempts.load(Ordering::SeqCst), 2);
}
