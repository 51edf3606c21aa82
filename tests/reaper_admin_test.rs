mod common;

use std::time::Duration;

use common::TestDb;
use sql_transport::{
    ExpiredMessagesCleanupConfig, OutgoingMessage, TransportBuilder, TransportEventKind,
};

#[tokio::test]
async fn test_reaper_deletes_only_expired_rows() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let config = db
        .full_config("billing")
        .with_expired_messages_cleanup(Some(ExpiredMessagesCleanupConfig {
            interval: Duration::from_secs(60),
            batch_size: 2,
        }));
    let transport = TransportBuilder::new(config)
        .build()
        .await
        .expect("build")
        .into_full()
        .expect("full");
    let mut events = transport.subscribe();

    let expired = OutgoingMessage::from_body("old").with_time_to_be_received(Duration::ZERO);
    for _ in 0..5 {
        transport
            .send("billing", &expired, Duration::ZERO)
            .await
            .expect("send expired");
    }
    transport
        .send(
            "billing",
            &OutgoingMessage::from_body("keep").with_time_to_be_received(Duration::from_secs(300)),
            Duration::ZERO,
        )
        .await
        .expect("send live");
    transport
        .send("billing", &OutgoingMessage::from_body("later"), Duration::from_secs(300))
        .await
        .expect("send deferred");
    // Expired rows of other queues are not this reaper's business.
    transport
        .send("shipping", &expired, Duration::ZERO)
        .await
        .expect("send other queue");

    let reaper = transport.reaper().expect("cleanup enabled");
    let deleted = reaper.reap_once().await.expect("reap");
    assert_eq!(deleted, 5);

    let metrics = transport.queue_metrics().await.expect("metrics");
    assert_eq!(metrics.expired, 0);
    assert_eq!(metrics.ready, 1);
    assert_eq!(metrics.deferred, 1);
    assert_eq!(metrics.total, 2);
    assert_eq!(db.row_count("shipping").await, 1);

    let reaped = std::iter::from_fn(|| events.try_recv().ok()).any(|event| {
        matches!(
            event.kind,
            TransportEventKind::ExpiredMessagesReaped { deleted: 5, .. }
        )
    });
    assert!(reaped);

    db.cleanup().await;
}

#[tokio::test]
async fn test_queue_metrics_and_purge() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    for _ in 0..3 {
        transport
            .send("billing", &OutgoingMessage::from_body("now"), Duration::ZERO)
            .await
            .expect("send");
    }
    transport
        .send("billing", &OutgoingMessage::from_body("later"), Duration::from_secs(300))
        .await
        .expect("send");

    let metrics = transport.queue_metrics().await.expect("metrics");
    assert_eq!(metrics.total, 4);
    assert_eq!(metrics.ready, 3);
    assert_eq!(metrics.deferred, 1);
    assert_eq!(metrics.expired, 0);

    // A held row survives the purge and is still there after rollback.
    let held = transport.try_receive().await.expect("receive").expect("message");
    let purged = transport.purge_input_queue().await.expect("purge");
    assert_eq!(purged, 3);
    held.abandon().await.expect("abandon");

    assert_eq!(transport.queue_metrics().await.expect("metrics").total, 1);

    db.cleanup().await;
}
