mod common;

use std::collections::HashMap;
use std::time::Duration;

use common::TestDb;
use sql_transport::{OutgoingMessage, TransportBuilder, TransportError};

#[tokio::test]
async fn test_round_trip_preserves_headers_and_body() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    let mut headers = HashMap::new();
    headers.insert("correlation-id".to_string(), "c-1".to_string());
    let message = OutgoingMessage::new(headers, vec![0, 159, 146, 150, 255]);
    let message_id = message.message_id().map(str::to_string);

    let sequence_id = transport
        .send("billing", &message, Duration::ZERO)
        .await
        .expect("send");

    let received = transport
        .try_receive()
        .await
        .expect("receive")
        .expect("a message");
    let got = received.message().clone();
    received.complete().await.expect("complete");

    assert_eq!(got.sequence_id, sequence_id);
    assert_eq!(got.recipient_queue, "billing");
    assert_eq!(got.body, vec![0, 159, 146, 150, 255]);
    assert_eq!(got.correlation_id(), Some("c-1"));
    assert_eq!(got.message_id().map(str::to_string), message_id);
    assert_eq!(db.row_count("billing").await, 0);

    db.cleanup().await;
}

#[tokio::test]
async fn test_delivery_is_fifo_within_a_queue() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    for i in 0..5u8 {
        transport
            .send("billing", &OutgoingMessage::from_body(vec![i]), Duration::ZERO)
            .await
            .expect("send");
    }

    let mut bodies = Vec::new();
    while let Some(received) = transport.try_receive().await.expect("receive") {
        bodies.push(received.message().body[0]);
        received.complete().await.expect("complete");
    }
    assert_eq!(bodies, vec![0, 1, 2, 3, 4]);

    db.cleanup().await;
}

#[tokio::test]
async fn test_queues_are_isolated() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    transport
        .send("shipping", &OutgoingMessage::from_body("not for billing"), Duration::ZERO)
        .await
        .expect("send");

    assert!(transport.try_receive().await.expect("receive").is_none());
    assert_eq!(db.row_count("shipping").await, 1);

    db.cleanup().await;
}

#[tokio::test]
async fn test_delayed_message_is_invisible_until_due() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    transport
        .send(
            "billing",
            &OutgoingMessage::from_body("later"),
            Duration::from_millis(800),
        )
        .await
        .expect("send");

    assert!(transport.try_receive().await.expect("receive").is_none());
    let metrics = transport.queue_metrics().await.expect("metrics");
    assert_eq!(metrics.deferred, 1);
    assert_eq!(metrics.ready, 0);

    tokio::time::sleep(Duration::from_millis(1000)).await;

    let received = transport
        .try_receive()
        .await
        .expect("receive")
        .expect("due message");
    assert_eq!(received.message().body, b"later".to_vec());
    received.complete().await.expect("complete");

    db.cleanup().await;
}

#[tokio::test]
async fn test_rollback_makes_message_visible_again() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    for body in ["first", "second"] {
        transport
            .send("billing", &OutgoingMessage::from_body(body), Duration::ZERO)
            .await
            .expect("send");
    }

    let first = transport.try_receive().await.expect("receive").expect("message");
    let first_id = first.message().sequence_id;
    first.abandon().await.expect("abandon");

    // Same row, same position, no duplicate.
    let again = transport.try_receive().await.expect("receive").expect("message");
    assert_eq!(again.message().sequence_id, first_id);
    drop(again);

    // A dropped claim rolls back once its connection is returned to the pool.
    let mut after_drop = None;
    for _ in 0..50 {
        after_drop = transport.try_receive().await.expect("receive");
        if after_drop.is_some() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    let after_drop = after_drop.expect("message visible after drop");
    assert_eq!(after_drop.message().sequence_id, first_id);
    after_drop.complete().await.expect("complete");

    assert_eq!(db.row_count("billing").await, 1);

    db.cleanup().await;
}

#[tokio::test]
async fn test_expired_messages_are_never_delivered() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    transport
        .send(
            "billing",
            &OutgoingMessage::from_body("stale").with_time_to_be_received(Duration::ZERO),
            Duration::ZERO,
        )
        .await
        .expect("send");
    transport
        .send(
            "billing",
            &OutgoingMessage::from_body("fresh")
                .with_time_to_be_received(Duration::from_secs(60)),
            Duration::ZERO,
        )
        .await
        .expect("send");

    let received = transport.try_receive().await.expect("receive").expect("message");
    assert_eq!(received.message().body, b"fresh".to_vec());
    assert!(received.message().expires_at.is_some());
    received.complete().await.expect("complete");

    assert!(transport.try_receive().await.expect("receive").is_none());
    assert_eq!(transport.queue_metrics().await.expect("metrics").expired, 1);

    db.cleanup().await;
}

#[tokio::test]
async fn test_message_expiring_while_queued_is_not_delivered() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    transport
        .send(
            "billing",
            &OutgoingMessage::from_body("short lived")
                .with_time_to_be_received(Duration::from_millis(500)),
            Duration::ZERO,
        )
        .await
        .expect("send");
    assert_eq!(transport.queue_metrics().await.expect("metrics").ready, 1);

    tokio::time::sleep(Duration::from_millis(800)).await;

    assert!(transport.try_receive().await.expect("receive").is_none());
    assert_eq!(transport.queue_metrics().await.expect("metrics").expired, 1);

    db.cleanup().await;
}

#[tokio::test]
async fn test_deferred_message_does_not_hold_back_later_ones() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    let deferred_id = transport
        .send("billing", &OutgoingMessage::from_body("later"), Duration::from_secs(300))
        .await
        .expect("send deferred");
    let immediate_id = transport
        .send("billing", &OutgoingMessage::from_body("now"), Duration::ZERO)
        .await
        .expect("send immediate");
    assert!(deferred_id < immediate_id);

    let received = transport.try_receive().await.expect("receive").expect("message");
    assert_eq!(received.message().sequence_id, immediate_id);
    received.complete().await.expect("complete");

    assert!(transport.try_receive().await.expect("receive").is_none());
    assert_eq!(transport.queue_metrics().await.expect("metrics").deferred, 1);

    db.cleanup().await;
}

#[tokio::test]
async fn test_unreadable_headers_fail_receive_and_keep_the_row() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    sqlx::query(&format!(
        r#"INSERT INTO "{}" (recipient_queue, headers, body, visible_at)
           VALUES ('billing', '{{"retries": 3}}'::jsonb, '\x00'::bytea, clock_timestamp())"#,
        db.table_name
    ))
    .execute(&db.pool)
    .await
    .expect("insert foreign row");

    let err = transport.try_receive().await.unwrap_err();
    assert!(matches!(err, TransportError::Serialization { .. }), "{err:?}");
    assert_eq!(db.row_count("billing").await, 1);

    db.cleanup().await;
}

#[tokio::test]
async fn test_send_to_many_is_all_or_nothing() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    let ids = transport
        .send_to_many(
            &["billing", "shipping", "audit"],
            &OutgoingMessage::from_body("fan"),
            Duration::ZERO,
        )
        .await
        .expect("send to many");
    assert_eq!(ids.len(), 3);
    assert!(ids.windows(2).all(|w| w[0] < w[1]));

    // A constraint the last insert violates must undo the earlier inserts.
    sqlx::query(&format!(
        "ALTER TABLE \"{}\" ADD CONSTRAINT no_poison CHECK (recipient_queue <> 'poison')",
        db.table_name
    ))
    .execute(&db.pool)
    .await
    .expect("add constraint");

    let err = transport
        .send_to_many(
            &["billing", "shipping", "poison"],
            &OutgoingMessage::from_body("fan"),
            Duration::ZERO,
        )
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::Database { .. }), "{err:?}");

    assert_eq!(db.row_count("billing").await, 1);
    assert_eq!(db.row_count("shipping").await, 1);
    assert_eq!(db.row_count("poison").await, 0);

    db.cleanup().await;
}

#[tokio::test]
async fn test_send_in_follows_caller_transaction() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;
    let message = OutgoingMessage::from_body("outbox");

    let mut tx = db.pool.begin().await.expect("begin");
    transport
        .send_in(&mut tx, "billing", &message, Duration::ZERO)
        .await
        .expect("send in transaction");
    assert!(transport.try_receive().await.expect("receive").is_none());
    tx.rollback().await.expect("rollback");
    assert_eq!(db.row_count("billing").await, 0);

    let mut tx = db.pool.begin().await.expect("begin");
    transport
        .send_in(&mut tx, "billing", &message, Duration::ZERO)
        .await
        .expect("send in transaction");
    tx.commit().await.expect("commit");

    let received = transport.try_receive().await.expect("receive").expect("message");
    received.complete().await.expect("complete");

    db.cleanup().await;
}

#[tokio::test]
async fn test_consume_and_send_share_one_unit_of_work() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    transport
        .send("billing", &OutgoingMessage::from_body("in"), Duration::ZERO)
        .await
        .expect("send");

    let mut received = transport.try_receive().await.expect("receive").expect("message");
    transport
        .send_in(
            received.connection(),
            "shipping",
            &OutgoingMessage::from_body("out"),
            Duration::ZERO,
        )
        .await
        .expect("send in claim");
    received.abandon().await.expect("abandon");

    // Abandoning undoes both the consumption and the outgoing send.
    assert_eq!(db.row_count("billing").await, 1);
    assert_eq!(db.row_count("shipping").await, 0);

    db.cleanup().await;
}

#[tokio::test]
async fn test_one_way_transport_sends_but_cannot_receive() {
    let Some(db) = TestDb::new().await else {
        return;
    };

    let transport = TransportBuilder::new(db.one_way_config())
        .build()
        .await
        .expect("build");
    assert!(transport.receiver().is_err());

    transport
        .send("billing", &OutgoingMessage::from_body("fire"), Duration::ZERO)
        .await
        .expect("send");
    assert_eq!(db.row_count("billing").await, 1);

    let one_way = db.one_way_transport().await;
    one_way
        .send("billing", &OutgoingMessage::from_body("forget"), Duration::ZERO)
        .await
        .expect("send");
    assert_eq!(one_way.queue_metrics("billing").await.expect("metrics").ready, 2);

    db.cleanup().await;
}

#[tokio::test]
async fn test_invalid_queue_name_is_rejected_before_io() {
    let Some(db) = TestDb::new().await else {
        return;
    };
    let transport = db.full_transport("billing").await;

    let err = transport
        .send("", &OutgoingMessage::from_body("x"), Duration::ZERO)
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::InvalidQueueName { .. }));

    db.cleanup().await;
}
