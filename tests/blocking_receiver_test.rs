mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::TestDb;
use sql_transport::{
    BlockingReceiver, MessageDispatcher, OutgoingMessage, ReceiveMode, StopSignal,
    TransportMessage,
};

#[derive(Default)]
struct CountingDispatcher {
    count: AtomicUsize,
}

#[async_trait]
impl MessageDispatcher for CountingDispatcher {
    async fn dispatch(&self, _message: &TransportMessage) -> anyhow::Result<()> {
        self.count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

fn config(database_url: &str, table_name: &str) -> sql_transport::TransportConfig {
    let db_config = sql_transport::TransportConfig::full(database_url, table_name, "billing")
        .with_forced_synchronous_receive(true)
        .with_operation_timeout(Duration::from_secs(5))
        .with_backoff(sql_transport::BackoffConfig::fixed(Duration::from_millis(20)))
        .with_expired_messages_cleanup(None);
    assert_eq!(db_config.receive_mode(), Some(ReceiveMode::ForcedSynchronous));
    db_config
}

fn drop_table(database_url: &str, table_name: &str) {
    tokio_test::block_on(async {
        TestDb::connect(database_url, table_name).await.cleanup().await;
    });
}

#[test]
fn test_blocking_receive_complete_and_abandon() {
    let Some(database_url) = TestDb::database_url() else {
        return;
    };
    let table_name = TestDb::unique_table_name();
    let receiver = BlockingReceiver::new(config(&database_url, &table_name)).expect("receiver");

    assert!(receiver.try_receive().expect("receive").is_none());

    receiver
        .send("billing", &OutgoingMessage::from_body("sync"), Duration::ZERO)
        .expect("send");

    let claimed = receiver.try_receive().expect("receive").expect("message");
    let sequence_id = claimed.message().sequence_id;
    claimed.abandon().expect("abandon");

    // Dropping a claim rolls back before drop returns.
    let dropped = receiver.try_receive().expect("receive").expect("message");
    assert_eq!(dropped.message().sequence_id, sequence_id);
    drop(dropped);

    let again = receiver.try_receive().expect("receive").expect("message");
    assert_eq!(again.message().sequence_id, sequence_id);
    assert_eq!(again.message().body, b"sync".to_vec());
    again.complete().expect("complete");

    assert!(receiver.try_receive().expect("receive").is_none());

    drop(receiver);
    drop_table(&database_url, &table_name);
}

#[test]
fn test_blocking_run_until_stopped() {
    let Some(database_url) = TestDb::database_url() else {
        return;
    };
    let table_name = TestDb::unique_table_name();
    let receiver = BlockingReceiver::new(config(&database_url, &table_name)).expect("receiver");

    for i in 0..5u8 {
        receiver
            .send("billing", &OutgoingMessage::from_body(vec![i]), Duration::ZERO)
            .expect("send");
    }

    let dispatcher = Arc::new(CountingDispatcher::default());
    let stop = StopSignal::new();

    let stopper = {
        let stop = Arc::clone(&stop);
        let dispatcher = Arc::clone(&dispatcher);
        std::thread::spawn(move || {
            for _ in 0..500 {
                if dispatcher.count.load(Ordering::SeqCst) == 5 {
                    break;
                }
                std::thread::sleep(Duration::from_millis(10));
            }
            stop.stop();
        })
    };

    receiver.run(dispatcher.as_ref(), &stop);
    stopper.join().expect("stopper thread");

    assert_eq!(dispatcher.count.load(Ordering::SeqCst), 5);
    assert!(receiver.try_receive().expect("receive").is_none());

    drop(receiver);
    drop_table(&database_url, &table_name);
}
