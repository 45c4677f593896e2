use std::time::Duration;

use tokio_util::sync::CancellationToken;
use trawl_channel::{RedisChannelConfig, RedisListChannel};
use trawl_core::AppError;
use trawl_core::channel::Channel;

use crate::integration::common::setup_redis;

#[tokio::test]
async fn enqueue_then_lease_in_fifo_order() {
    let (channel, _url, _container) = setup_redis("fifo").await;
    let cancel = CancellationToken::new();

    channel.enqueue(b"one").await.unwrap();
    channel.enqueue(b"two").await.unwrap();
    assert_eq!(channel.len().await.unwrap(), 2);

    let first = channel.lease(&cancel).await.unwrap();
    assert_eq!(first.payload(), b"one");
    assert_eq!(channel.in_flight().await.unwrap(), 1);
    channel.ack(first).await.unwrap();

    let second = channel.lease(&cancel).await.unwrap();
    assert_eq!(second.payload(), b"two");
    channel.ack(second).await.unwrap();

    assert_eq!(channel.len().await.unwrap(), 0);
    assert_eq!(channel.in_flight().await.unwrap(), 0);
}

#[tokio::test]
async fn failed_processing_requeues_at_tail() {
    let (channel, _url, _container) = setup_redis("requeue").await;
    let cancel = CancellationToken::new();

    channel.enqueue(b"failing").await.unwrap();
    channel.enqueue(b"pending").await.unwrap();

    let err = channel
        .dequeue(&cancel, |_| async { Err(AppError::ValidationError("bad".into())) })
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError(_)));
    channel.enqueue(b"later").await.unwrap();

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(channel.dequeue(&cancel, |_| async { Ok(()) }).await.unwrap());
    }
    assert_eq!(
        seen,
        vec![b"pending".to_vec(), b"failing".to_vec(), b"later".to_vec()]
    );
    assert_eq!(channel.in_flight().await.unwrap(), 0);
}

#[tokio::test]
async fn duplicate_payloads_are_delivered_twice() {
    let (channel, _url, _container) = setup_redis("dupes").await;
    let cancel = CancellationToken::new();

    channel.enqueue(b"same").await.unwrap();
    channel.enqueue(b"same").await.unwrap();

    channel.dequeue(&cancel, |_| async { Ok(()) }).await.unwrap();
    channel.dequeue(&cancel, |_| async { Ok(()) }).await.unwrap();
    assert_eq!(channel.len().await.unwrap(), 0);
}

#[tokio::test]
async fn lease_waits_for_producer_on_another_connection() {
    let (consumer, url, _container) = setup_redis("shared").await;
    let producer = RedisListChannel::connect(&RedisChannelConfig::new(url, "shared"))
        .await
        .unwrap();
    let cancel = CancellationToken::new();

    let handle = tokio::spawn(async move {
        for page in [b"p1", b"p2", b"p3"] {
            tokio::time::sleep(Duration::from_millis(100)).await;
            producer.enqueue(page).await.unwrap();
        }
    });

    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(consumer.dequeue(&cancel, |_| async { Ok(()) }).await.unwrap());
    }
    handle.await.unwrap();

    assert_eq!(seen, vec![b"p1".to_vec(), b"p2".to_vec(), b"p3".to_vec()]);
}

#[tokio::test]
async fn lease_honours_cancellation() {
    let (channel, _url, _container) = setup_redis("cancel").await;
    let cancel = CancellationToken::new();
    let trigger = cancel.clone();

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(300)).await;
        trigger.cancel();
    });

    let err = channel.lease(&cancel).await.unwrap_err();
    assert!(matches!(err, AppError::Cancelled));
}

#[tokio::test]
async fn recover_returns_stranded_leases() {
    let (channel, _url, _container) = setup_redis("recover").await;
    let cancel = CancellationToken::new();

    channel.enqueue(b"stranded").await.unwrap();
    // Simulate a consumer dying with the lease: never ack or nack.
    let delivery = channel.lease(&cancel).await.unwrap();
    drop(delivery);
    assert_eq!(channel.len().await.unwrap(), 0);

    assert_eq!(channel.recover().await.unwrap(), 1);
    assert_eq!(channel.in_flight().await.unwrap(), 0);

    let redelivered = channel.lease(&cancel).await.unwrap();
    assert_eq!(redelivered.payload(), b"stranded");
}

#[tokio::test]
async fn closed_channel_rejects_enqueue() {
    let (channel, _url, _container) = setup_redis("closed").await;
    channel.close().await.unwrap();

    let err = channel.enqueue(b"x").await.unwrap_err();
    assert!(matches!(err, AppError::ChannelError(_)));
}

#[tokio::test]
async fn concurrent_consumers_each_ack_a_message_once() {
    const MESSAGES: usize = 12;
    const CONSUMERS: usize = 3;

    let (producer, url, _container) = setup_redis("crowd").await;
    let cancel = CancellationToken::new();

    let mut consumers = Vec::new();
    for _ in 0..CONSUMERS {
        let channel = RedisListChannel::connect(&RedisChannelConfig::new(url.clone(), "crowd"))
            .await
            .unwrap();
        let cancel = cancel.clone();
        consumers.push(tokio::spawn(async move {
            let mut seen = Vec::new();
            for _ in 0..MESSAGES / CONSUMERS {
                seen.push(channel.dequeue(&cancel, |_| async { Ok(()) }).await.unwrap());
            }
            seen
        }));
    }

    for i in 0..MESSAGES {
        producer.enqueue(format!("page-{i}").as_bytes()).await.unwrap();
    }

    let mut acked = Vec::new();
    for consumer in consumers {
        acked.extend(consumer.await.unwrap());
    }
    acked.sort();
    let mut expected: Vec<Vec<u8>> = (0..MESSAGES)
        .map(|i| format!("page-{i}").into_bytes())
        .collect();
    expected.sort();

    assert_eq!(acked, expected);
    assert_eq!(producer.len().await.unwrap(), 0);
    assert_eq!(producer.in_flight().await.unwrap(), 0);
}

async fn named_clients(url: &str, name: &str) -> usize {
    let client = redis::Client::open(url).unwrap();
    let mut conn = client.get_multiplexed_async_connection().await.unwrap();
    let list: String = redis::cmd("CLIENT")
        .arg("LIST")
        .query_async(&mut conn)
        .await
        .unwrap();
    let needle = format!("name={name} ");
    list.lines().filter(|line| line.contains(&needle)).count()
}

#[tokio::test]
async fn leases_reuse_one_blocking_connection_until_close() {
    let (channel, url, _container) = setup_redis("reuse").await;
    let cancel = CancellationToken::new();
    assert_eq!(named_clients(&url, "trawl-test").await, 2);

    for page in [b"p1", b"p2", b"p3"] {
        channel.enqueue(page).await.unwrap();
        channel.dequeue(&cancel, |_| async { Ok(()) }).await.unwrap();
    }
    assert_eq!(named_clients(&url, "trawl-test").await, 2);

    channel.close().await.unwrap();
    let mut remaining = named_clients(&url, "trawl-test").await;
    for _ in 0..20 {
        if remaining == 1 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        remaining = named_clients(&url, "trawl-test").await;
    }
    assert_eq!(remaining, 1);

    let err = channel.lease(&cancel).await.unwrap_err();
    assert!(matches!(err, AppError::ChannelError(_)));
}
