use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use txspout::message::{PullOutcome, PullStatus};
use txspout::{
    AppError, BatchMetadata, Coordinator, Emitter, MemoryBroker, PartitionHandle, PullEngine,
    SpoutConfig, SpoutTuple, TransactionAttempt, TransactionalSpout,
};

const TOPIC: &str = "orders";

fn broker_with(tags: &[&str]) -> MemoryBroker {
    let broker = MemoryBroker::new("broker-a");
    broker.create_topic(TOPIC, 2);
    for (i, tag) in tags.iter().enumerate() {
        broker.append(TOPIC, 0, Some(*tag), Bytes::from(format!("body-{}", i)));
    }
    broker
}

fn spout(broker: &MemoryBroker, tag: &str, batch_size: u32) -> TransactionalSpout<MemoryBroker> {
    TransactionalSpout::new(SpoutConfig::new(TOPIC, tag, batch_size), broker.clone()).unwrap()
}

fn engine(broker: &MemoryBroker, tag: &str, batch_size: u32) -> PullEngine<MemoryBroker> {
    spout(broker, tag, batch_size).emitter().unwrap()
}

fn tx(id: u64) -> TransactionAttempt {
    TransactionAttempt::new(id, 0)
}

fn msg_ids(tuples: &[SpoutTuple]) -> Vec<String> {
    tuples.iter().map(|t| t.message.msg_id.clone()).collect()
}

const FIRST: PartitionHandle = PartitionHandle::new(0);

#[tokio::test]
async fn first_batch_starts_at_zero_and_commits_cursor() {
    let broker = broker_with(&["a", "b", "c"]);
    let engine = engine(&broker, "*", 32);
    let partition = broker.partition(TOPIC, 0);
    let mut tuples: Vec<SpoutTuple> = Vec::new();

    let meta = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!((meta.offset(), meta.next_offset()), (0, 3));
    assert_eq!(meta.partition(), &partition);
    assert_eq!(tuples.len(), 3);
    assert!(tuples.iter().all(|t| t.tx == tx(1)));
    assert_eq!(broker.committed(&partition), Some(2));
    assert_eq!(broker.persisted(&partition), Some(2));

    let requests = broker.pull_requests();
    assert_eq!(requests.len(), 1);
    assert_eq!((requests[0].offset, requests[0].max_count), (0, 32));
    assert_eq!(requests[0].tag_expression, "*");
}

#[tokio::test]
async fn committed_offset_used_without_previous_token() {
    let broker = broker_with(&["a", "b", "c", "d"]);
    let partition = broker.partition(TOPIC, 0);
    broker.set_committed(&partition, 2);
    let engine = engine(&broker, "*", 32);
    let mut tuples: Vec<SpoutTuple> = Vec::new();

    let meta = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(broker.pull_requests()[0].offset, 2);
    assert_eq!((meta.offset(), meta.next_offset()), (2, 4));
    assert_eq!(tuples.len(), 2);
}

#[tokio::test]
async fn tag_filter_does_not_shift_offsets() {
    let broker = broker_with(&["urgent", "normal", "vip"]);
    let engine = engine(&broker, "urgent||vip", 32);
    let mut tuples: Vec<SpoutTuple> = Vec::new();

    let meta = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap()
        .unwrap();

    let tags: Vec<_> = tuples
        .iter()
        .map(|t| t.message.tags.clone().unwrap())
        .collect();
    assert_eq!(tags, vec!["urgent", "vip"]);
    assert_eq!(meta.next_offset(), 3);
    assert_eq!(meta.message_count(), 3);
    assert_eq!(broker.committed(&broker.partition(TOPIC, 0)), Some(2));
}

#[tokio::test]
async fn batches_resume_from_previous_token() {
    let broker = broker_with(&["a", "b", "c", "d", "e"]);
    let engine = engine(&broker, "*", 2);
    let mut tuples: Vec<SpoutTuple> = Vec::new();

    let first = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap();
    let second = engine
        .emit_new(tx(2), &mut tuples, FIRST, first.clone())
        .await
        .unwrap()
        .unwrap();

    assert_eq!((second.offset(), second.next_offset()), (2, 4));
    assert_eq!(broker.pull_requests()[1].offset, 2);
    assert_eq!(tuples.len(), 4);
    assert_eq!(tuples[3].tx, tx(2));
}

#[tokio::test]
async fn no_new_message_returns_same_token() {
    let broker = broker_with(&["a", "b", "c"]);
    let engine = engine(&broker, "*", 32);
    let mut tuples: Vec<SpoutTuple> = Vec::new();
    let meta = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap();
    tuples.clear();

    let again = engine
        .emit_new(tx(2), &mut tuples, FIRST, meta.clone())
        .await
        .unwrap();

    assert!(Arc::ptr_eq(again.as_ref().unwrap(), meta.as_ref().unwrap()));
    assert!(tuples.is_empty());
    assert_eq!(broker.pull_requests()[1].offset, 3);
}

#[tokio::test]
async fn empty_partition_without_token_stays_empty() {
    let broker = broker_with(&[]);
    let engine = engine(&broker, "*", 32);
    let mut tuples: Vec<SpoutTuple> = Vec::new();

    let meta = engine
        .emit_new(tx(1), &mut tuples, PartitionHandle::new(1), None)
        .await
        .unwrap();

    assert!(meta.is_none());
    assert!(tuples.is_empty());
    assert_eq!(broker.committed(&broker.partition(TOPIC, 1)), None);
}

#[tokio::test]
async fn anomalies_and_empty_found_skip_the_batch() {
    let broker = broker_with(&["a"]);
    let engine = engine(&broker, "*", 32);
    let last = Arc::new(BatchMetadata::new(broker.partition(TOPIC, 0), 0, 1).unwrap());

    for status in [
        PullStatus::Found,
        PullStatus::NoMatchedMessage,
        PullStatus::OffsetIllegal,
        PullStatus::SlaveLag,
        PullStatus::SubscriptionStale,
    ] {
        broker.script_pull(Ok(PullOutcome::empty(status, 1)));
        let mut tuples: Vec<SpoutTuple> = Vec::new();
        let returned = engine
            .emit_new(tx(5), &mut tuples, FIRST, Some(last.clone()))
            .await
            .unwrap();
        assert!(Arc::ptr_eq(returned.as_ref().unwrap(), &last), "{}", status);
        assert!(tuples.is_empty());
    }
    assert_eq!(broker.committed(&broker.partition(TOPIC, 0)), None);
}

#[tokio::test]
async fn connection_failure_skips_new_batch() {
    let broker = broker_with(&["a", "b"]);
    let engine = engine(&broker, "*", 32);
    let mut tuples: Vec<SpoutTuple> = Vec::new();
    let meta = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap();
    broker.append(TOPIC, 0, Some("c"), Bytes::from_static(b"late"));
    tuples.clear();

    broker.set_unreachable(true);
    let returned = engine
        .emit_new(tx(2), &mut tuples, FIRST, meta.clone())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(returned.as_ref().unwrap(), meta.as_ref().unwrap()));
    assert!(tuples.is_empty());

    broker.set_unreachable(false);
    let resumed = engine
        .emit_new(tx(2), &mut tuples, FIRST, returned)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((resumed.offset(), resumed.next_offset()), (2, 3));
}

#[tokio::test]
async fn inconsistent_pull_skips_new_batch() {
    let broker = broker_with(&["a", "b"]);
    let engine = engine(&broker, "*", 32);
    let mut outcome = PullOutcome::found(
        vec![txspout::Message::new(TOPIC, 0, 0, Bytes::from_static(b"m"))],
        0,
    );
    outcome.next_begin_offset = 4;
    broker.script_pull(Ok(outcome));
    let mut tuples: Vec<SpoutTuple> = Vec::new();

    let returned = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap();

    assert!(returned.is_none());
    assert!(tuples.is_empty());
}

#[tokio::test]
async fn overflowing_pull_offsets_skip_new_batch() {
    let broker = broker_with(&["a"]);
    let engine = engine(&broker, "*", 32);
    let last = Arc::new(BatchMetadata::new(broker.partition(TOPIC, 0), 0, 1).unwrap());
    let mut outcome = PullOutcome::found(
        vec![txspout::Message::new(TOPIC, 0, 1, Bytes::from_static(b"m"))],
        1,
    );
    outcome.max_offset = i64::MAX;
    outcome.next_begin_offset = i64::MAX;
    broker.script_pull(Ok(outcome));
    let mut tuples: Vec<SpoutTuple> = Vec::new();

    let returned = engine
        .emit_new(tx(1), &mut tuples, FIRST, Some(last.clone()))
        .await
        .unwrap();

    assert!(Arc::ptr_eq(returned.as_ref().unwrap(), &last));
    assert!(tuples.is_empty());
    assert_eq!(broker.committed(&broker.partition(TOPIC, 0)), None);
}

#[tokio::test(start_paused = true)]
async fn slow_pull_times_out() {
    let broker = broker_with(&["a", "b"]);
    let engine = engine(&broker, "*", 32);
    let mut tuples: Vec<SpoutTuple> = Vec::new();
    let meta = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap();
    tuples.clear();

    broker.set_pull_delay(Duration::from_secs(60));
    let returned = engine
        .emit_new(tx(2), &mut tuples, FIRST, meta.clone())
        .await
        .unwrap();
    assert!(Arc::ptr_eq(returned.as_ref().unwrap(), meta.as_ref().unwrap()));
    assert!(tuples.is_empty());

    let result = engine
        .emit_replay(tx(1), &mut tuples, FIRST, meta.as_ref().unwrap())
        .await;
    assert!(matches!(result, Err(AppError::ReplayFailed(_))));
    assert!(tuples.is_empty());
}

#[tokio::test]
async fn unknown_handle_is_fatal() {
    let broker = broker_with(&["a"]);
    let engine = engine(&broker, "*", 32);
    let mut tuples: Vec<SpoutTuple> = Vec::new();

    let result = engine
        .emit_new(tx(1), &mut tuples, PartitionHandle::new(7), None)
        .await;
    assert!(matches!(result, Err(AppError::UnknownPartitionHandle(_))));
}

#[tokio::test]
async fn replay_pulls_exact_window_and_matches_original() {
    let broker = broker_with(&["a", "b", "c", "d", "e"]);
    let engine = engine(&broker, "*", 32);
    let partition = broker.partition(TOPIC, 0);
    broker.set_committed(&partition, 1);
    let mut original: Vec<SpoutTuple> = Vec::new();
    let meta = engine
        .emit_new(tx(1), &mut original, FIRST, None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!((meta.offset(), meta.next_offset()), (1, 5));
    broker.append(TOPIC, 0, Some("f"), Bytes::from_static(b"later"));

    let mut replayed: Vec<SpoutTuple> = Vec::new();
    engine
        .emit_replay(TransactionAttempt::new(1, 1), &mut replayed, FIRST, &meta)
        .await
        .unwrap();

    let request = broker.pull_requests().pop().unwrap();
    assert_eq!((request.offset, request.max_count), (1, 4));
    assert_eq!(msg_ids(&replayed), msg_ids(&original));
    assert!(replayed.iter().all(|t| t.tx == TransactionAttempt::new(1, 1)));
    // replays leave the cursor alone
    assert_eq!(broker.committed(&partition), Some(4));
}

#[tokio::test]
async fn replay_with_tag_filter_emits_same_subset() {
    let broker = broker_with(&["urgent", "normal", "vip"]);
    let engine = engine(&broker, "urgent||vip", 32);
    let mut original: Vec<SpoutTuple> = Vec::new();
    let meta = engine
        .emit_new(tx(1), &mut original, FIRST, None)
        .await
        .unwrap()
        .unwrap();

    let mut replayed: Vec<SpoutTuple> = Vec::new();
    engine
        .emit_replay(tx(1), &mut replayed, FIRST, &meta)
        .await
        .unwrap();

    assert_eq!(broker.pull_requests().pop().unwrap().max_count, 3);
    assert_eq!(msg_ids(&replayed), msg_ids(&original));
    assert_eq!(replayed.len(), 2);
}

#[tokio::test]
async fn replay_without_data_is_fatal() {
    let broker = broker_with(&["a", "b", "c"]);
    let engine = engine(&broker, "*", 32);
    let mut tuples: Vec<SpoutTuple> = Vec::new();
    let meta = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap()
        .unwrap();

    broker.script_pull(Ok(PullOutcome::empty(PullStatus::NoNewMessage, 0)));
    let mut replayed: Vec<SpoutTuple> = Vec::new();
    let result = engine.emit_replay(tx(1), &mut replayed, FIRST, &meta).await;

    assert!(matches!(result, Err(AppError::ReplayFailed(_))));
    assert!(replayed.is_empty());
}

#[tokio::test]
async fn replay_of_lost_data_is_fatal() {
    let broker = broker_with(&["a", "b", "c"]);
    let engine = engine(&broker, "*", 32);
    let partition = broker.partition(TOPIC, 0);
    let mut tuples: Vec<SpoutTuple> = Vec::new();
    let meta = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap()
        .unwrap();

    broker.truncate_before(&partition, 2);
    let mut replayed: Vec<SpoutTuple> = Vec::new();
    let result = engine.emit_replay(tx(1), &mut replayed, FIRST, &meta).await;

    assert!(matches!(result, Err(AppError::ReplayFailed(_))));
    assert!(replayed.is_empty());
}

#[tokio::test]
async fn replay_of_shorter_window_is_fatal() {
    let broker = broker_with(&["a", "b", "c"]);
    let engine = engine(&broker, "*", 32);
    let mut tuples: Vec<SpoutTuple> = Vec::new();
    let meta = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap()
        .unwrap();

    let short = vec![
        txspout::Message::new(TOPIC, 0, 0, Bytes::from_static(b"a")),
        txspout::Message::new(TOPIC, 0, 1, Bytes::from_static(b"b")),
    ];
    broker.script_pull(Ok(PullOutcome::found(short, 0)));
    let mut replayed: Vec<SpoutTuple> = Vec::new();
    let result = engine.emit_replay(tx(1), &mut replayed, FIRST, &meta).await;

    assert!(matches!(result, Err(AppError::ReplayFailed(_))));
    assert!(replayed.is_empty());
}

#[tokio::test]
async fn replay_connection_failure_is_fatal() {
    let broker = broker_with(&["a", "b"]);
    let engine = engine(&broker, "*", 32);
    let mut tuples: Vec<SpoutTuple> = Vec::new();
    let meta = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap()
        .unwrap();

    broker.set_unreachable(true);
    let result = engine.emit_replay(tx(1), &mut Vec::<SpoutTuple>::new(), FIRST, &meta).await;
    assert!(matches!(result, Err(AppError::ReplayFailed(_))));
}

#[tokio::test]
async fn replay_of_empty_window_is_rejected() {
    let broker = broker_with(&["a"]);
    let engine = engine(&broker, "*", 32);
    let meta = Arc::new(BatchMetadata::new(broker.partition(TOPIC, 0), 1, 1).unwrap());

    let result = engine.emit_replay(tx(1), &mut Vec::<SpoutTuple>::new(), FIRST, &meta).await;
    assert!(matches!(result, Err(AppError::InvalidValue(_))));
    assert!(broker.pull_requests().is_empty());
}

#[tokio::test]
async fn persisted_token_replays_after_restart() {
    let broker = broker_with(&["a", "b", "c"]);
    let mut original: Vec<SpoutTuple> = Vec::new();
    let stored = {
        let engine = engine(&broker, "*", 32);
        let meta = engine
            .emit_new(tx(1), &mut original, FIRST, None)
            .await
            .unwrap()
            .unwrap();
        engine.close();
        serde_json::to_string(meta.as_ref()).unwrap()
    };

    let restored: BatchMetadata = serde_json::from_str(&stored).unwrap();
    let engine = engine(&broker, "*", 32);
    let mut replayed: Vec<SpoutTuple> = Vec::new();
    engine
        .emit_replay(tx(1), &mut replayed, FIRST, &Arc::new(restored))
        .await
        .unwrap();

    assert_eq!(msg_ids(&replayed), msg_ids(&original));
    assert_eq!(broker.connect_calls(), 2);
}

#[tokio::test]
async fn closed_emitter_skips_batches() {
    let broker = broker_with(&["a", "b"]);
    let engine = engine(&broker, "*", 32);
    engine.open().await.unwrap();
    engine.close();
    assert_eq!(broker.shutdown_calls(), 1);

    let mut tuples: Vec<SpoutTuple> = Vec::new();
    let meta = engine
        .emit_new(tx(1), &mut tuples, FIRST, None)
        .await
        .unwrap();
    assert!(meta.is_none());
    assert!(tuples.is_empty());
}

#[tokio::test]
async fn transaction_cycle_over_all_partitions() {
    let broker = broker_with(&["a", "b", "c"]);
    broker.append(TOPIC, 1, Some("x"), Bytes::from_static(b"x0"));
    let spout = spout(&broker, "*", 32);
    assert_eq!(spout.output_fields(), ["tId", "message"]);

    let coordinator = spout.coordinator();
    let emitter = spout.emitter().unwrap();
    assert!(coordinator.is_ready(1));

    let partitions = coordinator.partitions_for_next_batch().await;
    let handles = emitter.ordered_handles(&partitions);
    assert_eq!(handles.len(), 2);

    let mut tuples: Vec<SpoutTuple> = Vec::new();
    let mut metas = Vec::new();
    for handle in &handles {
        metas.push(
            emitter
                .emit_new(tx(1), &mut tuples, *handle, None)
                .await
                .unwrap(),
        );
    }
    assert_eq!(tuples.len(), 4);
    assert_eq!(metas[1].as_ref().unwrap().next_offset(), 1);

    // coordinator and emitter share one registry and one client
    assert_eq!(broker.discovery_calls(), 1);
    assert_eq!(broker.connect_calls(), 1);
    assert!(spout.registry().cached(TOPIC).unwrap().same_as(&partitions));

    coordinator.close();
    emitter.close();
}

#[tokio::test]
async fn concurrent_partitions_share_one_client() {
    let broker = broker_with(&["a", "b", "c"]);
    broker.append(TOPIC, 1, Some("x"), Bytes::from_static(b"x0"));
    let engine = Arc::new(engine(&broker, "*", 32));

    let tasks: Vec<_> = (0..2)
        .map(|position| {
            let engine = engine.clone();
            tokio::spawn(async move {
                let mut tuples: Vec<SpoutTuple> = Vec::new();
                let meta = engine
                    .emit_new(tx(1), &mut tuples, PartitionHandle::new(position), None)
                    .await
                    .unwrap();
                (meta, tuples.len())
            })
        })
        .collect();

    let mut emitted = 0;
    for task in tasks {
        let (meta, count) = task.await.unwrap();
        assert!(meta.is_some());
        emitted += count;
    }
    assert_eq!(emitted, 4);
    assert_eq!(broker.connect_calls(), 1);
}
