use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use clap::Parser;
use dotenv::dotenv;
use rand::seq::SliceRandom;
use tokio::runtime;
use tracing::{info, warn};
use txspout::service::{setup_local_tracing, setup_tracing};
use txspout::{
    AppResult, BatchMetadata, Coordinator, Emitter, MemoryBroker, PartitionHandle, SpoutConfig,
    SpoutTuple, TransactionAttempt, TransactionalSpout,
};

const DEMO_TAGS: [&str; 4] = ["urgent", "vip", "bulk", "audit"];
const DEMO_QUEUES: i32 = 2;

#[derive(Parser)]
#[command(version)]
pub struct CommandLine {
    /// path to config file
    #[arg(short, long)]
    pub conf: Option<String>,
    #[command(subcommand)]
    pub command: Option<Command>,
    /// log level (v: info, vv: debug, vvv: trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    pub verbose: u8,
}

#[derive(Parser)]
pub enum Command {
    PrintConfig,
    /// drive transactions against a seeded in-memory broker
    Run {
        #[arg(short, long, default_value_t = 3)]
        transactions: u64,
        /// messages appended to every queue before the first transaction
        #[arg(short, long, default_value_t = 10)]
        messages: usize,
    },
}

fn main() -> AppResult<()> {
    dotenv().ok();

    let commandline: CommandLine = CommandLine::parse();
    if std::env::var("RUST_LOG").is_err() {
        let level = match commandline.verbose {
            0 => "warn",
            1 => "info",
            2 => "debug",
            _ => "trace",
        };
        std::env::set_var("RUST_LOG", format!("txspout={}", level));
    }

    let config_path = commandline.conf.as_ref().map_or_else(
        || {
            let mut path = PathBuf::from("./");
            path.push("conf.toml");
            path
        },
        PathBuf::from,
    );
    let config = SpoutConfig::set_up_config(config_path)?;

    let (transactions, messages) = match commandline.command {
        Some(Command::PrintConfig) => {
            setup_local_tracing()?;
            tracing::debug!("config loaded for topic {}", config.consumer.topic);
            println!("{:#?}", config);
            return Ok(());
        }
        Some(Command::Run {
            transactions,
            messages,
        }) => (transactions, messages),
        None => (3, 10),
    };

    let rt = runtime::Builder::new_multi_thread().enable_all().build()?;
    // the batch exporter spawns onto the runtime
    let _otel_guard = rt.block_on(async { setup_tracing(&config.telemetry) })?;
    rt.block_on(run_demo(config, transactions, messages))
}

fn seed_broker(topic: &str, messages: usize) -> MemoryBroker {
    let broker = MemoryBroker::new("broker-a");
    broker.create_topic(topic, DEMO_QUEUES);
    let mut rng = rand::thread_rng();
    for queue_id in 0..DEMO_QUEUES {
        for i in 0..messages {
            let tag = DEMO_TAGS.choose(&mut rng).copied();
            broker.append(
                topic,
                queue_id,
                tag,
                Bytes::from(format!("q{}-m{}", queue_id, i)),
            );
        }
    }
    broker
}

fn print_tuples(label: &str, tuples: &[SpoutTuple]) {
    for tuple in tuples {
        println!(
            "{} tx={} queue={} offset={} tags={} body={}",
            label,
            tuple.tx,
            tuple.message.queue_id,
            tuple.message.queue_offset,
            tuple.message.tags.as_deref().unwrap_or("-"),
            String::from_utf8_lossy(&tuple.message.body)
        );
    }
}

async fn run_demo(config: SpoutConfig, transactions: u64, messages: usize) -> AppResult<()> {
    let topic = config.consumer.topic.clone();
    let broker = seed_broker(&topic, messages);
    let spout = TransactionalSpout::new(config, broker.clone())?;
    let coordinator = spout.coordinator();
    let emitter = spout.emitter()?;
    info!("output fields {:?}", spout.output_fields());

    // last token per partition handle id, as the host would persist it
    let mut tokens: HashMap<String, Arc<BatchMetadata>> = HashMap::new();
    let mut history: Vec<(TransactionAttempt, String, Arc<BatchMetadata>)> = Vec::new();

    for transaction_id in 1..=transactions {
        if !coordinator.is_ready(transaction_id) {
            continue;
        }
        let partitions = coordinator.partitions_for_next_batch().await;
        let handles = emitter.ordered_handles(&partitions);
        emitter.refresh_partitions(&handles);

        let tx = TransactionAttempt::new(transaction_id, 0);
        for handle in handles {
            let mut tuples: Vec<SpoutTuple> = Vec::new();
            let last = tokens.get(&handle.id()).cloned();
            let next = emitter.emit_new(tx, &mut tuples, handle, last.clone()).await?;
            print_tuples("new", &tuples);
            if let Some(meta) = next {
                if last.as_ref().is_some_and(|last| Arc::ptr_eq(last, &meta)) {
                    info!("tx={} partition={} had nothing new", tx, handle);
                    continue;
                }
                println!("tx={} partition={} token={}", tx, handle, meta);
                history.push((tx, handle.id(), meta.clone()));
                tokens.insert(handle.id(), meta);
            }
        }
        // one fresh message per queue so later transactions have data
        for queue_id in 0..DEMO_QUEUES {
            broker.append(
                &topic,
                queue_id,
                Some(DEMO_TAGS[0]),
                Bytes::from(format!("q{}-tx{}", queue_id, transaction_id)),
            );
        }
    }

    match history.iter().find(|(_, _, meta)| meta.message_count() > 0) {
        Some((tx, handle_id, meta)) => {
            let handle = PartitionHandle::from_id(handle_id)?;
            let retry = TransactionAttempt::new(tx.transaction_id, tx.attempt_id + 1);
            let mut tuples: Vec<SpoutTuple> = Vec::new();
            emitter.emit_replay(retry, &mut tuples, handle, meta).await?;
            print_tuples("replay", &tuples);
            if let Some(completion) = meta.completion() {
                completion.done();
                info!("batch {} finished: {:?}", meta, completion.wait_finish().await);
            }
        }
        None => warn!("nothing was emitted, no batch to replay"),
    }

    emitter.close();
    coordinator.close();
    Ok(())
}
