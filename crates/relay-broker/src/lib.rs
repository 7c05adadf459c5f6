//! relay-broker
//!
//! Converts Records into keyed byte messages and forwards them to the
//! message bus in one batch call per poll.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use futures::future::try_join_all;
use rdkafka::config::ClientConfig;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use relay_config::KafkaConfig;
use relay_model::Record;

/// Abstraction over the message-bus client so `relay-service` can be
/// exercised against an in-memory fake in tests.
#[async_trait]
pub trait Broker: Send + Sync {
    async fn send_records(&self, topic: &str, records: &[Record]) -> anyhow::Result<()>;
}

pub struct KafkaBroker {
    producer: FutureProducer,
}

impl KafkaBroker {
    pub fn build(cfg: &KafkaConfig) -> anyhow::Result<Self> {
        if cfg.brokers.is_empty() {
            anyhow::bail!("broker - kafka.brokers must be non-empty");
        }

        let mut client = ClientConfig::new();
        client
            .set("bootstrap.servers", cfg.brokers.join(","))
            .set("batch.num.messages", cfg.batch_size.to_string())
            .set("linger.ms", cfg.batch_timeout.to_string())
            .set("message.max.bytes", cfg.max_request_size.to_string())
            .set("acks", required_acks(&cfg.required_acks)?)
            // Key-stable partitioning: equal keys must land on the same
            // partition so per-pk ordering holds at the bus.
            .set("partitioner", "consistent")
            .set(
                "allow.auto.create.topics",
                cfg.topic_auto_create.to_string(),
            );

        if cfg.compress {
            client.set("compression.type", "zstd");
        }

        let producer: FutureProducer = client
            .create()
            .context("broker - building kafka producer failed")?;

        Ok(KafkaBroker { producer })
    }
}

fn required_acks(acks: &str) -> anyhow::Result<&'static str> {
    match acks {
        "none" => Ok("0"),
        "one" => Ok("1"),
        "all" => Ok("all"),
        other => anyhow::bail!("broker - unrecognised kafka.required_acks {other:?}"),
    }
}

#[async_trait]
impl Broker for KafkaBroker {
    async fn send_records(&self, topic: &str, records: &[Record]) -> anyhow::Result<()> {
        // Validate and encode every message up front: a single bad record
        // (e.g. empty pk) must fail the whole batch before any message has
        // reached the wire, not race against sends already in flight.
        let mut encoded = Vec::with_capacity(records.len());
        for record in records {
            let key = record
                .key_bytes()
                .map_err(anyhow::Error::from)
                .context("broker - building message key failed")?;
            let value = record
                .value_bytes()
                .map_err(anyhow::Error::from)
                .context("broker - building message value failed")?;
            encoded.push((key, value));
        }

        let sends = encoded.iter().map(|(key, value)| async move {
            let fut_record: FutureRecord<'_, [u8], [u8]> =
                FutureRecord::to(topic).key(&key).payload(&value);

            self.producer
                .send(fut_record, Timeout::Never)
                .await
                .map_err(|(e, _)| anyhow::anyhow!(e))
                .context("broker - publishing message failed")?;

            Ok::<(), anyhow::Error>(())
        });

        try_join_all(sends)
            .await
            .context("broker - send records failed")?;

        tracing::debug!(topic, count = records.len(), "broker - batch published");
        Ok(())
    }
}

/// Kept around for callers that want an explicit timeout instead of
/// `Timeout::Never`; unused by the default wiring but a documented knob.
pub fn flush_timeout(batch_timeout_ms: u32) -> Duration {
    Duration::from_millis(batch_timeout_ms as u64)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn required_acks_maps_known_modes() {
        assert_eq!(required_acks("none").unwrap(), "0");
        assert_eq!(required_acks("one").unwrap(), "1");
        assert_eq!(required_acks("all").unwrap(), "all");
    }

    #[test]
    fn required_acks_rejects_unknown_mode() {
        assert!(required_acks("quorum").is_err());
    }

    #[test]
    fn build_rejects_empty_brokers() {
        let cfg = KafkaConfig::default();
        assert!(cfg.brokers.is_empty());
        assert!(KafkaBroker::build(&cfg).is_err());
    }

    // S6: a record with an empty pk value must fail the whole batch before
    // any message reaches the producer, never a partial publish.
    #[tokio::test]
    async fn invalid_record_fails_whole_batch_before_any_send() {
        use relay_model::{Action, Meta, Pk};
        use std::collections::BTreeMap;

        let cfg = KafkaConfig {
            brokers: vec!["127.0.0.1:9092".to_string()],
            ..KafkaConfig::default()
        };
        let broker = KafkaBroker::build(&cfg).unwrap();

        let good = Record {
            meta: Meta {
                pk: Pk { name: "id".into(), value: "1".into() },
                op: Some(Action::Update),
                ts: "".into(),
                ux_ts: "".into(),
            },
            fields: BTreeMap::new(),
        };
        let bad = Record {
            meta: Meta {
                pk: Pk { name: "id".into(), value: "".into() },
                op: Some(Action::Update),
                ts: "".into(),
                ux_ts: "".into(),
            },
            fields: BTreeMap::new(),
        };

        let err = broker.send_records("orders.cdc", &[good, bad]).await.unwrap_err();
        assert!(err.to_string().contains("message key"));
    }
}
