//! Topic metadata, offset lookups and batched reads

use crate::config::{KafkaSettings, DEFAULT_KAFKA_BATCH_SIZE};
use crate::error::{IngestError, Result};
use crate::gcp::KafkaCredentials;
use crate::kafka::avro::parse_schema;
use crate::kafka::batch::BatchState;
use crate::kafka::config::KafkaEndpoint;
use crate::kafka::record::{KafkaRecord, MessageDecoder};
use crate::kafka::registry::SchemaRegistryClient;
use crate::kafka::serialization::SerializationType;
use apache_avro::Schema;
use rdkafka::consumer::{BaseConsumer, Consumer, StreamConsumer};
use rdkafka::error::{KafkaError, RDKafkaErrorCode};
use rdkafka::message::{Message, OwnedMessage};
use rdkafka::{Offset, TopicPartitionList};
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// Timeout for metadata, watermark and offset lookups
const METADATA_TIMEOUT: Duration = Duration::from_secs(10);

/// Applied to each record before it is added to a batch
pub type RecordCallback = Box<dyn FnMut(KafkaRecord) -> KafkaRecord + Send>;

/// How to read a topic
pub struct ReadOptions {
    /// Start at the end of every partition instead of the beginning
    pub read_from_end: bool,
    pub key_type: Option<SerializationType>,
    pub value_type: Option<SerializationType>,
    /// `(partition, offset)` pairs overriding the default start position;
    /// partitions the topic does not have are ignored
    pub custom_start_offsets: Vec<(i32, i64)>,
    pub batch_size: usize,
    pub record_callback: Option<RecordCallback>,
}

impl Default for ReadOptions {
    fn default() -> Self {
        Self {
            read_from_end: false,
            key_type: None,
            value_type: None,
            custom_start_offsets: Vec::new(),
            batch_size: DEFAULT_KAFKA_BATCH_SIZE,
            record_callback: None,
        }
    }
}

/// Start offset for each partition, custom offsets taking precedence
pub fn start_offsets(partitions: &[i32], default: Offset, custom: &[(i32, i64)]) -> Vec<(i32, Offset)> {
    let custom: HashMap<i32, i64> = custom.iter().copied().collect();
    partitions
        .iter()
        .map(|partition| {
            let offset = custom.get(partition).map_or(default, |offset| Offset::Offset(*offset));
            (*partition, offset)
        })
        .collect()
}

/// Offsets lookup result: a concrete offset, or the end of the partition when
/// no message is that recent
pub fn closest_offset(found: Offset) -> Offset {
    match found {
        Offset::Offset(offset) if offset >= 0 => Offset::Offset(offset),
        _ => Offset::End,
    }
}

fn is_fatal(error: &KafkaError) -> bool {
    error.rdkafka_error_code() == Some(RDKafkaErrorCode::Fatal)
}

fn partition_list(topic: &str, offsets: &[(i32, Offset)]) -> Result<TopicPartitionList> {
    let mut list = TopicPartitionList::new();
    for (partition, offset) in offsets {
        list.add_partition_offset(topic, *partition, *offset)?;
    }
    Ok(list)
}

/// Admin and consumer access to one cluster and its schema registry
#[derive(Debug, Clone)]
pub struct KafkaConnection {
    endpoint: KafkaEndpoint,
    registry: SchemaRegistryClient,
    poll_timeout: Duration,
}

impl KafkaConnection {
    pub fn new(endpoint: KafkaEndpoint, http_client: reqwest::Client, poll_timeout: Duration) -> Self {
        let registry = SchemaRegistryClient::new(
            http_client,
            endpoint.schema_registry_url.clone(),
            endpoint.schema_registry_auth.clone(),
        );
        Self {
            endpoint,
            registry,
            poll_timeout,
        }
    }

    pub fn from_credentials(
        credentials: &KafkaCredentials,
        http_client: reqwest::Client,
        settings: &KafkaSettings,
    ) -> Self {
        Self::new(
            KafkaEndpoint::from_credentials(credentials),
            http_client,
            settings.poll_timeout(),
        )
    }

    pub fn registry(&self) -> &SchemaRegistryClient {
        &self.registry
    }

    /// Runs a blocking librdkafka call on a short-lived consumer
    async fn with_consumer<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&BaseConsumer) -> Result<T> + Send + 'static,
    {
        let config = self.endpoint.consumer_config();
        tokio::task::spawn_blocking(move || {
            let consumer: BaseConsumer = config.create()?;
            f(&consumer)
        })
        .await?
    }

    /// Parsed Avro schema registered under `schema_id`
    pub async fn get_confluent_registry_schema_from_id(&self, schema_id: u32) -> Result<Schema> {
        let registered = self.registry.get_schema(schema_id).await?;
        parse_schema(&registered.schema)
    }

    /// Every schema registered for the topic's key and value subjects,
    /// possibly none
    pub async fn find_all_confluent_registry_schemas_for_topic(&self, topic: &str) -> Result<HashMap<u32, Schema>> {
        let mut schemas = HashMap::new();
        for field in ["key", "value"] {
            let subject = format!("{topic}-{field}");
            let versions = match self.registry.get_versions(&subject).await {
                Ok(versions) => versions,
                Err(e) if e.is_registry_not_found() => {
                    debug!(%subject, "No schemas registered");
                    continue;
                },
                Err(e) => return Err(e),
            };
            for version in versions {
                let info = match self.registry.get_version(&subject, version).await {
                    Ok(info) => info,
                    Err(e) if e.is_registry_not_found() => break,
                    Err(e) => return Err(e),
                };
                if !schemas.contains_key(&info.id) {
                    schemas.insert(info.id, self.get_confluent_registry_schema_from_id(info.id).await?);
                }
            }
        }
        info!(topic, schemas = schemas.len(), "Cached registry schemas for topic");
        Ok(schemas)
    }

    /// Partition ids of `topic`, in ascending order
    pub async fn get_partitions(&self, topic: &str) -> Result<Vec<i32>> {
        let topic = topic.to_string();
        self.with_consumer(move |consumer| {
            let metadata = consumer.fetch_metadata(Some(topic.as_str()), METADATA_TIMEOUT)?;
            let topic_metadata = metadata
                .topics()
                .iter()
                .find(|t| t.name() == topic)
                .ok_or_else(|| IngestError::TopicNotFound(topic.clone()))?;
            if let Some(code) = topic_metadata.error() {
                let code = RDKafkaErrorCode::from(code);
                if code == RDKafkaErrorCode::UnknownTopicOrPartition {
                    return Err(IngestError::TopicNotFound(topic.clone()));
                }
                return Err(KafkaError::MetadataFetch(code).into());
            }
            let mut partitions = Vec::with_capacity(topic_metadata.partitions().len());
            for partition in topic_metadata.partitions() {
                if let Some(code) = partition.error() {
                    return Err(KafkaError::MetadataFetch(RDKafkaErrorCode::from(code)).into());
                }
                partitions.push(partition.id());
            }
            partitions.sort_unstable();
            Ok(partitions)
        })
        .await
    }

    /// Low and high watermarks of one partition
    pub async fn get_start_and_end_offsets(&self, topic: &str, partition: i32) -> Result<Option<(i64, i64)>> {
        let topic = topic.to_string();
        self.with_consumer(move |consumer| {
            match consumer.fetch_watermarks(&topic, partition, METADATA_TIMEOUT) {
                Ok(watermarks) => Ok(Some(watermarks)),
                Err(KafkaError::MetadataFetch(RDKafkaErrorCode::UnknownPartition)) => Ok(None),
                Err(e) => Err(e.into()),
            }
        })
        .await
    }

    /// Earliest offset per partition whose timestamp is at or after
    /// `timestamp_ms`, [`Offset::End`] where every message is older
    pub async fn get_closest_offsets(&self, topic: &str, timestamp_ms: i64) -> Result<Vec<(i32, Offset)>> {
        let partitions = self.get_partitions(topic).await?;
        let lookup = partition_list(
            topic,
            &partitions
                .iter()
                .map(|partition| (*partition, Offset::Offset(timestamp_ms)))
                .collect::<Vec<_>>(),
        )?;
        self.with_consumer(move |consumer| {
            let found = consumer.offsets_for_times(lookup, METADATA_TIMEOUT)?;
            Ok(found
                .elements()
                .iter()
                .map(|element| (element.partition(), closest_offset(element.offset())))
                .collect())
        })
        .await
    }

    /// Assigns every partition of `topic` and returns a reader handing out
    /// record batches until all partitions are exhausted
    pub async fn read_batched_messages_from_topic(&self, topic: &str, options: ReadOptions) -> Result<TopicBatchReader> {
        let mut decoder = MessageDecoder::new(self.registry.clone());
        let avro = Some(SerializationType::ConfluentAvro);
        if options.key_type == avro || options.value_type == avro {
            decoder = decoder.with_schemas(self.find_all_confluent_registry_schemas_for_topic(topic).await?);
        }

        let partitions = self.get_partitions(topic).await?;
        let default_offset = if options.read_from_end {
            Offset::End
        } else {
            Offset::Beginning
        };
        let assignment = partition_list(
            topic,
            &start_offsets(&partitions, default_offset, &options.custom_start_offsets),
        )?;

        let consumer: StreamConsumer = self.endpoint.consumer_config().create()?;
        consumer.assign(&assignment)?;
        let assigned: Vec<i32> = consumer
            .assignment()?
            .elements()
            .iter()
            .map(|element| element.partition())
            .collect();
        info!(topic, partitions = ?assigned, "Assigned to topic partitions");

        Ok(TopicBatchReader {
            topic: topic.to_string(),
            consumer,
            decoder,
            state: BatchState::new(options.batch_size, assigned),
            key_type: options.key_type,
            value_type: options.value_type,
            callback: options.record_callback,
            poll_timeout: self.poll_timeout,
            paused: false,
            consumed: 0,
            empty_polls: 0,
        })
    }
}

enum PollEvent {
    Empty,
    PartitionEof(i32),
    Failed(KafkaError),
    Received(OwnedMessage),
}

/// Pull-based batch reader over one topic
///
/// The consumer is paused while the caller works on a batch and resumed on
/// the next call.
pub struct TopicBatchReader {
    topic: String,
    consumer: StreamConsumer,
    decoder: MessageDecoder,
    state: BatchState<KafkaRecord>,
    key_type: Option<SerializationType>,
    value_type: Option<SerializationType>,
    callback: Option<RecordCallback>,
    poll_timeout: Duration,
    paused: bool,
    consumed: u64,
    empty_polls: u64,
}

impl TopicBatchReader {
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Next non-empty batch, or `None` once every partition reached its end.
    ///
    /// When reading fails with records pending, those records are returned
    /// and the error follows on the next call.
    pub async fn next_batch(&mut self) -> Result<Option<Vec<KafkaRecord>>> {
        if let Some(error) = self.state.take_error() {
            return Err(error);
        }
        if self.state.is_finished() {
            return Ok(None);
        }
        match self.poll_batch().await {
            Ok(batch) => Ok(batch),
            Err(error) => {
                error!(topic = %self.topic, %error, "Bailing out of topic read");
                self.state.fail(error)
            },
        }
    }

    fn set_paused(&mut self, paused: bool) -> Result<()> {
        if self.paused == paused {
            return Ok(());
        }
        let assignment = self.consumer.assignment()?;
        if paused {
            self.consumer.pause(&assignment)?;
        } else {
            self.consumer.resume(&assignment)?;
        }
        self.paused = paused;
        Ok(())
    }

    fn unassign(&self, partition: i32) -> Result<()> {
        let mut list = TopicPartitionList::new();
        list.add_partition(&self.topic, partition);
        self.consumer.incremental_unassign(&list)?;
        Ok(())
    }

    async fn poll(&self) -> PollEvent {
        match tokio::time::timeout(self.poll_timeout, self.consumer.recv()).await {
            Err(_) => PollEvent::Empty,
            Ok(Err(KafkaError::PartitionEOF(partition))) => PollEvent::PartitionEof(partition),
            Ok(Err(e)) => PollEvent::Failed(e),
            Ok(Ok(message)) => PollEvent::Received(message.detach()),
        }
    }

    async fn poll_batch(&mut self) -> Result<Option<Vec<KafkaRecord>>> {
        self.set_paused(false)?;
        loop {
            let message = match self.poll().await {
                PollEvent::Empty => {
                    self.empty_polls += 1;
                    continue;
                },
                PollEvent::PartitionEof(partition) => {
                    debug!(topic = %self.topic, partition, "Reached end of partition");
                    self.unassign(partition)?;
                    let batch = self.state.partition_eof(partition);
                    if self.state.is_finished() {
                        info!(topic = %self.topic, consumed = self.consumed, "Completed topic read");
                        if self.empty_polls > 0 {
                            warn!(topic = %self.topic, empty_polls = self.empty_polls, "Polls returned no events");
                        }
                    }
                    match batch {
                        Some(batch) => return Ok(Some(batch)),
                        None if self.state.is_finished() => return Ok(None),
                        None => continue,
                    }
                },
                PollEvent::Failed(e) if is_fatal(&e) => return Err(e.into()),
                PollEvent::Failed(e) => {
                    error!(topic = %self.topic, error = %e, "Consumer error");
                    continue;
                },
                PollEvent::Received(message) => message,
            };

            self.consumed += 1;
            let mut record = self
                .decoder
                .record_from_message(&message, self.key_type, self.value_type)
                .await
                .map_err(|e| {
                    IngestError::Deserialization(format!(
                        "{}[{}]@{}: {e}",
                        message.topic(),
                        message.partition(),
                        message.offset()
                    ))
                })?;
            if let Some(callback) = self.callback.as_mut() {
                record = callback(record);
            }
            if let Some(batch) = self.state.push(record) {
                info!(topic = %self.topic, records = batch.len(), "Yielding kafka batch");
                self.set_paused(true)?;
                return Ok(Some(batch));
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const KEY_SCHEMA: &str = r#""string""#;
    const VALUE_SCHEMA: &str = r#"{"type": "record", "name": "V", "fields": [{"name": "a", "type": "int"}]}"#;

    fn connection(registry_url: &str) -> KafkaConnection {
        KafkaConnection::new(
            KafkaEndpoint::plaintext("localhost:9092", registry_url),
            reqwest::Client::new(),
            Duration::from_secs(1),
        )
    }

    #[test]
    fn test_start_offsets_custom_override() {
        let offsets = start_offsets(&[0, 1, 2], Offset::Beginning, &[(1, 40), (7, 3)]);
        assert_eq!(
            offsets,
            vec![(0, Offset::Beginning), (1, Offset::Offset(40)), (2, Offset::Beginning)]
        );
    }

    #[test]
    fn test_start_offsets_from_end() {
        let offsets = start_offsets(&[0], Offset::End, &[]);
        assert_eq!(offsets, vec![(0, Offset::End)]);
    }

    #[test]
    fn test_closest_offset() {
        assert_eq!(closest_offset(Offset::Offset(12)), Offset::Offset(12));
        assert_eq!(closest_offset(Offset::Offset(-1)), Offset::End);
        assert_eq!(closest_offset(Offset::End), Offset::End);
        assert_eq!(closest_offset(Offset::Invalid), Offset::End);
    }

    #[test]
    fn test_closest_offset_keeps_first_offset() {
        // a timestamp at or before the first message resolves to offset 0,
        // which is a real position and not the end of the partition
        assert_eq!(closest_offset(Offset::Offset(0)), Offset::Offset(0));
        assert_ne!(closest_offset(Offset::Offset(0)), Offset::End);
    }

    #[test]
    fn test_partition_list() {
        let list = partition_list("t", &[(0, Offset::Beginning), (1, Offset::Offset(5))]).unwrap();
        assert_eq!(list.count(), 2);
        let elements = list.elements();
        assert_eq!(elements[1].partition(), 1);
        assert_eq!(elements[1].offset(), Offset::Offset(5));
    }

    #[test]
    fn test_default_read_options() {
        let options = ReadOptions::default();
        assert_eq!(options.batch_size, 1000);
        assert!(!options.read_from_end);
        assert!(options.record_callback.is_none());
    }

    #[tokio::test]
    async fn test_find_schemas_skips_missing_subjects() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/subjects/orders-key/versions"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"error_code": 40401, "message": "no"})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subjects/orders-value/versions"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([1, 2])))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subjects/orders-value/versions/1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "subject": "orders-value", "version": 1, "id": 21, "schema": VALUE_SCHEMA
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/subjects/orders-value/versions/2"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "subject": "orders-value", "version": 2, "id": 22, "schema": KEY_SCHEMA
            })))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/schemas/ids/21"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"schema": VALUE_SCHEMA})))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/schemas/ids/22"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"schema": KEY_SCHEMA})))
            .mount(&server)
            .await;

        let schemas = connection(&server.uri())
            .find_all_confluent_registry_schemas_for_topic("orders")
            .await
            .unwrap();
        let mut ids: Vec<u32> = schemas.keys().copied().collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![21, 22]);
        assert!(matches!(schemas[&21], Schema::Record(_)));
    }

    #[tokio::test]
    async fn test_find_schemas_fails_on_registry_outage() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(503).set_body_string("unavailable"))
            .mount(&server)
            .await;

        let result = connection(&server.uri())
            .find_all_confluent_registry_schemas_for_topic("orders")
            .await;
        assert!(matches!(result, Err(IngestError::SchemaRegistry { code: 503, .. })));
    }

    #[tokio::test]
    async fn test_unparseable_registry_schema() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/schemas/ids/5"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"schema": "{\"type\": \"nope\"}"})))
            .mount(&server)
            .await;

        let result = connection(&server.uri()).get_confluent_registry_schema_from_id(5).await;
        assert!(matches!(result, Err(IngestError::Avro(_))));
    }
}
