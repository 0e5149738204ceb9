//! Execution of CLI commands
//!
//! Every command writes JSON to the given writer: a single document, or one
//! line per row/record for the streaming commands.

use crate::brreg::BrregUnitApi;
use crate::cli::{BrregCommand, Commands, KafkaArgs, KafkaCommand, SsbCommand, TransformCommand};
use crate::config::IngestConfig;
use crate::error::{IngestError, Result};
use crate::gcp::auth::token_provider;
use crate::gcp::{get_kafka_credentials, secret_store_from_config, BigQueryClient};
use crate::kafka::{KafkaConnection, KafkaEndpoint, ReadOptions};
use crate::ssb::{SsbClient, API_NAME as SSB_API_NAME, API_VERSION as SSB_API_VERSION};
use dwh_common::checksum::string_to_sha256_hash;
use dwh_common::transforms::{string_to_code, string_to_naive_norwegian_datetime, string_to_naive_utc0_datetime};
use dwh_common::Row;
use futures::{pin_mut, StreamExt};
use serde::Serialize;
use serde_json::json;
use std::io::Write;
use tracing::{debug, info};

fn download_date() -> chrono::NaiveDateTime {
    crate::oracle::etl::today()
}

fn write_json<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer_pretty(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

fn write_line<W: Write, T: Serialize + ?Sized>(out: &mut W, value: &T) -> Result<()> {
    serde_json::to_writer(&mut *out, value)?;
    writeln!(out)?;
    Ok(())
}

pub async fn run<W: Write>(command: Commands, config: &IngestConfig, out: &mut W) -> Result<()> {
    debug!(?command, "Running command");
    match command {
        Commands::Ssb(command) => ssb(command, config, out).await,
        Commands::Brreg(command) => brreg(command, config, out).await,
        Commands::Kafka(args) => kafka(args, config, out).await,
        Commands::Bigquery { sql } => bigquery(&sql, config, out).await,
        Commands::Transform(command) => transform(command, out),
    }
}

async fn ssb<W: Write>(command: SsbCommand, config: &IngestConfig, out: &mut W) -> Result<()> {
    let client = SsbClient::from_config(config)?;
    match command {
        SsbCommand::Classification { id, include_future } => {
            write_json(out, &client.get_classification(id, include_future).await?)
        },
        SsbCommand::Version { id, records, metadata } => {
            let version = client.get_classification_version(id).await?;
            if records {
                let rows = version.to_records(SSB_API_VERSION, SSB_API_NAME, download_date())?;
                rows.iter().try_for_each(|row| write_line(out, row))
            } else if metadata {
                write_json(out, &version.to_metadata_record(SSB_API_NAME, download_date())?)
            } else {
                write_json(out, &version)
            }
        },
        SsbCommand::Correspondence { id, records } => {
            let correspondence = client.get_correspondence(id).await?;
            if records {
                let rows = correspondence.to_records(SSB_API_VERSION, SSB_API_NAME, download_date())?;
                rows.iter().try_for_each(|row| write_line(out, row))
            } else {
                write_json(out, &correspondence)
            }
        },
        SsbCommand::Changes {
            classification_id,
            from,
            to,
            records,
        } => {
            let changes = client
                .get_changes_between_versions_in_classification(classification_id, from, to)
                .await?;
            if records {
                let date = download_date();
                changes.iter().try_for_each(|change| {
                    write_line(
                        out,
                        &change.to_record(classification_id, from, to, SSB_API_NAME, date),
                    )
                })
            } else {
                write_json(out, &changes)
            }
        },
    }
}

async fn brreg<W: Write>(command: BrregCommand, config: &IngestConfig, out: &mut W) -> Result<()> {
    match command {
        BrregCommand::Unit { orgnr, unit_type, fake } => {
            let api = BrregUnitApi::from_config(config, unit_type, download_date())?;
            write_json(out, &api.get_unit_as_row(&orgnr, fake, fake).await?)
        },
        BrregCommand::UpdatesSince {
            since,
            unit_type,
            all_updates,
        } => {
            let api = BrregUnitApi::from_config(config, unit_type, download_date())?;
            let since = string_to_naive_utc0_datetime(&since)?;
            write_json(out, &api.get_all_updates_since(since, !all_updates).await?)
        },
        BrregCommand::Dump {
            unit_type,
            batch_size,
            count_only,
        } => {
            let api = BrregUnitApi::from_config(config, unit_type, download_date())?;
            let batches = api.stream_all_units_as_rows_from_file(batch_size).await?;
            pin_mut!(batches);
            let mut total = 0usize;
            while let Some(batch) = batches.next().await {
                let batch: Vec<Row> = batch?;
                total += batch.len();
                if count_only {
                    write_line(out, &json!({"rows": batch.len(), "total": total}))?;
                } else {
                    batch.iter().try_for_each(|row| write_line(out, row))?;
                }
            }
            info!(%unit_type, total, "Streamed BRREG dump");
            Ok(())
        },
    }
}

async fn kafka_connection(args: &KafkaArgs, config: &IngestConfig) -> Result<KafkaConnection> {
    let client = config.http_client()?;
    match (&args.brokers, &args.schema_registry_url) {
        (Some(brokers), Some(registry)) => Ok(KafkaConnection::new(
            KafkaEndpoint::plaintext(brokers, registry),
            client,
            config.kafka.poll_timeout(),
        )),
        _ => {
            let store = secret_store_from_config(config)?;
            let credentials = get_kafka_credentials(store.as_ref(), &config.kafka.credentials_secret).await?;
            Ok(KafkaConnection::from_credentials(&credentials, client, &config.kafka))
        },
    }
}

async fn kafka<W: Write>(args: KafkaArgs, config: &IngestConfig, out: &mut W) -> Result<()> {
    let connection = kafka_connection(&args, config).await?;
    match args.command {
        KafkaCommand::Partitions { topic } => write_json(out, &connection.get_partitions(&topic).await?),
        KafkaCommand::Offsets {
            topic,
            timestamp_ms: Some(timestamp_ms),
        } => {
            let offsets: Vec<_> = connection
                .get_closest_offsets(&topic, timestamp_ms)
                .await?
                .into_iter()
                .map(|(partition, offset)| json!({"partition": partition, "offset": offset.to_raw()}))
                .collect();
            write_json(out, &offsets)
        },
        KafkaCommand::Offsets {
            topic,
            timestamp_ms: None,
        } => {
            let mut offsets = Vec::new();
            for partition in connection.get_partitions(&topic).await? {
                let watermarks = connection.get_start_and_end_offsets(&topic, partition).await?;
                offsets.push(json!({
                    "partition": partition,
                    "start": watermarks.map(|(low, _)| low),
                    "end": watermarks.map(|(_, high)| high),
                }));
            }
            write_json(out, &offsets)
        },
        KafkaCommand::Read {
            topic,
            key_type,
            value_type,
            from_end,
            start_offsets,
            batch_size,
            max_batches,
        } => {
            let options = ReadOptions {
                read_from_end: from_end,
                key_type,
                value_type,
                custom_start_offsets: start_offsets,
                batch_size: batch_size.unwrap_or(config.kafka.batch_size),
                record_callback: None,
            };
            let mut reader = connection.read_batched_messages_from_topic(&topic, options).await?;
            let mut batches = 0usize;
            while max_batches.map_or(true, |max| batches < max) {
                let Some(batch) = reader.next_batch().await? else {
                    break;
                };
                batches += 1;
                batch.iter().try_for_each(|record| write_line(out, record))?;
            }
            info!(%topic, batches, "Finished reading topic");
            Ok(())
        },
    }
}

async fn bigquery<W: Write>(sql: &str, config: &IngestConfig, out: &mut W) -> Result<()> {
    let project = config
        .gcp
        .project
        .clone()
        .ok_or_else(|| IngestError::config("GCP_PROJECT is required for BigQuery"))?;
    let client = config.http_client()?;
    let tokens = token_provider(client.clone(), &config.gcp.metadata_url);
    let bigquery = BigQueryClient::new(client, &config.gcp.bigquery_api_url, project, tokens);
    let rows = bigquery.query(sql).await?;
    rows.iter().try_for_each(|row| write_line(out, row))
}

fn transform<W: Write>(command: TransformCommand, out: &mut W) -> Result<()> {
    let result = match command {
        TransformCommand::Code { text } => json!(string_to_code(&text)),
        TransformCommand::Hash { text } => json!(string_to_sha256_hash(&text)),
        TransformCommand::NorwegianTime { text } => {
            json!(string_to_naive_norwegian_datetime(&text)?.format("%Y-%m-%dT%H:%M:%S").to_string())
        },
    };
    write_line(out, &result)
}
