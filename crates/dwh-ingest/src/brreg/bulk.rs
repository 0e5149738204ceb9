//! Full unit dump (`/{type}er/lastned`)
//!
//! The dump is a gzipped JSON array of every unit, well over a gigabyte
//! decompressed. It is downloaded to a temporary file and decoded element by
//! element on a blocking thread; rows are handed back in batches over a
//! channel.

use crate::brreg::client::BrregUnitApi;
use crate::brreg::rows::{fake_update_date, make_fake_unit_update, make_row, FILE_CHANGE};
use crate::error::Result;
use chrono::NaiveDateTime;
use dwh_common::Row;
use flate2::read::GzDecoder;
use futures::{Stream, StreamExt};
use reqwest::header;
use serde::de::{self, DeserializeSeed, SeqAccess, Visitor};
use serde_json::Value;
use std::fmt;
use std::io::{BufReader, Read, Seek, SeekFrom};
use tokio::io::AsyncWriteExt;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::{debug, info};

/// Batches buffered between the decoder thread and the consumer
const CHANNEL_CAPACITY: usize = 2;

/// Walks the top-level array and emits batches through `emit`
struct UnitBatcher<F> {
    batch_size: usize,
    download_date: NaiveDateTime,
    emit: F,
}

impl<'de, F> DeserializeSeed<'de> for UnitBatcher<F>
where
    F: FnMut(Vec<Row>) -> bool,
{
    type Value = ();

    fn deserialize<D: de::Deserializer<'de>>(self, deserializer: D) -> std::result::Result<(), D::Error> {
        deserializer.deserialize_seq(self)
    }
}

impl<'de, F> Visitor<'de> for UnitBatcher<F>
where
    F: FnMut(Vec<Row>) -> bool,
{
    type Value = ();

    fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
        formatter.write_str("a JSON array of units")
    }

    fn visit_seq<A: SeqAccess<'de>>(mut self, mut seq: A) -> std::result::Result<(), A::Error> {
        let mut batch = Vec::with_capacity(self.batch_size);
        while let Some(unit) = seq.next_element::<Value>()? {
            let orgnr = unit
                .get("organisasjonsnummer")
                .and_then(Value::as_str)
                .ok_or_else(|| de::Error::custom("unit without organisasjonsnummer"))?
                .to_string();
            let update = make_fake_unit_update(&orgnr, FILE_CHANGE, fake_update_date());
            batch.push(make_row(&update, unit, self.download_date).map_err(de::Error::custom)?);
            if batch.len() >= self.batch_size {
                let full = std::mem::replace(&mut batch, Vec::with_capacity(self.batch_size));
                if !(self.emit)(full) {
                    return Ok(());
                }
            }
        }
        if !batch.is_empty() {
            (self.emit)(batch);
        }
        Ok(())
    }
}

/// Decodes a gzipped JSON array of units, calling `emit` for every batch.
///
/// `emit` returns false to stop early; the rest of the file is then left
/// unread. Returns the number of units emitted. Anything but whitespace after
/// the array is an error.
pub fn decode_unit_file<R, F>(reader: R, batch_size: usize, download_date: NaiveDateTime, mut emit: F) -> Result<usize>
where
    R: Read,
    F: FnMut(Vec<Row>) -> bool,
{
    let decoder = BufReader::new(GzDecoder::new(reader));
    let mut deserializer = serde_json::Deserializer::from_reader(decoder);
    let mut emitted = 0;
    let mut stopped = false;
    let batcher = UnitBatcher {
        batch_size: batch_size.max(1),
        download_date,
        emit: |batch: Vec<Row>| {
            emitted += batch.len();
            stopped = !emit(batch);
            !stopped
        },
    };
    match batcher.deserialize(&mut deserializer).and_then(|()| deserializer.end()) {
        Ok(()) => Ok(emitted),
        // the array is left open when the consumer stops
        Err(_) if stopped => Ok(emitted),
        Err(e) => Err(e.into()),
    }
}

impl BrregUnitApi {
    /// Streams every unit as rows, `batch_size` rows at a time.
    ///
    /// The file API carries no update information, so every row gets a faked
    /// `FLATFIL` update. The dump is regenerated daily some time after 05:00
    /// Norwegian time.
    pub async fn stream_all_units_as_rows_from_file(
        &self,
        batch_size: usize,
    ) -> Result<impl Stream<Item = Result<Vec<Row>>>> {
        let url = self.file_url();
        info!(%url, "Requesting unit file");
        let response = self
            .client
            .get(&url)
            .header(header::ACCEPT, self.file_accept())
            .send()
            .await?
            .error_for_status()?;

        let mut file = tempfile::tempfile()?;
        let mut writer = tokio::fs::File::from_std(file.try_clone()?);
        let mut body = response.bytes_stream();
        let mut downloaded = 0usize;
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            downloaded += chunk.len();
            writer.write_all(&chunk).await?;
        }
        writer.flush().await?;
        drop(writer);
        file.seek(SeekFrom::Start(0))?;
        info!(bytes = downloaded, "Downloaded unit file, decompressing");

        let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
        let download_date = self.download_date();
        tokio::task::spawn_blocking(move || {
            let emit_tx = tx.clone();
            let result = decode_unit_file(file, batch_size, download_date, |batch| {
                emit_tx.blocking_send(Ok(batch)).is_ok()
            });
            match result {
                Ok(total) => debug!(units = total, "Finished reading unit file"),
                Err(e) => {
                    let _ = tx.blocking_send(Err(e));
                },
            }
        });

        Ok(ReceiverStream::new(rx))
    }
}
