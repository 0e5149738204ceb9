//! Command-line definitions for the `dwh-ingest` binary

use crate::brreg::UnitType;
use crate::kafka::SerializationType;
use chrono::NaiveDate;
use clap::{Args, Parser, Subcommand};

/// DWH ingest - fetch source data for the Oppfølging data warehouse
#[derive(Parser, Debug)]
#[command(name = "dwh-ingest")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// SSB classification API (KLASS)
    #[command(subcommand)]
    Ssb(SsbCommand),

    /// BRREG Enhetsregisteret
    #[command(subcommand)]
    Brreg(BrregCommand),

    /// Kafka topics and schema registry
    Kafka(KafkaArgs),

    /// Run a BigQuery standard SQL query
    Bigquery {
        /// Query text
        sql: String,
    },

    /// Apply a transform to a string
    #[command(subcommand)]
    Transform(TransformCommand),
}

#[derive(Subcommand, Debug)]
pub enum SsbCommand {
    /// Fetch a classification
    Classification {
        id: i64,

        /// Include versions valid in the future
        #[arg(long)]
        include_future: bool,
    },

    /// Fetch a classification version
    Version {
        id: i64,

        /// Print item rows instead of the version document
        #[arg(long, conflicts_with = "metadata")]
        records: bool,

        /// Print the metadata row instead of the version document
        #[arg(long)]
        metadata: bool,
    },

    /// Fetch a correspondence table
    Correspondence {
        id: i64,

        /// Print map rows instead of the table document
        #[arg(long)]
        records: bool,
    },

    /// Code changes in a classification between two dates
    Changes {
        classification_id: i64,

        /// First day of the period (YYYY-MM-DD)
        #[arg(long)]
        from: NaiveDate,

        /// Last day of the period (YYYY-MM-DD), open-ended when omitted
        #[arg(long)]
        to: Option<NaiveDate>,

        /// Print change rows instead of the change items
        #[arg(long)]
        records: bool,
    },
}

#[derive(Subcommand, Debug)]
pub enum BrregCommand {
    /// Row for one unit from its latest update
    Unit {
        orgnr: String,

        #[arg(short, long, value_enum, default_value = "enhet")]
        unit_type: UnitType,

        /// Fake the unit and its update when BRREG has none
        #[arg(long)]
        fake: bool,
    },

    /// Updates on all units since a point in time
    UpdatesSince {
        /// UTC timestamp, e.g. 2024-01-01T00:00:00Z
        since: String,

        #[arg(short, long, value_enum, default_value = "enhet")]
        unit_type: UnitType,

        /// Keep every update per unit, not only the latest
        #[arg(long)]
        all_updates: bool,
    },

    /// Stream the full daily dump as rows
    Dump {
        #[arg(short, long, value_enum, default_value = "enhet")]
        unit_type: UnitType,

        #[arg(short, long, default_value_t = 10_000)]
        batch_size: usize,

        /// Only report batch sizes
        #[arg(long)]
        count_only: bool,
    },
}

#[derive(Args, Debug)]
pub struct KafkaArgs {
    /// Broker list of a plaintext cluster; credentials are read from the
    /// secret store when omitted
    #[arg(long, env = "KAFKA_LOCAL_BROKERS", requires = "schema_registry_url")]
    pub brokers: Option<String>,

    /// Schema registry of the plaintext cluster
    #[arg(long, env = "KAFKA_LOCAL_SCHEMA_REGISTRY")]
    pub schema_registry_url: Option<String>,

    #[command(subcommand)]
    pub command: KafkaCommand,
}

#[derive(Subcommand, Debug)]
pub enum KafkaCommand {
    /// List partitions of a topic
    Partitions { topic: String },

    /// Watermarks per partition, or the offsets closest to a timestamp
    Offsets {
        topic: String,

        /// Epoch milliseconds
        #[arg(long)]
        timestamp_ms: Option<i64>,
    },

    /// Read a topic in batches and print one record per line
    Read {
        topic: String,

        #[arg(long, value_enum)]
        key_type: Option<SerializationType>,

        #[arg(long, value_enum)]
        value_type: Option<SerializationType>,

        /// Start at the end instead of the beginning
        #[arg(long)]
        from_end: bool,

        /// Start offset as PARTITION:OFFSET, repeatable
        #[arg(long = "start", value_parser = parse_partition_offset)]
        start_offsets: Vec<(i32, i64)>,

        #[arg(short, long)]
        batch_size: Option<usize>,

        /// Stop after this many batches
        #[arg(long)]
        max_batches: Option<usize>,
    },
}

#[derive(Subcommand, Debug)]
pub enum TransformCommand {
    /// Upper-case code with Norwegian letters replaced
    Code { text: String },

    /// SHA-256 hash of the text
    Hash { text: String },

    /// Convert an ISO datetime to naive Norwegian time
    NorwegianTime { text: String },
}

/// Parses `PARTITION:OFFSET`
pub fn parse_partition_offset(s: &str) -> Result<(i32, i64), String> {
    let (partition, offset) = s
        .split_once(':')
        .ok_or_else(|| format!("expected PARTITION:OFFSET, got '{s}'"))?;
    let partition = partition
        .trim()
        .parse()
        .map_err(|e| format!("invalid partition '{partition}': {e}"))?;
    let offset = offset
        .trim()
        .parse()
        .map_err(|e| format!("invalid offset '{offset}': {e}"))?;
    Ok((partition, offset))
}
