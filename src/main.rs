use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;

use sinktap_kafka::{KafkaClient, SinkStreamManager, StartOffset};
use sinktap_logs::{Envelope, FilterPipeline, Reassembler};

mod config;
mod output;
mod tap;

use config::TapConfig;
use output::{LineWriter, OutputFormat};
use tap::Tap;

/// Sinktap - Watch syslog messages flowing through the OpenNMS Sink API on Kafka
#[derive(Parser, Debug)]
#[command(name = "sinktap")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// TOML config file; flags override its values
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,

    /// Kafka bootstrap server (repeat for more than one)
    #[arg(long = "server", value_name = "HOST:PORT")]
    servers: Vec<String>,

    /// Kafka topic for syslog via the OpenNMS Sink API
    #[arg(long)]
    topic: Option<String>,

    /// Read everything retained on the topic instead of only new messages
    #[arg(long)]
    from_beginning: bool,

    /// Regex to match the IP address of the syslog producer
    #[arg(long, value_name = "REGEX")]
    src_match: Option<String>,

    /// Regex to match content from the syslog message
    #[arg(long, value_name = "REGEX")]
    msg_match: Option<String>,

    /// Minion ID to match as the source of the syslog messages
    #[arg(long, value_name = "ID")]
    minion_match: Option<String>,

    /// Match both regexes case-insensitively
    #[arg(long)]
    ignore_case: bool,

    /// Output format for matched messages
    #[arg(long, value_enum)]
    format: Option<OutputFormat>,
}

impl Args {
    /// Layer the command line on top of the config file
    fn apply_to(&self, config: &mut TapConfig) {
        if !self.servers.is_empty() {
            config.kafka.bootstrap_servers = self.servers.clone();
        }
        if let Some(topic) = &self.topic {
            config.kafka.topic = topic.clone();
        }
        if self.from_beginning {
            config.kafka.start_offset = StartOffset::Earliest;
        }
        if let Some(src) = &self.src_match {
            config.filter.source = src.clone();
        }
        if let Some(msg) = &self.msg_match {
            config.filter.message = msg.clone();
        }
        if let Some(minion) = &self.minion_match {
            config.filter.minion = minion.clone();
        }
        if self.ignore_case {
            config.filter.ignore_case = true;
        }
        if let Some(format) = self.format {
            config.output.format = format;
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Diagnostics go to stderr, matched messages to stdout
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    // Run the application
    let result = run(args).await;

    // Handle any errors
    if let Err(e) = &result {
        eprintln!("Error: {:#}", e);
    }

    result
}

async fn run(args: Args) -> Result<()> {
    let mut config = match &args.config {
        Some(path) => TapConfig::load(path)?,
        None => TapConfig::default(),
    };
    args.apply_to(&mut config);
    config.validate()?;

    let filter = FilterPipeline::compile(
        Some(config.filter.minion.as_str()),
        Some(config.filter.source.as_str()),
        Some(config.filter.message.as_str()),
        config.filter.ignore_case,
    )
    .context("Invalid filter")?;
    tracing::debug!(?filter, "filter compiled");

    let reassembler = Reassembler::new(config.reassembly.to_reassembler_config());
    let output = LineWriter::new(std::io::stdout(), config.output.format);
    tracing::debug!(format = ?output.format(), "writing matched messages to stdout");
    let mut tap = Tap::new(reassembler, filter, output);

    tracing::info!(
        "Consuming syslog messages from {} through Sink Topic {}",
        config.kafka.bootstrap_servers.join(","),
        config.kafka.topic
    );

    let client = KafkaClient::connect(config.kafka.bootstrap_servers.clone()).await?;
    let (envelope_tx, mut envelope_rx) = mpsc::channel::<Envelope>(config.kafka.channel_capacity);
    let mut stream_manager = SinkStreamManager::new();
    stream_manager
        .start(
            &client,
            &config.kafka.topic,
            config.kafka.start_offset,
            envelope_tx,
        )
        .await?;

    let mut eviction = tokio::time::interval(config.reassembly.eviction_interval());
    eviction.set_missed_tick_behavior(MissedTickBehavior::Delay);

    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    // Main processing loop: one envelope at a time
    loop {
        tokio::select! {
            _ = &mut shutdown => {
                tracing::info!("Interrupted, shutting down");
                break;
            }

            _ = eviction.tick() => {
                let evicted = tap.evict_expired();
                if evicted > 0 {
                    tracing::debug!(evicted, "dropped stale partial documents");
                }
            }

            envelope = envelope_rx.recv() => {
                match envelope {
                    Some(envelope) => {
                        tap.process(envelope)?;
                    }
                    None => {
                        tracing::warn!("All partition streams ended");
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(
        active = stream_manager.active_count(),
        "stopping partition streams"
    );
    stream_manager.stop();

    // Partial documents still in flight are discarded
    tracing::info!(
        stats = ?tap.stats(),
        reassembly = ?tap.reassembler().stats(),
        "tap finished"
    );
    for (partition, offset) in stream_manager.offsets() {
        tracing::info!(partition, offset, "last offset seen");
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config_file() {
        let mut config = TapConfig::parse(
            r#"
            [kafka]
            bootstrap_servers = ["from-file:9092"]
            topic = "File.Topic"

            [filter]
            minion = "file-minion"
            message = "file"
            "#,
        )
        .unwrap();

        let args = Args::parse_from([
            "sinktap",
            "--server",
            "a:9092",
            "--server",
            "b:9092",
            "--minion-match",
            "minion1",
            "--src-match",
            r"^10\.",
            "--from-beginning",
            "--format",
            "json",
        ]);
        args.apply_to(&mut config);

        assert_eq!(config.kafka.bootstrap_servers, vec!["a:9092", "b:9092"]);
        assert_eq!(config.kafka.topic, "File.Topic");
        assert_eq!(config.kafka.start_offset, StartOffset::Earliest);
        assert_eq!(config.filter.minion, "minion1");
        assert_eq!(config.filter.source, r"^10\.");
        assert_eq!(config.filter.message, "file");
        assert_eq!(config.output.format, OutputFormat::Json);
    }

    #[test]
    fn test_no_flags_keep_defaults() {
        let mut config = TapConfig::default();
        Args::parse_from(["sinktap"]).apply_to(&mut config);
        assert_eq!(config, TapConfig::default());
    }
}
