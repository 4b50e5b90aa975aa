use std::sync::Arc;

use clap::Parser;
use tracing::{debug, error, info, warn};

use nwws_relay::cli::Cli;
use nwws_relay::config::RelayConfig;
use nwws_relay::error::{exit_code, ReceiverError};
use nwws_relay::geo::GeoLookup;
use nwws_relay::logging;
use nwws_relay::parser;
use nwws_relay::pipeline::filter::{DuplicateSuppressionFilter, Filter};
use nwws_relay::pipeline::transform::IdentityTransform;
use nwws_relay::pipeline::PipelineManager;
use nwws_relay::receiver::{Receiver, ReceiverEvent};
use nwws_relay::sinks::console::ConsoleSink;
use nwws_relay::sinks::dashboard::DashboardSink;
use nwws_relay::sinks::db::{self, DbSink};
use nwws_relay::sinks::mqtt::MqttSink;
use nwws_relay::sinks::SinkKind;
use nwws_relay::stats::{PipelineStats, ReceiverStats};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let config = match RelayConfig::load(&cli.config) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(exit_code::CONFIG_ERROR);
        }
    };

    if cli.dry_run {
        println!("configuration loaded from {} and validated", cli.config.display());
        std::process::exit(exit_code::OK);
    }

    let _logging_guard = logging::init(&config.logging, cli.verbose);
    info!("starting nwws-relay");

    let receiver_stats = Arc::new(ReceiverStats::default());
    let pipeline_stats = Arc::new(PipelineStats::default());
    let geo = GeoLookup::bundled();

    let mut sinks: Vec<SinkKind> = vec![SinkKind::Console(ConsoleSink::new())];

    if let Some(mqtt_config) = &config.mqtt {
        info!(broker = %mqtt_config.broker, "starting mqtt sink");
        sinks.push(SinkKind::Mqtt(MqttSink::spawn(
            mqtt_config,
            config.pipeline.max_queue_size,
        )));
    }

    if let Some(db_config) = &config.db {
        info!("connecting db sink");
        match DbSink::connect(db_config).await {
            Ok(sink) => {
                let pool = sink.pool();
                sinks.push(SinkKind::Db(sink));
                tokio::spawn(db::run_cleanup_loop(
                    pool,
                    config.cleanup.clone(),
                    pipeline_stats.clone(),
                ));
            }
            Err(e) => {
                error!("failed to connect db sink: {e}");
                std::process::exit(exit_code::RUNTIME_ERROR);
            }
        }
    }

    if config.dashboard.is_some() {
        sinks.push(SinkKind::Dashboard(DashboardSink::new(1024)));
    }

    let filters: Vec<Box<dyn Filter>> =
        vec![Box::new(DuplicateSuppressionFilter::new(&config.dedup))];

    let pipeline = PipelineManager::spawn(
        config.pipeline.clone(),
        filters,
        Box::new(IdentityTransform),
        sinks,
        pipeline_stats.clone(),
    );
    let handle = pipeline.handle();

    let mut receiver = Receiver::spawn(config.receiver.clone(), receiver_stats.clone());

    let mut shutdown = Box::pin(tokio::signal::ctrl_c());
    let mut exit = exit_code::OK;

    loop {
        tokio::select! {
            _ = &mut shutdown => {
                info!("shutdown signal received");
                break;
            }
            event = receiver.recv() => match event {
                Some(ReceiverEvent::Message(wire)) => {
                    match parser::parse(wire, &geo) {
                        Ok((event, diagnostics)) => {
                            for issue in &diagnostics.soft_issues {
                                debug!(%issue, "soft parse diagnostic");
                            }
                            if let Err(e) = handle.submit(event).await {
                                warn!("failed to submit event to pipeline: {e}");
                            }
                        }
                        Err(e) => warn!("failed to parse product: {e}"),
                    }
                }
                Some(ReceiverEvent::StateChanged(state)) => {
                    debug!(?state, "receiver state changed");
                }
                Some(ReceiverEvent::Error(e)) => {
                    warn!("receiver error: {e}");
                    if matches!(e, ReceiverError::AuthExhausted { .. }) {
                        exit = exit_code::AUTH_FAILURE;
                        break;
                    }
                }
                None => {
                    error!("receiver channel closed");
                    exit = exit_code::RUNTIME_ERROR;
                    break;
                }
            },
        }
    }

    pipeline.shutdown().await;
    std::process::exit(exit);
}
