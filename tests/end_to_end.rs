//! End-to-end scenarios exercising the parser, pipeline, and sinks
//! together through the public API. The reconnect-storm scenario lives
//! as a unit test next to `backoff_delay` in `src/receiver/mod.rs`
//! instead of here, since it exercises a private helper with no live
//! XMPP server available in this harness.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use nwws_relay::config::{CleanupConfig, DbConfig, DedupConfig, PipelineConfig};
use nwws_relay::geo::GeoLookup;
use nwws_relay::model::WireMessage;
use nwws_relay::parser;
use nwws_relay::pipeline::filter::{DuplicateSuppressionFilter, Filter};
use nwws_relay::pipeline::transform::Transform;
use nwws_relay::pipeline::PipelineManager;
use nwws_relay::sinks::dashboard::DashboardSink;
use nwws_relay::sinks::db::{self, DbSink};
use nwws_relay::sinks::mqtt;
use nwws_relay::sinks::SinkKind;
use nwws_relay::stats::PipelineStats;

fn wire(cccc: &str, ttaaii: &str, awips_id: &str, text: &str, issued_at: DateTime<Utc>) -> WireMessage {
    WireMessage {
        id: "1".to_string(),
        subject: None,
        body_text: text.to_string(),
        awips_id: Some(awips_id.to_string()),
        cccc: cccc.to_string(),
        ttaaii: ttaaii.to_string(),
        issued_at,
        received_at: issued_at + chrono::Duration::seconds(3),
        room_jid: "nwws@conference.nwws-oi.weather.gov".to_string(),
    }
}

fn issued_at() -> DateTime<Utc> {
    DateTime::parse_from_rfc3339("2024-01-15T18:30:00Z")
        .unwrap()
        .with_timezone(&Utc)
}

/// Scenario 1: Tornado Warning with Tornado Emergency.
#[tokio::test]
async fn tornado_emergency_reaches_every_sink() {
    let text = "WFUS53 KTOP 151830\n\
TORTOP\n\n\
...TORNADO EMERGENCY FOR TOPEKA...\n\
TORNADO...OBSERVED\n\
TORNADO DAMAGE THREAT...CATASTROPHIC\n\
KSC023-151915-\n\
/O.NEW.KTOP.TO.W.0042.240115T1830Z-240115T1915Z/\n\
$$\n";

    let geo = GeoLookup::bundled();
    let (event, diagnostics) = parser::parse(wire("KTOP", "WFUS53", "TORTOP", text, issued_at()), &geo).unwrap();
    assert!(diagnostics.soft_issues.is_empty());
    assert_eq!(event.product_category, "TOR");
    assert_eq!(event.segments.len(), 1);
    let segment = &event.segments[0];
    assert_eq!(segment.vtec.len(), 1);
    assert_eq!(segment.vtec[0].action, nwws_relay::model::VtecAction::New);
    assert_eq!(segment.vtec[0].phenomenon, "TO");
    assert_eq!(segment.vtec[0].significance, nwws_relay::model::VtecSignificance::Warning);
    assert_eq!(segment.vtec[0].etn, 42);
    assert_eq!(
        segment.ibw_tags.get("TORNADO_DAMAGE_THREAT").map(String::as_str),
        Some("CATASTROPHIC")
    );

    let topic = mqtt::build_topic("nwws", &event.cccc, &event.awips_id, &event.product_id);
    assert_eq!(topic, format!("nwws/KTOP/TORTOP/{}", event.product_id));

    let stats = Arc::new(PipelineStats::default());
    let dashboard = DashboardSink::new(16);
    let mut feed = dashboard.subscribe();
    let manager = PipelineManager::spawn(
        PipelineConfig::default(),
        Vec::new(),
        Box::new(nwws_relay::pipeline::transform::IdentityTransform),
        vec![SinkKind::Dashboard(dashboard)],
        stats.clone(),
    );
    manager.handle().submit(event.clone()).await.unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), feed.recv())
        .await
        .expect("dashboard feed did not receive the event in time")
        .unwrap();
    assert_eq!(received.event_id, event.event_id);

    manager.shutdown().await;
    assert_eq!(stats.snapshot().events_processed_total, 1);
}

/// Scenario 2: the same stanza delivered twice within the dedup window
/// is published once and counted once as a duplicate.
#[tokio::test]
async fn duplicate_delivery_is_suppressed() {
    let text = "WFUS53 KTOP 151830\nTORTOP\n\nKSC023-151915-\n/O.NEW.KTOP.TO.W.0042.240115T1830Z-240115T1915Z/\n$$\n";
    let geo = GeoLookup::bundled();
    let (event, _) = parser::parse(wire("KTOP", "WFUS53", "TORTOP", text, issued_at()), &geo).unwrap();

    let stats = Arc::new(PipelineStats::default());
    let dedup = DedupConfig {
        window_size: 100,
        window_seconds: 600,
    };
    let filters: Vec<Box<dyn Filter>> = vec![Box::new(DuplicateSuppressionFilter::new(&dedup))];
    let dashboard = DashboardSink::new(16);
    let mut feed = dashboard.subscribe();
    let manager = PipelineManager::spawn(
        PipelineConfig::default(),
        filters,
        Box::new(nwws_relay::pipeline::transform::IdentityTransform),
        vec![SinkKind::Dashboard(dashboard)],
        stats.clone(),
    );

    manager.handle().submit(event.clone()).await.unwrap();
    manager.handle().submit(event.clone()).await.unwrap();

    let first = tokio::time::timeout(Duration::from_secs(1), feed.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(first.event_id, event.event_id);
    // The duplicate must never reach the sink.
    assert!(tokio::time::timeout(Duration::from_millis(200), feed.recv())
        .await
        .is_err());

    manager.shutdown().await;
    let snapshot = stats.snapshot();
    assert_eq!(snapshot.events_processed_total, 1);
    assert_eq!(snapshot.events_filtered_total.get("duplicate"), Some(&1));
}

/// Scenario 3: a two-segment Flood Warning, one segment's VTEC begin
/// already in effect, both surviving DB persistence intact.
#[tokio::test]
async fn multi_segment_flood_warning_persists_both_segments() {
    let text = "WGUS63 KBOU 151200\n\
FLWBOU\n\n\
ARKC2-151915-\n\
/O.NEW.KBOU.FL.W.0007.240115T1200Z-240115T1800Z/\n\
/ARKC2.1.ER.240115T1200Z.240115T1500Z.240115T1800Z.NO/\n\
$$\n\
ARKC2-151915-\n\
/O.CON.KBOU.FL.W.0005.000000T0000Z-240115T2000Z/\n\
$$\n";
    let geo = GeoLookup::bundled();
    let (event, diagnostics) = parser::parse(
        wire("KBOU", "WGUS63", "FLWBOU", text, issued_at()),
        &geo,
    )
    .unwrap();
    assert!(diagnostics.soft_issues.is_empty());
    assert_eq!(event.segments.len(), 2);
    assert!(event.segments[0].h_vtec.is_some());
    assert_eq!(event.segments[1].vtec[0].begin, None);

    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("scenario3.sqlite");
    let db_config = DbConfig {
        database_url: format!("sqlite://{}?mode=rwc", db_path.display()),
        ..DbConfig::default()
    };
    let sink = DbSink::connect(&db_config).await.unwrap();
    sink.send(&event).await.unwrap();

    let pool = sink.pool();
    let event_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(&pool)
        .await
        .unwrap();
    let segment_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM event_content")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(event_rows, 1);
    assert_eq!(segment_rows, 2);
}

fn segment_far_future() -> nwws_relay::model::Segment {
    nwws_relay::model::Segment {
        ugc_codes: BTreeSet::new(),
        ugc_expires_at: Utc::now() + chrono::Duration::days(365),
        vtec: Vec::new(),
        h_vtec: None,
        headlines: Vec::new(),
        polygon: None,
        time_mot_loc: None,
        ibw_tags: Default::default(),
        geo: Vec::new(),
    }
}

fn event_for_cleanup(category: &str, received_at: DateTime<Utc>) -> nwws_relay::model::WeatherEvent {
    nwws_relay::model::WeatherEvent {
        event_id: uuid::Uuid::new_v4(),
        product_id: format!("{category}-{}", received_at.timestamp()),
        wmo: "WFUS53KTOP151830".to_string(),
        awips_id: format!("{category}TOP"),
        cccc: "KTOP".to_string(),
        product_category: category.to_string(),
        issued_at: received_at,
        received_at,
        text: String::new(),
        segments: vec![segment_far_future()],
        fingerprint: received_at.timestamp() as u64,
    }
}

/// Scenario 5: product-specific retention deletes short-lived TOR rows
/// but keeps long-retention PNS rows under the defaults.
#[tokio::test]
async fn cleanup_respects_product_specific_retention() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("scenario5.sqlite");
    let db_config = DbConfig {
        database_url: format!("sqlite://{}?mode=rwc", db_path.display()),
        ..DbConfig::default()
    };
    let sink = DbSink::connect(&db_config).await.unwrap();

    let now = Utc::now();
    for _ in 0..3 {
        sink.send(&event_for_cleanup("TOR", now - chrono::Duration::hours(2)))
            .await
            .unwrap();
    }
    for _ in 0..3 {
        sink.send(&event_for_cleanup("PNS", now - chrono::Duration::days(10)))
            .await
            .unwrap();
    }

    let report = db::run_cleanup_cycle(&sink.pool(), &CleanupConfig::default(), now)
        .await
        .unwrap();
    assert_eq!(report.product_specific_deleted, 3);
    assert_eq!(report.age_based_deleted, 0);

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM events")
        .fetch_one(&sink.pool())
        .await
        .unwrap();
    assert_eq!(remaining, 3, "the three PNS rows must survive");
}

/// A transform that blocks synchronously until released, standing in for
/// a downstream worker that has stalled.
struct Pausable {
    paused: Arc<AtomicBool>,
}

impl Transform for Pausable {
    fn apply(&self, event: nwws_relay::model::WeatherEvent) -> nwws_relay::model::WeatherEvent {
        while self.paused.load(Ordering::Acquire) {
            std::thread::sleep(Duration::from_millis(5));
        }
        event
    }
}

/// Scenario 6: a full ingress queue blocks `submit` under the default
/// backpressure policy, and nothing is lost once the stall clears.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn backpressure_blocks_submit_until_drained() {
    let paused = Arc::new(AtomicBool::new(true));
    let stats = Arc::new(PipelineStats::default());
    let config = PipelineConfig {
        max_queue_size: 4,
        ..PipelineConfig::default()
    };
    let manager = PipelineManager::spawn(
        config,
        Vec::new(),
        Box::new(Pausable { paused: paused.clone() }),
        vec![SinkKind::Console(nwws_relay::sinks::console::ConsoleSink::new())],
        stats.clone(),
    );
    let handle = manager.handle();

    let submitted = Arc::new(AtomicUsize::new(0));
    let mut submitters = Vec::new();
    for i in 0..10 {
        let handle = handle.clone();
        let submitted = submitted.clone();
        submitters.push(tokio::spawn(async move {
            handle
                .submit(event_for_cleanup("TOR", Utc::now() - chrono::Duration::seconds(i)))
                .await
                .unwrap();
            submitted.fetch_add(1, Ordering::SeqCst);
        }));
    }

    // One event is pulled out by the paused transform ("in hand"); four
    // more fill the bounded queue. The 6th submit must still be blocked.
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(submitted.load(Ordering::SeqCst), 5);

    paused.store(false, Ordering::Release);
    for submitter in submitters {
        submitter.await.unwrap();
    }

    for _ in 0..100 {
        if stats.snapshot().events_processed_total >= 10 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(stats.snapshot().events_processed_total, 10);
    manager.shutdown().await;
}
