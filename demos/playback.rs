//! Synthetic day of Almaty traffic, played back hour by hour.
//!
//! Run with: cargo run --example playback

use traffic_timeline::{
    EngineConfig, GpsPoint, MatchConfig, Road, SyntheticFeed, TrafficEngine,
};

fn main() {
    // Three roads, one per class
    let roads = vec![
        Road::new(
            "проспект Абая",
            vec![
                GpsPoint::new(43.2400, 76.9000),
                GpsPoint::new(43.2402, 76.9030),
                GpsPoint::new(43.2405, 76.9060),
            ],
        ),
        Road::new(
            "улица Жандосова",
            vec![GpsPoint::new(43.2300, 76.9000), GpsPoint::new(43.2300, 76.9040)],
        )
        .with_tag("secondary"),
        Road::new(
            "переулок Тихий",
            vec![GpsPoint::new(43.2200, 76.9000), GpsPoint::new(43.2215, 76.9000)],
        ),
    ];

    let engine = match TrafficEngine::new(&roads, EngineConfig::default()) {
        Ok(engine) => engine,
        Err(e) => {
            eprintln!("Cannot build engine: {}", e);
            return;
        }
    };

    println!("Traffic Playback Example\n");
    println!("Network: {} segments", engine.network().len());
    for segment in engine.network().segments() {
        println!(
            "   #{:<3} {:<20} {:>5.1} m  {}",
            segment.id,
            segment.road_name,
            segment.length,
            segment.tier.as_str()
        );
    }

    // One probe per segment anchor
    let mut feed = engine
        .network()
        .segments()
        .iter()
        .fold(SyntheticFeed::new(1_714_521_600, 0..24), |feed, s| {
            feed.probe(s.anchor, s.tier)
        });

    let mut store = match engine.sample_store() {
        Ok(store) => store,
        Err(e) => {
            eprintln!("Cannot create sample store: {}", e);
            return;
        }
    };
    let ingested = store.ingest(&mut feed);
    println!("\nIngested {} samples into {} buckets\n", ingested, store.len());

    let report = engine.run(&store);
    println!(
        "Run: {} buckets completed, {} failed, {} segment estimates\n",
        report.completed(),
        report.failed().count(),
        report.matched_segments()
    );

    // Every third hour
    for frame in report.timeline.frames_every(3) {
        let hour = (frame.timestamp - 1_714_521_600) / 3_600;
        println!("{:02}:00", hour);
        for feature in &frame.features {
            println!(
                "   {:<20} {:>5.1} / {:>4.1} km/h  {:<9} rgb{:?}",
                feature.road_name,
                feature.speed.unwrap_or(f64::NAN),
                feature.free_flow_speed,
                feature.tier.as_str(),
                feature.color
            );
        }
    }

    if let Some(bounds) = report.timeline.bounds() {
        let center = bounds.center();
        println!("\nViewport center: ({:.5}, {:.5})", center.latitude, center.longitude);
    }

    // Same samples, wider search radius
    if let Ok(wide) = engine.reaggregate(&store, MatchConfig { k: 10, max_radius: 150.0 }) {
        println!(
            "\nRe-aggregated at 150 m: {} segment estimates",
            wide.matched_segments()
        );
    }
}
