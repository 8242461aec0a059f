// tests/buffer_properties.rs
//
// Ordering and capacity properties of the reading buffer under randomized
// insert sequences (live singles mixed with out-of-order batches).

use chrono::{DateTime, Duration, TimeZone, Utc};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use serde_json::json;

use telemetry_engine::backfill::decode_documents;
use telemetry_engine::{Reading, ReadingBuffer};

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn at(sec: i64) -> Reading {
    Reading::new(20.0 + (sec % 7) as f64, 45.0, t0() + Duration::seconds(sec))
}

fn is_sorted(rs: &[Reading]) -> bool {
    rs.windows(2).all(|w| w[0].observed_at() <= w[1].observed_at())
}

#[test]
fn random_insert_sequences_stay_sorted_bounded_and_keep_newest() {
    for seed in 0..20u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let cap = rng.random_range(1..60usize);
        let buf = ReadingBuffer::with_capacity(cap);

        // Distinct timestamps so "the newest N" is well defined.
        let mut secs: Vec<i64> = (0..200).collect();
        secs.shuffle(&mut rng);

        let mut inserted: Vec<i64> = Vec::new();
        let mut rest = secs.as_slice();
        while !rest.is_empty() {
            let take = rng.random_range(1..=rest.len().min(8));
            let (batch, tail) = rest.split_at(take);
            rest = tail;

            buf.insert(batch.iter().map(|&s| at(s)));
            inserted.extend_from_slice(batch);

            let snap = buf.snapshot();
            assert!(is_sorted(&snap), "seed {seed}: snapshot not sorted");
            assert!(buf.size() <= cap, "seed {seed}: size over capacity");

            let mut model = inserted.clone();
            model.sort_unstable();
            let expect: Vec<i64> = model[model.len().saturating_sub(cap)..].to_vec();
            let got: Vec<i64> = snap
                .iter()
                .map(|r| (r.observed_at() - t0()).num_seconds())
                .collect();
            assert_eq!(got, expect, "seed {seed}: eviction must drop the oldest");
        }
    }
}

#[test]
fn thousand_and_one_readings_evicts_the_earliest() {
    let buf = ReadingBuffer::with_capacity(1000);
    for s in 0..1000 {
        buf.insert([at(s)]);
    }
    assert_eq!(buf.size(), 1000);
    assert_eq!(buf.snapshot()[0], at(0));

    buf.insert([at(1000)]);
    let snap = buf.snapshot();
    assert_eq!(buf.size(), 1000);
    assert!(!snap.contains(&at(0)));
    assert_eq!(snap[0], at(1));
    assert_eq!(snap[999], at(1000));
}

#[test]
fn out_of_order_backfill_batch_is_sorted_on_insert() {
    let docs = vec![
        ("-N3".to_string(), json!({"device_id": "ESP32-DHT11", "temperature": 23.0, "humidity": 41.0, "timestamp": "2025-06-01T12:03:00Z"})),
        ("-N1".to_string(), json!({"device_id": "ESP32-DHT11", "temperature": 21.0, "humidity": 43.0, "timestamp": "2025-06-01T12:01:00Z"})),
        ("-N5".to_string(), json!({"device_id": "ESP32-DHT11", "temperature": 25.0, "humidity": 39.0, "timestamp": "2025-06-01 12:05:00"})),
        ("-N2".to_string(), json!({"device_id": "ESP32-DHT11", "temperature": 22.0, "humidity": 42.0, "timestamp": "2025-06-01T14:02:00+02:00"})),
        ("-N4".to_string(), json!({"device_id": "ESP32-DHT11", "temperature": 24.0, "humidity": 40.0, "timestamp": 1748779440})),
    ];
    let (readings, report) = decode_documents(docs, 1000);
    assert_eq!(report.rejected, 0);

    // Feed the buffer the store's order, not the decoder's.
    let mut shuffled = readings.clone();
    shuffled.reverse();
    let buf = ReadingBuffer::with_capacity(1000);
    buf.insert(shuffled);

    let temps: Vec<f64> = buf.snapshot().iter().map(|r| r.temperature()).collect();
    assert_eq!(temps, vec![21.0, 22.0, 23.0, 24.0, 25.0]);
}

#[test]
fn concurrent_writers_never_expose_unsorted_state() {
    use std::sync::Arc;
    use std::thread;

    let buf = Arc::new(ReadingBuffer::with_capacity(64));
    let writers: Vec<_> = (0..4)
        .map(|w| {
            let buf = Arc::clone(&buf);
            thread::spawn(move || {
                for i in 0..250 {
                    let s = (i * 4 + w) as i64;
                    if i % 10 == 0 {
                        buf.insert([at(s), at(s - 500), at(s + 3)]);
                    } else {
                        buf.insert([at(s)]);
                    }
                }
            })
        })
        .collect();

    let reader = {
        let buf = Arc::clone(&buf);
        thread::spawn(move || {
            for _ in 0..500 {
                let snap = buf.snapshot();
                assert!(snap.len() <= 64);
                assert!(is_sorted(&snap));
            }
        })
    };

    for w in writers {
        w.join().unwrap();
    }
    reader.join().unwrap();
    assert_eq!(buf.size(), 64);
}
