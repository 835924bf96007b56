//! End-to-end tests for the calibration update flow: bundled seed data,
//! file cache, remote reconciliation and map rebuilds.

use chrono::{TimeZone, Utc};
use smartgcal::cache::CalibrationFileCache;
use smartgcal::calibration::CalibrationType;
use smartgcal::file::CalibrationFile;
use smartgcal::keys::{AttributeDomain, ConfigurationKey, DomainValue, KeySchema};
use smartgcal::registry::CalibrationRegistry;
use smartgcal::repository::{BundledRepository, CalibrationRepository, MockRepository};
use smartgcal::store::CalibrationStore;
use smartgcal::updater::CalibrationUpdater;
use smartgcal::version::Version;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

const INSTRUMENT: &str = "Flamingos2";

fn schema() -> KeySchema {
    KeySchema {
        instrument: INSTRUMENT.to_string(),
        key_attributes: vec![
            AttributeDomain::new(
                "Disperser",
                vec![
                    DomainValue::new("None"),
                    DomainValue::new("R1200JH"),
                    DomainValue::new("R1200HK"),
                ],
            ),
            AttributeDomain::new(
                "Filter",
                vec![DomainValue::new("JH"), DomainValue::new("HK")],
            ),
            AttributeDomain::new(
                "FPU",
                vec![DomainValue::new("Longslit1"), DomainValue::new("Longslit2")],
            ),
        ],
        wavelength_column: None,
        calibration_attributes: vec!["Lamps".to_string(), "Exposure Time".to_string()],
    }
}

fn registry() -> Arc<CalibrationRegistry> {
    Arc::new(CalibrationRegistry::new().with_instrument(schema(), vec![CalibrationType::Flat]))
}

fn version(revision: u32) -> Version {
    Version::new(
        revision,
        Utc.timestamp_opt(1_700_000_000, 0).single().unwrap(),
    )
}

fn table(rows: &str) -> String {
    format!("Disperser,Filter,FPU,Lamps,Exposure Time\n{}", rows)
}

fn bundled(rows: &str) -> Arc<BundledRepository> {
    Arc::new(BundledRepository::new().with_table(
        CalibrationType::Flat,
        INSTRUMENT,
        format!("{}\n{}", version(1), table(rows)),
    ))
}

fn open_cache(dir: &Path, fallback: Arc<BundledRepository>) -> Arc<CalibrationFileCache> {
    Arc::new(CalibrationFileCache::new(dir, registry(), fallback).unwrap())
}

fn key(disperser: &str, filter: &str, fpu: &str) -> ConfigurationKey {
    ConfigurationKey::new(
        INSTRUMENT,
        vec![disperser.to_string(), filter.to_string(), fpu.to_string()],
    )
}

#[tokio::test]
async fn wildcard_rule_row_serves_lookups_for_every_expanded_key() {
    let dir = tempfile::tempdir().unwrap();
    // one rule row: prefix wildcard, regex, exact
    let cache = open_cache(dir.path(), bundled("R1200*,$J.*,Longslit1,IR,5.0\n"));
    let store = CalibrationStore::load(&registry(), cache.as_ref()).await;

    for disperser in ["R1200JH", "R1200HK"] {
        let found = store.lookup(
            INSTRUMENT,
            CalibrationType::Flat,
            &key(disperser, "JH", "Longslit1"),
        );
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].export(), ["IR", "5.0"]);
    }
    // keys outside the expansion stay empty
    assert!(store
        .lookup(
            INSTRUMENT,
            CalibrationType::Flat,
            &key("None", "JH", "Longslit1")
        )
        .is_empty());
    assert!(store
        .lookup(
            INSTRUMENT,
            CalibrationType::Flat,
            &key("R1200JH", "HK", "Longslit1")
        )
        .is_empty());
}

#[tokio::test]
async fn cache_round_trip_is_observationally_identical() {
    let dir = tempfile::tempdir().unwrap();
    let fallback = bundled("R1200JH,JH,Longslit1,IR,5.0\n");
    let cache = open_cache(dir.path(), fallback.clone());

    // build a map straight from the bundled data, export it, install the
    // export through the cache and reload
    let original = CalibrationStore::load(&registry(), fallback.as_ref()).await;
    let map = original.map(INSTRUMENT, CalibrationType::Flat).unwrap();
    let exported = CalibrationFile::from_map(map.as_ref()).unwrap();
    cache
        .update_calibration_file(
            CalibrationType::Flat,
            INSTRUMENT,
            exported.version(),
            exported.raw_data(),
        )
        .unwrap();
    let reloaded = CalibrationStore::load(&registry(), cache.as_ref()).await;

    let probe = key("R1200JH", "JH", "Longslit1");
    let before = original.lookup(INSTRUMENT, CalibrationType::Flat, &probe);
    let after = reloaded.lookup(INSTRUMENT, CalibrationType::Flat, &probe);
    assert_eq!(before, after);
    assert_eq!(
        reloaded
            .version(INSTRUMENT, CalibrationType::Flat)
            .map(|v| v.revision()),
        Some(1)
    );
}

#[tokio::test]
async fn interrupted_install_leaves_the_old_file_readable() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(dir.path(), bundled("R1200JH,JH,Longslit1,IR,5.0\n"));
    cache
        .update_calibration_file(
            CalibrationType::Flat,
            INSTRUMENT,
            &version(2),
            &table("R1200JH,JH,Longslit1,IR,5.0\n"),
        )
        .unwrap();

    // simulate a crash that happened after staging but before the rename
    std::fs::write(
        dir.path().join(format!("{}_FLAT.new", INSTRUMENT)),
        "truncated garbag",
    )
    .unwrap();

    let file = cache
        .calibration_file(CalibrationType::Flat, INSTRUMENT)
        .await
        .unwrap();
    assert_eq!(file.version(), &version(2));

    // the next install clears the leftover staging file
    cache
        .update_calibration_file(
            CalibrationType::Flat,
            INSTRUMENT,
            &version(3),
            &table("R1200HK,HK,Longslit2,IR,3.0\n"),
        )
        .unwrap();
    assert!(!dir.path().join(format!("{}_FLAT.new", INSTRUMENT)).exists());
}

#[tokio::test]
async fn reconciliation_installs_newer_table_and_store_reload_sees_it() {
    let dir = tempfile::tempdir().unwrap();
    let cache = open_cache(dir.path(), bundled("R1200JH,JH,Longslit1,IR,5.0\n"));

    let remote = Arc::new(MockRepository::new());
    remote.set_file(
        CalibrationType::Flat,
        INSTRUMENT,
        CalibrationFile::new(version(2), table("R1200JH,JH,Longslit1,Ar arc,2.0\n")),
    );

    let updater = CalibrationUpdater::new(registry());
    updater.configure(cache.clone(), remote.clone(), Duration::from_secs(3600));
    let event = updater.update_now().await.unwrap();
    assert_eq!(event.updated, [format!("{}_FLAT", INSTRUMENT)]);

    // lookups through a freshly loaded store see the new calibration
    let store = CalibrationStore::load(&registry(), cache.as_ref()).await;
    let found = store.lookup(
        INSTRUMENT,
        CalibrationType::Flat,
        &key("R1200JH", "JH", "Longslit1"),
    );
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].export(), ["Ar arc", "2.0"]);

    // an unchanged remote causes no further downloads
    let event = updater.update_now().await.unwrap();
    assert!(event.is_empty());
    assert_eq!(remote.download_count(), 1);
}

#[tokio::test]
async fn corrupted_cache_heals_through_the_next_cycle() {
    let dir = tempfile::tempdir().unwrap();
    let fallback = bundled("R1200JH,JH,Longslit1,IR,5.0\n");
    {
        let cache = open_cache(dir.path(), fallback.clone());
        cache
            .update_calibration_file(
                CalibrationType::Flat,
                INSTRUMENT,
                &version(2),
                &table("R1200JH,JH,Longslit1,IR,5.0\n"),
            )
            .unwrap();
        cache.write_update_timestamp().unwrap();
    }

    // hand-edit the cached file into nonsense
    std::fs::write(
        dir.path().join(format!("{}_FLAT.csv", INSTRUMENT)),
        format!("{}\n{}", version(2), table("Bogus,JH,Longslit1,IR,5.0\n")),
    )
    .unwrap();

    // reopening validates, deletes the bad file and the timestamp
    let cache = open_cache(dir.path(), fallback);
    assert!(!dir.path().join(format!("{}_FLAT.csv", INSTRUMENT)).exists());
    assert!(!dir.path().join("timestamp").exists());

    // the next cycle re-downloads
    let remote = Arc::new(MockRepository::new());
    remote.set_file(
        CalibrationType::Flat,
        INSTRUMENT,
        CalibrationFile::new(version(3), table("R1200JH,JH,Longslit1,IR,5.0\n")),
    );
    let updater = CalibrationUpdater::new(registry());
    updater.configure(cache.clone(), remote, Duration::from_secs(3600));
    let event = updater.update_now().await.unwrap();
    assert_eq!(event.updated.len(), 1);
    let file = cache
        .calibration_file(CalibrationType::Flat, INSTRUMENT)
        .await
        .unwrap();
    assert_eq!(file.version(), &version(3));
}
