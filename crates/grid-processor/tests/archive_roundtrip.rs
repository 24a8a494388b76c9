//! Integration test: regrid synthetic fields, commit them to a Zarr archive
//! and read them back.
//!
//! Verifies:
//! 1. The persisted layout (group per nside, dimension names, chunking,
//!    load-bearing attributes)
//! 2. Appends and overlapping commits keep the time index sorted and unique
//! 3. A crash mid-create never looks like archived data
//! 4. A corrupted time index is reported as unavailable
//! 5. Missing source samples never leak into committed pixels

use std::sync::Arc;

use chrono::{DateTime, Utc};
use grid_processor::{
    regrid, Archive, ArchiveConfig, CommitOutcome, GridProcessorError, RawField, RegridMethod,
    ZarrArchive, ZarrCompression,
};
use healpix::{PixelOrdering, TessellationLevel};
use test_utils::{
    assert_all_fill_or, assert_approx_eq, day, day_timestamps, lat_axis, layered_values, lon_axis,
    punch_holes, temperature_like,
};
use zarrs::array::{Array, ArrayBuilder, DataType, FillValue};
use zarrs_filesystem::FilesystemStore;

const LEVELS: [f64; 3] = [900.0, 500.0, 300.0];

fn raw_day(times: Vec<DateTime<Utc>>) -> RawField {
    let lats = lat_axis(2.5, true);
    let lons = lon_axis(2.5, false);
    let values = layered_values(times.len(), &LEVELS, &lats, &lons, |t, level, lat, lon| {
        temperature_like(lat, lon, level, 6 * t as u32)
    });
    RawField::new("t", "K", times, LEVELS.to_vec(), lats, lons, values, None)
        .expect("valid field")
}

fn archive(root: &std::path::Path) -> ZarrArchive {
    ZarrArchive::new(
        root,
        ArchiveConfig {
            max_pixel_chunk: 1024,
            ..Default::default()
        },
    )
}

#[test]
fn test_layout_and_attributes() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let root = temp_dir.path().join("era5.zarr");
    let archive = archive(&root);

    let times = day_timestamps(day(2024, 12, 1), &[0, 6, 12, 18]);
    let raw = raw_day(times.clone());

    for nside in [8, 16] {
        let level = TessellationLevel::new(nside, PixelOrdering::Ring).unwrap();
        let pixels = regrid(&raw, &level, RegridMethod::Binning, f32::NAN).unwrap();
        assert_eq!(archive.commit(&pixels).unwrap(), CommitOutcome::Created);
    }

    // Read the data array directly to check the persisted layout
    let store = Arc::new(FilesystemStore::new(root.join("nside_16")).unwrap());
    let data = Array::open(store.clone(), "/t").unwrap();
    assert_eq!(data.shape(), &[4, 3, 3072]);

    let meta: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(root.join("nside_16/t/zarr.json")).unwrap(),
    )
    .unwrap();
    assert_eq!(meta["dimension_names"], serde_json::json!(["time", "level", "pixel"]));
    let chunk_shape = &meta["chunk_grid"]["configuration"]["chunk_shape"];
    assert_eq!(chunk_shape, &serde_json::json!([1, 3, 1024]));

    let group_meta: serde_json::Value = serde_json::from_str(
        &std::fs::read_to_string(root.join("nside_16/zarr.json")).unwrap(),
    )
    .unwrap();
    let attrs = &group_meta["attributes"];
    assert_eq!(attrs["healpix_nside"], 16);
    assert_eq!(attrs["healpix_order"], "ring");
    assert_eq!(attrs["variable"], "t");
    assert_eq!(attrs["regrid_method"], "binning");

    let time = Array::open(store, "/time").unwrap();
    assert_eq!(time.attributes()["units"], "seconds since 1970-01-01 00:00:00");

    // Known timestamps match for both levels
    for nside in [8, 16] {
        let level = TessellationLevel::new(nside, PixelOrdering::Ring).unwrap();
        let known: Vec<_> = archive.known_timestamps(&level).unwrap().into_iter().collect();
        assert_eq!(known, times);
    }
}

#[test]
fn test_sequential_days_append() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = archive(temp_dir.path());
    let level = TessellationLevel::new(4, PixelOrdering::Nested).unwrap();

    let mut outcomes = Vec::new();
    for dom in 1..=3 {
        let raw = raw_day(day_timestamps(day(2024, 12, dom), &[0, 6, 12, 18]));
        let pixels = regrid(&raw, &level, RegridMethod::Bilinear, f32::NAN).unwrap();
        outcomes.push(archive.commit(&pixels).unwrap());
    }
    assert_eq!(
        outcomes,
        vec![CommitOutcome::Created, CommitOutcome::Appended, CommitOutcome::Appended]
    );

    let summary = archive.inspector().summary(&level).unwrap().unwrap();
    assert_eq!(summary.time_count, 12);
    assert_eq!(summary.ordering, "nested");
    assert_eq!(summary.data_shape, vec![12, 3, 192]);
}

#[test]
fn test_recommit_same_day_is_deduplicated() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = archive(temp_dir.path());
    let level = TessellationLevel::new(2, PixelOrdering::Ring).unwrap();

    let raw = raw_day(day_timestamps(day(2024, 12, 2), &[0, 6, 12, 18]));
    let pixels = regrid(&raw, &level, RegridMethod::Binning, f32::NAN).unwrap();
    archive.commit(&pixels).unwrap();
    assert_eq!(archive.commit(&pixels).unwrap(), CommitOutcome::Rewritten);

    let known = archive.known_timestamps(&level).unwrap();
    assert_eq!(known.len(), 4);
}

#[test]
fn test_interrupted_create_is_invisible() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let root = temp_dir.path();
    let level = TessellationLevel::new(2, PixelOrdering::Ring).unwrap();

    // A staging directory left behind by a killed writer
    let staged = root.join(".staging/nside_2.dead");
    std::fs::create_dir_all(&staged).unwrap();
    std::fs::write(staged.join("zarr.json"), "{}").unwrap();

    let archive = archive(root);
    assert!(archive.known_timestamps(&level).unwrap().is_empty());

    let raw = raw_day(day_timestamps(day(2024, 12, 1), &[0]));
    let pixels = regrid(&raw, &level, RegridMethod::Binning, f32::NAN).unwrap();
    assert_eq!(archive.commit(&pixels).unwrap(), CommitOutcome::Created);
    assert_eq!(archive.known_timestamps(&level).unwrap().len(), 1);
    assert!(!staged.exists());
}

#[test]
fn test_unsorted_time_index_is_unavailable() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let root = temp_dir.path();
    let level = TessellationLevel::new(1, PixelOrdering::Ring).unwrap();
    let archive = ZarrArchive::new(
        root,
        ArchiveConfig {
            zarr_compression: ZarrCompression::None,
            ..Default::default()
        },
    );

    let raw = raw_day(day_timestamps(day(2024, 12, 1), &[0, 6]));
    let pixels = regrid(&raw, &level, RegridMethod::Binning, f32::NAN).unwrap();
    archive.commit(&pixels).unwrap();

    // Overwrite the time index with a non-increasing sequence
    let store = Arc::new(FilesystemStore::new(root.join("nside_1")).unwrap());
    let time = ArrayBuilder::new(
        vec![2],
        DataType::Int64,
        vec![2u64].try_into().unwrap(),
        FillValue::from(0i64),
    )
    .build(store, "/time")
    .unwrap();
    time.store_metadata().unwrap();
    time.store_array_subset_elements::<i64>(&time.subset_all(), &[100, 50])
        .unwrap();

    assert!(matches!(
        archive.known_timestamps(&level),
        Err(GridProcessorError::ArchiveUnavailable(_))
    ));
}

#[test]
fn test_missing_samples_do_not_leak_into_archive() {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let archive = archive(temp_dir.path());
    let level = TessellationLevel::new(8, PixelOrdering::Ring).unwrap();

    let lats = lat_axis(2.5, true);
    let lons = lon_axis(2.5, false);
    let times = day_timestamps(day(2024, 12, 1), &[0, 12]);
    let mut values = layered_values(times.len(), &LEVELS, &lats, &lons, |_, _, _, _| 250.0);
    punch_holes(&mut values, 7, 3);
    let raw = RawField::new("t", "K", times, LEVELS.to_vec(), lats, lons, values, None).unwrap();

    for method in [RegridMethod::Binning, RegridMethod::Bilinear] {
        let pixels = regrid(&raw, &level, method, f32::NAN).unwrap();
        assert_all_fill_or!(&pixels.values, f32::NAN, 250.0, 1e-4);
    }

    let pixels = regrid(&raw, &level, RegridMethod::Binning, f32::NAN).unwrap();
    archive.commit(&pixels).unwrap();

    let store = Arc::new(FilesystemStore::new(temp_dir.path().join("nside_8")).unwrap());
    let data = Array::open(store, "/t").unwrap();
    let stored = data
        .retrieve_array_subset_elements::<f32>(&data.subset_all())
        .unwrap();
    let finite: Vec<f32> = stored.iter().copied().filter(|v| v.is_finite()).collect();
    assert!(!finite.is_empty());
    let mean = finite.iter().map(|v| *v as f64).sum::<f64>() / finite.len() as f64;
    assert_approx_eq!(mean, 250.0, 1e-4);
}
