//! End-to-end conversion runs against in-memory and filesystem backends.

use std::collections::BTreeMap;
use std::sync::Arc;

use chunk_store::{Compression, ObjectStorage, StorageConfig, StoreReader, StoreWriter};
use conversion::{
    record_path, ConversionConfig, Converter, CoordinateSpace, FileLayout, FileRecordSource,
    GroupConfig, LevelSelection, MemoryRecordSource, MissingPolicy, RegridConfig,
};
use era5_common::{Coordinate, Grid, Schedule, Variable};
use test_utils::{
    assert_field_approx_eq, days_from_2020, field_base, humidity, msl, spectral_temperature,
    synthetic_record, synthetic_values, t2m, tp,
};

fn group(variables: Vec<Variable>, days: u32, chunk_length: u64) -> GroupConfig {
    GroupConfig {
        store: None,
        variables,
        date_range: days_from_2020(days),
        schedule: None,
        time_resolution_hours: 1,
        chunk_length,
        chunks_per_partition: 1,
        missing: MissingPolicy::Escalate,
        regrid: None,
        layout: FileLayout::Daily,
    }
}

fn config(groups: Vec<(&str, GroupConfig)>) -> ConversionConfig {
    ConversionConfig {
        storage: StorageConfig::Memory,
        source_root: String::new(),
        parallelism: 2,
        compression: Compression::Gzip { level: 1 },
        force: false,
        cache_size_mb: 16,
        groups: groups
            .into_iter()
            .map(|(id, g)| (id.to_string(), g))
            .collect::<BTreeMap<_, _>>(),
    }
}

/// Every scheduled record of every variable of a group.
fn populate(source: &MemoryRecordSource, config: &ConversionConfig) {
    for group in config.groups.values() {
        for variable in &group.variables {
            let space = CoordinateSpace::new(
                &group.date_range,
                group.time_resolution_hours,
                group.schedule(),
                variable.levels.clone(),
            )
            .unwrap();
            for coordinate in space.coordinates() {
                source.insert(
                    &variable.name,
                    coordinate,
                    synthetic_record(variable, &coordinate, group.schedule().step),
                );
            }
        }
    }
}

struct Harness {
    storage: ObjectStorage,
    source: Arc<MemoryRecordSource>,
}

impl Harness {
    fn new() -> Self {
        Self {
            storage: ObjectStorage::in_memory(),
            source: Arc::new(MemoryRecordSource::new()),
        }
    }

    fn converter(&self, config: ConversionConfig) -> Converter {
        let writer = StoreWriter::new(self.storage.clone()).with_force(config.force);
        Converter::new(config, self.source.clone(), Arc::new(writer)).unwrap()
    }

    fn reader(&self) -> StoreReader {
        StoreReader::new(self.storage.clone(), 1 << 20)
    }
}

#[tokio::test]
async fn test_two_days_hourly_is_one_chunk_and_rerun_is_noop() {
    let harness = Harness::new();
    let config = config(vec![("sfc", group(vec![t2m()], 2, 48))]);
    populate(&harness.source, &config);

    let report = harness.converter(config.clone()).run().await.unwrap();
    let sfc = &report.groups["sfc"];
    assert!(report.is_success(), "{:?}", report);
    assert_eq!(sfc.succeeded, 48);
    assert_eq!(sfc.chunks_written, 1);

    let reader = harness.reader();
    let manifest = reader.manifest("sfc").await.unwrap().unwrap();
    assert_eq!(manifest.version, 1);
    assert_eq!(manifest.time.len, 48);
    assert_eq!(manifest.chunk_count("t2m"), 1);
    assert!(manifest.is_complete());

    let schema = reader.schema("sfc").await.unwrap();
    let variable = t2m();
    for t in [0u64, 23, 24, 47] {
        let coordinate = Coordinate::surface(schema.time.time_at(t));
        let field = reader.read_time_step(&schema, "t2m", t).await.unwrap();
        assert_eq!(field, synthetic_values(&variable, &coordinate));
    }

    // Same input again: nothing new is written and the version holds.
    let rerun = harness.converter(config.clone()).run().await.unwrap();
    assert!(rerun.is_success());
    assert_eq!(rerun.chunks_written(), 0);
    assert_eq!(rerun.groups["sfc"].chunks_skipped, 1);
    assert_eq!(reader.version("sfc").await.unwrap(), 1);

    // Forced rewrites of identical content are no-ops too.
    let forced = harness
        .converter(ConversionConfig { force: true, ..config })
        .run()
        .await
        .unwrap();
    assert_eq!(forced.chunks_written(), 0);
    assert_eq!(forced.groups["sfc"].chunks_unchanged, 1);
    assert_eq!(reader.version("sfc").await.unwrap(), 1);
}

#[tokio::test]
async fn test_forecast_schedule_fills_one_complete_chunk() {
    let harness = Harness::new();
    let mut pcp = group(vec![tp()], 3, 72);
    pcp.schedule = Some(Schedule::forecast(&[6, 18], 6));
    let config = config(vec![("pcp", pcp)]);
    populate(&harness.source, &config);
    assert_eq!(harness.source.len(), 6);

    let report = harness.converter(config).run().await.unwrap();
    let pcp = &report.groups["pcp"];
    assert_eq!(pcp.succeeded, 6);
    assert_eq!(pcp.gapped, 0);
    assert_eq!(pcp.failed, 0);
    assert_eq!(pcp.chunks_written, 1);

    let reader = harness.reader();
    let schema = reader.schema("pcp").await.unwrap();
    let at_six = reader.read_time_step(&schema, "tp", 6).await.unwrap();
    let coordinate = Coordinate::surface(schema.time.time_at(6));
    assert_eq!(at_six, synthetic_values(&tp(), &coordinate));
    let at_seven = reader.read_time_step(&schema, "tp", 7).await.unwrap();
    assert!(at_seven.iter().all(|v| v.is_nan()));
}

#[tokio::test]
async fn test_missing_record_escalates_then_recovers() {
    let harness = Harness::new();
    let config = config(vec![("sfc", group(vec![t2m(), msl()], 2, 24))]);
    populate(&harness.source, &config);
    let hole = Coordinate::surface(test_utils::utc(2020, 1, 2, 5));
    let removed = harness.source.remove("msl", &hole).unwrap();

    let report = harness.converter(config.clone()).run().await.unwrap();
    let sfc = &report.groups["sfc"];
    assert!(!report.is_success());
    assert_eq!(sfc.failed, 1);
    assert_eq!(sfc.chunks_failed, 1);
    // t2m: 2 chunks, msl: day 1 only.
    assert_eq!(sfc.chunks_written, 3);
    assert!(sfc.errors[0].starts_with("MissingRecordError"));

    let reader = harness.reader();
    let manifest = reader.manifest("sfc").await.unwrap().unwrap();
    assert_eq!(manifest.missing_chunks("msl"), vec![1]);

    harness.source.insert("msl", hole, removed);
    let report = harness.converter(config).run().await.unwrap();
    assert!(report.is_success());
    assert_eq!(report.groups["sfc"].chunks_written, 1);
    assert_eq!(report.groups["sfc"].chunks_skipped, 3);
    let manifest = reader.manifest("sfc").await.unwrap().unwrap();
    assert!(manifest.is_complete());
    assert_eq!(manifest.version, 2);
}

#[tokio::test]
async fn test_edge_policy_tolerates_late_start() {
    let harness = Harness::new();
    let mut sfc = group(vec![t2m()], 2, 48);
    sfc.missing = MissingPolicy::Edges { hours: 3 };
    let config = config(vec![("sfc", sfc)]);
    populate(&harness.source, &config);
    for hour in 0..3 {
        harness
            .source
            .remove("t2m", &Coordinate::surface(test_utils::utc(2020, 1, 1, hour)));
    }

    let report = harness.converter(config).run().await.unwrap();
    let sfc = &report.groups["sfc"];
    assert!(report.is_success());
    assert_eq!(sfc.gapped, 3);
    assert_eq!(sfc.succeeded, 45);
    assert_eq!(sfc.chunks_written, 1);

    let reader = harness.reader();
    let schema = reader.schema("sfc").await.unwrap();
    assert!(reader.read_time_step(&schema, "t2m", 2).await.unwrap()[0].is_nan());
    assert!(!reader.read_time_step(&schema, "t2m", 3).await.unwrap()[0].is_nan());
}

#[tokio::test]
async fn test_decode_mismatch_fails_coordinate_only() {
    let harness = Harness::new();
    let config = config(vec![("sfc", group(vec![t2m(), msl()], 1, 24))]);
    populate(&harness.source, &config);
    // An msl record filed under t2m.
    let coordinate = Coordinate::surface(test_utils::utc(2020, 1, 1, 10));
    harness
        .source
        .insert("t2m", coordinate, synthetic_record(&msl(), &coordinate, 0));

    let report = harness.converter(config).run().await.unwrap();
    let sfc = &report.groups["sfc"];
    assert_eq!(sfc.failed, 1);
    assert_eq!(sfc.succeeded, 47);
    assert_eq!(sfc.chunks_written, 1);
    assert!(sfc.errors[0].starts_with("DecodeError"));
}

#[tokio::test]
async fn test_partitions_run_independently() {
    let harness = Harness::new();
    let mut sfc = group(vec![t2m()], 5, 24);
    sfc.chunks_per_partition = 2;
    let config = config(vec![("sfc", sfc)]);
    populate(&harness.source, &config);

    let converter = harness.converter(config);
    let plan = converter.plan().unwrap();
    assert_eq!(plan.len(), 3);

    // Out of order, with one partition delivered twice.
    for index in [2usize, 0, 1, 0] {
        let report = converter.run_partition(index).await.unwrap();
        assert!(report.is_success());
    }
    assert!(converter.run_partition(3).await.is_err());

    let manifests = converter.consolidate().await.unwrap();
    let manifest = &manifests["sfc"];
    assert_eq!(manifest.chunk_count("t2m"), 5);
    assert_eq!(manifest.version, 1);
}

#[tokio::test]
async fn test_spectral_regrid_with_level_subset() {
    let harness = Harness::new();
    let mut tw = group(vec![spectral_temperature()], 1, 6);
    tw.schedule = Some(Schedule::forecast(&[0, 6, 12, 18], 0));
    tw.time_resolution_hours = 6;
    tw.regrid = Some(RegridConfig {
        target: Grid::regular_global(45.0),
        levels: Some(LevelSelection::List(vec![850])),
    });
    let config = config(vec![("tw", tw)]);
    populate(&harness.source, &config);

    let converter = harness.converter(config);
    let report = converter.run().await.unwrap();
    assert!(report.is_success(), "{:?}", report);
    // Only the kept level is fetched.
    assert_eq!(report.groups["tw"].succeeded, 4);

    let reader = harness.reader();
    let schema = reader.schema("tw").await.unwrap();
    let array = &schema.arrays["temperature"];
    assert_eq!(array.levels.levels, vec![850]);
    assert_eq!(array.grid, Grid::regular_global(45.0));

    let coordinate = Coordinate::new(schema.time.time_at(2), Some(850));
    let expected = field_base(&spectral_temperature(), &coordinate);
    let field = reader.read_time_step(&schema, "temperature", 2).await.unwrap();
    assert_eq!(field.len(), 40);
    assert_field_approx_eq!(field, expected, expected * 1e-4);
}

#[tokio::test]
async fn test_reduced_gaussian_kept_native() {
    let harness = Harness::new();
    let config = config(vec![("pl", group(vec![humidity()], 1, 12))]);
    populate(&harness.source, &config);

    let report = harness.converter(config).run().await.unwrap();
    assert_eq!(report.groups["pl"].succeeded, 24 * 3);
    assert_eq!(report.groups["pl"].chunks_written, 2);

    let reader = harness.reader();
    let schema = reader.schema("pl").await.unwrap();
    let field = reader.read_time_step(&schema, "specific_humidity", 13).await.unwrap();
    assert_eq!(field.len(), 3 * 208);
    let coordinate = Coordinate::new(schema.time.time_at(13), Some(1000));
    assert_eq!(&field[2 * 208..], synthetic_values(&humidity(), &coordinate).as_slice());
}

#[tokio::test]
async fn test_find_missing_reports_without_writing() {
    let harness = Harness::new();
    let config = config(vec![
        ("sfc", group(vec![t2m()], 1, 24)),
        ("pl", group(vec![humidity()], 1, 24)),
    ]);
    populate(&harness.source, &config);
    let gone = Coordinate::new(test_utils::utc(2020, 1, 1, 4), Some(850));
    harness.source.remove("specific_humidity", &gone);

    let converter = harness.converter(config);
    let missing = converter.find_missing(None).await.unwrap();
    assert_eq!(missing.len(), 1);
    assert_eq!(missing[0].group, "pl");
    assert_eq!(missing[0].coordinate, gone);
    assert!(converter.find_missing(Some("sfc")).await.unwrap().is_empty());
    assert!(converter.find_missing(Some("nope")).await.is_err());

    assert!(harness.reader().manifest("pl").await.unwrap().is_none());
}

#[tokio::test]
async fn test_init_then_resize() {
    let harness = Harness::new();
    let config_2d = config(vec![("sfc", group(vec![t2m()], 2, 24))]);
    let schemas = harness.converter(config_2d).init().await.unwrap();
    assert_eq!(schemas["sfc"].time.len, 48);

    let config_4d = config(vec![("sfc", group(vec![t2m()], 4, 24))]);
    let converter = harness.converter(config_4d);
    // The longer axis disagrees with the store until it is resized.
    let err = converter.init().await.unwrap_err();
    assert_eq!(err.kind(), "SchemaMismatchError");

    let resized = converter.resize("sfc").await.unwrap();
    assert_eq!(resized.time.len, 96);
    assert!(converter.init().await.is_ok());
}

#[tokio::test]
async fn test_resized_store_rewrites_partial_tail_chunk() {
    let harness = Harness::new();
    let config_1d = config(vec![("sfc", group(vec![t2m()], 1, 48))]);
    let config_2d = config(vec![("sfc", group(vec![t2m()], 2, 48))]);
    populate(&harness.source, &config_2d);

    // 24 steps in a 48-step chunk: the second half is NaN padding.
    let first = harness.converter(config_1d).run().await.unwrap();
    assert!(first.is_success(), "{:?}", first);
    assert_eq!(first.groups["sfc"].chunks_written, 1);

    let converter = harness.converter(config_2d.clone());
    converter.resize("sfc").await.unwrap();
    let second = converter.run().await.unwrap();
    assert!(second.is_success(), "{:?}", second);
    assert_eq!(second.groups["sfc"].chunks_written, 1);
    assert_eq!(second.groups["sfc"].chunks_skipped, 0);

    let reader = harness.reader();
    let schema = reader.schema("sfc").await.unwrap();
    assert_eq!(schema.time.len, 48);
    let variable = t2m();
    for t in [0u64, 23, 30, 47] {
        let coordinate = Coordinate::surface(schema.time.time_at(t));
        let field = reader.read_time_step(&schema, "t2m", t).await.unwrap();
        assert_eq!(field, synthetic_values(&variable, &coordinate));
    }
    assert!(reader.manifest("sfc").await.unwrap().unwrap().is_complete());
}

#[tokio::test]
async fn test_invalid_configuration_fails_before_work() {
    let harness = Harness::new();
    let mut bad = t2m();
    bad.param_id = 4_242_424;
    let err = Converter::new(
        config(vec![("sfc", group(vec![bad], 1, 24))]),
        harness.source.clone(),
        Arc::new(StoreWriter::new(harness.storage.clone())),
    )
    .err()
    .unwrap();
    assert_eq!(err.kind(), "ConfigurationError");
}

#[tokio::test]
async fn test_file_source_to_local_store() {
    let archive = test_utils::temp_test_dir_with_prefix("archive_");
    let stores = test_utils::temp_test_dir_with_prefix("stores_");

    let variable = t2m();
    for day in 1..=2u32 {
        let records: Vec<Vec<u8>> = (0..24)
            .map(|hour| {
                let coordinate = Coordinate::surface(test_utils::utc(2020, 1, day, hour));
                synthetic_record(&variable, &coordinate, 0)
            })
            .collect();
        let path = record_path(
            archive.path(),
            "sfc",
            FileLayout::Daily,
            test_utils::utc(2020, 1, day, 0),
        );
        test_utils::write_record_file(&path, &records).unwrap();
    }

    let mut config = config(vec![("sfc", group(vec![variable.clone()], 2, 48))]);
    config.storage = StorageConfig::Local {
        path: stores.path().to_string_lossy().to_string(),
    };
    let storage = ObjectStorage::new(&config.storage).unwrap();
    let source = Arc::new(FileRecordSource::new(archive.path()));
    let converter = Converter::new(
        config,
        source,
        Arc::new(StoreWriter::new(storage.clone())),
    )
    .unwrap();

    let report = converter.run().await.unwrap();
    assert!(report.is_success(), "{:?}", report);
    assert_eq!(report.groups["sfc"].succeeded, 48);
    assert!(stores.path().join("sfc/t2m/c/0/0/0").exists());
    assert!(stores.path().join("sfc/zarr.json").exists());

    let reader = StoreReader::new(storage, 1 << 20);
    let schema = reader.schema("sfc").await.unwrap();
    let coordinate = Coordinate::surface(test_utils::utc(2020, 1, 2, 7));
    assert_eq!(
        reader.read_time_step(&schema, "t2m", 31).await.unwrap(),
        synthetic_values(&variable, &coordinate)
    );
}
