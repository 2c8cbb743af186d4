// tests/pipeline_tests.rs
use std::fs;
use std::io::Cursor;
use std::path::Path;

use byteorder::{ByteOrder, LittleEndian};
use tempfile::tempdir;

use spectral_indices::batch::{execute_run, process_batch, BandFormat, GlobalParams, RunSpec};
use spectral_indices::io::{RasterSink, RasterSource, RawSink, RawSource, SinkState};
use spectral_indices::processing::indices::{evaluate_pixel, SampleEncoding};
use spectral_indices::processing::{
    build_requests, DriverState, IndexRequest, Instrument, RunSummary, SpectralIndex,
    StreamConfig, StreamDriver,
};
use spectral_indices::{Error, RasterDescriptor};

type MemSource = RawSource<Cursor<Vec<u8>>>;
type MemSink = RawSink<Cursor<Vec<u8>>>;

const LINES: usize = 7;
const SAMPLES: usize = 5;
const OLI_BANDS: usize = 7;

fn encode(values: &[i16]) -> Vec<u8> {
    let mut bytes = vec![0u8; values.len() * 2];
    LittleEndian::write_i16_into(values, &mut bytes);
    bytes
}

fn decode(bytes: &[u8]) -> Vec<i16> {
    let mut values = vec![0i16; bytes.len() / 2];
    LittleEndian::read_i16_into(bytes, &mut values);
    values
}

/// Deterministic reflectance planes with scattered fill and saturated pixels.
fn synthetic_bands(bands: usize, pixels: usize) -> Vec<Vec<i16>> {
    (0..bands)
        .map(|b| {
            (0..pixels)
                .map(|i| match (b, i) {
                    (3, i) if i % 11 == 0 => -9999,
                    (4, i) if i % 13 == 5 => 20000,
                    _ => ((b * 613 + i * 149) % 6000) as i16 + 50,
                })
                .collect()
        })
        .collect()
}

fn memory_source(data: &[Vec<i16>], lines: usize, samples: usize) -> MemSource {
    let descriptor = RasterDescriptor::new(lines, samples, data.len(), -9999, 20000, 0.0001).unwrap();
    RawSource::open(descriptor, data.iter().map(|b| Cursor::new(encode(b))).collect()).unwrap()
}

fn memory_sink(lines: usize, samples: usize, bands: usize) -> MemSink {
    let descriptor = RasterDescriptor::index_output(lines, samples, bands).unwrap();
    RawSink::open(descriptor, (0..bands).map(|_| Cursor::new(Vec::new())).collect()).unwrap()
}

fn all_requests() -> Vec<IndexRequest> {
    build_requests(&SpectralIndex::ALL, &Instrument::OliTirs.band_roles()).unwrap()
}

fn config(window_lines: usize) -> StreamConfig {
    StreamConfig {
        window_lines,
        threads: 2,
        parallel_reads: true,
    }
}

fn run_in_memory(window_lines: usize, data: &[Vec<i16>]) -> (RunSummary, Vec<Vec<i16>>) {
    run_with_config(config(window_lines), data)
}

fn run_with_config(config: StreamConfig, data: &[Vec<i16>]) -> (RunSummary, Vec<Vec<i16>>) {
    let requests = all_requests();
    let mut source = memory_source(data, LINES, SAMPLES);
    let mut sink = memory_sink(LINES, SAMPLES, requests.len());

    let summary = {
        let mut driver = StreamDriver::new(config, requests).unwrap();
        driver.open(&mut source, &mut sink).unwrap();
        let summary = driver.run().unwrap();
        assert_eq!(driver.state(), DriverState::Closed);
        summary
    };

    assert_eq!(sink.state(), SinkState::Closed);
    let planes = sink
        .free()
        .unwrap()
        .into_iter()
        .map(|c| decode(&c.into_inner()))
        .collect();
    (summary, planes)
}

#[test]
fn test_window_height_does_not_change_output() {
    let data = synthetic_bands(OLI_BANDS, LINES * SAMPLES);
    let (_, reference) = run_in_memory(LINES, &data);

    for parallel_reads in [true, false] {
        for window_lines in [1, 2, 3, 6, 100] {
            let stream = StreamConfig {
                parallel_reads,
                ..config(window_lines)
            };
            let (summary, planes) = run_with_config(stream, &data);
            assert_eq!(
                planes, reference,
                "window of {window_lines} lines, parallel reads {parallel_reads}"
            );
            assert_eq!(summary.windows, LINES.div_ceil(window_lines));
        }
    }
}

#[test]
fn test_output_matches_per_pixel_evaluation() {
    let data = synthetic_bands(OLI_BANDS, LINES * SAMPLES);
    let (summary, planes) = run_in_memory(3, &data);
    let encoding = SampleEncoding {
        fill: -9999,
        saturate: 20000,
        scale: 0.0001,
    };

    let names: Vec<&str> = summary.bands_written.iter().map(|b| b.name.as_str()).collect();
    assert_eq!(names, vec!["ndvi", "evi", "savi", "msavi", "ndmi", "nbr", "nbr2"]);

    for request in all_requests() {
        let plane = &planes[request.output_band];
        assert_eq!(plane.len(), LINES * SAMPLES);
        for (pixel, &value) in plane.iter().enumerate() {
            let samples: Vec<i16> = request.inputs.iter().map(|&b| data[b][pixel]).collect();
            assert_eq!(
                value,
                evaluate_pixel(&request.kernel, &samples, &encoding),
                "{} pixel {pixel}",
                request.index
            );
        }
    }

    // band 3 (red) carries fill on every 11th pixel
    assert_eq!(planes[0][0], -9999);
    assert_eq!(planes[0][11], -9999);
}

#[test]
fn test_progress_is_monotonic_and_completes() {
    let data = synthetic_bands(OLI_BANDS, LINES * SAMPLES);
    let mut source = memory_source(&data, LINES, SAMPLES);
    let mut sink = memory_sink(LINES, SAMPLES, 7);
    let (tx, rx) = flume::unbounded();

    {
        let mut driver = StreamDriver::new(config(1), all_requests())
            .unwrap()
            .with_progress(tx);
        driver.open(&mut source, &mut sink).unwrap();
        driver.run().unwrap();
    }

    let percents: Vec<u8> = rx.iter().map(|p| p.percent).collect();
    assert_eq!(percents.first(), Some(&0));
    assert_eq!(percents.last(), Some(&100));
    assert!(percents.windows(2).all(|w| w[0] < w[1]), "{percents:?}");
    sink.free().unwrap();
}

#[test]
fn test_short_read_fails_run_and_aborts_sink() {
    let mut data = synthetic_bands(OLI_BANDS, LINES * SAMPLES);
    data[6].truncate(4 * SAMPLES);
    let mut source = memory_source(&data, LINES, SAMPLES);
    let mut sink = memory_sink(LINES, SAMPLES, 7);

    let result = {
        let mut driver = StreamDriver::new(config(2), all_requests()).unwrap();
        driver.open(&mut source, &mut sink).unwrap();
        let result = driver.run();
        assert_eq!(driver.state(), DriverState::Failed);
        result
    };

    match result {
        Err(Error::Io {
            band,
            start_line,
            end_line,
            ..
        }) => assert_eq!((band, start_line, end_line), (6, 4, 6)),
        other => panic!("expected Io error, got {other:?}"),
    }
    assert_eq!(sink.state(), SinkState::Aborted);
    assert!(!source.is_open());
    assert!(source.read_window(0, 0, 1).is_err());
    assert!(sink.free().is_ok());
}

#[test]
fn test_driver_state_transitions() {
    let data = synthetic_bands(OLI_BANDS, LINES * SAMPLES);
    let mut source = memory_source(&data, LINES, SAMPLES);
    let mut sink = memory_sink(LINES, SAMPLES, 7);
    let mut driver = StreamDriver::new(config(4), all_requests()).unwrap();

    assert_eq!(driver.state(), DriverState::Idle);
    assert!(matches!(driver.run(), Err(Error::ResourceState(_))));

    driver.open(&mut source, &mut sink).unwrap();
    assert_eq!(driver.state(), DriverState::Opened);
    driver.run().unwrap();
    assert!(matches!(driver.run(), Err(Error::ResourceState(_))));
}

#[test]
fn test_open_rejects_mismatched_sink() {
    let data = synthetic_bands(OLI_BANDS, LINES * SAMPLES);

    let mut source = memory_source(&data, LINES, SAMPLES);
    let mut taller = memory_sink(LINES + 1, SAMPLES, 7);
    let mut driver = StreamDriver::new(config(4), all_requests()).unwrap();
    assert!(matches!(
        driver.open(&mut source, &mut taller),
        Err(Error::PreconditionViolation(_))
    ));
    drop(driver);
    taller.abort();

    let mut narrow = memory_sink(LINES, SAMPLES, 3);
    let mut driver = StreamDriver::new(config(4), all_requests()).unwrap();
    assert!(matches!(
        driver.open(&mut source, &mut narrow),
        Err(Error::PreconditionViolation(_))
    ));
    drop(driver);
    narrow.abort();
}

#[test]
fn test_open_rejects_band_outside_source() {
    // A TM-sized source cannot feed OLI band slot 6
    let data = synthetic_bands(6, LINES * SAMPLES);
    let mut source = memory_source(&data, LINES, SAMPLES);
    let mut sink = memory_sink(LINES, SAMPLES, 7);
    let mut driver = StreamDriver::new(config(4), all_requests()).unwrap();
    assert!(matches!(
        driver.open(&mut source, &mut sink),
        Err(Error::PreconditionViolation(_))
    ));
    drop(driver);
    sink.abort();
}

#[test]
fn test_invalid_stream_config() {
    let zero_window = StreamDriver::<MemSource, MemSink>::new(config(0), all_requests());
    assert!(matches!(zero_window, Err(Error::Config(_))));

    let no_products = StreamDriver::<MemSource, MemSink>::new(config(10), Vec::new());
    assert!(matches!(no_products, Err(Error::Config(_))));
}

fn write_band_files(dir: &Path, data: &[Vec<i16>]) -> Vec<std::path::PathBuf> {
    data.iter()
        .enumerate()
        .map(|(b, values)| {
            let path = dir.join(format!("band{}.img", b + 1));
            fs::write(&path, encode(values)).unwrap();
            path
        })
        .collect()
}

fn scene_spec(dir: &Path, bands: Vec<std::path::PathBuf>) -> RunSpec {
    RunSpec {
        scene: "LC08_TEST".to_string(),
        bands,
        format: BandFormat::Raw,
        lines: Some(LINES),
        samples: Some(SAMPLES),
        instrument: Some(Instrument::OliTirs),
        roles: None,
        indices: vec![SpectralIndex::Nbr, SpectralIndex::Ndvi],
        toa: false,
        output_dir: Some(dir.to_path_buf()),
        fill: None,
        saturate: None,
        scale: None,
        window_lines: Some(2),
        threads: Some(2),
        summary: Some(dir.join("summary.json")),
    }
}

#[test]
fn test_file_backed_run_writes_products() {
    let dir = tempdir().unwrap();
    let data = synthetic_bands(OLI_BANDS, LINES * SAMPLES);
    let bands = write_band_files(dir.path(), &data);
    let spec = scene_spec(dir.path(), bands);

    let summary = execute_run(&spec, &GlobalParams::default()).unwrap();
    assert_eq!(summary.lines, LINES);
    assert_eq!(summary.windows, 4);

    let ndvi = decode(&fs::read(dir.path().join("LC08_TEST_sr_ndvi.img")).unwrap());
    let nbr = decode(&fs::read(dir.path().join("LC08_TEST_sr_nbr.img")).unwrap());
    assert_eq!(ndvi.len(), LINES * SAMPLES);
    assert_eq!(nbr.len(), LINES * SAMPLES);

    let (_, in_memory) = run_in_memory(LINES, &data);
    assert_eq!(ndvi, in_memory[0]);
    assert_eq!(nbr, in_memory[5]);

    let written: RunSummary =
        serde_json::from_str(&fs::read_to_string(dir.path().join("summary.json")).unwrap()).unwrap();
    assert_eq!(written, summary);
}

#[test]
fn test_short_band_file_is_rejected_up_front() {
    let dir = tempdir().unwrap();
    let mut data = synthetic_bands(OLI_BANDS, LINES * SAMPLES);
    data[4].truncate(SAMPLES);
    let bands = write_band_files(dir.path(), &data);
    let spec = scene_spec(dir.path(), bands);

    assert!(execute_run(&spec, &GlobalParams::default()).is_err());
    assert!(!dir.path().join("LC08_TEST_sr_ndvi.img").exists());
    assert!(!dir.path().join("LC08_TEST_sr_nbr.img").exists());
    assert!(!dir.path().join("summary.json").exists());
}

#[test]
fn test_blocked_product_path_leaves_no_products_behind() {
    let dir = tempdir().unwrap();
    let data = synthetic_bands(OLI_BANDS, LINES * SAMPLES);
    let bands = write_band_files(dir.path(), &data);
    let spec = scene_spec(dir.path(), bands);
    // A directory where the second product file should go
    fs::create_dir(dir.path().join("LC08_TEST_sr_nbr.img")).unwrap();

    assert!(execute_run(&spec, &GlobalParams::default()).is_err());
    assert!(!dir.path().join("LC08_TEST_sr_ndvi.img").exists());
    assert!(!dir.path().join("summary.json").exists());
}

#[test]
fn test_batch_file_runs_each_scene() {
    let dir = tempdir().unwrap();
    let data = synthetic_bands(6, LINES * SAMPLES);
    let bands = write_band_files(dir.path(), &data);

    let config = serde_json::json!({
        "global": { "output_dir": dir.path(), "stream": { "window_lines": 3, "threads": 1 } },
        "runs": [
            {
                "scene": "LT05_A",
                "bands": bands,
                "lines": LINES,
                "samples": SAMPLES,
                "instrument": "tm",
                "indices": ["ndmi", "savi"],
                "toa": true
            }
        ]
    });
    let config_path = dir.path().join("batch.json");
    fs::write(&config_path, config.to_string()).unwrap();

    process_batch(&config_path).unwrap();
    assert!(dir.path().join("LT05_A_toa_savi.img").exists());
    assert!(dir.path().join("LT05_A_toa_ndmi.img").exists());
}
