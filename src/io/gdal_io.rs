// src/io/gdal_io.rs
use std::path::Path;

use gdal::raster::{Buffer, RasterCreationOptions};
use gdal::{Dataset, DriverManager, Metadata};
use parking_lot::Mutex;
use tracing::{debug, error, warn};

use crate::error::{Error, Result};
use crate::raster::{RasterDescriptor, Window, OUTPUT_SCALE};

use super::writer::WriteFailures;
use super::{RasterSink, RasterSource, SinkState};

fn band_io_error(band: usize, start_line: usize, line_count: usize, e: gdal::errors::GdalError) -> Error {
    Error::Io {
        band,
        start_line,
        end_line: start_line + line_count,
        source: std::io::Error::other(e.to_string()),
    }
}

/// Source over single-band GDAL datasets, one dataset per input band.
pub struct GdalSource {
    descriptor: RasterDescriptor,
    datasets: Vec<Mutex<Dataset>>,
    open: bool,
}

impl GdalSource {
    /// Open one single-band raster per path. Geometry comes from the first
    /// dataset; the caller guarantees alignment of the others.
    pub fn open<P: AsRef<Path>>(
        paths: &[P],
        fill: i16,
        saturate: i16,
        scale: f64,
    ) -> Result<Self> {
        let datasets = paths
            .iter()
            .map(|p| Dataset::open(p.as_ref()))
            .collect::<std::result::Result<Vec<_>, _>>()?;

        let (width, height) = datasets
            .first()
            .map(|ds| ds.raster_size())
            .ok_or_else(|| Error::precondition("no input bands supplied"))?;

        let descriptor = RasterDescriptor::new(height, width, datasets.len(), fill, saturate, scale)?;
        debug!(width, height, bands = datasets.len(), "opened GDAL source");

        Ok(Self {
            descriptor,
            datasets: datasets.into_iter().map(Mutex::new).collect(),
            open: true,
        })
    }
}

impl RasterSource for GdalSource {
    fn descriptor(&self) -> &RasterDescriptor {
        &self.descriptor
    }

    fn read_into(
        &self,
        band: usize,
        start_line: usize,
        line_count: usize,
        window: &mut Window,
    ) -> Result<()> {
        if !self.open {
            return Err(Error::resource_state("raster source is closed"));
        }
        self.descriptor.check_range(band, start_line, line_count)?;

        let samples = self.descriptor.samples();
        if window.samples() != samples {
            return Err(Error::precondition(format!(
                "window is {} samples wide, raster is {samples}",
                window.samples()
            )));
        }
        window.set_lines(line_count)?;

        let buffer = {
            let dataset = self.datasets[band].lock();
            let raster_band = dataset
                .rasterband(1)
                .map_err(|e| band_io_error(band, start_line, line_count, e))?;
            raster_band
                .read_as::<i16>(
                    (0, start_line as isize),
                    (samples, line_count),
                    (samples, line_count),
                    None,
                )
                .map_err(|e| band_io_error(band, start_line, line_count, e))?
        };

        window.as_mut_slice().copy_from_slice(buffer.data());
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        if !self.open {
            return Err(Error::resource_state(
                "raster source is not open, so it cannot be closed",
            ));
        }
        self.datasets.clear();
        self.open = false;
        Ok(())
    }
}

/// Multi-band `Int16` GeoTIFF sink. All bands share one dataset handle.
pub struct GdalSink {
    descriptor: RasterDescriptor,
    dataset: Option<Mutex<Dataset>>,
    state: SinkState,
    failures: WriteFailures,
}

impl GdalSink {
    /// Create the output dataset, copying projection and geotransform from
    /// `reference` when given. `band_names` label the output bands.
    pub fn create<P: AsRef<Path>>(
        path: P,
        descriptor: RasterDescriptor,
        band_names: &[String],
        reference: Option<&Path>,
    ) -> Result<Self> {
        let driver = DriverManager::get_driver_by_name("GTiff")?;
        let creation_options = RasterCreationOptions::from_iter([
            "COMPRESS=DEFLATE",
            "TILED=YES",
            "NUM_THREADS=ALL_CPUS",
        ]);

        let mut dataset = driver.create_with_band_type_with_options::<i16, _>(
            path.as_ref(),
            descriptor.samples(),
            descriptor.lines(),
            descriptor.bands(),
            &creation_options,
        )?;

        if let Some(reference) = reference {
            let reference = Dataset::open(reference)?;
            dataset.set_projection(&reference.projection())?;
            dataset.set_geo_transform(&reference.geo_transform()?)?;
        }

        for band_index in 0..descriptor.bands() {
            let mut band = dataset.rasterband(band_index + 1)?;
            band.set_no_data_value(Some(descriptor.fill() as f64))?;
            band.set_metadata_item("SCALE", &format!("{OUTPUT_SCALE}"), "")?;
            band.set_metadata_item("OFFSET", "0", "")?;
            if let Some(name) = band_names.get(band_index) {
                band.set_description(name)?;
            }
        }

        Ok(Self {
            descriptor,
            dataset: Some(Mutex::new(dataset)),
            state: SinkState::Open,
            failures: WriteFailures::default(),
        })
    }
}

impl RasterSink for GdalSink {
    fn descriptor(&self) -> &RasterDescriptor {
        &self.descriptor
    }

    fn write_lines(&self, band: usize, start_line: usize, data: &[i16]) -> Result<()> {
        let dataset = match (&self.dataset, self.state) {
            (Some(dataset), SinkState::Open) => dataset,
            _ => {
                return Err(Error::resource_state(format!(
                    "raster sink is {:?}, cannot write band {band}",
                    self.state
                )))
            }
        };

        let samples = self.descriptor.samples();
        if data.len() % samples != 0 {
            return Err(Error::precondition(format!(
                "{} values do not form whole lines of {samples} samples",
                data.len()
            )));
        }
        let line_count = data.len() / samples;
        self.descriptor.check_range(band, start_line, line_count)?;

        let mut buffer = Buffer::new((samples, line_count), data.to_vec());
        let dataset = dataset.lock();
        let written = dataset.rasterband(band + 1).and_then(|mut raster_band| {
            raster_band.write((0, start_line as isize), (samples, line_count), &mut buffer)
        });
        self.failures
            .track(written.map_err(|e| band_io_error(band, start_line, line_count, e)))
    }

    fn close(&mut self) -> Result<()> {
        if self.state != SinkState::Open {
            return Err(Error::resource_state(format!(
                "raster sink is {:?}, so it cannot be closed",
                self.state
            )));
        }
        if self.failures.any() {
            self.abort();
            return Err(Error::resource_state(
                "GDAL sink had a failed write and cannot be closed as durable",
            ));
        }
        if let Some(dataset) = self.dataset.take() {
            let mut dataset = dataset.into_inner();
            dataset.flush_cache()?;
        }
        self.state = SinkState::Closed;
        Ok(())
    }

    fn abort(&mut self) {
        if self.state == SinkState::Open {
            warn!("aborting GDAL sink, output is incomplete");
            self.dataset = None;
            self.state = SinkState::Aborted;
        }
    }
}

impl Drop for GdalSink {
    fn drop(&mut self) {
        if self.state == SinkState::Open {
            error!("GDAL sink dropped while still open, output was never closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn scratch_tiff(dir: &Path, name: &str, lines: usize, samples: usize) -> std::path::PathBuf {
        let path = dir.join(name);
        let descriptor = RasterDescriptor::index_output(lines, samples, 1).unwrap();
        let mut sink = GdalSink::create(&path, descriptor, &["band".to_string()], None).unwrap();
        let values: Vec<i16> = (0..(lines * samples) as i16).collect();
        sink.write_lines(0, 0, &values).unwrap();
        sink.close().unwrap();
        path
    }

    #[test]
    fn failed_write_prevents_durable_close() {
        let dir = tempfile::tempdir().unwrap();
        let descriptor = RasterDescriptor::index_output(2, 2, 1).unwrap();
        let mut sink =
            GdalSink::create(dir.path().join("out.tif"), descriptor, &[], None).unwrap();
        let failed: Result<()> = Err(Error::precondition("simulated band write failure"));
        assert!(sink.failures.track(failed).is_err());

        assert!(matches!(sink.close(), Err(Error::ResourceState(_))));
        assert_eq!(sink.state, SinkState::Aborted);
    }

    #[test]
    fn mis_sized_window_is_precondition_violation() {
        let dir = tempfile::tempdir().unwrap();
        let path = scratch_tiff(dir.path(), "in.tif", 3, 4);
        let source = GdalSource::open(&[path], -9999, 20000, 0.0001).unwrap();

        let mut narrow = Window::new(3, 2);
        assert!(matches!(
            source.read_into(0, 0, 3, &mut narrow),
            Err(Error::PreconditionViolation(_))
        ));
        assert_eq!(source.read_window(0, 1, 1).unwrap().as_slice(), &[4, 5, 6, 7]);
    }
}
