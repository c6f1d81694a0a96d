//! Fixtures shared by the unit tests: synthetic images, EXIF blobs and a
//! scripted stand-in for ffmpeg.

use chrono::{DateTime, FixedOffset};
use exif::experimental::Writer;
use exif::{Field, In, Rational, Tag, Value};
use image::{DynamicImage, ImageFormat, RgbImage};
use std::io::Cursor;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};

use crate::media::probe::{MediaProbe, ProbeError, VideoInfo};

fn gradient(width: u32, height: u32) -> DynamicImage {
    let buffer = RgbImage::from_fn(width, height, |x, y| {
        image::Rgb([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128])
    });
    DynamicImage::ImageRgb8(buffer)
}

fn encode(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
    let mut bytes = Cursor::new(Vec::new());
    gradient(width, height).write_to(&mut bytes, format).unwrap();
    bytes.into_inner()
}

pub fn write_jpeg(path: &Path, width: u32, height: u32) {
    std::fs::write(path, encode(width, height, ImageFormat::Jpeg)).unwrap();
}

pub fn write_png(path: &Path, width: u32, height: u32) {
    std::fs::write(path, encode(width, height, ImageFormat::Png)).unwrap();
}

/// EXIF tags to embed in a test JPEG
#[derive(Debug, Default)]
pub struct ExifFixture {
    pub model: Option<&'static str>,
    pub taken: Option<&'static str>,
    /// (latitude DMS, latitude ref, longitude DMS, longitude ref)
    pub gps: Option<([f64; 3], &'static str, [f64; 3], &'static str)>,
    pub orientation: Option<u16>,
}

fn ascii(tag: Tag, text: &str) -> Field {
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Ascii(vec![text.as_bytes().to_vec()]),
    }
}

fn dms(tag: Tag, parts: [f64; 3]) -> Field {
    let value = parts
        .iter()
        .map(|p| Rational {
            num: (p * 100.0).round() as u32,
            denom: 100,
        })
        .collect();
    Field {
        tag,
        ifd_num: In::PRIMARY,
        value: Value::Rational(value),
    }
}

/// Write a small JPEG with an APP1 EXIF segment built from `fixture`
pub fn write_jpeg_with_exif(path: &Path, fixture: &ExifFixture) {
    let mut fields = Vec::new();
    if let Some(model) = fixture.model {
        fields.push(ascii(Tag::Make, "TestMaker"));
        fields.push(ascii(Tag::Model, model));
    }
    if let Some(taken) = fixture.taken {
        fields.push(ascii(Tag::DateTimeOriginal, taken));
    }
    if let Some((lat, lat_ref, lon, lon_ref)) = fixture.gps {
        fields.push(dms(Tag::GPSLatitude, lat));
        fields.push(ascii(Tag::GPSLatitudeRef, lat_ref));
        fields.push(dms(Tag::GPSLongitude, lon));
        fields.push(ascii(Tag::GPSLongitudeRef, lon_ref));
    }
    if let Some(orientation) = fixture.orientation {
        fields.push(Field {
            tag: Tag::Orientation,
            ifd_num: In::PRIMARY,
            value: Value::Short(vec![orientation]),
        });
    }

    let mut writer = Writer::new();
    for field in &fields {
        writer.push_field(field);
    }
    let mut tiff = Cursor::new(Vec::new());
    writer.write(&mut tiff, false).unwrap();
    let tiff = tiff.into_inner();

    let jpeg = encode(80, 40, ImageFormat::Jpeg);
    let segment_len = (2 + 6 + tiff.len()) as u16;

    let mut out = Vec::with_capacity(jpeg.len() + tiff.len() + 10);
    out.extend_from_slice(&jpeg[..2]);
    out.extend_from_slice(&[0xFF, 0xE1]);
    out.extend_from_slice(&segment_len.to_be_bytes());
    out.extend_from_slice(b"Exif\0\0");
    out.extend_from_slice(&tiff);
    out.extend_from_slice(&jpeg[2..]);
    std::fs::write(path, out).unwrap();
}

/// Scripted [`MediaProbe`]: fixed duration, frames rendered with `image`
#[derive(Debug, Default)]
pub struct FakeProbe {
    duration: Option<f64>,
    created_at: Option<DateTime<FixedOffset>>,
    frames: bool,
    pub duration_calls: AtomicUsize,
    pub frame_calls: AtomicUsize,
}

impl FakeProbe {
    pub fn with_duration(secs: f64) -> Self {
        Self {
            duration: Some(secs),
            frames: true,
            ..Self::default()
        }
    }

    /// Report an embedded creation time (RFC 3339)
    pub fn with_creation_time(mut self, rfc3339: &str) -> Self {
        self.created_at = Some(DateTime::parse_from_rfc3339(rfc3339).unwrap());
        self
    }

    /// Every call fails, as if ffmpeg were missing
    pub fn broken() -> Self {
        Self::default()
    }

    pub fn duration_calls(&self) -> usize {
        self.duration_calls.load(Ordering::SeqCst)
    }

    pub fn frame_calls(&self) -> usize {
        self.frame_calls.load(Ordering::SeqCst)
    }
}

impl MediaProbe for FakeProbe {
    fn probe_duration(&self, _path: &Path) -> Result<f64, ProbeError> {
        self.duration_calls.fetch_add(1, Ordering::SeqCst);
        self.duration
            .ok_or_else(|| ProbeError::BadOutput("no duration reported".to_string()))
    }

    fn probe_video(&self, path: &Path) -> Result<VideoInfo, ProbeError> {
        Ok(VideoInfo {
            duration_secs: Some(self.probe_duration(path)?),
            created_at: self.created_at,
        })
    }

    fn extract_frame_at(&self, _path: &Path, offset_secs: f64, dest: &Path) -> Result<(), ProbeError> {
        self.frame_calls.fetch_add(1, Ordering::SeqCst);
        if !self.frames {
            return Err(ProbeError::NoFrame { offset: offset_secs });
        }
        write_jpeg(dest, 160, 90);
        Ok(())
    }
}
