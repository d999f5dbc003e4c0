//! Extended media metadata probing.
//!
//! Probing is strictly best-effort: an unreadable or malformed file logs a
//! warning and leaves the optional columns empty. Indexing never fails
//! because a media file would not parse.

use crate::config::is_type_in_group;
use std::path::Path;
use tracing::warn;

/// Probed dimensions and duration; all fields optional.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MediaInfo {
    pub width: Option<i64>,
    pub height: Option<i64>,
    pub duration_seconds: Option<f64>,
}

/// Probe a file on disk for the metadata its type supports.
pub fn probe(path: &Path, file_type: &str) -> MediaInfo {
    let mut info = MediaInfo::default();

    if is_type_in_group(file_type, "Images") {
        match image::image_dimensions(path) {
            Ok((w, h)) => {
                info.width = Some(w as i64);
                info.height = Some(h as i64);
            }
            Err(e) => warn!("Could not read dimensions of {}: {}", path.display(), e),
        }
    } else if file_type == "wav" {
        match wav_duration(path) {
            Some(seconds) => info.duration_seconds = Some(seconds),
            None => warn!("Could not read duration of {}", path.display()),
        }
    }

    info
}

fn wav_duration(path: &Path) -> Option<f64> {
    let reader = hound::WavReader::open(path).ok()?;
    let spec = reader.spec();
    if spec.sample_rate == 0 {
        return None;
    }
    Some(f64::from(reader.duration()) / f64::from(spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_probe_png_dimensions() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("dot.png");
        image::RgbImage::new(4, 2).save(&path).unwrap();

        let info = probe(&path, "png");
        assert_eq!(info.width, Some(4));
        assert_eq!(info.height, Some(2));
        assert!(info.duration_seconds.is_none());
    }

    #[test]
    fn test_probe_wav_duration() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("tone.wav");
        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 8000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut writer = hound::WavWriter::create(&path, spec).unwrap();
        for _ in 0..4000 {
            writer.write_sample(0i16).unwrap();
        }
        writer.finalize().unwrap();

        let info = probe(&path, "wav");
        assert_eq!(info.duration_seconds, Some(0.5));
        assert!(info.width.is_none());
    }

    #[test]
    fn test_probe_degrades_on_garbage() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("broken.png");
        std::fs::write(&path, b"not an image").unwrap();

        assert_eq!(probe(&path, "png"), MediaInfo::default());
        assert_eq!(probe(&path, "fbx"), MediaInfo::default());
    }
}
