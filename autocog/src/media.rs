//! Stub input files for `@name.ext` placeholders in the derived predict
//! command, so a first invocation has something to feed the model.

use std::path::{Path, PathBuf};

use regex::Regex;

#[derive(Debug, thiserror::Error)]
pub enum MediaError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("image encoding failed: {0}")]
    Image(#[from] image::ImageError),
    #[error("don't know how to create a stub {extension:?} file for {filename}")]
    UnsupportedType { filename: String, extension: String },
}

/// Find every `@file` placeholder in the command and create a stub for each in
/// the repository root. Existing files are left untouched so real sample
/// inputs are never clobbered. Returns the paths actually created.
pub fn create_stub_inputs(command: &str, root: &Path) -> Result<Vec<PathBuf>, MediaError> {
    let re = Regex::new(r"@([\w./-]+)").expect("placeholder pattern is valid");
    let mut created = Vec::new();
    for caps in re.captures_iter(command) {
        let filename = &caps[1];
        let path = root.join(filename);
        if path.exists() {
            continue;
        }
        create_stub(&path, filename)?;
        tracing::debug!(file = filename, "created stub input");
        created.push(path);
    }
    Ok(created)
}

fn create_stub(path: &Path, filename: &str) -> Result<(), MediaError> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let extension = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match extension.as_str() {
        "jpg" | "jpeg" => {
            image::RgbImage::from_pixel(256, 256, image::Rgb([255, 255, 255])).save(path)?;
        }
        "png" => {
            image::RgbaImage::from_pixel(256, 256, image::Rgba([0, 0, 0, 0])).save(path)?;
        }
        "wav" => {
            std::fs::write(path, silent_wav())?;
        }
        "txt" => {
            std::fs::write(path, "   ")?;
        }
        "mp3" | "mp4" | "avi" => {
            std::fs::write(path, [])?;
        }
        _ => {
            return Err(MediaError::UnsupportedType {
                filename: filename.to_string(),
                extension,
            });
        }
    }
    Ok(())
}

/// One second of 16-bit stereo silence at 44.1 kHz, RIFF-framed by hand.
fn silent_wav() -> Vec<u8> {
    const SAMPLE_RATE: u32 = 44_100;
    const CHANNELS: u16 = 2;
    const BITS: u16 = 16;
    let data_len = SAMPLE_RATE * u32::from(CHANNELS) * u32::from(BITS / 8);
    let byte_rate = data_len;
    let block_align = CHANNELS * (BITS / 8);

    let mut out = Vec::with_capacity(44 + data_len as usize);
    out.extend_from_slice(b"RIFF");
    out.extend_from_slice(&(36 + data_len).to_le_bytes());
    out.extend_from_slice(b"WAVE");
    out.extend_from_slice(b"fmt ");
    out.extend_from_slice(&16u32.to_le_bytes());
    out.extend_from_slice(&1u16.to_le_bytes()); // PCM
    out.extend_from_slice(&CHANNELS.to_le_bytes());
    out.extend_from_slice(&SAMPLE_RATE.to_le_bytes());
    out.extend_from_slice(&byte_rate.to_le_bytes());
    out.extend_from_slice(&block_align.to_le_bytes());
    out.extend_from_slice(&BITS.to_le_bytes());
    out.extend_from_slice(b"data");
    out.extend_from_slice(&data_len.to_le_bytes());
    out.resize(out.len() + data_len as usize, 0);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn creates_stub_for_each_placeholder() {
        let dir = TempDir::new().unwrap();
        let created = create_stub_inputs(
            "cog predict -i image=@input.png -i prompt=@prompt.txt",
            dir.path(),
        )
        .unwrap();
        assert_eq!(created.len(), 2);
        assert!(dir.path().join("input.png").exists());
        assert!(dir.path().join("prompt.txt").exists());
    }

    #[test]
    fn jpeg_stub_is_nonempty() {
        let dir = TempDir::new().unwrap();
        create_stub_inputs("cog predict -i image=@input.jpg", dir.path()).unwrap();
        let len = std::fs::metadata(dir.path().join("input.jpg")).unwrap().len();
        assert!(len > 0);
    }

    #[test]
    fn wav_stub_has_riff_header() {
        let dir = TempDir::new().unwrap();
        create_stub_inputs("cog predict -i audio=@clip.wav", dir.path()).unwrap();
        let bytes = std::fs::read(dir.path().join("clip.wav")).unwrap();
        assert_eq!(&bytes[..4], b"RIFF");
        assert_eq!(&bytes[8..12], b"WAVE");
    }

    #[test]
    fn existing_files_are_untouched() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join("input.txt"), "real content").unwrap();
        let created =
            create_stub_inputs("cog predict -i text=@input.txt", dir.path()).unwrap();
        assert!(created.is_empty());
        assert_eq!(
            std::fs::read_to_string(dir.path().join("input.txt")).unwrap(),
            "real content"
        );
    }

    #[test]
    fn command_without_placeholders_is_a_noop() {
        let dir = TempDir::new().unwrap();
        let created = create_stub_inputs("cog predict -i prompt=\"hello\"", dir.path()).unwrap();
        assert!(created.is_empty());
    }

    #[test]
    fn unsupported_extension_is_an_error() {
        let dir = TempDir::new().unwrap();
        let err = create_stub_inputs("cog predict -i data=@weights.bin", dir.path()).unwrap_err();
        assert!(matches!(err, MediaError::UnsupportedType { .. }));
    }
}
