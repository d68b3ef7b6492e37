//! Media file records and mocked metadata extraction.
//!
//! Nothing here decodes audio. Titles and artists come from the file name,
//! durations from the file size and an assumed bitrate.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

pub const UNKNOWN_ARTIST: &str = "Unknown Artist";
pub const UNKNOWN_ALBUM: &str = "Unknown Album";
pub const UNKNOWN_DURATION: &str = "00:00";

const ARTIST_TITLE_SEPARATOR: &str = " - ";

// mp3 is assumed to be 128 kbit/s CBR
const MP3_BITS_PER_SECOND: u64 = 128 * 1024;
// wav is assumed to be 44.1 kHz, 16-bit, stereo
const WAV_BYTES_PER_SECOND: u64 = 44_100 * 2 * 2;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MediaFile {
    pub file_name: String,
    pub file_path: PathBuf,
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: String,
    pub file_size: u64,
    pub file_type: String,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MediaMetadata {
    pub title: String,
    pub artist: String,
    pub album: String,
    pub duration: String,
}

impl MediaMetadata {
    /// Metadata used when a file cannot be trusted: the stem as title, everything else unknown.
    pub fn fallback(stem: &str) -> Self {
        Self {
            title: stem.to_string(),
            artist: UNKNOWN_ARTIST.to_string(),
            album: UNKNOWN_ALBUM.to_string(),
            duration: UNKNOWN_DURATION.to_string(),
        }
    }
}

/// Lower-cased extension of a file name, if any.
pub fn extension_of(name: impl AsRef<Path>) -> Option<String> {
    name.as_ref()
        .extension()
        .and_then(|e| e.to_str())
        .map(str::to_ascii_lowercase)
}

fn stem_of(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default()
}

/// Split an "Artist - Title" stem. Returns `(artist, title)`.
pub fn parse_artist_title(stem: &str) -> Option<(String, String)> {
    let mut parts = stem.split(ARTIST_TITLE_SEPARATOR);
    match (parts.next(), parts.next()) {
        (Some(artist), Some(title)) => Some((artist.trim().to_string(), title.trim().to_string())),
        _ => None,
    }
}

pub fn format_duration(seconds: u64) -> String {
    format!("{:02}:{:02}", seconds / 60, seconds % 60)
}

/// Rough playing time from size and an assumed encoding.
pub fn estimate_duration(file_type: &str, size_bytes: u64) -> String {
    match file_type {
        "mp3" => format_duration(size_bytes.saturating_mul(8) / MP3_BITS_PER_SECOND),
        "wav" => format_duration(size_bytes / WAV_BYTES_PER_SECOND),
        _ => UNKNOWN_DURATION.to_string(),
    }
}

/// Metadata for a file of the given size. Only the name is inspected.
pub fn metadata_for(path: &Path, size_bytes: u64) -> MediaMetadata {
    let stem = stem_of(path);
    let file_type = extension_of(path).unwrap_or_default();

    let mut metadata = MediaMetadata::fallback(&stem);
    metadata.duration = estimate_duration(&file_type, size_bytes);
    if let Some((artist, title)) = parse_artist_title(&stem) {
        metadata.artist = artist;
        metadata.title = title;
    }
    metadata
}

/// Read size and modification time from disk and derive the metadata.
pub fn read_metadata(path: &Path) -> io::Result<MediaMetadata> {
    let size = fs::metadata(path)?.len();
    Ok(metadata_for(path, size))
}

/// Build a [`MediaFile`] from an on-disk file.
///
/// With `trust_contents` false the file is treated as corrupted and only
/// the fallback metadata is used.
pub fn inspect(path: &Path, trust_contents: bool) -> io::Result<MediaFile> {
    let info = fs::metadata(path)?;
    let size = info.len();
    let file_path = fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());

    let metadata = if trust_contents {
        metadata_for(path, size)
    } else {
        MediaMetadata::fallback(&stem_of(path))
    };

    Ok(MediaFile {
        file_name: path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default(),
        file_path,
        title: metadata.title,
        artist: metadata.artist,
        album: metadata.album,
        duration: metadata.duration,
        file_size: size,
        file_type: extension_of(path).unwrap_or_default(),
        last_modified: info.modified().ok().map(DateTime::<Utc>::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_artist_title_split() {
        assert_eq!(
            parse_artist_title("Daft Punk - Around the World"),
            Some(("Daft Punk".to_string(), "Around the World".to_string()))
        );
        assert_eq!(parse_artist_title("Untitled"), None);
        assert_eq!(
            parse_artist_title("A - B - C"),
            Some(("A".to_string(), "B".to_string()))
        );
    }

    #[test]
    fn test_duration_estimates() {
        // 3 minutes of 128 kbit/s audio
        assert_eq!(estimate_duration("mp3", 180 * 128 * 1024 / 8), "03:00");
        // 65 seconds of CD-quality audio
        assert_eq!(estimate_duration("wav", 65 * 176_400), "01:05");
        assert_eq!(estimate_duration("flac", 10_000_000), "00:00");
        assert_eq!(format_duration(6000), "100:00");
    }

    #[test]
    fn test_extension_lowercased() {
        assert_eq!(extension_of("Song.MP3"), Some("mp3".to_string()));
        assert_eq!(extension_of("README"), None);
    }

    #[test]
    fn test_inspect_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Artist - Title.mp3");
        fs::write(&path, vec![0u8; 16_384]).unwrap();

        let media = inspect(&path, true).unwrap();
        assert_eq!(media.file_name, "Artist - Title.mp3");
        assert_eq!(media.artist, "Artist");
        assert_eq!(media.title, "Title");
        assert_eq!(media.album, UNKNOWN_ALBUM);
        assert_eq!(media.file_type, "mp3");
        assert_eq!(media.file_size, 16_384);
        assert_eq!(media.duration, "00:01");
        assert!(media.file_path.is_absolute());
        assert!(media.last_modified.is_some());
    }

    #[test]
    fn test_inspect_untrusted_uses_fallback() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("Artist - Title.mp3");
        fs::write(&path, vec![0u8; 16_384]).unwrap();

        let media = inspect(&path, false).unwrap();
        assert_eq!(media.title, "Artist - Title");
        assert_eq!(media.artist, UNKNOWN_ARTIST);
        assert_eq!(media.duration, UNKNOWN_DURATION);
    }
}
