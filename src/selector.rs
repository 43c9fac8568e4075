//! Stream selection and metadata lookup.
//!
//! Some containers expose several video streams (alternate angles, preview
//! tracks); the one with the most frames is taken as the main stream.
//! Analysis metadata may ride along as a text subtitle stream tagged with the
//! language `XML`, or live in a companion file next to the video.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Media type of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaKind {
    /// Video pictures.
    Video,
    /// Audio samples.
    Audio,
    /// Subtitles or other text payloads.
    Subtitle,
    /// Anything else (data, attachments).
    Other,
}

/// What the selector needs to know about one stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamDescriptor {
    /// Index of the stream in the container.
    pub index: usize,
    /// Media type.
    pub kind: MediaKind,
    /// Frame count from the stream header, `0` when unknown.
    pub frame_count: i64,
    /// Whether the codec is plain text.
    pub codec_is_text: bool,
    /// Stream-level tags.
    pub tags: HashMap<String, String>,
}

/// Pick the stream of `kind` with the highest frame count.
///
/// Ties keep the stream seen first. Returns `None` when no stream of that
/// kind exists.
pub fn select_best_stream(streams: &[StreamDescriptor], kind: MediaKind) -> Option<usize> {
    let mut best: Option<&StreamDescriptor> = None;
    for stream in streams.iter().filter(|stream| stream.kind == kind) {
        match best {
            Some(current) if stream.frame_count <= current.frame_count => {}
            _ => best = Some(stream),
        }
    }
    best.map(|stream| stream.index)
}

/// Whether a stream carries embedded analysis metadata.
///
/// Only text subtitle streams whose `language` tag is exactly `XML` qualify.
pub fn is_metadata_stream(stream: &StreamDescriptor) -> bool {
    stream.kind == MediaKind::Subtitle
        && stream.codec_is_text
        && stream.tags.get("language").is_some_and(|language| language == "XML")
}

/// Index of the first subtitle stream, if it is a metadata stream.
///
/// Only the first subtitle stream is inspected; later ones are ignored.
pub fn find_metadata_stream(streams: &[StreamDescriptor]) -> Option<usize> {
    let first = streams
        .iter()
        .find(|stream| stream.kind == MediaKind::Subtitle)?;
    if is_metadata_stream(first) {
        Some(first.index)
    } else {
        log::debug!("subtitle stream {} is not a metadata stream, ignoring", first.index);
        None
    }
}

/// Path of the companion metadata file for a media file.
///
/// `clip.mp4` with extension `kva` gives `clip.kva` in the same directory.
pub fn companion_metadata_path(media_path: &Path, extension: &str) -> PathBuf {
    media_path.with_extension(extension)
}

/// The companion metadata file, if it exists on disk.
pub fn find_companion_metadata(media_path: &Path, extension: &str) -> Option<PathBuf> {
    let candidate = companion_metadata_path(media_path, extension);
    if candidate.is_file() {
        Some(candidate)
    } else {
        None
    }
}
