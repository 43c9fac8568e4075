//! Stream selection and metadata lookup tests.

use std::collections::HashMap;

use framescope::selector::{
    companion_metadata_path, find_companion_metadata, find_metadata_stream, is_metadata_stream,
};
use framescope::{MediaKind, StreamDescriptor, select_best_stream};

fn stream(index: usize, kind: MediaKind, frame_count: i64) -> StreamDescriptor {
    StreamDescriptor {
        index,
        kind,
        frame_count,
        codec_is_text: false,
        tags: HashMap::new(),
    }
}

fn subtitle(index: usize, language: &str, codec_is_text: bool) -> StreamDescriptor {
    let mut descriptor = stream(index, MediaKind::Subtitle, 0);
    descriptor.codec_is_text = codec_is_text;
    descriptor
        .tags
        .insert("language".to_string(), language.to_string());
    descriptor
}

// ── Best stream ────────────────────────────────────────────────────

#[test]
fn most_frames_wins() {
    let streams = [
        stream(0, MediaKind::Video, 120),
        stream(1, MediaKind::Audio, 9000),
        stream(2, MediaKind::Video, 480),
        stream(3, MediaKind::Video, 240),
    ];
    assert_eq!(select_best_stream(&streams, MediaKind::Video), Some(2));
    assert_eq!(select_best_stream(&streams, MediaKind::Audio), Some(1));
}

#[test]
fn ties_keep_the_first_stream() {
    let streams = [
        stream(0, MediaKind::Audio, 0),
        stream(1, MediaKind::Video, 0),
        stream(2, MediaKind::Video, 0),
    ];
    assert_eq!(select_best_stream(&streams, MediaKind::Video), Some(1));
}

#[test]
fn missing_kind_selects_nothing() {
    let streams = [stream(0, MediaKind::Audio, 10)];
    assert_eq!(select_best_stream(&streams, MediaKind::Video), None);
    assert_eq!(select_best_stream(&[], MediaKind::Video), None);
}

// ── Embedded metadata ──────────────────────────────────────────────

#[test]
fn xml_text_subtitle_is_metadata() {
    assert!(is_metadata_stream(&subtitle(3, "XML", true)));
    assert!(!is_metadata_stream(&subtitle(3, "xml", true)));
    assert!(!is_metadata_stream(&subtitle(3, "XML", false)));
    assert!(!is_metadata_stream(&subtitle(3, "eng", true)));
    assert!(!is_metadata_stream(&stream(3, MediaKind::Subtitle, 0)));
}

#[test]
fn only_first_subtitle_stream_is_inspected() {
    let streams = [
        stream(0, MediaKind::Video, 100),
        subtitle(1, "XML", true),
        subtitle(2, "eng", true),
    ];
    assert_eq!(find_metadata_stream(&streams), Some(1));

    let streams = [
        stream(0, MediaKind::Video, 100),
        subtitle(1, "eng", true),
        subtitle(2, "XML", true),
    ];
    assert_eq!(find_metadata_stream(&streams), None);
}

// ── Companion file ─────────────────────────────────────────────────

#[test]
fn companion_path_swaps_extension() {
    let path = companion_metadata_path(std::path::Path::new("/videos/clip.mp4"), "kva");
    assert_eq!(path, std::path::PathBuf::from("/videos/clip.kva"));
}

#[test]
fn companion_file_found_only_when_present() {
    let directory = tempfile::tempdir().expect("Failed to create temp dir");
    let video = directory.path().join("jump.avi");

    assert_eq!(find_companion_metadata(&video, "kva"), None);

    std::fs::write(directory.path().join("jump.kva"), "<analysis version="2"/>")
        .expect("Failed to write companion file");
    assert_eq!(
        find_companion_metadata(&video, "kva"),
        Some(directory.path().join("jump.kva"))
    );
}
