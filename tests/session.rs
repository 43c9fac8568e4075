//! Session tests driven by a scripted decoder.
//!
//! The scripted stream runs at 25 fps on a millisecond clock (one picture
//! every 40 timestamps) with a key frame every second.

mod common;

use framescope::{
    AspectRatio, FramescopeError, ImportStrategy, OperationOptions, ReadRequest, SessionOptions,
    TimestampReconciler, VideoSession, seek_and_correct,
};

use common::{ScriptedDecoder, SPACING, TIMESTAMPS_PER_SECOND, scripted_session};

fn cached_timestamps(session: &VideoSession<ScriptedDecoder>) -> Vec<i64> {
    session
        .cache()
        .map(|cache| cache.frames().iter().map(|frame| frame.timestamp).collect())
        .unwrap_or_default()
}

fn assert_strictly_increasing(timestamps: &[i64]) {
    for pair in timestamps.windows(2) {
        assert!(pair[0] < pair[1], "timestamps not increasing: {pair:?}");
    }
}

// ── Lifecycle ──────────────────────────────────────────────────────

#[test]
fn empty_session_reports_movie_not_loaded() {
    let mut session: VideoSession<ScriptedDecoder> = VideoSession::new(SessionOptions::default());
    assert!(!session.is_loaded());
    assert!(matches!(
        session.read_frame(ReadRequest::Seek(0)),
        Err(FramescopeError::MovieNotLoaded)
    ));
    assert!(matches!(session.info(), Err(FramescopeError::MovieNotLoaded)));
    assert!(session.cache().is_none());
}

#[test]
fn unload_is_idempotent() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(50));
    assert!(session.is_loaded());
    session.unload();
    session.unload();
    assert!(!session.is_loaded());
}

#[test]
fn load_with_computes_decoding_geometry() {
    let (session, _) = scripted_session(ScriptedDecoder::new(50).with_size(62, 40));
    let info = session.info().unwrap();
    assert_eq!(info.decoding_width, 64);
    assert_eq!(info.decoding_height, 40);
}

#[test]
fn embedded_metadata_is_exposed() {
    let (session, _) = scripted_session(ScriptedDecoder::new(10).with_metadata("<kva/>"));
    assert_eq!(session.metadata_text().unwrap(), Some("<kva/>"));
}

// ── Decoding reads ─────────────────────────────────────────────────

#[test]
fn seek_lands_on_exact_frame() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    let bitmap = session.read_frame(ReadRequest::Seek(2000)).unwrap();
    assert_eq!(bitmap.width(), 64);
    assert_eq!(session.selection().unwrap().current_timestamp, 2000);
}

#[test]
fn seek_between_frames_lands_on_next_frame() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    session.read_frame(ReadRequest::Seek(2010)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 2040);
}

#[test]
fn relative_reads_step_forward_and_back() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    session.read_frame(ReadRequest::Seek(2000)).unwrap();

    session.read_frame(ReadRequest::Relative(1)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 2000 + SPACING);

    session.read_frame(ReadRequest::Relative(3)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 2000 + 4 * SPACING);

    session.read_frame(ReadRequest::Relative(-2)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 2000 + 2 * SPACING);
}

#[test]
fn relative_zero_still_decodes_one_frame() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    session.read_frame(ReadRequest::Seek(0)).unwrap();
    session.read_frame(ReadRequest::Relative(0)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, SPACING);
}

#[test]
fn negative_seek_is_clamped_to_zero() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(50));
    session.read_frame(ReadRequest::Seek(-500)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 0);
}

#[test]
fn reading_past_the_end_is_frame_not_read() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(50));
    let result = session.read_frame(ReadRequest::Seek(50 * SPACING + 1000));
    assert!(matches!(result, Err(FramescopeError::FrameNotRead)));
}

#[test]
fn far_seek_is_frame_not_read() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(10));
    let result = session.read_frame(ReadRequest::Seek(i64::MAX));
    assert!(matches!(result, Err(FramescopeError::FrameNotRead)));
}

#[test]
fn extreme_relative_steps_do_not_overflow() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(10));
    session.read_frame(ReadRequest::Seek(200)).unwrap();

    session.read_frame(ReadRequest::Relative(i64::MIN)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 0);

    let result = session.read_frame(ReadRequest::Relative(i64::MAX));
    assert!(matches!(result, Err(FramescopeError::FrameNotRead)));
}

#[test]
fn zero_sized_pictures_are_memory_not_allocated() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(50).with_size(0, 0));
    let result = session.read_frame(ReadRequest::Seek(0));
    assert!(matches!(result, Err(FramescopeError::MemoryNotAllocated)));
}

#[test]
fn failed_conversion_clears_current_bitmap() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(50).failing_at_height(48));
    let result = session.read_frame(ReadRequest::Seek(0));
    assert!(matches!(result, Err(FramescopeError::ImageNotConverted(_))));
    assert!(session.current_bitmap().is_none());
}

#[test]
fn anamorphic_conversion_failure_retries_with_square_pixels() {
    let decoder = ScriptedDecoder::new(50).failing_at_height(24);
    let mut info = decoder.info();
    info.pixel_aspect_ratio = 2.0;
    let mut session = VideoSession::new(SessionOptions::default());
    session.load_with(decoder, info);
    assert_eq!(session.info().unwrap().decoding_height, 24);

    let bitmap = session.read_frame(ReadRequest::Seek(0)).unwrap();
    assert_eq!(bitmap.height(), 48);
    assert_eq!(
        session.info().unwrap().aspect_ratio,
        AspectRatio::ForceSquarePixels
    );
}

// ── Seek correction ────────────────────────────────────────────────

#[test]
fn overshooting_seek_is_corrected_once() {
    let mut decoder = ScriptedDecoder::new(250).with_overshoots(1);
    let log = decoder.log();
    let mut reconciler = TimestampReconciler::new(SPACING);

    let outcome = seek_and_correct(&mut decoder, &mut reconciler, TIMESTAMPS_PER_SECOND, 6000)
        .unwrap();

    assert_eq!(outcome.corrections, 1);
    assert_eq!(outcome.first_timestamp, 2000);
    let seeks = &log.borrow().seeks;
    assert_eq!(seeks.len(), 2);
    assert_eq!(seeks[0].target, 6000);
    assert_eq!(seeks[0].max, 7000);
    assert_eq!(seeks[1].target, 2000);
    assert_eq!(seeks[1].min, 0);
    assert_eq!(seeks[1].max, 2000);
}

#[test]
fn overshoot_is_corrected_only_once() {
    let mut decoder = ScriptedDecoder::new(250).with_overshoots(2);
    let log = decoder.log();
    let mut reconciler = TimestampReconciler::new(SPACING);

    let outcome = seek_and_correct(&mut decoder, &mut reconciler, TIMESTAMPS_PER_SECOND, 6000)
        .unwrap();

    assert_eq!(outcome.corrections, 1);
    assert_eq!(log.borrow().seeks.len(), 2);
    assert!(outcome.first_timestamp > 2000);
}

#[test]
fn session_read_after_overshoot_reaches_target() {
    let (mut session, log) = scripted_session(ScriptedDecoder::new(250).with_overshoots(1));
    session.read_frame(ReadRequest::Seek(2000)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 2000);
    assert_eq!(log.borrow().seeks.len(), 2);
}

// ── Analysis mode ──────────────────────────────────────────────────

#[test]
fn extract_to_memory_enters_analysis_mode() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    let count = session
        .extract_to_memory(0, 400, false, &OperationOptions::default())
        .unwrap();

    assert_eq!(count, 11);
    let selection = session.selection().unwrap();
    assert!(selection.analysis_mode);
    assert_eq!(selection.duration_frames, 11);
    assert_eq!(
        cached_timestamps(&session),
        (0..=10).map(|index| index * SPACING).collect::<Vec<_>>()
    );
}

#[test]
fn cached_reads_do_not_touch_the_decoder() {
    let (mut session, log) = scripted_session(ScriptedDecoder::new(250));
    session
        .extract_to_memory(0, 400, false, &OperationOptions::default())
        .unwrap();
    let packets = log.borrow().packets;

    session.read_frame(ReadRequest::Seek(100)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 120);
    assert_eq!(session.selection().unwrap().current_frame, 3);

    session.read_frame(ReadRequest::Relative(100)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 400);

    session.read_frame(ReadRequest::Relative(-100)).unwrap();
    assert_eq!(session.selection().unwrap().current_frame, 0);

    assert_eq!(log.borrow().packets, packets);
}

#[test]
fn expanding_after_appends_without_duplicates() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    let options = OperationOptions::default();
    session.extract_to_memory(0, 400, false, &options).unwrap();

    let plan = session.prepare_selection(0, 800, false).unwrap();
    assert_eq!(plan.strategy, ImportStrategy::InsertionAfter);
    assert_eq!(plan.start, 400);

    let count = session.extract_to_memory(0, 800, false, &options).unwrap();
    assert_eq!(count, 21);
    let timestamps = cached_timestamps(&session);
    assert_strictly_increasing(&timestamps);
    assert_eq!(timestamps.first(), Some(&0));
    assert_eq!(timestamps.last(), Some(&800));
}

#[test]
fn expanding_before_prepends_without_duplicates() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    let options = OperationOptions::default();
    session.extract_to_memory(400, 800, false, &options).unwrap();
    assert_eq!(session.cache().unwrap().len(), 11);

    let count = session.extract_to_memory(0, 800, false, &options).unwrap();
    assert_eq!(count, 21);
    let timestamps = cached_timestamps(&session);
    assert_strictly_increasing(&timestamps);
    assert_eq!(timestamps.first(), Some(&0));
    assert_eq!(timestamps.last(), Some(&800));
}

#[test]
fn expanding_both_sides_takes_two_calls() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    let options = OperationOptions::default();
    session.extract_to_memory(400, 800, false, &options).unwrap();

    session.extract_to_memory(0, 1200, false, &options).unwrap();
    let timestamps = cached_timestamps(&session);
    assert_eq!(timestamps.first(), Some(&400));
    assert_eq!(timestamps.last(), Some(&1200));

    session.extract_to_memory(0, 1200, false, &options).unwrap();
    let timestamps = cached_timestamps(&session);
    assert_strictly_increasing(&timestamps);
    assert_eq!(timestamps.len(), 31);
}

#[test]
fn shrinking_never_decodes() {
    let (mut session, log) = scripted_session(ScriptedDecoder::new(250));
    let options = OperationOptions::default();
    session.extract_to_memory(0, 800, false, &options).unwrap();
    let packets = log.borrow().packets;
    let seeks = log.borrow().seeks.len();

    let count = session.extract_to_memory(200, 600, false, &options).unwrap();

    assert_eq!(count, 11);
    assert_eq!(log.borrow().packets, packets);
    assert_eq!(log.borrow().seeks.len(), seeks);
    assert!(session.selection().unwrap().analysis_mode);
    assert_eq!(cached_timestamps(&session).first(), Some(&200));
}

#[test]
fn force_reload_decodes_again() {
    let (mut session, log) = scripted_session(ScriptedDecoder::new(250));
    let options = OperationOptions::default();
    session.extract_to_memory(0, 400, false, &options).unwrap();
    let packets = log.borrow().packets;

    session.extract_to_memory(0, 400, true, &options).unwrap();
    assert!(log.borrow().packets > packets);
    assert_eq!(session.cache().unwrap().len(), 11);
}

#[test]
fn disjoint_range_reloads_completely() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    let options = OperationOptions::default();
    session.extract_to_memory(0, 400, false, &options).unwrap();

    let plan = session.prepare_selection(4000, 4400, false).unwrap();
    assert_eq!(plan.strategy, ImportStrategy::Complete);

    session.extract_to_memory(4000, 4400, false, &options).unwrap();
    assert_eq!(cached_timestamps(&session).first(), Some(&4000));
}

#[test]
fn inverted_range_is_rejected() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    let result = session.extract_to_memory(800, 400, false, &OperationOptions::default());
    assert!(matches!(
        result,
        Err(FramescopeError::InvalidRange { start: 800, end: 400 })
    ));
}

#[test]
fn range_past_the_end_is_frame_not_read() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(50));
    let result = session.extract_to_memory(5000, 6000, false, &OperationOptions::default());
    assert!(matches!(result, Err(FramescopeError::FrameNotRead)));
    assert!(!session.selection().unwrap().analysis_mode);
}

#[test]
fn exit_analysis_mode_drops_the_cache() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    session
        .extract_to_memory(0, 400, false, &OperationOptions::default())
        .unwrap();
    session.exit_analysis_mode().unwrap();
    assert!(session.cache().unwrap().is_empty());
    assert!(!session.selection().unwrap().analysis_mode);
}

#[test]
fn stepping_back_after_analysis_starts_from_displayed_frame() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(100));
    session
        .extract_to_memory(0, 400, false, &OperationOptions::default())
        .unwrap();
    session.read_frame(ReadRequest::Seek(200)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 200);

    session.exit_analysis_mode().unwrap();
    let bitmap = session.read_frame(ReadRequest::Relative(-1)).unwrap();
    assert_eq!(bitmap.data()[0], 4);
    assert_eq!(session.selection().unwrap().current_timestamp, 200 - SPACING);
}

#[test]
fn stepping_forward_after_analysis_starts_from_displayed_frame() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(100));
    session
        .extract_to_memory(0, 400, false, &OperationOptions::default())
        .unwrap();
    session.read_frame(ReadRequest::Seek(200)).unwrap();
    session.exit_analysis_mode().unwrap();

    session.read_frame(ReadRequest::Relative(1)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 200 + SPACING);
    session.read_frame(ReadRequest::Relative(1)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 200 + 2 * SPACING);
}

#[test]
fn stepping_forward_from_last_cached_frame_keeps_decoding() {
    let (mut session, log) = scripted_session(ScriptedDecoder::new(100));
    session
        .extract_to_memory(0, 400, false, &OperationOptions::default())
        .unwrap();
    session.read_frame(ReadRequest::Seek(400)).unwrap();
    session.exit_analysis_mode().unwrap();
    let seeks = log.borrow().seeks.len();

    session.read_frame(ReadRequest::Relative(1)).unwrap();
    assert_eq!(session.selection().unwrap().current_timestamp, 440);
    assert_eq!(log.borrow().seeks.len(), seeks);
}

#[test]
fn conversion_failure_mid_import_keeps_earlier_frames() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(100).failing_at_frame(5));
    let count = session
        .extract_to_memory(0, 400, false, &OperationOptions::default())
        .unwrap();

    assert_eq!(count, 5);
    assert_eq!(cached_timestamps(&session), vec![0, 40, 80, 120, 160]);
    assert!(session.selection().unwrap().analysis_mode);
}

// ── Reordered streams ──────────────────────────────────────────────

#[test]
fn reordered_stream_caches_in_display_order() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(100).with_reordering());
    let count = session
        .extract_to_memory(0, 2000, false, &OperationOptions::default())
        .unwrap();

    assert_eq!(count, 51);
    let timestamps = cached_timestamps(&session);
    assert_strictly_increasing(&timestamps);
    assert_eq!(timestamps, (0..=50).map(|index| index * SPACING).collect::<Vec<_>>());
    for frame in session.cache().unwrap().frames() {
        assert_eq!(i64::from(frame.bitmap.data()[0]), frame.timestamp / SPACING);
    }
}

#[test]
fn reordered_stream_with_missing_pts_caches_in_display_order() {
    let decoder = ScriptedDecoder::new(100).with_reordering().with_missing_b_pts();
    let (mut session, _) = scripted_session(decoder);
    session
        .extract_to_memory(1000, 2960, false, &OperationOptions::default())
        .unwrap();

    let timestamps = cached_timestamps(&session);
    assert_eq!(
        timestamps,
        (25..=74).map(|index| index * SPACING).collect::<Vec<_>>()
    );
}

#[test]
fn reordered_seeks_land_on_exact_frames() {
    for decoder in [
        ScriptedDecoder::new(100).with_reordering(),
        ScriptedDecoder::new(100).with_reordering().with_missing_b_pts(),
    ] {
        let (mut session, log) = scripted_session(decoder);
        for target in [1000, 520, 1960, 40, 3000, 1120] {
            let bitmap = session.read_frame(ReadRequest::Seek(target)).unwrap();
            assert_eq!(i64::from(bitmap.data()[0]), target / SPACING);
            assert_eq!(session.selection().unwrap().current_timestamp, target);
        }
        assert!(log.borrow().flushes >= 6);
    }
}

#[test]
fn reordered_relative_steps_cross_group_boundaries() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(100).with_reordering());
    session.read_frame(ReadRequest::Seek(880)).unwrap();

    let mut seen = vec![session.selection().unwrap().current_timestamp];
    for _ in 0..6 {
        session.read_frame(ReadRequest::Relative(1)).unwrap();
        seen.push(session.selection().unwrap().current_timestamp);
    }
    assert_eq!(seen, vec![880, 920, 960, 1000, 1040, 1080, 1120]);
}

#[test]
fn reordered_stream_drains_last_picture() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(100).with_reordering());
    let bitmap = session.read_frame(ReadRequest::Seek(99 * SPACING)).unwrap();
    assert_eq!(bitmap.data()[0], 99);
    assert!(matches!(
        session.read_frame(ReadRequest::Relative(1)),
        Err(FramescopeError::FrameNotRead)
    ));
}

#[test]
fn cache_eligibility_checks_duration_and_memory() {
    let (session, _) = scripted_session(ScriptedDecoder::new(250));
    // 64x48 BGRA frames, 25 per second.
    let per_frame = 64 * 48 * 4;
    assert!(session.can_extract_to_memory(0, 1000, 2.0, 25 * per_frame).unwrap());
    assert!(!session.can_extract_to_memory(0, 1000, 2.0, 24 * per_frame).unwrap());
    assert!(!session.can_extract_to_memory(0, 3000, 2.0, u64::MAX).unwrap());
    assert!(!session.can_extract_to_memory(500, 500, 2.0, u64::MAX).unwrap());
}

#[test]
fn position_helpers_follow_the_mode() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250));
    assert_eq!(session.timestamp_for_position(1234).unwrap(), 1234);
    assert_eq!(session.frame_number_for_timestamp(400).unwrap(), 10);

    session
        .extract_to_memory(400, 800, false, &OperationOptions::default())
        .unwrap();
    assert_eq!(session.timestamp_for_position(2).unwrap(), 480);
    assert_eq!(session.timestamp_for_position(99).unwrap(), 800);
    assert_eq!(session.frame_number_for_timestamp(450).unwrap(), 2);
}

#[test]
fn changing_aspect_ratio_discards_the_cache() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(250).with_size(64, 40));
    session
        .extract_to_memory(0, 400, false, &OperationOptions::default())
        .unwrap();

    session.change_aspect_ratio(AspectRatio::Force4x3).unwrap();
    assert_eq!(session.info().unwrap().decoding_height, 48);
    assert!(session.cache().unwrap().is_empty());
    assert!(!session.selection().unwrap().analysis_mode);

    let bitmap = session.read_frame(ReadRequest::Seek(0)).unwrap();
    assert_eq!((bitmap.width(), bitmap.height()), (64, 48));
}

#[test]
fn deinterlace_toggle_is_recorded() {
    let (mut session, _) = scripted_session(ScriptedDecoder::new(10));
    session.set_deinterlace(true).unwrap();
    assert!(session.info().unwrap().deinterlace);
}
