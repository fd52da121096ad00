mod common;

use std::sync::Arc;

use common::*;
use media_codec::{
    BufferFlags, ClientCallback, CodecError, CodecKind, CodecSession, CodecState, DisplayQueue,
    Format, Owner, Rotation, ScaleType, keys,
};

struct Rig {
    session: CodecSession,
    recorder: Arc<RecordingCallback>,
    display: Arc<MockDisplay>,
}

fn rig() -> Rig {
    init_tracing();
    let (engine, _state) = MockEngine::new();
    let session = CodecSession::new("mock.video", CodecKind::Video, Box::new(engine), fast_options());
    let recorder = RecordingCallback::new();
    let cb: Arc<dyn ClientCallback> = recorder.clone();
    session.set_callback(&cb);
    session.initialize().unwrap();
    session
        .configure(
            &video_format(64, 48, 4, 3)
                .with_int(keys::ROTATION_ANGLE, 90)
                .with_int(keys::SCALE_TYPE, 2),
        )
        .unwrap();
    let display = MockDisplay::new(1);
    let queue: Arc<dyn DisplayQueue> = display.clone();
    session.set_output_display(queue).unwrap();
    session.start().unwrap();
    Rig {
        session,
        recorder,
        display,
    }
}

/// Decode three frames and render all of them; returns the rendered indices.
fn render_three(rig: &Rig) -> Vec<usize> {
    for i in 0..3 {
        feed(&rig.session, &rig.recorder, i, &[i as u8; 8], i as i64, BufferFlags::NONE).unwrap();
    }
    assert!(rig.recorder.wait_for(|e| count_outputs(e) == 3));
    let indices: Vec<usize> = rig.recorder.outputs().iter().map(|o| o.0).collect();
    for &index in &indices {
        rig.session.render_output_buffer(index).unwrap();
    }
    indices
}

fn buffer_id(session: &CodecSession, index: usize) -> u64 {
    session
        .output_buffer(index)
        .unwrap()
        .display_buffer_id()
        .unwrap()
}

#[test]
fn start_configures_display_and_requests_buffers() {
    let rig = rig();
    let calls = rig.display.calls();
    assert_eq!(calls.requested.len(), 3);
    assert_eq!(calls.queue_size, Some(3));
    assert_eq!(calls.transform, Some(Rotation::Rotate90));
    assert_eq!(calls.scaling, Some(ScaleType::ScaleCrop));
    assert_eq!(calls.registered, 1);
    drop(calls);
    assert!(rig.session.status().display_mode);
}

#[test]
fn render_moves_slots_to_display() {
    let rig = rig();
    let indices = render_three(&rig);
    assert_eq!(rig.session.output_owners(), vec![Owner::Display; 3]);

    let calls = rig.display.calls();
    assert_eq!(calls.flushed.len(), 3);
    let (_, flush) = calls.flushed[0];
    assert_eq!(flush.rotation, Rotation::Rotate90);
    assert_eq!(flush.scale_type, ScaleType::ScaleCrop);
    drop(calls);

    // Rendering an already displayed slot is rejected and changes nothing.
    let err = rig.session.render_output_buffer(indices[0]).unwrap_err();
    assert!(matches!(err, CodecError::InvalidValue(_)));
    assert_eq!(rig.session.status().outputs_rendered, 3);
}

#[test]
fn out_of_order_release_swaps_backing_buffers() {
    let rig = rig();
    let indices = render_three(&rig);
    let head = indices[0];
    let last = indices[2];
    let head_buffer = buffer_id(&rig.session, head);
    let last_buffer = buffer_id(&rig.session, last);

    rig.display.release(last_buffer);

    assert!(eventually(|| rig.session.output_owners()[head] == Owner::Engine));
    assert_eq!(rig.session.output_owners()[last], Owner::Display);
    assert_eq!(buffer_id(&rig.session, head), last_buffer);
    assert_eq!(buffer_id(&rig.session, last), head_buffer);
    assert!(eventually(|| rig.session.status().display_releases == 1));
}

#[test]
fn release_from_unknown_buffer_is_ignored() {
    let rig = rig();
    render_three(&rig);
    rig.display.release(987_654);
    std::thread::sleep(std::time::Duration::from_millis(50));
    assert_eq!(rig.session.output_owners(), vec![Owner::Display; 3]);
    assert_eq!(rig.session.status().display_releases, 0);
}

#[test]
fn live_swap_moves_in_flight_buffers() {
    let rig = rig();
    render_three(&rig);
    let next = MockDisplay::new(2);
    let queue: Arc<dyn DisplayQueue> = next.clone();
    rig.session.set_output_display(queue).unwrap();

    {
        let calls = next.calls();
        assert_eq!(calls.attached.len(), 3);
        assert_eq!(calls.flushed.len(), 3);
        assert_eq!(calls.queue_size, Some(3));
        assert_eq!(calls.registered, 1);
    }
    {
        let calls = rig.display.calls();
        assert_eq!(calls.unregistered, 1);
        assert_eq!(calls.cache_cleans, 1);
    }
    assert!(!rig.display.has_listener());
    assert!(next.has_listener());

    // Releases now come from the new display.
    let attached = next.calls().attached[0];
    next.release(attached);
    assert!(eventually(|| rig.session.status().display_releases == 1));
    assert!(rig.session.output_owners().contains(&Owner::Engine));
}

#[test]
fn swap_to_same_display_is_a_no_op() {
    let rig = rig();
    render_three(&rig);
    let same: Arc<dyn DisplayQueue> = rig.display.clone();
    rig.session.set_output_display(same).unwrap();
    let calls = rig.display.calls();
    assert_eq!(calls.registered, 1);
    assert_eq!(calls.unregistered, 0);
    assert!(calls.attached.is_empty());
}

#[test]
fn failed_swap_keeps_previous_display() {
    let rig = rig();
    render_three(&rig);
    let next = MockDisplay::new(3);
    *next.fail_attach_at.lock().unwrap() = Some(1);
    let queue: Arc<dyn DisplayQueue> = next.clone();

    let err = rig.session.set_output_display(queue).unwrap_err();
    assert!(matches!(err, CodecError::Display(_)));
    assert_eq!(next.calls().unregistered, 1);
    assert!(!next.has_listener());
    assert_eq!(rig.display.calls().unregistered, 0);
    assert!(rig.display.has_listener());
    assert_eq!(rig.session.state(), CodecState::Running);

    // The old display still drives releases.
    let first = rig.display.calls().flushed[0].0;
    rig.display.release(first);
    assert!(eventually(|| rig.session.status().display_releases == 1));
}

#[test]
fn flush_cancels_and_reacquires_display_memory() {
    let rig = rig();
    feed(&rig.session, &rig.recorder, 0, b"frame", 0, BufferFlags::NONE).unwrap();
    assert!(rig.recorder.wait_for(|e| count_outputs(e) == 1));
    let index = rig.recorder.outputs()[0].0;
    rig.session.render_output_buffer(index).unwrap();

    rig.session.flush().unwrap();
    assert_eq!(rig.session.output_owners(), vec![Owner::Free; 3]);
    // Only the two buffers the display did not hold are cancelled.
    assert_eq!(rig.display.calls().cancelled.len(), 2);

    // Memory comes back one slot at a time, just before the engine fills it.
    rig.recorder.clear();
    rig.session.start().unwrap();
    assert!(eventually(|| rig.display.calls().requested.len() == 4));
    std::thread::sleep(std::time::Duration::from_millis(30));
    assert_eq!(rig.display.calls().requested.len(), 4);

    for i in 0..3 {
        feed(&rig.session, &rig.recorder, i, &[i as u8; 4], i as i64, BufferFlags::NONE).unwrap();
    }
    assert!(rig.recorder.wait_for(|e| count_outputs(e) == 3));
    let requested = rig.display.calls().requested.clone();
    assert_eq!(requested.len(), 6);
    for (index, _, _) in rig.recorder.outputs() {
        assert!(requested[3..].contains(&buffer_id(&rig.session, index)));
    }
}

#[test]
fn display_rejected_for_audio() {
    init_tracing();
    let (engine, _state) = MockEngine::new();
    let session = CodecSession::new("mock.aac", CodecKind::Audio, Box::new(engine), fast_options());
    session.initialize().unwrap();
    let queue: Arc<dyn DisplayQueue> = MockDisplay::new(9);
    let err = session.set_output_display(queue).unwrap_err();
    assert!(matches!(err, CodecError::Unsupported(_)));
}

#[test]
fn rotation_parameter_updates_display_transform() {
    let rig = rig();
    rig.session
        .set_parameter(&Format::new().with_int(keys::ROTATION_ANGLE, 180))
        .unwrap();
    assert_eq!(rig.display.calls().transform, Some(Rotation::Rotate180));
}

#[test]
fn release_after_flush_does_not_requeue_slots() {
    let rig = rig();
    let indices = render_three(&rig);
    let first = buffer_id(&rig.session, indices[0]);
    let second = buffer_id(&rig.session, indices[1]);

    rig.display.release(first);
    assert!(eventually(|| rig.session.status().display_releases == 1));

    rig.session.flush().unwrap();
    // The display still held this buffer; the session has forgotten it.
    rig.display.release(second);
    std::thread::sleep(std::time::Duration::from_millis(30));
    assert_eq!(rig.session.output_owners(), vec![Owner::Free; 3]);
    assert_eq!(rig.session.status().display_releases, 1);

    rig.recorder.clear();
    rig.session.start().unwrap();
    for i in 0..3 {
        feed(&rig.session, &rig.recorder, i, &[i as u8; 4], i as i64, BufferFlags::NONE).unwrap();
    }
    assert!(rig.recorder.wait_for(|e| count_outputs(e) == 3));
    let mut delivered: Vec<usize> = rig.recorder.outputs().iter().map(|o| o.0).collect();
    delivered.sort_unstable();
    assert_eq!(delivered, vec![0, 1, 2]);
    assert_eq!(rig.session.output_owners(), vec![Owner::Client; 3]);
}
