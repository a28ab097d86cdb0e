//! Property-based tests for buffers, paths, and voice allocation.

use crossbeam_channel::bounded;
use ingen_api::Path;
use ingen_engine::internals::note;
use ingen_engine::{
    Buffer, BufferFactory, BufferType, Direction, PortSpec, PortType, RtBlock, RunContext,
    SequenceEvent,
};
use proptest::prelude::*;

fn ctx(nframes: u32) -> RunContext {
    let (tx, rx) = bounded(64);
    std::mem::forget(rx);
    RunContext::new(0, nframes, 48000, false, tx)
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Valid paths survive a parse/print round trip.
    #[test]
    fn path_parse_roundtrip(segments in prop::collection::vec("[A-Za-z_][A-Za-z0-9_]{0,8}", 1..5)) {
        let s = format!("/{}", segments.join("/"));
        let path = Path::parse(&s).unwrap();
        prop_assert_eq!(path.as_str(), s.as_str());
        prop_assert_eq!(path.segments().count(), segments.len());
        let symbol = path.symbol().unwrap();
        prop_assert_eq!(symbol.as_str(), segments.last().unwrap().as_str());
    }

    /// The parent of a child is always the original path.
    #[test]
    fn path_child_parent_inverse(segments in prop::collection::vec("[A-Za-z_][A-Za-z0-9_]{0,8}", 0..4),
                                 leaf in "[A-Za-z_][A-Za-z0-9_]{0,8}") {
        let base = if segments.is_empty() {
            Path::root()
        } else {
            Path::parse(&format!("/{}", segments.join("/"))).unwrap()
        };
        let symbol = ingen_api::Symbol::parse(&leaf).unwrap();
        let child = base.child(&symbol);
        prop_assert_eq!(child.parent().unwrap(), base);
    }

    /// Copy between same-typed audio buffers of equal size is bitwise
    /// identity.
    #[test]
    fn audio_copy_is_bitwise_identity(samples in prop::collection::vec(-4.0f32..4.0, 1..256)) {
        let n = samples.len();
        let mut a = Buffer::new(BufferType::Audio, None, n);
        a.samples_mut().copy_from_slice(&samples);
        let mut b = Buffer::new(BufferType::Audio, None, n);
        b.copy(&ctx(n as u32), &a);
        prop_assert_eq!(a.samples(), b.samples());
    }

    /// The peak is the max absolute sample over the window, and zero
    /// for silence.
    #[test]
    fn peak_matches_reference(samples in prop::collection::vec(-2.0f32..2.0, 1..256)) {
        let n = samples.len();
        let mut buf = Buffer::new(BufferType::Audio, None, n);
        buf.samples_mut().copy_from_slice(&samples);
        let reference = samples.iter().fold(0.0f32, |a, &s| a.max(s.abs()));
        prop_assert_eq!(buf.peak(&ctx(n as u32)), reference);
    }

    /// Appending frame-sorted events always succeeds up to capacity,
    /// and the stored sequence stays frame-sorted.
    #[test]
    fn sequence_appends_stay_sorted(mut frames in prop::collection::vec(0u32..512, 1..32)) {
        frames.sort_unstable();
        let mut buf = Buffer::new(BufferType::Sequence, None, 4096);
        for &f in &frames {
            prop_assert!(buf.append_event(SequenceEvent::float(f, f as f32)));
        }
        let stored: Vec<u32> = buf.sequence().events().iter().map(|e| e.frames).collect();
        prop_assert_eq!(stored, frames);
    }

    /// Rendering a float timeline into audio produces only values that
    /// appear in the timeline (piecewise constant, no interpolation).
    #[test]
    fn rendered_sequence_is_piecewise_constant(
        mut breakpoints in prop::collection::vec((0u32..64, -1.0f32..1.0), 1..8)
    ) {
        breakpoints.sort_by_key(|(f, _)| *f);
        breakpoints.dedup_by_key(|(f, _)| *f);

        let mut seq = Buffer::new(BufferType::Sequence, Some(ingen_engine::EventType::Float), 4096);
        for &(f, v) in &breakpoints {
            prop_assert!(seq.append_event(SequenceEvent::float(f, v)));
        }
        let mut audio = Buffer::new(BufferType::Audio, None, 64);
        audio.copy(&ctx(64), &seq);

        let mut allowed: Vec<f32> = breakpoints.iter().map(|&(_, v)| v).collect();
        allowed.push(0.0);
        for &s in audio.samples() {
            prop_assert!(allowed.iter().any(|&v| v == s), "unexpected level {}", s);
        }
    }

    /// A control port's value never escapes its declared range.
    #[test]
    fn control_values_clamp_to_range(value in -1000.0f32..1000.0) {
        let factory = BufferFactory::new(16);
        let port = ingen_engine::Port::new(
            PortSpec::new("c", Direction::Input, PortType::Control).with_range(-1.0, 1.0),
            1,
            0,
            &factory,
        );
        port.set_control_value(value);
        let v = port.control_value();
        prop_assert!((-1.0..=1.0).contains(&v));
    }

    /// However many notes arrive, the allocator never sounds more
    /// voices than it has.
    #[test]
    fn note_allocator_respects_polyphony(
        polyphony in 1u32..5,
        notes in prop::collection::vec((0u32..60, 40u8..90, prop::bool::ANY), 1..24)
    ) {
        let factory = BufferFactory::new(64);
        let ports = RtBlock::build_ports(&note::ports(), polyphony, &factory, || 0);
        let mut allocator = note::Note::new(polyphony);

        let mut events: Vec<(u32, [u8; 3])> = notes
            .iter()
            .map(|&(frame, key, on)| {
                let status = if on { 0x90 } else { 0x80 };
                (frame, [status, key, 100])
            })
            .collect();
        events.sort_by_key(|(f, _)| *f);

        let input = ports[0].buffer(0);
        for (frame, bytes) in &events {
            prop_assert!(input.get_mut().append_event(SequenceEvent::midi(*frame, bytes).unwrap()));
        }

        use ingen_engine::InternalBlock;
        allocator.process(&ctx(64), &ports);

        prop_assert!(allocator.active_voices() <= polyphony as usize);
    }
}
