//! Typed buffers carrying data between ports.
//!
//! A [`Buffer`] is a fixed-capacity region of one of four types:
//!
//! - **Audio** — `nframes` raw samples; silence is zero.
//! - **Cv** — identical storage to audio, semantically a control-rate
//!   smoothly varying signal.
//! - **Control** — a single scalar with implicit timestamp "now".
//! - **Sequence** — timestamped events sorted by frame offset; may carry
//!   a value type, in which case the sequence is a sparse timeline of
//!   values of that type and keeps a persistent "current value" sidecar.
//!
//! Sample storage is 16-byte aligned so the peak scan can walk
//! four-sample groups. Buffers are pooled by the
//! [`BufferFactory`](crate::buffer_factory::BufferFactory) and shared via
//! [`BufferRef`].

use std::cell::UnsafeCell;
use std::sync::Arc;

use ingen_api::Atom;

use crate::run_context::RunContext;

/// Maximum payload bytes of a single sequence event.
///
/// Covers MIDI channel messages and float values without heap storage,
/// so appending events is allocation-free once a sequence is at capacity.
pub const MAX_EVENT_SIZE: usize = 8;

/// Bytes accounted per stored event: an 8-byte (frames, type, size)
/// header plus the padded payload, matching the original wire framing.
const EVENT_STRIDE: usize = 8 + MAX_EVENT_SIZE;

/// The type of data a buffer carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferType {
    /// Raw audio samples.
    Audio,
    /// Control-rate signal with audio storage.
    Cv,
    /// A single scalar value.
    Control,
    /// A sorted sequence of timestamped events.
    Sequence,
}

impl BufferType {
    /// Returns true for sample-array storage (audio or CV).
    pub fn is_sample_based(self) -> bool {
        matches!(self, BufferType::Audio | BufferType::Cv)
    }
}

/// The payload type of a sequence event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    /// Raw MIDI bytes.
    Midi,
    /// A float value (value-typed sequences).
    Float,
}

/// One event in a sequence buffer.
#[derive(Debug, Clone, Copy)]
pub struct SequenceEvent {
    /// Frame offset from the cycle start.
    pub frames: u32,
    /// Payload type.
    pub event_type: EventType,
    len: u8,
    data: [u8; MAX_EVENT_SIZE],
}

impl SequenceEvent {
    /// Builds an event from raw payload bytes.
    ///
    /// Returns `None` if the payload exceeds [`MAX_EVENT_SIZE`].
    pub fn new(frames: u32, event_type: EventType, payload: &[u8]) -> Option<Self> {
        if payload.len() > MAX_EVENT_SIZE {
            return None;
        }
        let mut data = [0u8; MAX_EVENT_SIZE];
        data[..payload.len()].copy_from_slice(payload);
        Some(Self {
            frames,
            event_type,
            len: payload.len() as u8,
            data,
        })
    }

    /// Builds a float value event.
    pub fn float(frames: u32, value: f32) -> Self {
        Self::new(frames, EventType::Float, &value.to_le_bytes())
            .expect("float payload fits")
    }

    /// Builds a MIDI event.
    pub fn midi(frames: u32, bytes: &[u8]) -> Option<Self> {
        Self::new(frames, EventType::Midi, bytes)
    }

    /// The payload bytes.
    pub fn payload(&self) -> &[u8] {
        &self.data[..self.len as usize]
    }

    /// The payload as a float, if this is a float event.
    pub fn as_float(&self) -> Option<f32> {
        if self.event_type == EventType::Float && self.len == 4 {
            let mut b = [0u8; 4];
            b.copy_from_slice(&self.data[..4]);
            Some(f32::from_le_bytes(b))
        } else {
            None
        }
    }
}

/// Sequence storage: events sorted by frame, with byte-capacity
/// accounting and the Chunk state used for output preparation.
#[derive(Debug, Clone)]
pub struct SequenceBody {
    events: Vec<SequenceEvent>,
    /// True after `prepare_output_write`: the body is an opaque
    /// capacity-sized chunk, cleared on first append.
    chunk: bool,
}

impl SequenceBody {
    fn with_byte_capacity(bytes: usize) -> Self {
        Self {
            events: Vec::with_capacity(bytes / EVENT_STRIDE),
            chunk: false,
        }
    }

    /// The stored events, in frame order.
    pub fn events(&self) -> &[SequenceEvent] {
        &self.events
    }

    /// Number of stored events.
    pub fn len(&self) -> usize {
        self.events.len()
    }

    /// True if no events are stored.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }
}

// Quad-frame unit giving sample storage its 16-byte alignment.
#[derive(Debug, Clone, Copy, Default)]
#[repr(C, align(16))]
struct QuadFrame([f32; 4]);

/// 16-byte aligned sample storage for audio and CV buffers.
#[derive(Debug, Clone)]
pub struct AlignedSamples {
    quads: Vec<QuadFrame>,
    len: usize,
}

impl AlignedSamples {
    fn zeroed(len: usize) -> Self {
        Self {
            quads: vec![QuadFrame::default(); len.div_ceil(4)],
            len,
        }
    }

    /// The samples as a flat slice.
    #[inline]
    pub fn as_slice(&self) -> &[f32] {
        // Sound: QuadFrame is repr(C) over [f32; 4], so the quad storage
        // is a contiguous f32 array at least `len` long.
        unsafe { std::slice::from_raw_parts(self.quads.as_ptr().cast(), self.len) }
    }

    /// The samples as a flat mutable slice.
    #[inline]
    pub fn as_mut_slice(&mut self) -> &mut [f32] {
        unsafe { std::slice::from_raw_parts_mut(self.quads.as_mut_ptr().cast(), self.len) }
    }

    /// Number of samples.
    pub fn len(&self) -> usize {
        self.len
    }

    /// True if no samples are stored.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn fill(&mut self, value: f32) {
        self.as_mut_slice().fill(value);
    }
}

#[derive(Debug, Clone)]
enum Contents {
    Samples(AlignedSamples),
    Control(f32),
    Sequence(SequenceBody),
}

/// A typed, fixed-capacity data region.
///
/// For audio/CV the capacity is in frames; for sequences it is in bytes
/// of event storage (header + padded payload per event).
#[derive(Debug, Clone)]
pub struct Buffer {
    btype: BufferType,
    value_type: Option<EventType>,
    capacity: usize,
    contents: Contents,
    latest_event: u32,
    /// Persistent "current value" for value-typed sequences.
    value: Option<f32>,
}

impl Buffer {
    /// Creates a zeroed buffer.
    ///
    /// `value_type` is meaningful only for sequences and marks the buffer
    /// as a sparse timeline of values of that type.
    pub fn new(btype: BufferType, value_type: Option<EventType>, capacity: usize) -> Self {
        let contents = match btype {
            BufferType::Audio | BufferType::Cv => {
                Contents::Samples(AlignedSamples::zeroed(capacity))
            }
            BufferType::Control => Contents::Control(0.0),
            BufferType::Sequence => Contents::Sequence(SequenceBody::with_byte_capacity(capacity)),
        };
        let value = match btype {
            BufferType::Sequence if value_type.is_some() => Some(0.0),
            _ => None,
        };
        Self {
            btype,
            value_type: if btype == BufferType::Sequence {
                value_type
            } else {
                None
            },
            capacity,
            contents,
            latest_event: 0,
            value,
        }
    }

    /// The buffer's type.
    pub fn buffer_type(&self) -> BufferType {
        self.btype
    }

    /// The value type of a value-typed sequence.
    pub fn value_type(&self) -> Option<EventType> {
        self.value_type
    }

    /// The capacity: frames for audio/CV, bytes for sequences.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True for audio buffers.
    pub fn is_audio(&self) -> bool {
        self.btype == BufferType::Audio
    }

    /// True for CV buffers.
    pub fn is_cv(&self) -> bool {
        self.btype == BufferType::Cv
    }

    /// True for control buffers.
    pub fn is_control(&self) -> bool {
        self.btype == BufferType::Control
    }

    /// True for sequence buffers.
    pub fn is_sequence(&self) -> bool {
        self.btype == BufferType::Sequence
    }

    // ── Sample access ────────────────────────────────────────────────────

    /// The samples of an audio/CV buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not sample-based.
    pub fn samples(&self) -> &[f32] {
        match &self.contents {
            Contents::Samples(s) => s.as_slice(),
            _ => panic!("samples() on non-audio buffer"),
        }
    }

    /// The samples of an audio/CV buffer, mutably.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not sample-based.
    pub fn samples_mut(&mut self) -> &mut [f32] {
        match &mut self.contents {
            Contents::Samples(s) => s.as_mut_slice(),
            _ => panic!("samples_mut() on non-audio buffer"),
        }
    }

    /// The scalar of a control buffer, or sample 0 of an audio buffer.
    pub fn scalar(&self) -> f32 {
        match &self.contents {
            Contents::Control(v) => *v,
            Contents::Samples(s) => s.as_slice().first().copied().unwrap_or(0.0),
            Contents::Sequence(_) => self.value.unwrap_or(0.0),
        }
    }

    /// Sets the scalar of a control buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not a control buffer.
    pub fn set_scalar(&mut self, v: f32) {
        match &mut self.contents {
            Contents::Control(c) => *c = v,
            _ => panic!("set_scalar() on non-control buffer"),
        }
    }

    /// Fills `[start, end)` with `value` (audio/CV).
    pub fn set_block(&mut self, value: f32, start: usize, end: usize) {
        let samples = self.samples_mut();
        let end = end.min(samples.len());
        if start < end {
            samples[start..end].fill(value);
        }
    }

    /// Fills from `offset` to the end with `value` (audio/CV).
    pub fn set_from(&mut self, value: f32, offset: usize) {
        let len = self.samples().len();
        self.set_block(value, offset, len);
    }

    // ── Whole-buffer operations ──────────────────────────────────────────

    /// Resets to the type-appropriate zero: silence, 0.0, or an empty
    /// event body.
    pub fn clear(&mut self) {
        match &mut self.contents {
            Contents::Samples(s) => s.fill(0.0),
            Contents::Control(v) => *v = 0.0,
            Contents::Sequence(seq) => {
                seq.events.clear();
                seq.chunk = false;
                self.latest_event = 0;
            }
        }
    }

    /// Type-directed transfer from `src`.
    ///
    /// Same type copies up to capacity. Audio → control takes sample 0;
    /// control → audio fills with the constant; a float-valued sequence →
    /// audio renders the timeline piecewise-constant over the context
    /// window. Any other pair clears.
    pub fn copy(&mut self, context: &RunContext, src: &Buffer) {
        if self.btype == src.btype {
            match self.btype {
                BufferType::Audio | BufferType::Cv => {
                    let s = src.samples();
                    let dst = self.samples_mut();
                    let n = dst.len().min(s.len());
                    dst[..n].copy_from_slice(&s[..n]);
                }
                BufferType::Control => self.set_scalar(src.scalar()),
                BufferType::Sequence => {
                    let copied = match (&mut self.contents, &src.contents) {
                        (Contents::Sequence(dst), Contents::Sequence(s))
                            if s.events.len() <= dst.events.capacity() =>
                        {
                            dst.events.clear();
                            dst.events.extend_from_slice(&s.events);
                            dst.chunk = false;
                            true
                        }
                        _ => false,
                    };
                    if copied {
                        self.latest_event = src.latest_event;
                    } else {
                        self.clear();
                    }
                }
            }
        } else if src.btype.is_sample_based() && self.is_control() {
            let v = src.samples().first().copied().unwrap_or(0.0);
            self.set_scalar(v);
        } else if src.is_control() && self.btype.is_sample_based() {
            let v = src.scalar();
            let off = context.offset as usize;
            let end = off + context.nframes as usize;
            self.set_block(v, off, end);
        } else if src.is_sequence()
            && self.btype.is_sample_based()
            && src.value_type == Some(EventType::Float)
        {
            self.render_sequence(context, src, false);
        } else {
            self.clear();
        }
    }

    /// Renders a float-valued sequence into this audio/CV buffer as a
    /// piecewise-constant signal over `[offset, offset + nframes)`.
    ///
    /// The sequence's persistent value supplies the level before the
    /// first breakpoint. With `add`, the rendered signal is summed into
    /// the existing contents instead of replacing them.
    pub fn render_sequence(&mut self, context: &RunContext, src: &Buffer, add: bool) {
        let mut value = src.value.unwrap_or(0.0);
        let mut offset = context.offset as usize;
        let end = offset + context.nframes as usize;

        if let Contents::Sequence(seq) = &src.contents {
            // Borrow the event list before mutating our own samples.
            let events: &[SequenceEvent] = &seq.events;
            for ev in events {
                let t = ev.frames as usize;
                if t >= offset && ev.event_type == EventType::Float {
                    self.write_block(value, offset, t, add);
                    if let Some(v) = ev.as_float() {
                        value = v;
                    }
                    offset = t;
                }
            }
        }
        self.write_block(value, offset, end, add);
    }

    fn write_block(&mut self, value: f32, start: usize, end: usize, add: bool) {
        if add {
            let samples = self.samples_mut();
            let end = end.min(samples.len());
            for s in &mut samples[start.min(end)..end] {
                *s += value;
            }
        } else {
            self.set_block(value, start, end);
        }
    }

    /// Max of `|sample|` over the cycle's window.
    ///
    /// Walks aligned four-sample groups (the layout guarantees them) with
    /// a scalar tail, so the hot loop vectorizes without explicit
    /// intrinsics.
    pub fn peak(&self, context: &RunContext) -> f32 {
        let samples = self.samples();
        let off = context.offset as usize;
        let end = (off + context.nframes as usize).min(samples.len());
        let window = &samples[off.min(end)..end];

        let mut lanes = [0.0f32; 4];
        let mut chunks = window.chunks_exact(4);
        for quad in &mut chunks {
            for (lane, s) in lanes.iter_mut().zip(quad) {
                *lane = lane.max(s.abs());
            }
        }
        let mut peak = lanes.iter().fold(0.0f32, |a, &b| a.max(b));
        for s in chunks.remainder() {
            peak = peak.max(s.abs());
        }
        peak
    }

    /// Sums `src` into this buffer (audio/CV mixing).
    pub fn accumulate(&mut self, src: &Buffer) {
        if let (Contents::Samples(dst), Contents::Samples(s)) =
            (&mut self.contents, &src.contents)
        {
            for (d, s) in dst.as_mut_slice().iter_mut().zip(s.as_slice()) {
                *d += *s;
            }
        }
    }

    // ── Sequence operations ──────────────────────────────────────────────

    /// The event body of a sequence buffer.
    ///
    /// # Panics
    ///
    /// Panics if the buffer is not a sequence.
    pub fn sequence(&self) -> &SequenceBody {
        match &self.contents {
            Contents::Sequence(seq) => seq,
            _ => panic!("sequence() on non-sequence buffer"),
        }
    }

    /// Resets a sequence to an empty body, ready for appends.
    pub fn prepare_write(&mut self) {
        if let Contents::Sequence(seq) = &mut self.contents {
            seq.events.clear();
            seq.chunk = false;
            self.latest_event = 0;
        }
    }

    /// Resets a sequence to a capacity-sized chunk, the state an output
    /// is handed to a processor in. The chunk is cleared on first append.
    pub fn prepare_output_write(&mut self) {
        if let Contents::Sequence(seq) = &mut self.contents {
            seq.events.clear();
            seq.chunk = true;
            self.latest_event = 0;
        }
    }

    /// Appends an event to a sequence.
    ///
    /// Fails if `frames` precedes the latest stored event (events must be
    /// appended in non-decreasing frame order) or capacity is exhausted.
    /// A chunk-typed body is cleared by the first append.
    pub fn append_event(&mut self, event: SequenceEvent) -> bool {
        if event.frames < self.latest_event {
            return false;
        }
        let latest = &mut self.latest_event;
        match &mut self.contents {
            Contents::Sequence(seq) => {
                if seq.chunk {
                    seq.events.clear();
                    seq.chunk = false;
                    *latest = 0;
                }
                if seq.events.len() == seq.events.capacity() {
                    return false;
                }
                *latest = event.frames;
                seq.events.push(event);
                true
            }
            _ => false,
        }
    }

    /// Appends every event of another sequence buffer.
    ///
    /// Fails (without partial append) if the combined size exceeds
    /// capacity.
    pub fn append_event_buffer(&mut self, src: &Buffer) -> bool {
        let (src_events, src_latest) = match &src.contents {
            Contents::Sequence(seq) => (seq.events.as_slice(), src.latest_event),
            _ => return false,
        };
        match &mut self.contents {
            Contents::Sequence(seq) => {
                if seq.chunk {
                    seq.events.clear();
                    seq.chunk = false;
                    self.latest_event = 0;
                }
                if seq.events.len() + src_events.len() > seq.events.capacity() {
                    return false;
                }
                seq.events.extend_from_slice(src_events);
                self.latest_event = self.latest_event.max(src_latest);
                true
            }
            _ => false,
        }
    }

    /// For value-typed sequences: the frame of the next value event
    /// strictly after `offset` and before `end`; otherwise `end`.
    ///
    /// CV buffers always return `end`: scanning for per-sample changes
    /// would split the cycle on every frame in the worst case.
    pub fn next_value_offset(&self, offset: u32, end: u32) -> u32 {
        if let (Contents::Sequence(seq), Some(vt)) = (&self.contents, self.value_type) {
            for ev in &seq.events {
                if ev.frames > offset && ev.frames < end && ev.event_type == vt {
                    return ev.frames;
                }
            }
        }
        end
    }

    /// The persistent current value of a value-typed sequence.
    pub fn value(&self) -> Option<f32> {
        self.value
    }

    /// Sets the persistent current value from an atom.
    pub fn set_value(&mut self, value: &Atom) {
        if self.value.is_some() {
            if let Some(v) = value.as_float() {
                self.value = Some(v);
            }
        }
    }

    /// Updates the persistent value from the latest value event at or
    /// before `offset`. Called after each cycle window.
    pub fn update_value(&mut self, offset: u32) {
        let vt = match self.value_type {
            Some(vt) => vt,
            None => return,
        };
        let mut latest = None;
        if let Contents::Sequence(seq) = &self.contents {
            for ev in &seq.events {
                if ev.frames > offset {
                    break;
                }
                if ev.event_type == vt {
                    latest = ev.as_float();
                }
            }
        }
        if latest.is_some() {
            self.value = latest;
        }
    }
}

/// A pooled, shared handle to a [`Buffer`].
///
/// The factory and every port voice holding the buffer share ownership;
/// the underlying buffer lives as long as the longest holder. Contents
/// are mutated only by the audio thread, and only by the block whose
/// port holds the exclusive voice reference for the running cycle; the
/// task tree orders every read of a buffer after the one write.
#[derive(Clone)]
pub struct BufferRef {
    inner: Arc<BufferCell>,
}

struct BufferCell(UnsafeCell<Buffer>);

// One writer per cycle (the owning block on the audio thread), readers
// ordered strictly after by the compiled task tree; see module docs of
// `compiled_graph`.
unsafe impl Send for BufferCell {}
unsafe impl Sync for BufferCell {}

impl BufferRef {
    /// Wraps a buffer for shared use.
    pub fn new(buffer: Buffer) -> Self {
        Self {
            inner: Arc::new(BufferCell(UnsafeCell::new(buffer))),
        }
    }

    /// Reads the buffer.
    #[inline]
    pub fn get(&self) -> &Buffer {
        unsafe { &*self.inner.0.get() }
    }

    /// Writes the buffer.
    ///
    /// Callers must be the buffer's single writer for the current cycle
    /// (the owning port's block on the audio thread) or hold the buffer
    /// exclusively outside of any cycle.
    #[inline]
    #[allow(clippy::mut_from_ref)]
    pub fn get_mut(&self) -> &mut Buffer {
        unsafe { &mut *self.inner.0.get() }
    }

    /// True if both refs share one buffer.
    pub fn ptr_eq(a: &BufferRef, b: &BufferRef) -> bool {
        Arc::ptr_eq(&a.inner, &b.inner)
    }

    /// Number of live holders.
    pub fn holders(&self) -> usize {
        Arc::strong_count(&self.inner)
    }

    /// Recovers the buffer if this is the last holder.
    pub(crate) fn try_unwrap(self) -> Result<Buffer, BufferRef> {
        match Arc::try_unwrap(self.inner) {
            Ok(cell) => Ok(cell.0.into_inner()),
            Err(inner) => Err(BufferRef { inner }),
        }
    }
}

impl std::fmt::Debug for BufferRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let b = self.get();
        write!(
            f,
            "BufferRef({:?}, capacity {}, holders {})",
            b.buffer_type(),
            b.capacity(),
            self.holders()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::bounded;

    fn ctx(nframes: u32) -> RunContext {
        let (tx, _rx) = bounded(1);
        std::mem::forget(_rx);
        RunContext::new(0, nframes, 48000, false, tx)
    }

    #[test]
    fn audio_storage_is_16_byte_aligned() {
        let buf = Buffer::new(BufferType::Audio, None, 67);
        assert_eq!(buf.samples().as_ptr() as usize % 16, 0);
        assert_eq!(buf.samples().len(), 67);
    }

    #[test]
    fn clear_zeroes_audio() {
        let mut buf = Buffer::new(BufferType::Audio, None, 64);
        buf.set_from(1.0, 0);
        buf.clear();
        assert!(buf.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn copy_same_type_is_bitwise_identity() {
        let mut a = Buffer::new(BufferType::Audio, None, 16);
        let mut b = Buffer::new(BufferType::Audio, None, 16);
        for (i, s) in a.samples_mut().iter_mut().enumerate() {
            *s = i as f32 * 0.25 - 1.0;
        }
        b.copy(&ctx(16), &a);
        assert_eq!(a.samples(), b.samples());
    }

    #[test]
    fn copy_audio_to_control_takes_first_sample() {
        let mut audio = Buffer::new(BufferType::Audio, None, 8);
        audio.samples_mut()[0] = 0.7;
        let mut control = Buffer::new(BufferType::Control, None, 1);
        control.copy(&ctx(8), &audio);
        assert_eq!(control.scalar(), 0.7);
    }

    #[test]
    fn copy_control_to_audio_fills_constant() {
        let mut control = Buffer::new(BufferType::Control, None, 1);
        control.set_scalar(0.5);
        let mut audio = Buffer::new(BufferType::Audio, None, 8);
        audio.copy(&ctx(8), &control);
        assert!(audio.samples().iter().all(|&s| s == 0.5));
    }

    #[test]
    fn copy_incompatible_clears() {
        let seq = Buffer::new(BufferType::Sequence, None, 256);
        let mut audio = Buffer::new(BufferType::Audio, None, 8);
        audio.set_from(1.0, 0);
        // A sequence with no value type cannot render to audio.
        audio.copy(&ctx(8), &seq);
        assert!(audio.samples().iter().all(|&s| s == 0.0));
    }

    #[test]
    fn render_sequence_piecewise_constant() {
        let mut seq = Buffer::new(BufferType::Sequence, Some(EventType::Float), 256);
        assert!(seq.append_event(SequenceEvent::float(4, 1.0)));
        assert!(seq.append_event(SequenceEvent::float(8, -1.0)));
        let mut audio = Buffer::new(BufferType::Audio, None, 12);
        audio.copy(&ctx(12), &seq);
        let s = audio.samples();
        assert!(s[..4].iter().all(|&x| x == 0.0));
        assert!(s[4..8].iter().all(|&x| x == 1.0));
        assert!(s[8..12].iter().all(|&x| x == -1.0));
    }

    #[test]
    fn render_sequence_starts_from_persistent_value() {
        let mut seq = Buffer::new(BufferType::Sequence, Some(EventType::Float), 256);
        seq.set_value(&Atom::Float(0.25));
        assert!(seq.append_event(SequenceEvent::float(2, 0.75)));
        let mut audio = Buffer::new(BufferType::Audio, None, 4);
        audio.copy(&ctx(4), &seq);
        assert_eq!(audio.samples(), &[0.25, 0.25, 0.75, 0.75]);
    }

    #[test]
    fn peak_over_window() {
        let mut buf = Buffer::new(BufferType::Audio, None, 64);
        buf.samples_mut()[10] = -0.9;
        buf.samples_mut()[33] = 0.4;
        assert_eq!(buf.peak(&ctx(64)), 0.9);
    }

    #[test]
    fn peak_handles_non_multiple_of_four_windows() {
        let mut buf = Buffer::new(BufferType::Audio, None, 7);
        buf.samples_mut()[6] = -0.3;
        assert_eq!(buf.peak(&ctx(7)), 0.3);
    }

    #[test]
    fn append_event_enforces_monotonic_frames() {
        let mut seq = Buffer::new(BufferType::Sequence, None, 256);
        assert!(seq.append_event(SequenceEvent::midi(10, &[0x90, 60, 100]).unwrap()));
        assert!(!seq.append_event(SequenceEvent::midi(5, &[0x80, 60, 0]).unwrap()));
        assert!(seq.append_event(SequenceEvent::midi(10, &[0x80, 60, 0]).unwrap()));
        assert_eq!(seq.sequence().len(), 2);
    }

    #[test]
    fn append_event_respects_capacity() {
        // Room for exactly two events.
        let mut seq = Buffer::new(BufferType::Sequence, None, 2 * EVENT_STRIDE);
        assert!(seq.append_event(SequenceEvent::float(0, 1.0)));
        assert!(seq.append_event(SequenceEvent::float(1, 2.0)));
        assert!(!seq.append_event(SequenceEvent::float(2, 3.0)));
    }

    #[test]
    fn chunk_cleared_on_first_append() {
        let mut seq = Buffer::new(BufferType::Sequence, None, 256);
        assert!(seq.append_event(SequenceEvent::float(3, 1.0)));
        seq.prepare_output_write();
        assert!(seq.append_event(SequenceEvent::float(1, 2.0)));
        assert_eq!(seq.sequence().len(), 1);
        assert_eq!(seq.sequence().events()[0].frames, 1);
    }

    #[test]
    fn next_value_offset_finds_next_breakpoint() {
        let mut seq = Buffer::new(BufferType::Sequence, Some(EventType::Float), 256);
        assert!(seq.append_event(SequenceEvent::float(4, 1.0)));
        assert!(seq.append_event(SequenceEvent::float(20, 2.0)));
        assert_eq!(seq.next_value_offset(0, 64), 4);
        assert_eq!(seq.next_value_offset(4, 64), 20);
        assert_eq!(seq.next_value_offset(20, 64), 64);
        assert_eq!(seq.next_value_offset(0, 3), 3);
    }

    #[test]
    fn update_value_tracks_latest_event() {
        let mut seq = Buffer::new(BufferType::Sequence, Some(EventType::Float), 256);
        assert!(seq.append_event(SequenceEvent::float(4, 1.5)));
        assert!(seq.append_event(SequenceEvent::float(30, 2.5)));
        seq.update_value(10);
        assert_eq!(seq.value(), Some(1.5));
        seq.update_value(64);
        assert_eq!(seq.value(), Some(2.5));
    }

    #[test]
    fn buffer_ref_shares_one_buffer() {
        let a = BufferRef::new(Buffer::new(BufferType::Audio, None, 8));
        let b = a.clone();
        b.get_mut().set_from(0.5, 0);
        assert_eq!(a.get().samples()[0], 0.5);
        assert!(BufferRef::ptr_eq(&a, &b));
        assert_eq!(a.holders(), 2);
    }
}
