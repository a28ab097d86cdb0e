//! Ports: the input/output endpoints on blocks.
//!
//! A [`Port`] owns one buffer per voice. Input ports may be fed by any
//! number of arcs; their sources are mixed at the start of every cycle
//! (audio/CV sum, sequences merge sorted by frame, control sums then
//! clamps to the declared range). Output ports are written by their
//! block; downstream readers hold references to the same buffers.
//!
//! The source list and buffer contents are realtime state, touched only
//! on the audio thread (installed by event `execute`, read by `run`).
//! Control values and the broadcast flag cross the thread boundary as
//! atomics in the bit-cast style used throughout the codebase.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

use ingen_api::Symbol;
use parking_lot::Mutex;

use crate::buffer::{Buffer, BufferRef, BufferType, EventType, SequenceEvent};
use crate::buffer_factory::BufferFactory;
use crate::run_context::{Notice, RunContext};
use crate::rt_cell::RtCell;

/// Most arcs an input port can merge without falling back to pairwise
/// sequence appends.
const MAX_MERGE_SOURCES: usize = 64;

/// Data-flow direction of a port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// The port consumes data.
    Input,
    /// The port produces data.
    Output,
}

/// The signal type a port carries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PortType {
    /// Sample stream.
    Audio,
    /// Control-rate sample stream.
    Cv,
    /// Single scalar per cycle.
    Control,
    /// Timestamped event sequence.
    AtomSequence,
}

impl PortType {
    /// The buffer type backing this port type.
    pub fn buffer_type(self) -> BufferType {
        match self {
            PortType::Audio => BufferType::Audio,
            PortType::Cv => BufferType::Cv,
            PortType::Control => BufferType::Control,
            PortType::AtomSequence => BufferType::Sequence,
        }
    }

    /// True if an arc from a `tail` port of this type may feed a `head`
    /// port of type `other`.
    ///
    /// Audio, CV and control interconvert (promotion or constant fill);
    /// sequences only connect to sequences.
    pub fn can_connect(self, other: PortType) -> bool {
        match (self, other) {
            (PortType::AtomSequence, PortType::AtomSequence) => true,
            (PortType::AtomSequence, _) | (_, PortType::AtomSequence) => false,
            _ => true,
        }
    }
}

/// Everything needed to create a port.
#[derive(Debug, Clone)]
pub struct PortSpec {
    /// Symbol, unique among the block's ports.
    pub symbol: Symbol,
    /// Data-flow direction.
    pub direction: Direction,
    /// Signal type.
    pub port_type: PortType,
    /// Value type for value-typed sequences.
    pub value_type: Option<EventType>,
    /// Initial value for control ports.
    pub default_value: f32,
    /// Lower clamp bound for control mixing.
    pub minimum: Option<f32>,
    /// Upper clamp bound for control mixing.
    pub maximum: Option<f32>,
}

impl PortSpec {
    /// A port spec with no range and a zero default.
    pub fn new(symbol: &str, direction: Direction, port_type: PortType) -> Self {
        Self {
            symbol: Symbol::parse(symbol).expect("valid port symbol"),
            direction,
            port_type,
            value_type: None,
            default_value: 0.0,
            minimum: None,
            maximum: None,
        }
    }

    /// Sets the control default value.
    pub fn with_default(mut self, value: f32) -> Self {
        self.default_value = value;
        self
    }

    /// Sets the control range.
    pub fn with_range(mut self, min: f32, max: f32) -> Self {
        self.minimum = Some(min);
        self.maximum = Some(max);
        self
    }

    /// Marks the sequence as a timeline of float values.
    pub fn with_value_type(mut self, vt: EventType) -> Self {
        self.value_type = Some(vt);
        self
    }
}

/// One arc's contribution to an input port: the tail port's per-voice
/// buffers.
#[derive(Debug, Clone)]
pub(crate) struct PortSource {
    pub(crate) buffers: Vec<BufferRef>,
}

/// Realtime state of a port: per-voice buffers and the mixed-in sources.
pub(crate) struct PortRt {
    pub(crate) voices: Vec<BufferRef>,
    pub(crate) sources: Vec<PortSource>,
}

/// An input or output endpoint on a block.
pub struct Port {
    symbol: Mutex<Symbol>,
    index: u32,
    direction: Direction,
    port_type: PortType,
    value_type: Option<EventType>,
    default_value: f32,
    minimum: Option<f32>,
    maximum: Option<f32>,
    /// Current control value, written from any thread, applied to the
    /// buffer each cycle.
    control_value: AtomicU32,
    /// When set, the port reports its post-cycle peak/value upward.
    broadcast: AtomicBool,
    /// Identifies this port in realtime notices.
    cookie: u64,
    rt: RtCell<PortRt>,
}

impl Port {
    /// Creates a port with `voices` buffers drawn from the factory.
    pub fn new(spec: PortSpec, voices: usize, cookie: u64, factory: &BufferFactory) -> Self {
        let btype = spec.port_type.buffer_type();
        let bufs: Vec<BufferRef> = (0..voices.max(1))
            .map(|_| factory.get_default(btype, spec.value_type))
            .collect();
        if spec.port_type == PortType::Control {
            for b in &bufs {
                b.get_mut().set_scalar(spec.default_value);
            }
        }
        Self {
            symbol: Mutex::new(spec.symbol),
            index: 0,
            direction: spec.direction,
            port_type: spec.port_type,
            value_type: spec.value_type,
            default_value: spec.default_value,
            minimum: spec.minimum,
            maximum: spec.maximum,
            control_value: AtomicU32::new(spec.default_value.to_bits()),
            broadcast: AtomicBool::new(false),
            cookie,
            rt: RtCell::new(PortRt {
                voices: bufs,
                sources: Vec::new(),
            }),
        }
    }

    /// Sets the port's position among its block's ports.
    pub(crate) fn set_index(&mut self, index: u32) {
        self.index = index;
    }

    /// The port's symbol.
    pub fn symbol(&self) -> Symbol {
        self.symbol.lock().clone()
    }

    /// Renames the port (non-realtime; symbols are model state).
    pub(crate) fn set_symbol(&self, symbol: Symbol) {
        *self.symbol.lock() = symbol;
    }

    /// The port's position among its block's ports.
    pub fn index(&self) -> u32 {
        self.index
    }

    /// Data-flow direction.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Signal type.
    pub fn port_type(&self) -> PortType {
        self.port_type
    }

    /// Value type for value-typed sequences.
    pub fn value_type(&self) -> Option<EventType> {
        self.value_type
    }

    /// Default control value.
    pub fn default_value(&self) -> f32 {
        self.default_value
    }

    /// Declared control range, if any.
    pub fn range(&self) -> (Option<f32>, Option<f32>) {
        (self.minimum, self.maximum)
    }

    /// The broadcast cookie identifying this port in realtime notices.
    pub fn cookie(&self) -> u64 {
        self.cookie
    }

    /// The current control value.
    pub fn control_value(&self) -> f32 {
        f32::from_bits(self.control_value.load(Ordering::Acquire))
    }

    /// Sets the control value, clamped to the declared range. Takes
    /// effect at the next cycle.
    pub fn set_control_value(&self, value: f32) {
        let v = self.clamp(value);
        self.control_value.store(v.to_bits(), Ordering::Release);
    }

    /// Whether the port broadcasts after each cycle.
    pub fn is_broadcasting(&self) -> bool {
        self.broadcast.load(Ordering::Acquire)
    }

    /// Enables or disables post-cycle broadcasting.
    pub fn set_broadcasting(&self, on: bool) {
        self.broadcast.store(on, Ordering::Release);
    }

    /// Number of voices.
    pub fn voice_count(&self) -> usize {
        self.rt.borrow_rt().voices.len()
    }

    /// The buffer of voice `v` (voice 0 for mono ports).
    ///
    /// Buffer contents belong to the audio thread during cycles;
    /// drivers and tests touch them only between `run` calls.
    pub fn buffer(&self, v: usize) -> &BufferRef {
        let rt = self.rt.borrow_rt();
        &rt.voices[v.min(rt.voices.len() - 1)]
    }

    /// Number of arcs feeding this input port.
    pub(crate) fn source_count(&self) -> usize {
        self.rt.borrow_rt().sources.len()
    }

    /// Installs a new source list (event `execute`, audio thread).
    /// Returns the old list for deferred reclamation.
    pub(crate) fn swap_sources(&self, mut sources: Vec<PortSource>) -> Vec<PortSource> {
        std::mem::swap(&mut self.rt.borrow_rt().sources, &mut sources);
        sources
    }

    /// Snapshot of the per-voice buffers for use as an arc source.
    pub(crate) fn source_handle(&self) -> PortSource {
        PortSource {
            buffers: self.rt.borrow_rt().voices.clone(),
        }
    }

    /// Reconstructs the spec this port was built from (for copies).
    pub(crate) fn spec(&self) -> PortSpec {
        PortSpec {
            symbol: self.symbol(),
            direction: self.direction,
            port_type: self.port_type,
            value_type: self.value_type,
            default_value: self.default_value,
            minimum: self.minimum,
            maximum: self.maximum,
        }
    }

    /// Clears every voice buffer (after the last arc is disconnected).
    pub(crate) fn clear_buffers(&self) {
        for buf in &self.rt.borrow_rt().voices {
            buf.get_mut().clear();
        }
    }

    /// Drains the voice buffers for recycling (detached ports only).
    pub(crate) fn take_voices(&self) -> Vec<BufferRef> {
        std::mem::take(&mut self.rt.borrow_rt().voices)
    }

    fn clamp(&self, v: f32) -> f32 {
        let v = match self.minimum {
            Some(min) => v.max(min),
            None => v,
        };
        match self.maximum {
            Some(max) => v.min(max),
            None => v,
        }
    }

    // ── Per-cycle processing ─────────────────────────────────────────────

    /// Prepares the port for a cycle.
    ///
    /// Inputs mix their sources (or refresh from the control value when
    /// unconnected); sequence outputs are reset to an empty body.
    pub(crate) fn pre_run(&self, ctx: &RunContext) {
        let rt = self.rt.borrow_rt();
        match self.direction {
            Direction::Input => {
                if rt.sources.is_empty() {
                    if self.port_type == PortType::Control {
                        let v = self.control_value();
                        for buf in &rt.voices {
                            buf.get_mut().set_scalar(v);
                        }
                    }
                } else {
                    self.mix(ctx, rt);
                }
            }
            Direction::Output => {
                if self.port_type == PortType::AtomSequence {
                    for buf in &rt.voices {
                        buf.get_mut().prepare_write();
                    }
                }
            }
        }
    }

    /// Finishes the port after a cycle: updates persistent sequence
    /// values, clears consumed sequence inputs, and reports broadcasts.
    pub(crate) fn post_run(&self, ctx: &RunContext) {
        let rt = self.rt.borrow_rt();
        if self.port_type == PortType::AtomSequence {
            for buf in &rt.voices {
                let b = buf.get_mut();
                b.update_value(ctx.offset + ctx.nframes);
                if self.direction == Direction::Input {
                    b.prepare_write();
                }
            }
        }
        if self.is_broadcasting() {
            match self.port_type {
                PortType::Audio | PortType::Cv => {
                    let peak = rt
                        .voices
                        .iter()
                        .map(|b| b.get().peak(ctx))
                        .fold(0.0f32, f32::max);
                    ctx.notify(Notice::PortPeak {
                        cookie: self.cookie,
                        peak,
                    });
                }
                PortType::Control => {
                    ctx.notify(Notice::PortValue {
                        cookie: self.cookie,
                        value: rt.voices[0].get().scalar(),
                    });
                }
                PortType::AtomSequence => {}
            }
        }
    }

    /// Mixes sources immediately, regardless of direction.
    ///
    /// Graph blocks use this for their output ports, which are fed by
    /// child arcs and can only be mixed after the children have run.
    pub(crate) fn mix_rt(&self, ctx: &RunContext) {
        let rt = self.rt.borrow_rt();
        if !rt.sources.is_empty() {
            self.mix(ctx, rt);
        }
    }

    /// Mixes all sources into the port's voices.
    fn mix(&self, ctx: &RunContext, rt: &mut PortRt) {
        let n_voices = rt.voices.len();
        for v in 0..n_voices {
            let dst = rt.voices[v].get_mut();
            match self.port_type {
                PortType::AtomSequence => Self::merge_sequences(dst, &rt.sources, v),
                PortType::Control => {
                    let mut sum = 0.0;
                    for src in &rt.sources {
                        sum += Self::source_scalar(src, v);
                    }
                    dst.set_scalar(self.clamp(sum));
                }
                PortType::Audio | PortType::Cv => {
                    Self::mix_samples(ctx, dst, &rt.sources, v, n_voices);
                }
            }
        }
    }

    /// Sums sample-based sources into `dst` for head voice `v`.
    ///
    /// A mono tail feeds every head voice from its single buffer; a
    /// polyphonic tail feeding a mono head collapses all tail voices.
    fn mix_samples(
        ctx: &RunContext,
        dst: &mut Buffer,
        sources: &[PortSource],
        v: usize,
        n_voices: usize,
    ) {
        let mut first = true;
        for src in sources {
            let tail_voices: &[BufferRef] = if n_voices == 1 {
                // Mono head: collapse every tail voice.
                &src.buffers
            } else {
                let i = if src.buffers.len() == 1 { 0 } else { v };
                std::slice::from_ref(&src.buffers[i.min(src.buffers.len() - 1)])
            };
            for tail in tail_voices {
                if first {
                    dst.copy(ctx, tail.get());
                    first = false;
                } else if tail.get().buffer_type().is_sample_based() {
                    dst.accumulate(tail.get());
                } else if tail.get().is_control() {
                    let c = tail.get().scalar();
                    let off = ctx.offset as usize;
                    let end = off + ctx.nframes as usize;
                    let samples = dst.samples_mut();
                    let end = end.min(samples.len());
                    for s in &mut samples[off.min(end)..end] {
                        *s += c;
                    }
                } else if tail.get().value_type() == Some(EventType::Float) {
                    dst.render_sequence(ctx, tail.get(), true);
                }
            }
        }
    }

    fn source_scalar(src: &PortSource, v: usize) -> f32 {
        let i = if src.buffers.len() == 1 { 0 } else { v };
        src.buffers[i.min(src.buffers.len() - 1)].get().scalar()
    }

    /// Merge-sorts every source sequence into `dst` by frame offset.
    fn merge_sequences(dst: &mut Buffer, sources: &[PortSource], v: usize) {
        dst.prepare_write();
        let mut cursors = [0usize; MAX_MERGE_SOURCES];
        let n = sources.len().min(MAX_MERGE_SOURCES);
        loop {
            let mut best: Option<(usize, u32)> = None;
            for (i, src) in sources[..n].iter().enumerate() {
                let idx = if src.buffers.len() == 1 { 0 } else { v };
                let buf = src.buffers[idx.min(src.buffers.len() - 1)].get();
                if !buf.is_sequence() {
                    continue;
                }
                let events = buf.sequence().events();
                if let Some(ev) = events.get(cursors[i]) {
                    let better = match best {
                        Some((_, frames)) => ev.frames < frames,
                        None => true,
                    };
                    if better {
                        best = Some((i, ev.frames));
                    }
                }
            }
            match best {
                Some((i, _)) => {
                    let src = &sources[i];
                    let idx = if src.buffers.len() == 1 { 0 } else { v };
                    let buf = src.buffers[idx.min(src.buffers.len() - 1)].get();
                    let ev: SequenceEvent = buf.sequence().events()[cursors[i]];
                    cursors[i] += 1;
                    if !dst.append_event(ev) {
                        return;
                    }
                }
                None => return,
            }
        }
    }
}

impl std::fmt::Debug for Port {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Port({} {:?} {:?}, {} voices)",
            self.symbol.lock(),
            self.direction,
            self.port_type,
            self.voice_count()
        )
    }
}
