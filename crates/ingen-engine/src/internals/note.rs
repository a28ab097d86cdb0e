//! Polyphonic MIDI note allocator.
//!
//! Consumes a MIDI sequence and drives per-voice frequency, velocity,
//! gate and trigger outputs. Voice allocation steals the oldest active
//! voice when none are free; a freed voice is handed to the newest key
//! still sounding without a voice, updating frequency without
//! retriggering the gate. The sustain pedal holds released voices until
//! pedal-off.

use std::sync::Arc;

use crate::block::InternalBlock;
use crate::buffer::EventType;
use crate::port::{Direction, Port, PortSpec, PortType};
use crate::run_context::RunContext;

/// Plugin URI.
pub const URI: &str = "ingen:note";

const MIDI_NOTE_OFF: u8 = 0x80;
const MIDI_NOTE_ON: u8 = 0x90;
const MIDI_CONTROL: u8 = 0xB0;
const MIDI_CTL_SUSTAIN: u8 = 64;
const MIDI_CTL_ALL_SOUNDS_OFF: u8 = 120;
const MIDI_CTL_ALL_NOTES_OFF: u8 = 123;

const PORT_INPUT: usize = 0;
const PORT_FREQUENCY: usize = 1;
const PORT_VELOCITY: usize = 2;
const PORT_GATE: usize = 3;
const PORT_TRIGGER: usize = 4;

/// Port layout.
pub fn ports() -> Vec<(PortSpec, bool)> {
    vec![
        (
            PortSpec::new("input", Direction::Input, PortType::AtomSequence),
            false,
        ),
        (
            PortSpec::new("frequency", Direction::Output, PortType::Audio),
            true,
        ),
        (
            PortSpec::new("velocity", Direction::Output, PortType::Audio).with_range(0.0, 1.0),
            true,
        ),
        (
            PortSpec::new("gate", Direction::Output, PortType::Audio),
            true,
        ),
        (
            PortSpec::new("trigger", Direction::Output, PortType::Audio),
            true,
        ),
    ]
}

/// Builds a note allocator.
pub fn instantiate(_sample_rate: u32, polyphony: u32) -> Box<dyn InternalBlock> {
    Box::new(Note::new(polyphony))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum KeyState {
    Off,
    OnAssigned,
    OnUnassigned,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum VoiceState {
    Free,
    Active,
    Holding,
}

#[derive(Debug, Clone, Copy)]
struct Key {
    state: KeyState,
    voice: usize,
    time: u64,
}

#[derive(Debug, Clone, Copy)]
struct Voice {
    state: VoiceState,
    note: u8,
    time: u64,
}

/// The note allocator's state machine.
pub struct Note {
    keys: [Key; 128],
    voices: Vec<Voice>,
    sustain: bool,
}

impl Note {
    /// Creates an allocator with `polyphony` voices.
    pub fn new(polyphony: u32) -> Self {
        Self {
            keys: [Key {
                state: KeyState::Off,
                voice: 0,
                time: 0,
            }; 128],
            voices: vec![
                Voice {
                    state: VoiceState::Free,
                    note: 0,
                    time: 0,
                };
                polyphony.max(1) as usize
            ],
            sustain: false,
        }
    }

    /// Number of voices currently sounding (active or held).
    pub fn active_voices(&self) -> usize {
        self.voices
            .iter()
            .filter(|v| v.state != VoiceState::Free)
            .count()
    }

    pub(crate) fn voice_state(&self, voice: usize) -> VoiceState {
        self.voices[voice].state
    }

    pub(crate) fn voice_note(&self, voice: usize) -> u8 {
        self.voices[voice].note
    }

    fn note_on(&mut self, ports: &[Arc<Port>], note: u8, velocity: u8, time: u64, ctx: &RunContext) {
        let key_state = self.keys[note as usize].state;
        if key_state != KeyState::Off {
            // Double note-on for a sounding key; ignore it.
            return;
        }

        // Look for a free voice, else steal the oldest.
        let mut voice_num = None;
        for (i, v) in self.voices.iter().enumerate() {
            if v.state == VoiceState::Free {
                voice_num = Some(i);
                break;
            }
        }
        let voice_num = voice_num.unwrap_or_else(|| {
            self.voices
                .iter()
                .enumerate()
                .min_by_key(|(_, v)| v.time)
                .map(|(i, _)| i)
                .unwrap_or(0)
        });

        // The stolen voice's key keeps sounding conceptually, but loses
        // its voice until one frees up.
        if self.voices[voice_num].state == VoiceState::Active {
            let stolen_note = self.voices[voice_num].note as usize;
            self.keys[stolen_note].state = KeyState::OnUnassigned;
        }

        self.keys[note as usize] = Key {
            state: KeyState::OnAssigned,
            voice: voice_num,
            time,
        };
        self.voices[voice_num] = Voice {
            state: VoiceState::Active,
            note,
            time,
        };

        let mut offset = (time - ctx.start) as usize;
        // One-sample adjustment: a trigger landing on the cycle's last
        // frame would otherwise need its falling edge next cycle.
        if offset + 1 == (ctx.offset + ctx.nframes) as usize && offset > 0 {
            offset -= 1;
        }

        ports[PORT_FREQUENCY].buffer(voice_num).get_mut().set_from(note_to_freq(note), offset);
        ports[PORT_VELOCITY]
            .buffer(voice_num)
            .get_mut()
            .set_from(f32::from(velocity) / 127.0, offset);
        ports[PORT_GATE].buffer(voice_num).get_mut().set_from(1.0, offset);

        // Single-sample trigger pulse.
        let trig = ports[PORT_TRIGGER].buffer(voice_num).get_mut();
        trig.set_block(1.0, offset, offset + 1);
        trig.set_from(0.0, offset + 1);
    }

    fn note_off(&mut self, ports: &[Arc<Port>], note: u8, time: u64, ctx: &RunContext) {
        if self.keys[note as usize].state == KeyState::OnAssigned {
            let voice = self.keys[note as usize].voice;
            if self.voices[voice].state == VoiceState::Active {
                if self.sustain {
                    self.voices[voice].state = VoiceState::Holding;
                } else {
                    self.free_voice(ports, voice, time, ctx);
                }
            }
        }
        self.keys[note as usize].state = KeyState::Off;
    }

    /// Releases a voice, reassigning it to the newest key still waiting
    /// for one (frequency change only, gate stays high), or dropping the
    /// gate when no key is waiting.
    fn free_voice(&mut self, ports: &[Arc<Port>], voice: usize, time: u64, ctx: &RunContext) {
        let offset = (time - ctx.start) as usize;

        let mut replace_key: Option<(usize, u64)> = None;
        for (num, key) in self.keys.iter().enumerate() {
            if key.state == KeyState::OnUnassigned {
                let newer = match replace_key {
                    Some((_, t)) => key.time > t,
                    None => true,
                };
                if newer {
                    replace_key = Some((num, key.time));
                }
            }
        }

        match replace_key {
            Some((key_num, _)) => {
                ports[PORT_FREQUENCY]
                    .buffer(voice)
                    .get_mut()
                    .set_from(note_to_freq(key_num as u8), offset);
                self.keys[key_num].state = KeyState::OnAssigned;
                self.keys[key_num].voice = voice;
                self.voices[voice].note = key_num as u8;
                self.voices[voice].state = VoiceState::Active;
            }
            None => {
                ports[PORT_GATE].buffer(voice).get_mut().set_from(0.0, offset);
                self.voices[voice].state = VoiceState::Free;
            }
        }
    }

    fn all_notes_off(&mut self, ports: &[Arc<Port>], time: u64, ctx: &RunContext) {
        let offset = (time - ctx.start) as usize;
        for (i, v) in self.voices.iter_mut().enumerate() {
            ports[PORT_GATE].buffer(i).get_mut().set_from(0.0, offset);
            v.state = VoiceState::Free;
        }
    }

    fn sustain_on(&mut self) {
        self.sustain = true;
    }

    /// Releases every held voice.
    ///
    /// Keys still waiting for a voice (`OnUnassigned`) are not
    /// reassigned here; they are only picked up when a note-off frees a
    /// voice.
    fn sustain_off(&mut self, ports: &[Arc<Port>], time: u64, ctx: &RunContext) {
        self.sustain = false;
        for voice in 0..self.voices.len() {
            if self.voices[voice].state == VoiceState::Holding {
                self.free_voice(ports, voice, time, ctx);
            }
        }
    }
}

impl InternalBlock for Note {
    fn process(&mut self, ctx: &RunContext, ports: &[Arc<Port>]) {
        // Events are mixed and frame-sorted by the input port.
        let input = ports[PORT_INPUT].buffer(0);
        let end = u64::from(ctx.offset + ctx.nframes);

        for i in 0..input.get().sequence().len() {
            let ev = input.get().sequence().events()[i];
            if ev.frames < ctx.offset {
                continue;
            }
            if u64::from(ev.frames) >= end {
                break;
            }
            let bytes = ev.payload();
            if ev.event_type != EventType::Midi || bytes.len() < 3 {
                continue;
            }
            let time = ctx.start + u64::from(ev.frames);
            match bytes[0] & 0xF0 {
                MIDI_NOTE_ON => {
                    if bytes[2] == 0 {
                        self.note_off(ports, bytes[1], time, ctx);
                    } else {
                        self.note_on(ports, bytes[1], bytes[2], time, ctx);
                    }
                }
                MIDI_NOTE_OFF => self.note_off(ports, bytes[1], time, ctx),
                MIDI_CONTROL => match bytes[1] {
                    MIDI_CTL_ALL_NOTES_OFF | MIDI_CTL_ALL_SOUNDS_OFF => {
                        self.all_notes_off(ports, time, ctx)
                    }
                    MIDI_CTL_SUSTAIN => {
                        if bytes[2] > 63 {
                            self.sustain_on();
                        } else {
                            self.sustain_off(ports, time, ctx);
                        }
                    }
                    _ => {}
                },
                _ => {}
            }
        }
    }

    fn reset(&mut self) {
        for key in &mut self.keys {
            key.state = KeyState::Off;
        }
        for voice in &mut self.voices {
            voice.state = VoiceState::Free;
        }
        self.sustain = false;
    }
}

/// MIDI note number to frequency: note 57 = A 440 Hz.
///
/// Notes above 119 map to 1.0 Hz; some plugins dislike a frequency of
/// zero.
pub fn note_to_freq(note: u8) -> f32 {
    if note <= 119 {
        440.0 * ((f32::from(note) - 57.0) / 12.0).exp2()
    } else {
        1.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::RtBlock;
    use crate::buffer::SequenceEvent;
    use crate::buffer_factory::BufferFactory;
    use crossbeam_channel::bounded;

    const NFRAMES: u32 = 64;

    fn ctx() -> RunContext {
        let (tx, rx) = bounded(16);
        std::mem::forget(rx);
        RunContext::new(0, NFRAMES, 48000, false, tx)
    }

    fn setup(polyphony: u32) -> (Note, Vec<Arc<Port>>) {
        let factory = BufferFactory::new(NFRAMES as usize);
        let ports = RtBlock::build_ports(&ports(), polyphony, &factory, || 0);
        (Note::new(polyphony), ports)
    }

    fn push_midi(ports: &[Arc<Port>], frames: u32, bytes: &[u8]) {
        assert!(ports[PORT_INPUT]
            .buffer(0)
            .get_mut()
            .append_event(SequenceEvent::midi(frames, bytes).unwrap()));
    }

    fn gate(ports: &[Arc<Port>], voice: usize, frame: usize) -> f32 {
        ports[PORT_GATE].buffer(voice).get().samples()[frame]
    }

    fn trigger(ports: &[Arc<Port>], voice: usize, frame: usize) -> f32 {
        ports[PORT_TRIGGER].buffer(voice).get().samples()[frame]
    }

    #[test]
    fn note_to_freq_tuning() {
        assert!((note_to_freq(57) - 440.0).abs() < 0.01);
        assert!((note_to_freq(45) - 220.0).abs() < 0.01);
        assert!((note_to_freq(69) - 880.0).abs() < 0.01);
        assert_eq!(note_to_freq(120), 1.0);
    }

    #[test]
    fn note_on_raises_gate_and_pulses_trigger() {
        let (mut note, ports) = setup(1);
        push_midi(&ports, 10, &[0x90, 60, 100]);
        note.process(&ctx(), &ports);

        assert_eq!(gate(&ports, 0, 9), 0.0);
        assert_eq!(gate(&ports, 0, 10), 1.0);
        assert_eq!(gate(&ports, 0, 63), 1.0);
        assert_eq!(trigger(&ports, 0, 10), 1.0);
        assert_eq!(trigger(&ports, 0, 11), 0.0);

        let freq = ports[PORT_FREQUENCY].buffer(0).get().samples()[10];
        assert!((freq - note_to_freq(60)).abs() < 0.01);
        let vel = ports[PORT_VELOCITY].buffer(0).get().samples()[10];
        assert!((vel - 100.0 / 127.0).abs() < 1e-6);
    }

    #[test]
    fn second_note_steals_the_only_voice() {
        let (mut note, ports) = setup(1);
        push_midi(&ports, 0, &[0x90, 60, 100]);
        push_midi(&ports, 10, &[0x90, 62, 100]);
        note.process(&ctx(), &ports);

        assert_eq!(note.active_voices(), 1);
        assert_eq!(note.voice_note(0), 62);
        // The stolen key is waiting for a voice.
        assert_eq!(note.keys[60].state, KeyState::OnUnassigned);
    }

    #[test]
    fn three_notes_on_two_voices_steal_oldest() {
        let (mut note, ports) = setup(2);
        push_midi(&ports, 0, &[0x90, 60, 100]);
        push_midi(&ports, 10, &[0x90, 62, 100]);
        push_midi(&ports, 20, &[0x90, 64, 100]);
        note.process(&ctx(), &ports);

        assert_eq!(note.active_voices(), 2);
        let mut notes = [note.voice_note(0), note.voice_note(1)];
        notes.sort_unstable();
        assert_eq!(notes, [62, 64]);

        // Both gates high at cycle end, trigger pulses where each voice
        // was (re)allocated.
        assert_eq!(gate(&ports, 0, 63), 1.0);
        assert_eq!(gate(&ports, 1, 63), 1.0);
        assert_eq!(trigger(&ports, 0, 0), 1.0);
        assert_eq!(trigger(&ports, 1, 10), 1.0);
        assert_eq!(trigger(&ports, 0, 20), 1.0);
    }

    #[test]
    fn note_off_reassigns_voice_to_newest_unassigned_key() {
        let (mut note, ports) = setup(1);
        // 60 sounds, 62 steals, 64 steals again; then 64 releases.
        push_midi(&ports, 0, &[0x90, 60, 100]);
        push_midi(&ports, 4, &[0x90, 62, 100]);
        push_midi(&ports, 8, &[0x90, 64, 100]);
        push_midi(&ports, 16, &[0x80, 64, 0]);
        note.process(&ctx(), &ports);

        // The newest waiting key (62) takes the voice back; the gate
        // never dropped.
        assert_eq!(note.voice_note(0), 62);
        assert_eq!(note.voice_state(0), VoiceState::Active);
        assert_eq!(gate(&ports, 0, 20), 1.0);
        // No retrigger at the reassignment point.
        assert_eq!(trigger(&ports, 0, 16), 0.0);
        let freq = ports[PORT_FREQUENCY].buffer(0).get().samples()[16];
        assert!((freq - note_to_freq(62)).abs() < 0.01);
    }

    #[test]
    fn note_off_without_waiting_keys_drops_gate() {
        let (mut note, ports) = setup(1);
        push_midi(&ports, 0, &[0x90, 60, 100]);
        push_midi(&ports, 32, &[0x80, 60, 0]);
        note.process(&ctx(), &ports);

        assert_eq!(note.active_voices(), 0);
        assert_eq!(gate(&ports, 0, 31), 1.0);
        assert_eq!(gate(&ports, 0, 32), 0.0);
    }

    #[test]
    fn sustain_holds_released_voices_until_pedal_off() {
        let (mut note, ports) = setup(2);
        push_midi(&ports, 0, &[0x90, 60, 100]);
        push_midi(&ports, 1, &[0xB0, MIDI_CTL_SUSTAIN, 127]);
        push_midi(&ports, 8, &[0x80, 60, 0]);
        note.process(&ctx(), &ports);

        // Released under sustain: held, gate still high.
        assert_eq!(note.voice_state(0), VoiceState::Holding);
        assert_eq!(gate(&ports, 0, 16), 1.0);

        // Pedal off frees the held voice in one tick.
        ports[PORT_INPUT].buffer(0).get_mut().prepare_write();
        push_midi(&ports, 0, &[0xB0, MIDI_CTL_SUSTAIN, 0]);
        let ctx2 = {
            let (tx, rx) = bounded(16);
            std::mem::forget(rx);
            RunContext::new(u64::from(NFRAMES), NFRAMES, 48000, false, tx)
        };
        note.process(&ctx2, &ports);
        assert_eq!(note.voice_state(0), VoiceState::Free);
        assert_eq!(gate(&ports, 0, 0), 0.0);
    }

    #[test]
    fn all_notes_off_frees_everything() {
        let (mut note, ports) = setup(4);
        push_midi(&ports, 0, &[0x90, 60, 100]);
        push_midi(&ports, 1, &[0x90, 64, 100]);
        push_midi(&ports, 2, &[0x90, 67, 100]);
        push_midi(&ports, 10, &[0xB0, MIDI_CTL_ALL_NOTES_OFF, 0]);
        note.process(&ctx(), &ports);

        assert_eq!(note.active_voices(), 0);
        for v in 0..3 {
            assert_eq!(gate(&ports, v, 10), 0.0);
        }
    }

    #[test]
    fn polyphony_never_exceeds_voice_count() {
        let (mut note, ports) = setup(3);
        for (i, n) in [60u8, 61, 62, 63, 64, 65, 66].iter().enumerate() {
            push_midi(&ports, i as u32, &[0x90, *n, 100]);
        }
        note.process(&ctx(), &ports);
        assert!(note.active_voices() <= 3);
    }

    #[test]
    fn trigger_on_last_frame_still_falls_within_cycle() {
        let (mut note, ports) = setup(1);
        push_midi(&ports, NFRAMES - 1, &[0x90, 60, 100]);
        note.process(&ctx(), &ports);
        // Pulse shifted one frame back so the falling edge fits.
        assert_eq!(trigger(&ports, 0, (NFRAMES - 2) as usize), 1.0);
        assert_eq!(trigger(&ports, 0, (NFRAMES - 1) as usize), 0.0);
    }
}
