//! Sine oscillator.
//!
//! Output is a function of absolute frame time, so a cycle's samples
//! depend only on the run context and the frequency input: running the
//! same cycle twice produces identical output.

use std::f32::consts::TAU;
use std::sync::Arc;

use crate::block::InternalBlock;
use crate::port::{Direction, Port, PortSpec, PortType};
use crate::run_context::RunContext;

/// Plugin URI.
pub const URI: &str = "ingen:osc";

const PORT_FREQ: usize = 0;
const PORT_OUT: usize = 1;

/// Port layout.
pub fn ports() -> Vec<(PortSpec, bool)> {
    vec![
        (
            PortSpec::new("freq", Direction::Input, PortType::Control)
                .with_default(440.0)
                .with_range(0.0, 20000.0),
            false,
        ),
        (PortSpec::new("o", Direction::Output, PortType::Audio), true),
    ]
}

/// Builds an oscillator.
pub fn instantiate(_sample_rate: u32, _polyphony: u32) -> Box<dyn InternalBlock> {
    Box::new(SineOsc)
}

/// Stateless sine generator; phase derives from absolute frame time.
pub struct SineOsc;

impl InternalBlock for SineOsc {
    fn process(&mut self, ctx: &RunContext, ports: &[Arc<Port>]) {
        let freq = ports[PORT_FREQ].buffer(0).get().scalar();
        let rate = ctx.sample_rate as f32;
        let start = ctx.start;
        let out_port = &ports[PORT_OUT];
        for v in 0..out_port.voice_count() {
            let out = out_port.buffer(v).get_mut();
            let samples = out.samples_mut();
            let begin = ctx.offset as usize;
            let end = (begin + ctx.nframes as usize).min(samples.len());
            for (k, s) in samples[begin..end].iter_mut().enumerate() {
                let t = start + (begin + k) as u64;
                *s = (TAU * freq * (t as f32) / rate).sin();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::RtBlock;
    use crate::buffer_factory::BufferFactory;
    use crossbeam_channel::bounded;

    fn ctx(start: u64, nframes: u32) -> RunContext {
        let (tx, rx) = bounded(4);
        std::mem::forget(rx);
        RunContext::new(start, nframes, 48000, false, tx)
    }

    #[test]
    fn output_matches_sine_of_absolute_time() {
        let factory = BufferFactory::new(64);
        let ports = RtBlock::build_ports(&ports(), 1, &factory, || 0);
        ports[PORT_FREQ].set_control_value(440.0);
        ports[PORT_FREQ].pre_run(&ctx(0, 64));

        let mut osc = SineOsc;
        osc.process(&ctx(128, 64), &ports);

        let out = ports[PORT_OUT].buffer(0).get();
        for k in 0..64usize {
            let expected = (TAU * 440.0 * ((128 + k) as f32) / 48000.0).sin();
            assert!((out.samples()[k] - expected).abs() < 1e-6, "frame {}", k);
        }
    }

    #[test]
    fn identical_contexts_produce_identical_output() {
        let factory = BufferFactory::new(32);
        let ports = RtBlock::build_ports(&ports(), 1, &factory, || 0);
        ports[PORT_FREQ].pre_run(&ctx(0, 32));

        let mut osc = SineOsc;
        osc.process(&ctx(4800, 32), &ports);
        let first: Vec<f32> = ports[PORT_OUT].buffer(0).get().samples().to_vec();
        osc.process(&ctx(4800, 32), &ports);
        assert_eq!(first, ports[PORT_OUT].buffer(0).get().samples());
    }
}
