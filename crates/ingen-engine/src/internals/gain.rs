//! Gain: audio in, scaled audio out.

use std::sync::Arc;

use crate::block::InternalBlock;
use crate::port::{Direction, Port, PortSpec, PortType};
use crate::run_context::RunContext;

/// Plugin URI.
pub const URI: &str = "ingen:gain";

const PORT_IN: usize = 0;
const PORT_GAIN: usize = 1;
const PORT_OUT: usize = 2;

/// Port layout.
pub fn ports() -> Vec<(PortSpec, bool)> {
    vec![
        (PortSpec::new("i", Direction::Input, PortType::Audio), true),
        (
            PortSpec::new("gain", Direction::Input, PortType::Control)
                .with_default(1.0)
                .with_range(0.0, 4.0),
            false,
        ),
        (PortSpec::new("o", Direction::Output, PortType::Audio), true),
    ]
}

/// Builds a gain block.
pub fn instantiate(_sample_rate: u32, _polyphony: u32) -> Box<dyn InternalBlock> {
    Box::new(Gain)
}

/// Multiplies input by the gain control.
pub struct Gain;

impl InternalBlock for Gain {
    fn process(&mut self, ctx: &RunContext, ports: &[Arc<Port>]) {
        let g = ports[PORT_GAIN].buffer(0).get().scalar();
        let voices = ports[PORT_OUT].voice_count();
        for v in 0..voices {
            let input = ports[PORT_IN].buffer(v);
            let out = ports[PORT_OUT].buffer(v).get_mut();
            let begin = ctx.offset as usize;
            let end = (begin + ctx.nframes as usize).min(out.samples().len());
            let in_samples = input.get().samples();
            let out_samples = out.samples_mut();
            for k in begin..end {
                out_samples[k] = in_samples[k] * g;
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

    #[test]
    fn scales_input_by_gain() {
        let factory = BufferFactory::new(16);
        let ports = RtBlock::build_ports(&ports(), 1, &factory, || 0);
        let (tx, rx) = bounded(4);
        std::mem::forget(rx);
        let ctx = RunContext::new(0, 16, 48000, false, tx);

        ports[PORT_IN].buffer(0).get_mut().set_from(0.8, 0);
        ports[PORT_GAIN].set_control_value(0.5);
        for p in &ports {
            p.pre_run(&ctx);
        }

        let mut gain = Gain;
        gain.process(&ctx, &ports);
        assert!(ports[PORT_OUT]
            .buffer(0)
            .get()
            .samples()
            .iter()
            .all(|&s| (s - 0.4).abs() < 1e-6));
    }
}
