//! Built-in processing blocks.
//!
//! Internal blocks are compiled into the engine and instantiated by URI
//! through [`descriptor`]. They illustrate the port contract: read the
//! mixed input buffers, write every output buffer for the context
//! window, allocate nothing.

pub mod gain;
pub mod note;
pub mod osc;

use crate::block::InternalBlock;
use crate::port::PortSpec;

/// Factory entry for one internal block type.
pub struct InternalDescriptor {
    /// Plugin URI clients use in `Create`.
    pub uri: &'static str,
    /// Human-readable name.
    pub name: &'static str,
    /// Port layout: (spec, polyphonic) pairs in index order.
    pub ports: fn() -> Vec<(PortSpec, bool)>,
    /// Builds a processor instance.
    pub instantiate: fn(sample_rate: u32, polyphony: u32) -> Box<dyn InternalBlock>,
}

/// All internal block types.
pub fn descriptors() -> &'static [InternalDescriptor] {
    &[
        InternalDescriptor {
            uri: note::URI,
            name: "Note",
            ports: note::ports,
            instantiate: note::instantiate,
        },
        InternalDescriptor {
            uri: osc::URI,
            name: "Sine Oscillator",
            ports: osc::ports,
            instantiate: osc::instantiate,
        },
        InternalDescriptor {
            uri: gain::URI,
            name: "Gain",
            ports: gain::ports,
            instantiate: gain::instantiate,
        },
    ]
}

/// Looks up an internal block type by URI.
pub fn descriptor(uri: &str) -> Option<&'static InternalDescriptor> {
    descriptors().iter().find(|d| d.uri == uri)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_by_uri() {
        assert!(descriptor("ingen:note").is_some());
        assert!(descriptor("ingen:osc").is_some());
        assert!(descriptor("ingen:gain").is_some());
        assert!(descriptor("ingen:nope").is_none());
    }

    #[test]
    fn descriptors_have_ports() {
        for d in descriptors() {
            assert!(!(d.ports)().is_empty(), "{} has no ports", d.uri);
        }
    }
}
