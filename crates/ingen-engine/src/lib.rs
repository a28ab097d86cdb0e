//! Ingen Engine - a realtime modular audio graph server
//!
//! The engine hosts a directed graph of audio/CV/event blocks, routes
//! sample buffers between their ports, and drives the whole graph from
//! a realtime audio callback:
//!
//! - [`Buffer`]/[`BufferFactory`] — pooled, typed data regions
//! - [`Port`]/[`RtBlock`] — the endpoints and units the task tree runs
//! - [`Store`] — the entity tree (graphs, blocks, ports, arcs)
//! - [`CompiledGraph`] — a graph reduced to a parallel/sequential task
//!   tree respecting data dependencies, with delay-free cycle rejection
//! - [`Engine`] — the driver contract (`activate`/`run`/`deactivate`),
//!   the event pipeline, and the client interface
//!
//! Graph edits never touch the audio thread directly: they are
//! three-phase [`event::Event`]s prepared off-thread, installed between
//! cycles with pointer swaps, and completed (responses, broadcasts,
//! reclamation) after the audio thread has published a cycle past the
//! installation.

pub mod block;
pub mod broadcaster;
pub mod buffer;
pub mod buffer_factory;
pub mod compiled_graph;
pub mod engine;
pub mod event;
pub mod events;
pub mod internals;
pub mod port;
pub mod post_processor;
pub mod pre_processor;
pub mod run_context;
mod rt_cell;
pub mod store;
pub mod undo;
pub mod worker;

// Re-export main types at crate root
pub use block::{InternalBlock, RtBlock};
pub use broadcaster::{Broadcaster, ClientId};
pub use buffer::{Buffer, BufferRef, BufferType, EventType, SequenceEvent};
pub use buffer_factory::BufferFactory;
pub use compiled_graph::{CompiledGraph, FeedbackError, Task};
pub use engine::{Engine, EngineError, EngineOptions};
pub use port::{Direction, Port, PortSpec, PortType};
pub use run_context::{Notice, RunContext};
pub use store::{ArcEdge, Entity, GraphModel, Node, Store};
pub use worker::Workers;
