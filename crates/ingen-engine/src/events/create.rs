//! Create a graph, block, or graph port.

use std::sync::Arc;

use ingen_api::atom::uris;
use ingen_api::{keys, ClientMessage, Path, Properties, Status, Symbol};

use crate::block::RtBlock;
use crate::event::{Event, EventBase, PostContext, PreContext};
use crate::events::{self, GraphUpdate};
use crate::internals;
use crate::port::{Direction, Port, PortSpec};
use crate::store::{GraphModel, Node, NodeKind};
use crate::undo::UndoOp;

/// Prepared installation of a new graph boundary port.
struct PortInstall {
    graph_rt: Arc<RtBlock>,
    new_ports: Option<Vec<Arc<Port>>>,
    old_ports: Option<Arc<Vec<Arc<Port>>>>,
}

/// The `Create` event: put a new entity at a path.
pub struct Create {
    base: EventBase,
    path: Path,
    properties: Properties,
    update: Option<GraphUpdate>,
    port_install: Option<PortInstall>,
    description: Vec<ClientMessage>,
    /// (cookie, path) registered with the broadcaster on success.
    cookie: Option<u64>,
}

impl Create {
    /// Creates the event.
    pub fn new(base: EventBase, path: Path, properties: Properties) -> Self {
        Self {
            base,
            path,
            properties,
            update: None,
            port_install: None,
            description: Vec::new(),
            cookie: None,
        }
    }

    fn type_uri(&self) -> Option<&str> {
        self.properties.get(keys::TYPE).and_then(|a| a.as_str())
    }

    fn pre_process_inner(&mut self, ctx: &mut PreContext<'_>) -> Result<(), Status> {
        if self.path.is_root() || ctx.store.exists(&self.path) {
            return Err(Status::Exists);
        }
        let parent_path = self.path.parent().ok_or(Status::BadRequest)?;
        let symbol = self.path.symbol().ok_or(Status::BadRequest)?;

        let type_uri = self.type_uri().map(str::to_owned);
        match type_uri.as_deref() {
            Some(uris::GRAPH) => self.create_graph(ctx, &parent_path, symbol)?,
            Some(uris::BLOCK) | None => self.create_block(ctx, &parent_path, symbol)?,
            Some(uris::INPUT_PORT) => {
                self.create_port(ctx, &parent_path, symbol, Direction::Input)?
            }
            Some(uris::OUTPUT_PORT) => {
                self.create_port(ctx, &parent_path, symbol, Direction::Output)?
            }
            Some(_) => return Err(Status::BadRequest),
        }

        ctx.undo.record(
            ctx.undo_mode,
            UndoOp::Delete {
                path: self.path.clone(),
            },
        );
        self.description = events::describe(ctx.store, &self.path).unwrap_or_default();
        Ok(())
    }

    fn create_block(
        &mut self,
        ctx: &mut PreContext<'_>,
        parent_path: &Path,
        symbol: Symbol,
    ) -> Result<(), Status> {
        let plugin_uri = self
            .properties
            .get(keys::PLUGIN)
            .and_then(|a| a.as_str())
            .ok_or(Status::BadRequest)?
            .to_owned();
        let descriptor = internals::descriptor(&plugin_uri).ok_or(Status::NotFound)?;

        let polyphonic = self
            .properties
            .get(keys::POLYPHONIC)
            .and_then(|a| a.as_bool())
            .unwrap_or(false);

        let parent = ctx.store.node(parent_path).ok_or(Status::NotFound)?;
        let graph = parent.graph().ok_or(Status::BadRequest)?;
        let polyphony = if polyphonic { graph.polyphony } else { 1 };

        let ports = RtBlock::build_ports(
            &(descriptor.ports)(),
            polyphony,
            ctx.factory,
            &mut *ctx.next_cookie,
        );
        let processor = (descriptor.instantiate)(ctx.sample_rate, polyphony);
        let rt = RtBlock::internal(ports, polyphony, processor);

        let node = Node::new(
            symbol,
            polyphony,
            NodeKind::Block { plugin: plugin_uri },
            rt,
        );
        let parent = ctx.store.node_mut(parent_path).ok_or(Status::NotFound)?;
        parent
            .graph_mut()
            .ok_or(Status::BadRequest)?
            .insert_child(node);

        let (update, _) = events::recompile(ctx, parent_path).ok_or(Status::Internal)?;
        self.update = Some(update);
        Ok(())
    }

    fn create_graph(
        &mut self,
        ctx: &mut PreContext<'_>,
        parent_path: &Path,
        symbol: Symbol,
    ) -> Result<(), Status> {
        let polyphony = self
            .properties
            .get(keys::POLYPHONY)
            .and_then(|a| a.as_int())
            .unwrap_or(1)
            .max(1) as u32;

        let parent = ctx.store.node(parent_path).ok_or(Status::NotFound)?;
        parent.graph().ok_or(Status::BadRequest)?;

        let rt = RtBlock::graph(Vec::new(), 1);
        let node = Node::new(symbol, 1, NodeKind::Graph(GraphModel::new(polyphony)), rt);

        let parent = ctx.store.node_mut(parent_path).ok_or(Status::NotFound)?;
        parent
            .graph_mut()
            .ok_or(Status::BadRequest)?
            .insert_child(node);

        let (update, _) = events::recompile(ctx, parent_path).ok_or(Status::Internal)?;
        self.update = Some(update);
        Ok(())
    }

    fn create_port(
        &mut self,
        ctx: &mut PreContext<'_>,
        owner_path: &Path,
        symbol: Symbol,
        direction: Direction,
    ) -> Result<(), Status> {
        let owner = ctx.store.node(owner_path).ok_or(Status::NotFound)?;
        owner.graph().ok_or(Status::BadRequest)?;

        let port_type = self
            .properties
            .get(keys::PORT_TYPE)
            .and_then(|a| a.as_str())
            .and_then(events::port_type_from_uri)
            .ok_or(Status::BadRequest)?;

        let mut spec = PortSpec {
            symbol,
            direction,
            port_type,
            value_type: None,
            default_value: 0.0,
            minimum: None,
            maximum: None,
        };
        if let Some(v) = self.properties.get(keys::VALUE).and_then(|a| a.as_float()) {
            spec.default_value = v;
        }
        spec.minimum = self.properties.get(keys::MINIMUM).and_then(|a| a.as_float());
        spec.maximum = self.properties.get(keys::MAXIMUM).and_then(|a| a.as_float());

        let cookie = (ctx.next_cookie)();
        let mut port = Port::new(spec, 1, cookie, ctx.factory);
        port.set_index(owner.rt.port_count() as u32);
        let port = Arc::new(port);

        let mut new_ports: Vec<Arc<Port>> = owner.rt.ports().as_slice().to_vec();
        new_ports.push(port);

        self.cookie = Some(cookie);
        self.port_install = Some(PortInstall {
            graph_rt: Arc::clone(&owner.rt),
            new_ports: Some(new_ports),
            old_ports: None,
        });
        Ok(())
    }
}

impl Event for Create {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, ctx: &mut PreContext<'_>) {
        if let Err(status) = self.pre_process_inner(ctx) {
            self.base.set_error(status);
        }
    }

    fn execute(&mut self) {
        if let Some(update) = &mut self.update {
            update.execute();
        }
        if let Some(install) = &mut self.port_install {
            if let Some(ports) = install.new_ports.take() {
                install.old_ports = Some(install.graph_rt.swap_ports(ports));
            }
        }
    }

    fn post_process(&mut self, ctx: &mut PostContext<'_>) {
        ctx.respond(&self.base, self.path.as_str());
        if self.base.is_ok() {
            if let Some(cookie) = self.cookie {
                ctx.broadcaster.register_cookie(cookie, self.path.clone());
            }
            for msg in self.description.drain(..) {
                ctx.broadcaster.send_all(msg);
            }
        }
    }
}
