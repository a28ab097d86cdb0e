//! Set or patch properties on an entity.

use ingen_api::{keys, Atom, ClientMessage, Path, Properties, Status};

use crate::event::{Event, EventBase, PostContext, PreContext};
use crate::port::PortType;
use crate::store::Entity;
use crate::undo::UndoOp;

/// The `SetProperty` event.
///
/// Port values and broadcast flags take effect through atomics, so the
/// realtime phase has nothing to install; everything else lands in the
/// entity's property bag.
pub struct SetProperty {
    base: EventBase,
    subject: Path,
    key: String,
    value: Atom,
    /// Cookie to register with the broadcaster when enabling broadcast.
    enable_cookie: Option<u64>,
}

impl SetProperty {
    /// Creates the event.
    pub fn new(base: EventBase, subject: Path, key: String, value: Atom) -> Self {
        Self {
            base,
            subject,
            key,
            value,
            enable_cookie: None,
        }
    }

    fn pre_process_inner(&mut self, ctx: &mut PreContext<'_>) -> Result<(), Status> {
        match ctx.store.resolve(&self.subject) {
            Some(Entity::Port { port, .. }) => match self.key.as_str() {
                keys::VALUE => {
                    if port.port_type() != PortType::Control {
                        return Err(Status::BadRequest);
                    }
                    let value = self.value.as_float().ok_or(Status::BadRequest)?;
                    let old = port.control_value();
                    port.set_control_value(value);
                    ctx.undo.record(
                        ctx.undo_mode,
                        UndoOp::SetProperty {
                            subject: self.subject.clone(),
                            key: self.key.clone(),
                            value: Atom::Float(old),
                        },
                    );
                    Ok(())
                }
                keys::BROADCAST => {
                    let on = self.value.as_bool().ok_or(Status::BadRequest)?;
                    let old = port.is_broadcasting();
                    port.set_broadcasting(on);
                    if on {
                        self.enable_cookie = Some(port.cookie());
                    }
                    ctx.undo.record(
                        ctx.undo_mode,
                        UndoOp::SetProperty {
                            subject: self.subject.clone(),
                            key: self.key.clone(),
                            value: Atom::Bool(old),
                        },
                    );
                    Ok(())
                }
                _ => Err(Status::BadRequest),
            },
            Some(Entity::Block(_)) => match self.key.as_str() {
                // Voice counts are fixed when a block is created;
                // rebuild the block to change them.
                keys::POLYPHONY | keys::POLYPHONIC => Err(Status::BadRequest),
                _ => {
                    let node = ctx.store.node_mut(&self.subject).ok_or(Status::NotFound)?;
                    let old = node.properties.get(&self.key).cloned();
                    node.properties.set(self.key.clone(), self.value.clone());
                    if let Some(old) = old {
                        ctx.undo.record(
                            ctx.undo_mode,
                            UndoOp::SetProperty {
                                subject: self.subject.clone(),
                                key: self.key.clone(),
                                value: old,
                            },
                        );
                    }
                    Ok(())
                }
            },
            None => Err(Status::NotFound),
        }
    }
}

impl Event for SetProperty {
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

    fn execute(&mut self) {}

    fn post_process(&mut self, ctx: &mut PostContext<'_>) {
        ctx.respond(&self.base, self.subject.as_str());
        if self.base.is_ok() {
            if let Some(cookie) = self.enable_cookie {
                ctx.broadcaster.register_cookie(cookie, self.subject.clone());
            }
            ctx.broadcaster.send_all(ClientMessage::SetProperty {
                subject: self.subject.clone(),
                key: self.key.clone(),
                value: self.value.clone(),
            });
        }
    }
}

/// The `Delta` event: patch an entity's property bag, removals first.
///
/// Only free-form node metadata moves through deltas; port values go
/// through [`SetProperty`].
pub struct Delta {
    base: EventBase,
    subject: Path,
    remove: Properties,
    add: Properties,
}

impl Delta {
    /// Creates the event.
    pub fn new(base: EventBase, subject: Path, remove: Properties, add: Properties) -> Self {
        Self {
            base,
            subject,
            remove,
            add,
        }
    }
}

impl Event for Delta {
    fn base(&self) -> &EventBase {
        &self.base
    }

    fn base_mut(&mut self) -> &mut EventBase {
        &mut self.base
    }

    fn pre_process(&mut self, ctx: &mut PreContext<'_>) {
        let node = match ctx.store.node_mut(&self.subject) {
            Some(node) => node,
            None => {
                self.base.set_error(Status::NotFound);
                return;
            }
        };
        // Patch semantics: drop exactly the (key, value) pairs named,
        // leaving other values of a multi-valued key intact, then add.
        for (key, value) in self.remove.iter() {
            node.properties.remove_value(key, value);
        }
        for (key, value) in self.add.iter() {
            node.properties.insert(key.to_owned(), value.clone());
        }
    }

    fn execute(&mut self) {}

    fn post_process(&mut self, ctx: &mut PostContext<'_>) {
        ctx.respond(&self.base, self.subject.as_str());
        if self.base.is_ok() {
            ctx.broadcaster.send_all(ClientMessage::Delta {
                path: self.subject.clone(),
                remove: self.remove.clone(),
                add: self.add.clone(),
            });
        }
    }
}
