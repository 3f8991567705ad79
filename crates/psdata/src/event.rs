//! Change notifications.
//!
//! Mutations never call listeners directly. They queue events, and the
//! public entry point that caused them drains the queue once the mutation is
//! complete. A listener may mutate the tree; the events it causes are queued
//! behind the current one and delivered by the same drain loop instead of
//! recursing.

use std::collections::{BTreeMap, VecDeque};

use tracing::trace;

use crate::error::{DataError, DataResult};
use crate::tree::{DataTree, NodeId};

/// Event delivered to listeners.
#[derive(Debug, Clone)]
pub struct DataEvent {
    kind: String,
    target: NodeId,
    current: NodeId,
    bubbles: bool,
    stopped: bool,
    stopped_immediate: bool,
}

impl DataEvent {
    pub const ADDED: &'static str = "Added";
    pub const ADDED_TO_PARENT: &'static str = "AddedToParent";
    pub const REMOVED: &'static str = "Removed";
    pub const REMOVED_FROM_PARENT: &'static str = "RemovedFromParent";
    /// Sent once per node after a burst of field changes has settled.
    pub const CHANGED: &'static str = "Changed";
    pub const NAME_CHANGED: &'static str = "NameChanged";

    fn new(kind: &str, target: NodeId, bubbles: bool) -> Self {
        Self {
            kind: kind.to_string(),
            target,
            current: target,
            bubbles,
            stopped: false,
            stopped_immediate: false,
        }
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Node the event originated from.
    pub fn target(&self) -> NodeId {
        self.target
    }

    /// Node whose listeners are running now. Differs from the target while
    /// bubbling.
    pub fn current(&self) -> NodeId {
        self.current
    }

    pub fn bubbles(&self) -> bool {
        self.bubbles
    }

    /// Finish the listeners of the current node, then stop bubbling.
    pub fn stop_propagation(&mut self) {
        self.stopped = true;
    }

    /// Skip the remaining listeners and stop bubbling.
    pub fn stop_immediate_propagation(&mut self) {
        self.stopped = true;
        self.stopped_immediate = true;
    }
}

pub type Listener = Box<dyn FnMut(&mut DataTree, &mut DataEvent) + Send>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BindHandle(u64);

struct Binding {
    node: NodeId,
    kind: String,
    /// Taken out while the listener runs.
    listener: Option<Listener>,
}

struct Pending {
    event: DataEvent,
    /// Where bubbling continues after the target, for nodes that were
    /// already detached when the event was raised.
    resume_at: Option<NodeId>,
}

#[derive(Default)]
pub(crate) struct Events {
    bindings: BTreeMap<u64, Binding>,
    next_handle: u64,
    queue: VecDeque<Pending>,
    deferred: Vec<NodeId>,
    dispatching: bool,
}

impl Events {
    pub(crate) fn forget_node(&mut self, id: NodeId) {
        self.bindings.retain(|_, b| b.node != id);
    }
}

impl DataTree {
    /// Listen for `kind` events on `id`, including events bubbling up from
    /// its descendants.
    pub fn bind<F>(&mut self, id: NodeId, kind: impl Into<String>, listener: F) -> DataResult<BindHandle>
    where
        F: FnMut(&mut DataTree, &mut DataEvent) + Send + 'static,
    {
        self.node(id)?;
        let handle = self.events.next_handle;
        self.events.next_handle += 1;
        self.events.bindings.insert(
            handle,
            Binding {
                node: id,
                kind: kind.into(),
                listener: Some(Box::new(listener)),
            },
        );
        Ok(BindHandle(handle))
    }

    /// Listen for the changed event of one field.
    pub fn bind_field<F>(&mut self, id: NodeId, field: &str, listener: F) -> DataResult<BindHandle>
    where
        F: FnMut(&mut DataTree, &mut DataEvent) + Send + 'static,
    {
        let ty = self.type_of(id)?;
        let (_, descriptor) = ty.field(field).ok_or_else(|| DataError::UnknownField {
            type_name: ty.name().to_string(),
            field: field.to_string(),
        })?;
        let kind = descriptor.meta.event_type.clone();
        self.bind(id, kind, listener)
    }

    /// Remove a listener. Returns `false` if it was already gone.
    pub fn unbind(&mut self, handle: BindHandle) -> bool {
        self.events.bindings.remove(&handle.0).is_some()
    }

    pub fn is_bound(&self, id: NodeId, kind: &str) -> bool {
        self.events
            .bindings
            .values()
            .any(|b| b.node == id && b.kind == kind)
    }

    pub(crate) fn emit(&mut self, target: NodeId, kind: &str, bubbles: bool, resume_at: Option<NodeId>) {
        if self.events.bindings.is_empty() {
            return;
        }
        self.events.queue.push_back(Pending {
            event: DataEvent::new(kind, target, bubbles),
            resume_at,
        });
    }

    /// Schedule the coalesced `Changed` event for a node.
    pub(crate) fn mark_changed(&mut self, id: NodeId) {
        if self.events.bindings.is_empty() {
            return;
        }
        if let Ok(node) = self.node_mut(id) {
            if !node.changed_pending {
                node.changed_pending = true;
                self.events.deferred.push(id);
            }
        }
    }

    /// Deliver everything queued so far. Calls made while a drain is
    /// already running return immediately; the running drain picks up the
    /// new events.
    pub(crate) fn dispatch_events(&mut self) {
        if self.events.dispatching {
            return;
        }
        self.events.dispatching = true;
        loop {
            while let Some(pending) = self.events.queue.pop_front() {
                self.deliver(pending);
            }
            if self.events.deferred.is_empty() {
                break;
            }
            for id in std::mem::take(&mut self.events.deferred) {
                if let Ok(node) = self.node_mut(id) {
                    node.changed_pending = false;
                    self.emit(id, DataEvent::CHANGED, false, None);
                }
            }
        }
        self.events.dispatching = false;
    }

    fn deliver(&mut self, pending: Pending) {
        let Pending {
            mut event,
            resume_at,
        } = pending;
        trace!(kind = %event.kind, target = %event.target, "dispatch event");
        let mut current = Some(event.target);
        let mut next_hop = resume_at;
        while let Some(node) = current {
            event.current = node;
            self.invoke_listeners(node, &mut event);
            if event.stopped || !event.bubbles {
                break;
            }
            let parent = self.parent(node).ok().flatten();
            current = next_hop.take().or(parent);
        }
    }

    fn invoke_listeners(&mut self, node: NodeId, event: &mut DataEvent) {
        let handles: Vec<u64> = self
            .events
            .bindings
            .iter()
            .filter(|(_, b)| b.node == node && b.kind == event.kind)
            .map(|(h, _)| *h)
            .collect();
        for handle in handles {
            if event.stopped_immediate {
                break;
            }
            let Some(mut listener) = self
                .events
                .bindings
                .get_mut(&handle)
                .and_then(|b| b.listener.take())
            else {
                continue;
            };
            listener(self, event);
            if let Some(binding) = self.events.bindings.get_mut(&handle) {
                binding.listener = Some(listener);
            }
        }
    }
}
