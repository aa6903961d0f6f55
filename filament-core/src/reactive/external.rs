//! External Source Bridge
//!
//! Lets a foreign reactive system participate in dependency tracking. A
//! factory registered with [`enable_external_source`] is called once per
//! computation created afterwards. It receives the computation's body and a
//! trigger, and returns a wrapped body. The wrapper typically runs the body
//! inside the foreign system's own tracking and subscribes the trigger to
//! whatever foreign state was read; calling the trigger then re-runs the
//! computation like a signal write would.
//!
//! Cleanups the factory registers with [`on_cleanup`](super::on_cleanup)
//! run once, when the computation is disposed, not before every re-run.
//! That is where foreign subscriptions are released.

use std::rc::Rc;

use tracing::debug;

use super::context::{Frame, ReactiveContext};
use super::runtime::{raise, Runtime};
use crate::graph::{Body, Node, NodeId, NodeKind};

/// A computation body as seen by an external source factory.
pub type TrackFn = Rc<dyn Fn()>;

/// Marks the computation stale and flushes, like a signal write.
pub type Trigger = Rc<dyn Fn()>;

pub(crate) type ExternalFactory = Rc<dyn Fn(TrackFn, Trigger) -> TrackFn>;

/// Register an external source factory for the current thread.
///
/// Factories compose: each new factory wraps the body produced by the
/// factories registered before it, and all of them share one trigger per
/// computation. Computations created before the call are not bridged.
///
/// Registering a factory turns [`start_transition`](super::start_transition)
/// into a deferred batch, since foreign state cannot be shadowed.
pub fn enable_external_source<F>(factory: F)
where
    F: Fn(TrackFn, Trigger) -> TrackFn + 'static,
{
    Runtime::with(|rt| {
        let mut slot = rt.external.borrow_mut();
        let composed: ExternalFactory = match slot.take() {
            Some(previous) => Rc::new(move |track: TrackFn, trigger: Trigger| {
                let inner = previous(track, trigger.clone());
                factory(inner, trigger)
            }),
            None => Rc::new(factory),
        };
        *slot = Some(composed);
    });
    debug!("external source factory registered");
}

/// Wrap the body of computation `id` with the registered factory, if any.
pub(crate) fn bridge(rt: &Runtime, id: NodeId, body: Body) -> Body {
    let factory = rt.external.borrow().clone();
    let Some(factory) = factory else {
        return body;
    };

    // The trigger is a hidden source owned by nobody; it goes away with `id`.
    let trigger_id = rt.graph.borrow_mut().add_node(Node::new(NodeKind::Signal, None));
    if let Some(node) = rt.graph.borrow_mut().get_mut(id) {
        node.trigger = Some(trigger_id);
    }

    let trigger: Trigger = Rc::new(move || fire(trigger_id));
    let wrapped = {
        let _ctx = ReactiveContext::enter(Frame::bridge(id));
        factory(body, trigger)
    };

    Rc::new(move || {
        Runtime::with(|rt| rt.track(trigger_id));
        wrapped()
    })
}

fn fire(trigger_id: NodeId) {
    if let Err(err) = Runtime::with(|rt| rt.write(trigger_id)) {
        raise(err);
    }
}
