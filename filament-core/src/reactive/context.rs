//! Reactive Context
//!
//! The reactive context tracks which computation is currently running and
//! which owner new nodes are attached to. This enables automatic dependency
//! tracking: when a source is read, we can register the current computation
//! as an observer.
//!
//! # Implementation
//!
//! We use a thread-local stack of frames. Entering a computation, an owner
//! scope, an untracked region or a transition pushes a frame; the returned
//! guard pops it when dropped, including during unwinding. Nested
//! computations therefore never leak their reads into the parent's sources.

use std::cell::RefCell;

use smallvec::SmallVec;

use crate::graph::NodeId;

thread_local! {
    static CONTEXT_STACK: RefCell<Vec<Frame>> = const { RefCell::new(Vec::new()) };
}

/// Where `on_cleanup` registrations made under a frame end up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum CleanupTarget {
    /// The owner's regular cleanups: run before each re-run and on disposal.
    Cleanups,
    /// The owner's disposers: run on final disposal only.
    Disposers,
}

/// An entry in the reactive context stack.
#[derive(Debug, Clone)]
pub(crate) struct Frame {
    /// The computation whose reads are being tracked, if any.
    pub observer: Option<NodeId>,
    /// The owner new nodes and cleanups attach to.
    pub owner: Option<NodeId>,
    /// Whether writes made under this frame belong to the active transition.
    pub in_transition: bool,
    pub cleanup_target: CleanupTarget,
    /// Sources read by `observer` under this frame, in first-read order.
    sources: SmallVec<[NodeId; 4]>,
}

impl Frame {
    /// Frame for running a computation body: tracks reads into `id` and makes
    /// `id` the owner.
    ///
    /// Graph runs always compute committed values, so the transition flag is
    /// cleared even when the run is triggered from transition scope.
    pub fn computation(id: NodeId) -> Self {
        Self {
            observer: Some(id),
            owner: Some(id),
            in_transition: false,
            cleanup_target: CleanupTarget::Cleanups,
            sources: SmallVec::new(),
        }
    }

    /// Frame that changes the owner but keeps the current observer.
    pub fn owner(owner: Option<NodeId>) -> Self {
        Self {
            observer: ReactiveContext::current_observer(),
            owner,
            in_transition: ReactiveContext::in_transition(),
            cleanup_target: CleanupTarget::Cleanups,
            sources: SmallVec::new(),
        }
    }

    /// Frame with no observer: reads are not tracked.
    pub fn untracked() -> Self {
        Self {
            observer: None,
            owner: ReactiveContext::current_owner(),
            in_transition: ReactiveContext::in_transition(),
            cleanup_target: CleanupTarget::Cleanups,
            sources: SmallVec::new(),
        }
    }

    /// Frame for running an external source factory for computation `id`:
    /// untracked, owned by `id`, cleanups registered as disposers.
    pub fn bridge(id: NodeId) -> Self {
        Self {
            observer: None,
            owner: Some(id),
            in_transition: false,
            cleanup_target: CleanupTarget::Disposers,
            sources: SmallVec::new(),
        }
    }

    /// Mark writes under this frame as part of the active transition.
    pub fn with_transition(mut self, in_transition: bool) -> Self {
        self.in_transition = in_transition;
        self
    }

    /// Detach from the current observer.
    pub fn without_observer(mut self) -> Self {
        self.observer = None;
        self
    }
}

/// Guard that pops the context when dropped.
///
/// This ensures the context stack is properly maintained even if
/// the computation panics.
pub(crate) struct ReactiveContext {
    depth: usize,
    popped: bool,
}

impl ReactiveContext {
    /// Enter a new frame.
    ///
    /// The frame is exited when the returned guard is dropped or finished.
    pub fn enter(frame: Frame) -> Self {
        let depth = CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            stack.push(frame);
            stack.len()
        });

        Self {
            depth,
            popped: false,
        }
    }

    /// Exit the frame and return the sources it collected.
    pub fn finish(mut self) -> SmallVec<[NodeId; 4]> {
        self.popped = true;
        self.pop().map(|frame| frame.sources).unwrap_or_default()
    }

    fn pop(&self) -> Option<Frame> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();

            // Verify we're popping the right frame.
            // This helps catch bugs where guards are dropped out of order.
            debug_assert_eq!(
                stack.len(),
                self.depth,
                "ReactiveContext mismatch: expected depth {}, got {}",
                self.depth,
                stack.len()
            );
            stack.pop()
        })
    }

    /// Check if there is an active tracking computation.
    #[cfg(test)]
    pub fn is_tracking() -> bool {
        Self::current_observer().is_some()
    }

    /// Get the computation currently tracking reads, if any.
    pub fn current_observer() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|frame| frame.observer))
    }

    /// Get the owner new nodes attach to, if any.
    pub fn current_owner() -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| stack.borrow().last().and_then(|frame| frame.owner))
    }

    pub fn in_transition() -> bool {
        CONTEXT_STACK.with(|stack| stack.borrow().last().is_some_and(|frame| frame.in_transition))
    }

    pub fn cleanup_target() -> CleanupTarget {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map_or(CleanupTarget::Cleanups, |frame| frame.cleanup_target)
        })
    }

    /// Record a read of `source` in the current frame.
    ///
    /// Returns the observer to subscribe, or `None` if nothing is tracking
    /// or the source was already read during this run.
    pub fn track_dependency(source: NodeId) -> Option<NodeId> {
        CONTEXT_STACK.with(|stack| {
            let mut stack = stack.borrow_mut();
            let frame = stack.last_mut()?;
            let observer = frame.observer?;
            if observer == source || frame.sources.contains(&source) {
                return None;
            }
            frame.sources.push(source);
            Some(observer)
        })
    }

    /// Get the dependencies collected in the current frame.
    #[cfg(test)]
    pub fn get_dependencies() -> Vec<NodeId> {
        CONTEXT_STACK.with(|stack| {
            stack
                .borrow()
                .last()
                .map(|frame| frame.sources.to_vec())
                .unwrap_or_default()
        })
    }
}

impl Drop for ReactiveContext {
    fn drop(&mut self) {
        if !self.popped {
            self.pop();
        }
    }
}
