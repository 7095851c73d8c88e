//! The per-thread ambient context slot.
//!
//! Attaching a node makes it ambient and yields an [`AttachToken`] that
//! identifies the attachment. Detaching consumes the token and makes the
//! node that was ambient before it current again. Attach/detach pairs are
//! expected to nest; a detach that skips over newer attachments discards
//! them too and reports the misuse.

use super::ContextNode;
use crate::errors::ContextError;
use std::cell::RefCell;
use std::marker::PhantomData;
use std::sync::Arc;
use std::thread::{self, ThreadId};
use tracing::warn;

struct Attachment {
    seq: u64,
    node: Arc<ContextNode>,
}

#[derive(Default)]
struct AmbientStack {
    entries: Vec<Attachment>,
    next_seq: u64,
}

thread_local! {
    static AMBIENT: RefCell<AmbientStack> = RefCell::new(AmbientStack::default());
}

/// Proof of an [`attach`], required to undo it.
///
/// Not `Clone`: each attach is undone exactly once.
#[must_use = "an attached context must be detached"]
pub struct AttachToken {
    attached: u64,
    seq: u64,
    thread: ThreadId,
}

impl AttachToken {
    /// Returns the id of the node this token attached.
    pub fn attached_id(&self) -> u64 {
        self.attached
    }
}

impl std::fmt::Debug for AttachToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttachToken")
            .field("attached", &self.attached)
            .field("seq", &self.seq)
            .finish()
    }
}

/// Returns the node ambient on this thread, if any.
pub fn current() -> Option<Arc<ContextNode>> {
    AMBIENT.with(|stack| stack.borrow().entries.last().map(|a| Arc::clone(&a.node)))
}

/// Makes `node` ambient on this thread.
pub fn attach(node: Arc<ContextNode>) -> AttachToken {
    let attached = node.id();
    AMBIENT.with(|stack| {
        let mut stack = stack.borrow_mut();
        stack.next_seq += 1;
        let seq = stack.next_seq;
        stack.entries.push(Attachment { seq, node });
        AttachToken {
            attached,
            seq,
            thread: thread::current().id(),
        }
    })
}

/// Restores whatever was ambient before the matching [`attach`].
///
/// A token from another thread is rejected without touching the slot. If
/// newer attachments are still above the token's, they are discarded with
/// it and `DetachMismatch` is returned; the slot is restored either way.
/// Tokens of discarded attachments later detach as no-ops.
pub fn detach(token: AttachToken) -> Result<(), ContextError> {
    if token.thread != thread::current().id() {
        return Err(ContextError::WrongThread);
    }
    let (result, removed) = AMBIENT.with(|stack| {
        let mut stack = stack.borrow_mut();
        let Some(position) = stack.entries.iter().rposition(|a| a.seq == token.seq) else {
            return (Ok(()), Vec::new());
        };
        let result = if position + 1 == stack.entries.len() {
            Ok(())
        } else {
            Err(ContextError::DetachMismatch {
                attached: token.attached,
                ambient: stack.entries.last().map(|a| a.node.id()),
            })
        };
        (result, stack.entries.split_off(position))
    });
    // Dropped outside the borrow.
    drop(removed);
    result
}

/// Attaches `node` for the lifetime of the returned guard.
pub fn scoped(node: Arc<ContextNode>) -> AmbientScope {
    AmbientScope {
        token: Some(attach(node)),
        _not_send: PhantomData,
    }
}

/// RAII form of [`attach`]/[`detach`]; detaches on drop, including while
/// unwinding.
#[must_use = "dropping the scope detaches the context immediately"]
pub struct AmbientScope {
    token: Option<AttachToken>,
    _not_send: PhantomData<*const ()>,
}

impl AmbientScope {
    /// Detaches now, reporting misuse instead of logging it.
    pub fn exit(mut self) -> Result<(), ContextError> {
        self.token.take().map_or(Ok(()), detach)
    }
}

impl Drop for AmbientScope {
    fn drop(&mut self) {
        if let Some(token) = self.token.take() {
            if let Err(err) = detach(token) {
                warn!(error = %err, "Ambient scope dropped out of order");
            }
        }
    }
}
