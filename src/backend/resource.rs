// Child resources - Parent-scoped GPU handle ownership
//
// A parent (the Device) owns a registry of release closures, one per live
// child. A child holds a weak link into that registry plus its key, never a
// pointer to the parent itself:
//
//   Device ──owns──▶ Registry { key → release }
//      ▲                 ▲
//      └─ no ref ─ Child ┘ (Weak + key)
//
// Whoever runs first wins the entry: the child freeing itself, or the parent
// draining every child before destroying its own handle. The other side
// then finds the entry gone and does nothing, so each native handle is
// released exactly once.

use parking_lot::Mutex;
use slotmap::{new_key_type, SlotMap};
use std::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use thiserror::Error;

new_key_type! {
    /// Slot of a live child in its parent's registry
    pub struct ChildKey;
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ResourceError {
    #[error("{kind} was used before being bound to a parent")]
    Unbound { kind: &'static str },

    #[error("{kind} outlived its parent {parent}")]
    ParentReleased {
        kind: &'static str,
        parent: &'static str,
    },
}

type Release = Box<dyn FnOnce() + Send>;

struct Entry {
    kind: &'static str,
    seq: u64,
    release: Release,
}

struct Registry {
    parent: &'static str,
    next_seq: AtomicU64,
    entries: Mutex<SlotMap<ChildKey, Entry>>,
}

impl Registry {
    fn take(&self, key: ChildKey) -> Option<Entry> {
        self.entries.lock().remove(key)
    }
}

/// The child table a parent resource owns.
///
/// Dropping it releases every remaining child.
pub struct Children<P: ?Sized> {
    registry: Arc<Registry>,
    _parent: PhantomData<fn(&P)>,
}

impl<P: ?Sized> Children<P> {
    pub fn new(parent: &'static str) -> Self {
        Self {
            registry: Arc::new(Registry {
                parent,
                next_seq: AtomicU64::new(0),
                entries: Mutex::new(SlotMap::with_key()),
            }),
            _parent: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.registry.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Release every live child, newest first. Returns how many were freed.
    pub fn free_all(&self) -> usize {
        // Drain under the lock, release outside it
        let mut drained: Vec<Entry> = self.registry.entries.lock().drain().map(|(_, e)| e).collect();
        drained.sort_by(|a, b| b.seq.cmp(&a.seq));

        let count = drained.len();
        for entry in drained {
            log::debug!("{}: releasing child {}", self.registry.parent, entry.kind);
            (entry.release)();
        }
        count
    }

    fn insert(&self, kind: &'static str, release: Release) -> ChildKey {
        let seq = self.registry.next_seq.fetch_add(1, Ordering::Relaxed);
        self.registry.entries.lock().insert(Entry { kind, seq, release })
    }
}

impl<P: ?Sized> Drop for Children<P> {
    fn drop(&mut self) {
        self.free_all();
    }
}

impl<P: ?Sized> fmt::Debug for Children<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Children")
            .field("parent", &self.registry.parent)
            .field("live", &self.len())
            .finish()
    }
}

/// A resource other resources can be children of.
pub trait ParentResource {
    fn children(&self) -> &Children<Self>;
}

struct Link {
    registry: Weak<Registry>,
    key: ChildKey,
    kind: &'static str,
}

/// Ownership of one native handle scoped to a parent `P`.
///
/// Move-only: there is no `Clone`. `take` transfers ownership out of a place
/// that must stay initialized and leaves the source inert.
pub struct ChildResource<P: ?Sized> {
    link: Option<Link>,
    _parent: PhantomData<fn(&P)>,
}

impl<P: ParentResource + ?Sized> ChildResource<P> {
    /// Register `release` with `parent`. It runs exactly once: when this
    /// child is freed or dropped, or when the parent frees its children.
    pub fn bind<F>(parent: &P, kind: &'static str, release: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        let children = parent.children();
        let key = children.insert(kind, Box::new(release));
        log::debug!("{}: bound child {}", children.registry.parent, kind);
        Self {
            link: Some(Link {
                registry: Arc::downgrade(&children.registry),
                key,
                kind,
            }),
            _parent: PhantomData,
        }
    }
}

impl<P: ?Sized> ChildResource<P> {
    /// A child that owns nothing
    pub const fn unbound() -> Self {
        Self {
            link: None,
            _parent: PhantomData,
        }
    }

    pub fn is_bound(&self) -> bool {
        self.link.is_some()
    }

    /// Bound, parent alive, and not yet released by the parent
    pub fn is_valid(&self) -> bool {
        self.ensure_valid().is_ok()
    }

    pub fn ensure_valid(&self) -> Result<(), ResourceError> {
        let link = self.link.as_ref().ok_or(ResourceError::Unbound { kind: "child resource" })?;
        let released = |parent| ResourceError::ParentReleased {
            kind: link.kind,
            parent,
        };

        let registry = link.registry.upgrade().ok_or_else(|| released("<dropped>"))?;
        if registry.entries.lock().contains_key(link.key) {
            Ok(())
        } else {
            Err(released(registry.parent))
        }
    }

    /// Release the handle if this child still owns it. Idempotent.
    pub fn free_resources(&mut self) {
        let Some(link) = self.link.take() else {
            return;
        };
        if let Some(registry) = link.registry.upgrade() {
            if let Some(entry) = registry.take(link.key) {
                log::debug!("{}: freeing child {}", registry.parent, entry.kind);
                (entry.release)();
            }
        }
    }

    /// Move ownership out, leaving `self` unbound.
    pub fn take(&mut self) -> Self {
        Self {
            link: self.link.take(),
            _parent: PhantomData,
        }
    }
}

impl<P: ?Sized> Default for ChildResource<P> {
    fn default() -> Self {
        Self::unbound()
    }
}

impl<P: ?Sized> Drop for ChildResource<P> {
    fn drop(&mut self) {
        self.free_resources();
    }
}

impl<P: ?Sized> fmt::Debug for ChildResource<P> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.link {
            Some(link) => f
                .debug_struct("ChildResource")
                .field("kind", &link.kind)
                .field("valid", &self.is_valid())
                .finish(),
            None => f.write_str("ChildResource(unbound)"),
        }
    }
}
