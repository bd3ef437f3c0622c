//! Tracked Objects
//!
//! [`Obj`] is a shared-handle dynamic object: ordered own entries plus an
//! optional prototype. A handle is either **plain**, where operations touch the
//! underlying storage and nothing else, or an **encased view** produced by
//! [`encase`], whose operations additionally mark reads and changes through
//! the tracking engine:
//!
//! - `get`/`get_own` mark the specific key read; `has`, `keys`, `len` mark
//!   the shape sentinel; `proto` marks the prototype sentinel.
//! - `set`, `remove` and `set_proto` perform the raw operation first, then
//!   compare before/after state to decide what actually changed: a value
//!   change marks the key, a presence change additionally marks the shape,
//!   and a prototype change marks the prototype sentinel.
//!
//! All views of one object share the object's identity, so watchers
//! registered through any view observe writes made through any other.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use parking_lot::RwLock;

use super::dynamic::Dynamic;
use crate::key::{Key, TargetId};
use crate::track::{mark_change, mark_read};

/// Recursive wrapping depth for values read out of an encased view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Nest {
    /// Escape hatch: every operation on the view bypasses tracking.
    Off,
    /// Re-encase values this many further levels; `Depth(0)` is shallow.
    Depth(u32),
    /// Re-encase without limit.
    Deep,
}

impl Default for Nest {
    fn default() -> Self {
        Nest::Depth(0)
    }
}

struct RawObj {
    id: TargetId,
    entries: RwLock<IndexMap<Arc<str>, Dynamic>>,
    /// Prototype link, always stored as a plain handle.
    proto: RwLock<Option<Obj>>,
}

/// A dynamic object handle: plain, or an encased (tracked) view.
pub struct Obj {
    raw: Arc<RawObj>,
    view: Option<Nest>,
}

impl Obj {
    /// Create a new empty plain object.
    pub fn new() -> Self {
        Self {
            raw: Arc::new(RawObj {
                id: TargetId::new(),
                entries: RwLock::new(IndexMap::new()),
                proto: RwLock::new(None),
            }),
            view: None,
        }
    }

    /// The identity under which this object is tracked. Shared by every
    /// view of the same object.
    pub fn id(&self) -> TargetId {
        self.raw.id
    }

    /// True for handles produced by [`encase`], including `Nest::Off` ones.
    pub fn is_encased(&self) -> bool {
        self.view.is_some()
    }

    fn is_tracking(&self) -> bool {
        matches!(self.view, Some(nest) if nest != Nest::Off)
    }

    /// Apply this view's nest mode to a value read out of it.
    fn descend(&self, value: Dynamic) -> Dynamic {
        match self.view {
            Some(Nest::Deep) => encase_dyn(value, Nest::Deep),
            Some(Nest::Depth(depth)) if depth > 0 => encase_dyn(value, Nest::Depth(depth - 1)),
            _ => value,
        }
    }

    fn descend_obj(&self, obj: Obj) -> Obj {
        match self.view {
            Some(Nest::Deep) => encase(&obj, Nest::Deep),
            Some(Nest::Depth(depth)) if depth > 0 => encase(&obj, Nest::Depth(depth - 1)),
            _ => obj,
        }
    }

    fn raw_get(&self, key: &str) -> Option<Dynamic> {
        if let Some(value) = self.raw.entries.read().get(key) {
            return Some(value.clone());
        }
        let proto = self.raw.proto.read().clone();
        proto.and_then(|proto| proto.raw_get(key))
    }

    fn raw_get_own(&self, key: &str) -> Option<Dynamic> {
        self.raw.entries.read().get(key).cloned()
    }

    fn raw_has(&self, key: &str) -> bool {
        if self.raw.entries.read().contains_key(key) {
            return true;
        }
        let proto = self.raw.proto.read().clone();
        proto.is_some_and(|proto| proto.raw_has(key))
    }

    /// Read a property, searching the prototype chain.
    pub fn get(&self, key: &str) -> Option<Dynamic> {
        if self.is_tracking() {
            mark_read(self.raw.id, key);
            self.raw_get(key).map(|value| self.descend(value))
        } else {
            self.raw_get(key)
        }
    }

    /// Read an own property only.
    pub fn get_own(&self, key: &str) -> Option<Dynamic> {
        if self.is_tracking() {
            mark_read(self.raw.id, key);
            self.raw_get_own(key).map(|value| self.descend(value))
        } else {
            self.raw_get_own(key)
        }
    }

    /// Write an own property.
    ///
    /// On a tracking view the key is marked changed only when the recovered
    /// value actually differs, and the shape sentinel is marked when the
    /// write introduced a previously absent key.
    pub fn set(&self, key: impl Into<Arc<str>>, value: impl Into<Dynamic>) {
        let key = key.into();
        let value = value.into();

        if !self.is_tracking() {
            self.raw.entries.write().insert(key, value);
            return;
        }

        let had = self.raw_has(&key);
        let old = self.raw_get(&key);
        self.raw.entries.write().insert(key.clone(), value.clone());

        if !had {
            mark_change(self.raw.id, Key::Shape);
        }
        let changed = match old {
            None => true,
            Some(old) => !equal(&old, &value),
        };
        if changed {
            mark_change(self.raw.id, key);
        }
    }

    /// Delete an own property. Returns true if an entry was removed.
    pub fn remove(&self, key: &str) -> bool {
        if !self.is_tracking() {
            return self.raw.entries.write().shift_remove(key).is_some();
        }

        let had = self.raw_has(key);
        let removed = self.raw.entries.write().shift_remove(key).is_some();
        if had && !self.raw_has(key) {
            mark_change(self.raw.id, key);
            mark_change(self.raw.id, Key::Shape);
        }
        removed
    }

    /// Presence check, searching the prototype chain.
    pub fn has(&self, key: &str) -> bool {
        if self.is_tracking() {
            mark_read(self.raw.id, Key::Shape);
        }
        self.raw_has(key)
    }

    /// Own keys, in insertion order.
    pub fn keys(&self) -> Vec<Arc<str>> {
        if self.is_tracking() {
            mark_read(self.raw.id, Key::Shape);
        }
        self.raw.entries.read().keys().cloned().collect()
    }

    /// Number of own entries.
    pub fn len(&self) -> usize {
        if self.is_tracking() {
            mark_read(self.raw.id, Key::Shape);
        }
        self.raw.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The prototype object, if any.
    pub fn proto(&self) -> Option<Obj> {
        if self.is_tracking() {
            mark_read(self.raw.id, Key::Proto);
            let proto = self.raw.proto.read().clone();
            proto.map(|proto| self.descend_obj(proto))
        } else {
            self.raw.proto.read().clone()
        }
    }

    /// Replace the prototype link. Marks the prototype sentinel only when
    /// the link actually changes.
    pub fn set_proto(&self, proto: Option<Obj>) {
        let proto = proto.map(|proto| recover(&proto));

        if !self.is_tracking() {
            *self.raw.proto.write() = proto;
            return;
        }

        let changed = {
            let mut slot = self.raw.proto.write();
            let changed = match (slot.as_ref(), proto.as_ref()) {
                (None, None) => false,
                (Some(old), Some(new)) => !Arc::ptr_eq(&old.raw, &new.raw),
                _ => true,
            };
            *slot = proto;
            changed
        };
        if changed {
            mark_change(self.raw.id, Key::Proto);
        }
    }

    /// Untracked snapshot of the own entries, in insertion order.
    pub(crate) fn entries_snapshot(&self) -> Vec<(Arc<str>, Dynamic)> {
        self.raw
            .entries
            .read()
            .iter()
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect()
    }
}

impl Default for Obj {
    fn default() -> Self {
        Self::new()
    }
}

impl Clone for Obj {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            view: self.view,
        }
    }
}

/// Strict equality: same underlying object and same view mode. For
/// view-transparent comparison, compare recovered handles or use
/// [`equal`].
impl PartialEq for Obj {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.raw, &other.raw) && self.view == other.view
    }
}

impl fmt::Debug for Obj {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Obj")
            .field("id", &self.raw.id.raw())
            .field("view", &self.view)
            .field("len", &self.raw.entries.read().len())
            .finish()
    }
}

/// Wrap an object in a tracked view with the given nest mode.
///
/// Operates on the underlying object, so encasing an already encased
/// handle yields a fresh view of the same object rather than a view of a
/// view.
pub fn encase(obj: &Obj, nest: Nest) -> Obj {
    Obj {
        raw: Arc::clone(&obj.raw),
        view: Some(nest),
    }
}

/// [`encase`] mapped over [`Dynamic`]: primitives pass through unchanged.
pub fn encase_dyn(value: Dynamic, nest: Nest) -> Dynamic {
    match value {
        Dynamic::Obj(obj) => Dynamic::Obj(encase(&obj, nest)),
        other => other,
    }
}

/// The plain handle behind a view. Idempotent: a plain handle passes
/// through unchanged. Never marks a read.
pub fn recover(obj: &Obj) -> Obj {
    Obj {
        raw: Arc::clone(&obj.raw),
        view: None,
    }
}

/// [`recover`] mapped over [`Dynamic`].
pub fn recover_dyn(value: Dynamic) -> Dynamic {
    match value {
        Dynamic::Obj(obj) => Dynamic::Obj(recover(&obj)),
        other => other,
    }
}

/// View-transparent equality: object references compare by underlying
/// identity, primitives by value.
pub fn equal(a: &Dynamic, b: &Dynamic) -> bool {
    match (a, b) {
        (Dynamic::Obj(a), Dynamic::Obj(b)) => Arc::ptr_eq(&a.raw, &b.raw),
        _ => a == b,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::track::{observe, watch_prop, ReadMap};
    use std::sync::atomic::{AtomicI32, Ordering};
    use std::sync::Arc;

    #[test]
    fn recover_returns_the_plain_handle() {
        let obj = Obj::new();
        let view = encase(&obj, Nest::default());

        assert_ne!(view, obj);
        assert_eq!(recover(&view), obj);
        assert_eq!(recover(&obj), obj);
        assert!(equal(
            &Dynamic::from(view.clone()),
            &Dynamic::from(obj.clone())
        ));
    }

    #[test]
    fn plain_handles_do_not_track() {
        let obj = Obj::new();
        obj.set("x", 1i64);

        let map = ReadMap::new();
        observe(&map, || {
            obj.get("x");
            obj.keys();
        });
        assert!(map.is_empty());
    }

    #[test]
    fn reads_through_a_view_are_recorded() {
        let obj = Obj::new();
        obj.set("x", 1i64);
        let view = encase(&obj, Nest::default());

        let map = ReadMap::new();
        observe(&map, || {
            view.get("x");
            view.has("y");
            view.proto();
        });

        assert_eq!(
            map.keys_of(obj.id()),
            vec![Key::prop("x"), Key::Shape, Key::Proto]
        );
    }

    #[test]
    fn writes_through_a_view_notify_watchers() {
        let obj = Obj::new();
        obj.set("x", 1i64);
        let view = encase(&obj, Nest::default());

        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let _watch = watch_prop(
            obj.id(),
            "x",
            move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        view.set("x", 2i64);
        assert_eq!(count.load(Ordering::SeqCst), 1);

        // Unchanged write: no notification.
        view.set("x", 2i64);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn new_key_marks_shape_as_well() {
        let obj = Obj::new();
        let view = encase(&obj, Nest::default());

        let shape = Arc::new(AtomicI32::new(0));
        let shape_clone = shape.clone();
        let _watch = watch_prop(
            obj.id(),
            true,
            move || {
                shape_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        view.set("fresh", 1i64);
        assert_eq!(shape.load(Ordering::SeqCst), 1);

        // Existing key: shape unchanged.
        view.set("fresh", 2i64);
        assert_eq!(shape.load(Ordering::SeqCst), 1);

        view.remove("fresh");
        assert_eq!(shape.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn off_views_bypass_tracking_entirely() {
        let obj = Obj::new();
        obj.set("x", 1i64);
        let off = encase(&obj, Nest::Off);

        let map = ReadMap::new();
        let count = Arc::new(AtomicI32::new(0));
        let count_clone = count.clone();
        let _watch = watch_prop(
            obj.id(),
            "x",
            move || {
                count_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        observe(&map, || {
            off.get("x");
            off.set("x", 99i64);
        });

        assert!(map.is_empty());
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(obj.get("x"), Some(Dynamic::from(99i64)));
    }

    #[test]
    fn nest_depth_controls_recursive_encasing() {
        let inner = Obj::new();
        inner.set("leaf", 1i64);
        let middle = Obj::new();
        middle.set("inner", inner.clone());
        let outer = Obj::new();
        outer.set("middle", middle.clone());

        let shallow = encase(&outer, Nest::Depth(0));
        let got = shallow.get("middle").unwrap();
        assert!(!got.as_obj().unwrap().is_encased());

        let one = encase(&outer, Nest::Depth(1));
        let got = one.get("middle").unwrap();
        let middle_view = got.as_obj().unwrap();
        assert!(middle_view.is_encased());
        let got = middle_view.get("inner").unwrap();
        assert!(!got.as_obj().unwrap().is_encased());

        let deep = encase(&outer, Nest::Deep);
        let got = deep.get("middle").unwrap();
        let middle_view = got.as_obj().unwrap().clone();
        let got = middle_view.get("inner").unwrap();
        assert!(got.as_obj().unwrap().is_encased());
    }

    #[test]
    fn views_share_identity_for_watching() {
        let obj = Obj::new();
        obj.set("x", 1i64);
        let a = encase(&obj, Nest::default());
        let b = encase(&obj, Nest::default());

        let map = ReadMap::new();
        observe(&map, || {
            a.get("x");
        });

        // A read through one view and a write through another meet at the
        // underlying object's identity.
        assert!(map.contains(b.id(), "x"));
        assert_eq!(a.id(), b.id());
    }

    #[test]
    fn prototype_chain_lookup_and_change() {
        let base = Obj::new();
        base.set("inherited", 7i64);
        let obj = Obj::new();
        obj.set_proto(Some(base.clone()));

        let view = encase(&obj, Nest::default());
        assert_eq!(view.get("inherited"), Some(Dynamic::from(7i64)));

        let proto_changes = Arc::new(AtomicI32::new(0));
        let proto_clone = proto_changes.clone();
        let _watch = watch_prop(
            obj.id(),
            false,
            move || {
                proto_clone.fetch_add(1, Ordering::SeqCst);
            },
            false,
        );

        // Same prototype: no notification.
        view.set_proto(Some(base.clone()));
        assert_eq!(proto_changes.load(Ordering::SeqCst), 0);

        view.set_proto(None);
        assert_eq!(proto_changes.load(Ordering::SeqCst), 1);
    }
}
