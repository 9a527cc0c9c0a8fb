//! The object arena.
//!
//! All live objects sit in an index-addressed slot vector; `ObjRef`
//! handles stay valid across growth, so the collector never rewrites
//! pointers. Mark bits live in a side bitset, pinned ("stale") objects
//! survive every sweep, and the string intern table is held here so the
//! interner and the collector share it.

use ahash::RandomState;
use hashbrown::HashSet;

use crate::core::object::{Object, StrObj};
use crate::core::table::{Table, TableKey};
use crate::core::value::{hash_string, ObjRef, Value};

/// Allocation-byte threshold that first triggers collection; 0 disables
/// the collector entirely.
pub const DEFAULT_GC_START: usize = 1024 * 1024;
/// Post-sweep threshold growth.
pub const GC_HEAP_GROWTH: f64 = 1.25;

pub struct Heap {
    slots: Vec<Option<Object>>,
    free: Vec<u32>,
    marks: Vec<u64>,
    pinned: HashSet<u32, RandomState>,
    /// Weak intern table: string content -> the canonical object.
    pub(crate) strings: Table,
    pub(crate) bytes_allocated: usize,
    pub(crate) next_gc: usize,
    /// Mark-phase worklist of marked-but-untraced objects.
    pub(crate) gray: Vec<ObjRef>,
    /// Protection for values with no stack frame to live on (natives,
    /// module registration).
    pub(crate) stash: Vec<Value>,
}

impl Heap {
    pub fn new(gc_start: usize) -> Heap {
        Heap {
            slots: Vec::with_capacity(256),
            free: Vec::new(),
            marks: Vec::new(),
            pinned: HashSet::default(),
            strings: Table::new(),
            bytes_allocated: 0,
            next_gc: gc_start,
            gray: Vec::new(),
            stash: Vec::new(),
        }
    }

    /// True when the allocator should collect before the next insert.
    pub fn should_collect(&self) -> bool {
        self.next_gc > 0 && self.bytes_allocated > self.next_gc
    }

    /// Link a fresh object into the arena. Collection decisions happen in
    /// the allocator above this; by the time we are here the slot is
    /// taken unconditionally.
    pub fn insert(&mut self, obj: Object) -> ObjRef {
        self.bytes_allocated += obj.size_estimate();
        match self.free.pop() {
            Some(index) => {
                debug_assert!(self.slots[index as usize].is_none());
                self.slots[index as usize] = Some(obj);
                ObjRef(index)
            }
            None => {
                self.slots.push(Some(obj));
                ObjRef((self.slots.len() - 1) as u32)
            }
        }
    }

    pub fn get(&self, r: ObjRef) -> &Object {
        self.slots[r.0 as usize]
            .as_ref()
            .expect("object was garbage collected")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Object {
        self.slots[r.0 as usize]
            .as_mut()
            .expect("object was garbage collected")
    }

    pub fn live_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    // ---- typed accessors ---------------------------------------------

    pub fn try_str(&self, r: ObjRef) -> Option<&StrObj> {
        match self.get(r) {
            Object::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn str_value(&self, r: ObjRef) -> &str {
        self.try_str(r).expect("string object").as_str()
    }

    /// String contents of a value, if it is one.
    pub fn value_str(&self, v: Value) -> Option<&str> {
        match v {
            Value::Obj(r) => self.try_str(r).map(StrObj::as_str),
            _ => None,
        }
    }

    // ---- interning ----------------------------------------------------

    /// Canonicalize string content without allocating when it is already
    /// interned. New strings are inserted by `Runtime::intern`, which
    /// routes the allocation through the collector first.
    pub fn find_interned(&self, s: &str, hash: u32) -> Option<ObjRef> {
        self.strings.find_string(hash, |r| self.str_value(r) == s)
    }

    pub(crate) fn register_interned(&mut self, r: ObjRef) {
        let hash = self.try_str(r).expect("interned object is a string").hash;
        self.strings.set_value(TableKey::Str { obj: r, hash }, Value::Empty);
    }

    /// Table key for a string value, interning it if necessary. Only
    /// used through `Runtime`, which supplies allocation.
    pub fn str_key(&self, r: ObjRef) -> TableKey {
        let hash = self.try_str(r).expect("key is a string").hash;
        TableKey::Str { obj: r, hash }
    }

    // ---- pinning and stash -------------------------------------------

    /// Keep an object alive across every collection until unpinned.
    pub fn pin(&mut self, r: ObjRef) {
        self.pinned.insert(r.0);
    }

    pub fn unpin(&mut self, r: ObjRef) {
        self.pinned.remove(&r.0);
    }

    pub fn stash_push(&mut self, v: Value) {
        self.stash.push(v);
    }

    pub fn stash_pop(&mut self) -> Option<Value> {
        self.stash.pop()
    }

    // ---- mark bits ----------------------------------------------------

    pub(crate) fn clear_marks(&mut self) {
        self.marks.clear();
        self.marks.resize((self.slots.len() + 63) / 64, 0);
    }

    pub(crate) fn is_marked(&self, r: ObjRef) -> bool {
        let word = (r.0 >> 6) as usize;
        let bit = r.0 & 63;
        self.marks.get(word).is_some_and(|w| w & (1 << bit) != 0)
    }

    /// Set the mark bit; false when it was already set.
    pub(crate) fn set_mark(&mut self, r: ObjRef) -> bool {
        let word = (r.0 >> 6) as usize;
        let bit = r.0 & 63;
        if word >= self.marks.len() {
            self.marks.resize(word + 1, 0);
        }
        let mask = 1u64 << bit;
        if self.marks[word] & mask != 0 {
            return false;
        }
        self.marks[word] |= mask;
        true
    }

    pub(crate) fn mark_pinned(&mut self) {
        let pinned: Vec<u32> = self.pinned.iter().copied().collect();
        for index in pinned {
            let r = ObjRef(index);
            if self.set_mark(r) {
                self.gray.push(r);
            }
        }
    }

    /// Drop dying strings out of the intern table so sweep cannot leave
    /// dangling canonical entries.
    pub(crate) fn purge_unmarked_strings(&mut self) {
        let marks = std::mem::take(&mut self.marks);
        self.strings.retain_keys(|key| match key {
            TableKey::Str { obj, .. } => {
                let word = (obj.0 >> 6) as usize;
                let bit = obj.0 & 63;
                marks.get(word).is_some_and(|w| w & (1 << bit) != 0)
            }
            _ => true,
        });
        self.marks = marks;
    }

    /// Reclaim every unmarked, unpinned slot. Teardown is the variant's
    /// own `Drop`, which never touches other heap slots; the
    /// use-after-free sweep-ordering hazard cannot occur by construction.
    pub(crate) fn sweep(&mut self) {
        let mut live_bytes = 0;
        self.free.clear();
        for index in 0..self.slots.len() {
            let r = ObjRef(index as u32);
            match &self.slots[index] {
                Some(obj) => {
                    if self.is_marked(r) || self.pinned.contains(&r.0) {
                        live_bytes += obj.size_estimate();
                    } else {
                        self.slots[index] = None;
                        self.free.push(index as u32);
                    }
                }
                None => self.free.push(index as u32),
            }
        }
        self.bytes_allocated = live_bytes;
        if self.next_gc > 0 {
            self.next_gc = ((live_bytes as f64) * GC_HEAP_GROWTH) as usize;
            self.next_gc = self.next_gc.max(64 * 1024);
        }
    }

    /// Intern a brand-new string object directly, bypassing collection.
    /// Only for bootstrap paths that run before any roots exist.
    pub(crate) fn intern_unchecked(&mut self, s: &str) -> ObjRef {
        let hash = hash_string(s);
        if let Some(r) = self.find_interned(s, hash) {
            return r;
        }
        let r = self.insert(Object::Str(StrObj { s: s.into(), hash }));
        self.register_interned(r);
        r
    }
}
