//! The managed heap for arrays and structs living outside linear memory.
//!
//! A stop-the-world mark-sweep collector over an intrusive singly linked
//! list of heap objects. Reference slots hold the raw address of the
//! object's allocation, so a hash set of live addresses gives an O(1)
//! answer to "is this 64-bit word the address of a managed object", which
//! the root scan uses as the last step of its conservative filter.
//!
//! Roots are the operand-stack ranges of the active invocations (a LIFO
//! stack, pushed and popped around each top-level execution) and the
//! active context's globals. A word is followed only if it is non-zero,
//! not the null-reference pattern, not a tagged funcref, pointer-aligned
//! and present in the address set; under those conditions false positives
//! are impossible and every live managed pointer is found because it was
//! inserted at allocation and removed at free.

use std::collections::HashSet;
use wasm5_core::{UntypedValue, FUNCREF_TAG, REF_NULL};

/// Collections start once this many allocations have happened since the
/// last one; the threshold doubles while the live count stays high.
const COLLECT_THRESHOLD: usize = 512;

/// What a managed object is.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum HeapKind {
    /// A `(ref array)` value with 64-bit element slots.
    Array,
    /// A `(ref struct)` value with 64-bit field slots.
    Struct,
}

struct GcObject {
    type_idx: u32,
    kind: HeapKind,
    mark: bool,
    age: u8,
    next: *mut GcObject,
    slots: Box<[UntypedValue]>,
}

type RootRange = (*const UntypedValue, usize);

/// The managed heap shared by every context of a [`Store`](crate::Store).
pub struct Heap {
    head: *mut GcObject,
    ptrs: HashSet<usize>,
    num_objects: usize,
    allocs_since_collect: usize,
    collect_threshold: usize,
    collect_disabled: bool,
    stack_roots: Vec<RootRange>,
    globals_root: Option<RootRange>,
}

impl core::fmt::Debug for Heap {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Heap")
            .field("num_objects", &self.num_objects)
            .field("allocs_since_collect", &self.allocs_since_collect)
            .field("collect_threshold", &self.collect_threshold)
            .field("collect_disabled", &self.collect_disabled)
            .finish()
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self {
            head: core::ptr::null_mut(),
            ptrs: HashSet::new(),
            num_objects: 0,
            allocs_since_collect: 0,
            collect_threshold: COLLECT_THRESHOLD,
            collect_disabled: false,
            stack_roots: Vec::new(),
            globals_root: None,
        }
    }

    /// Number of currently live objects.
    pub fn num_objects(&self) -> usize {
        self.num_objects
    }

    /// Returns `true` if `value` is the address of a live managed object.
    pub fn is_managed(&self, value: UntypedValue) -> bool {
        self.is_candidate(value.to_bits())
    }

    #[inline]
    fn is_candidate(&self, bits: u64) -> bool {
        if bits == 0 || bits == REF_NULL {
            return false;
        }
        if bits & FUNCREF_TAG != 0 {
            return false;
        }
        if bits & (core::mem::align_of::<GcObject>() as u64 - 1) != 0 {
            return false;
        }
        self.ptrs.contains(&(bits as usize))
    }

    fn object(&self, value: UntypedValue) -> Option<&GcObject> {
        if !self.is_candidate(value.to_bits()) {
            return None;
        }
        // SAFETY: the address set contains exactly the live objects this
        // heap allocated; a contained address points at a valid GcObject.
        Some(unsafe { &*(value.to_bits() as *const GcObject) })
    }

    fn object_mut(&mut self, value: UntypedValue) -> Option<&mut GcObject> {
        if !self.is_candidate(value.to_bits()) {
            return None;
        }
        // SAFETY: as in `object`, plus `&mut self` guarantees exclusivity.
        Some(unsafe { &mut *(value.to_bits() as *mut GcObject) })
    }

    /// The kind of a managed object.
    pub fn kind(&self, value: UntypedValue) -> Option<HeapKind> {
        self.object(value).map(|obj| obj.kind)
    }

    /// The type index recorded at allocation.
    pub fn type_idx(&self, value: UntypedValue) -> Option<u32> {
        self.object(value).map(|obj| obj.type_idx)
    }

    /// The element count of an array or the field count of a struct.
    pub fn length(&self, value: UntypedValue) -> Option<usize> {
        self.object(value).map(|obj| obj.slots.len())
    }

    /// Reads element or field `index`.
    pub fn get_slot(&self, value: UntypedValue, index: usize) -> Option<UntypedValue> {
        self.object(value)
            .and_then(|obj| obj.slots.get(index).copied())
    }

    /// Writes element or field `index`; `false` if no such object or slot.
    pub fn set_slot(&mut self, value: UntypedValue, index: usize, slot: UntypedValue) -> bool {
        match self
            .object_mut(value)
            .and_then(|obj| obj.slots.get_mut(index))
        {
            Some(cell) => {
                *cell = slot;
                true
            }
            None => false,
        }
    }

    fn register(&mut self, object: Box<GcObject>) -> Option<UntypedValue> {
        let ptr = Box::into_raw(object);
        // SAFETY: freshly created by `Box::into_raw`.
        unsafe { (*ptr).next = self.head };
        self.head = ptr;
        self.num_objects += 1;
        self.allocs_since_collect += 1;
        if self.ptrs.try_reserve(1).is_err() {
            // Without the address in the set the object can never be
            // proven reachable, so collecting any further would risk
            // freeing live data. Leak instead.
            log::warn!("managed heap address set exhausted; disabling collection");
            self.collect_disabled = true;
        } else {
            self.ptrs.insert(ptr as usize);
        }
        Some(UntypedValue::from_bits(ptr as u64))
    }

    fn maybe_collect(&mut self) {
        if !self.collect_disabled && self.allocs_since_collect >= self.collect_threshold {
            self.collect();
        }
    }

    fn alloc(
        &mut self,
        type_idx: u32,
        kind: HeapKind,
        slots: Box<[UntypedValue]>,
    ) -> Option<UntypedValue> {
        self.maybe_collect();
        self.register(Box::new(GcObject {
            type_idx,
            kind,
            mark: false,
            age: 0,
            next: core::ptr::null_mut(),
            slots,
        }))
    }

    /// Allocates an array with every element set to `init`.
    ///
    /// Returns `None` for a negative length; the caller turns that and
    /// allocation failure into a trap.
    pub fn alloc_array(
        &mut self,
        type_idx: u32,
        length: i32,
        init: UntypedValue,
    ) -> Option<UntypedValue> {
        if length < 0 {
            return None;
        }
        self.alloc(
            type_idx,
            HeapKind::Array,
            vec![init; length as usize].into_boxed_slice(),
        )
    }

    /// Allocates an array from the given element values.
    pub fn alloc_array_from_values(
        &mut self,
        type_idx: u32,
        values: &[UntypedValue],
    ) -> Option<UntypedValue> {
        self.alloc(type_idx, HeapKind::Array, values.into())
    }

    /// Allocates a struct with zeroed fields.
    pub fn alloc_struct(&mut self, type_idx: u32, field_count: i32) -> Option<UntypedValue> {
        if field_count < 0 {
            return None;
        }
        self.alloc(
            type_idx,
            HeapKind::Struct,
            vec![UntypedValue::default(); field_count as usize].into_boxed_slice(),
        )
    }

    /// Allocates a struct from the given field values.
    pub fn alloc_struct_from_values(
        &mut self,
        type_idx: u32,
        values: &[UntypedValue],
    ) -> Option<UntypedValue> {
        self.alloc(type_idx, HeapKind::Struct, values.into())
    }

    /// Registers an operand-stack range as a GC root.
    ///
    /// Ranges nest LIFO around top-level executions. The registered
    /// memory must stay valid until the matching [`Heap::pop_stack_root`].
    pub(crate) fn push_stack_root(&mut self, base: *const UntypedValue, slots: usize) {
        if self.stack_roots.try_reserve(1).is_err() {
            log::warn!("managed heap root registration failed; disabling collection");
            self.collect_disabled = true;
            return;
        }
        self.stack_roots.push((base, slots));
    }

    /// Unregisters the most recently pushed stack range.
    pub(crate) fn pop_stack_root(&mut self) {
        self.stack_roots.pop();
    }

    /// Installs the globals root of the now-active context, returning the
    /// previous registration so the caller can restore it LIFO.
    pub(crate) fn set_globals_root(&mut self, root: Option<RootRange>) -> Option<RootRange> {
        core::mem::replace(&mut self.globals_root, root)
    }

    fn mark_from_roots(&mut self, worklist: &mut Vec<*mut GcObject>) {
        let mut ranges = self.stack_roots.clone();
        if let Some(globals) = self.globals_root {
            ranges.push(globals);
        }
        for (base, slots) in ranges {
            if base.is_null() {
                continue;
            }
            for i in 0..slots {
                // SAFETY: registered ranges outlive their registration by
                // contract, and single-threaded execution means nothing
                // mutates them during collection.
                let word = unsafe { core::ptr::read(base.add(i)) };
                self.mark_value(word, worklist);
            }
        }
    }

    fn mark_value(&mut self, value: UntypedValue, worklist: &mut Vec<*mut GcObject>) {
        if !self.is_candidate(value.to_bits()) {
            return;
        }
        let ptr = value.to_bits() as *mut GcObject;
        // SAFETY: candidate addresses are live objects of this heap.
        unsafe {
            if !(*ptr).mark {
                (*ptr).mark = true;
                worklist.push(ptr);
            }
        }
    }

    /// Runs a full mark-sweep collection.
    pub fn collect(&mut self) {
        if self.collect_disabled {
            return;
        }
        if self.num_objects == 0 {
            self.allocs_since_collect = 0;
            return;
        }
        let mut worklist: Vec<*mut GcObject> = Vec::new();
        if worklist.try_reserve(self.num_objects).is_err() {
            return;
        }

        self.mark_from_roots(&mut worklist);
        while let Some(ptr) = worklist.pop() {
            // SAFETY: only live marked objects enter the worklist, and
            // marking other objects does not touch this object's slots.
            let len = unsafe { (&(*ptr).slots).len() };
            for i in 0..len {
                let slot = unsafe { (*ptr).slots[i] };
                self.mark_value(slot, &mut worklist);
            }
        }

        self.sweep();

        self.allocs_since_collect = 0;
        if self.num_objects > self.collect_threshold / 2 {
            self.collect_threshold *= 2;
        }
    }

    fn sweep(&mut self) {
        let mut link: *mut *mut GcObject = &mut self.head;
        // SAFETY: the linked list threads exactly the objects this heap
        // allocated with Box::into_raw; unlinked objects go back into a
        // Box to be freed.
        unsafe {
            while !(*link).is_null() {
                let obj = *link;
                if (*obj).mark {
                    (*obj).mark = false;
                    (*obj).age = (*obj).age.saturating_add(1);
                    link = &mut (*obj).next;
                } else {
                    *link = (*obj).next;
                    self.ptrs.remove(&(obj as usize));
                    self.num_objects -= 1;
                    drop(Box::from_raw(obj));
                }
            }
        }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut obj = self.head;
        // SAFETY: as in `sweep`; dropping the heap frees every object.
        unsafe {
            while !obj.is_null() {
                let next = (*obj).next;
                drop(Box::from_raw(obj));
                obj = next;
            }
        }
    }
}
