//! Bump-pointer allocator for allocation-heavy structures that live and die
//! together.
//!
//! An in-memory write buffer makes thousands of small, oddly-sized
//! allocations and then frees every one of them at the same moment, when the
//! buffer is flushed. A general-purpose allocator pays for individual
//! lifetimes nobody needs. The arena instead carves allocations out of 4 KiB
//! blocks with a pointer bump and frees everything at once on drop.

use std::alloc::{Layout, alloc_zeroed, dealloc, handle_alloc_error};
use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::slice;

const BLOCK_SIZE: usize = 4096;

/// Blocks are allocated with this alignment so aligned carve-outs only need
/// pointer arithmetic within a block.
const BLOCK_ALIGN: usize = 8;

pub struct Arena {
    /// Next free byte in the current block.
    alloc_ptr: Cell<*mut u8>,
    /// Bytes left in the current block.
    remaining: Cell<usize>,
    blocks: RefCell<Vec<(NonNull<u8>, Layout)>>,
    usage: Cell<usize>,
}

impl Arena {
    pub fn new() -> Arena {
        Arena {
            alloc_ptr: Cell::new(std::ptr::null_mut()),
            remaining: Cell::new(0),
            blocks: RefCell::new(Vec::new()),
            usage: Cell::new(0),
        }
    }

    /// Carve `len` zeroed bytes out of the arena.
    ///
    /// The slice lives as long as the arena does. Zero-length requests are
    /// answered with an empty slice without touching any block.
    pub fn alloc_bytes(&self, len: usize) -> &mut [u8] {
        if len == 0 {
            return &mut [];
        }
        let ptr = if len <= self.remaining.get() {
            let ptr = self.alloc_ptr.get();
            // Safety: `remaining` bytes past alloc_ptr are inside the
            // current block and have not been handed out.
            self.alloc_ptr.set(unsafe { ptr.add(len) });
            self.remaining.set(self.remaining.get() - len);
            ptr
        } else {
            self.alloc_fallback(len)
        };
        // Safety: the region is len bytes of zeroed memory used by no other
        // allocation, and it stays valid until the arena is dropped.
        unsafe { slice::from_raw_parts_mut(ptr, len) }
    }

    /// Like `alloc_bytes`, but the slice start is aligned for pointer-sized
    /// data. Node-based structures store their links here.
    pub fn alloc_aligned(&self, len: usize) -> &mut [u8] {
        if len == 0 {
            return &mut [];
        }
        let current = self.alloc_ptr.get() as usize;
        let slop = (BLOCK_ALIGN - current % BLOCK_ALIGN) % BLOCK_ALIGN;
        let needed = len + slop;
        let ptr = if needed <= self.remaining.get() {
            // Safety: slop + len bytes fit in the current block.
            let ptr = unsafe { self.alloc_ptr.get().add(slop) };
            self.alloc_ptr.set(unsafe { ptr.add(len) });
            self.remaining.set(self.remaining.get() - needed);
            ptr
        } else {
            // Fresh blocks are always block-aligned
            self.alloc_fallback(len)
        };
        debug_assert_eq!(ptr as usize % BLOCK_ALIGN, 0);
        // Safety: as in alloc_bytes.
        unsafe { slice::from_raw_parts_mut(ptr, len) }
    }

    /// Total bytes held by the arena, bookkeeping included.
    pub fn memory_usage(&self) -> usize {
        self.usage.get()
    }

    fn alloc_fallback(&self, len: usize) -> *mut u8 {
        if len > BLOCK_SIZE / 4 {
            // Big request: give it a dedicated block and keep bumping the
            // current one, so its tail isn't wasted.
            return self.new_block(len);
        }

        // Start a fresh block; whatever was left of the old one is wasted
        let ptr = self.new_block(BLOCK_SIZE);
        // Safety: len <= BLOCK_SIZE, so the bump stays inside the block.
        self.alloc_ptr.set(unsafe { ptr.add(len) });
        self.remaining.set(BLOCK_SIZE - len);
        ptr
    }

    fn new_block(&self, block_bytes: usize) -> *mut u8 {
        let layout = match Layout::from_size_align(block_bytes, BLOCK_ALIGN) {
            Ok(layout) => layout,
            Err(_) => handle_alloc_error(Layout::new::<u8>()),
        };
        // Safety: layout has non-zero size.
        let raw = unsafe { alloc_zeroed(layout) };
        let Some(ptr) = NonNull::new(raw) else {
            handle_alloc_error(layout);
        };
        self.blocks.borrow_mut().push((ptr, layout));
        self.usage.set(
            self.usage.get() + block_bytes + std::mem::size_of::<(NonNull<u8>, Layout)>(),
        );
        ptr.as_ptr()
    }
}

impl Default for Arena {
    fn default() -> Arena {
        Arena::new()
    }
}

impl Drop for Arena {
    fn drop(&mut self) {
        for &(ptr, layout) in self.blocks.borrow().iter() {
            // Safety: each block was allocated with exactly this layout and
            // is freed once, here.
            unsafe { dealloc(ptr.as_ptr(), layout) };
        }
    }
}
