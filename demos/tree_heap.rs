//! Interactive demo of `TreeHeap` installed as the process's global
//! allocator: a handful of allocations, a resize, and frees, with the
//! address of each printed so the tree-backed reuse is visible.

use std::alloc::Layout;
use treealloc::TreeHeap;

#[global_allocator]
static ALLOC: TreeHeap = TreeHeap::new();

fn main() {
    unsafe {
        let layout = Layout::from_size_align(64, 8).unwrap();
        let a = std::alloc::alloc(layout);
        println!("alloc(64)  -> {a:?}");

        let b = std::alloc::alloc(layout);
        println!("alloc(64)  -> {b:?}");

        std::alloc::dealloc(a, layout);
        println!("free(a)");

        let c = std::alloc::alloc(layout);
        println!("alloc(64)  -> {c:?} (reuses a's region: {})", c == a);

        let grown = std::alloc::realloc(c, layout, 4096);
        println!("realloc(c, 4096) -> {grown:?}");

        std::alloc::dealloc(grown, Layout::from_size_align(4096, 8).unwrap());
        std::alloc::dealloc(b, layout);
        println!("done");
    }
}
