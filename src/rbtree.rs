//! Intrusive, augmented red-black tree over caller-owned nodes.
//!
//! This is a direct descendant of the classic Linux-kernel rbtree shape:
//! the color is packed into the low bit of the parent pointer, so nodes
//! only need 2-byte alignment. Storage for every node lives inside the
//! caller's own memory (here, inside the free regions it indexes) — the
//! tree itself owns nothing and allocates nothing.
//!
//! A node type can be threaded through more than one tree at once (the
//! free-block manager keeps one node in both an address-ordered and a
//! size-ordered tree) by implementing [`RbNode`] once per `Tag`.
//!
//! The `propagate` / `copy` / `rotate` hooks on [`RbNode`] are no-ops by
//! default. They exist so a derived-metadata variant (e.g. an interval
//! tree) can reuse this same tree; the free-block manager never
//! overrides them.

use std::cmp::Ordering;
use std::marker::PhantomData;
use std::ptr;

const BLACK: usize = 1;
const RED: usize = 0;
const COLOR_MASK: usize = 1;

/// Embedded link for one tree. `Tag` distinguishes independent trees
/// threaded through the same node type.
#[repr(C)]
pub struct RbLink<T, Tag = ()> {
    parent_color: usize,
    left: *mut T,
    right: *mut T,
    _tag: PhantomData<Tag>,
}

impl<T, Tag> RbLink<T, Tag> {
    pub const fn new() -> Self {
        Self {
            parent_color: 0,
            left: ptr::null_mut(),
            right: ptr::null_mut(),
            _tag: PhantomData,
        }
    }
}

impl<T, Tag> Default for RbLink<T, Tag> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T, Tag> Clone for RbLink<T, Tag> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T, Tag> Copy for RbLink<T, Tag> {}

/// Contract a node type must satisfy to be stored in an [`RbTree`].
///
/// # Safety
/// `link` must return a pointer to a valid, live `RbLink<Self, Tag>`
/// embedded inside `*node` for as long as `node` participates in any
/// `RbTree<Self, Tag, ..>`.
pub unsafe trait RbNode<Tag = ()>: Sized {
    fn link(node: *mut Self) -> *mut RbLink<Self, Tag>;

    /// Invoked walking up from `node` towards (but not including) `stop`
    /// after a structural change. `stop` is null when there is no bound.
    fn propagate(_node: *mut Self, _stop: *mut Self) {}
    /// Invoked when `new_node` takes over `old`'s logical tree position.
    fn copy(_old: *mut Self, _new_node: *mut Self) {}
    /// Invoked after a rotation with the old and new subtree roots.
    fn rotate(_old: *mut Self, _new_node: *mut Self) {}
}

/// Keyed ordering for [`RbTree`] lookups and inserts.
pub trait Comparator<T, K> {
    fn cmp_key(key: &K, node: *const T) -> Ordering;
    fn cmp_nodes(a: *const T, b: *const T) -> Ordering;
}

unsafe fn link_of<T: RbNode<Tag>, Tag>(n: *mut T) -> *mut RbLink<T, Tag> {
    T::link(n)
}

unsafe fn parent_color<T: RbNode<Tag>, Tag>(n: *mut T) -> usize {
    unsafe { (*link_of::<T, Tag>(n)).parent_color }
}

unsafe fn parent_from_pc<T>(pc: usize) -> *mut T {
    (pc & !COLOR_MASK) as *mut T
}

unsafe fn parent_of<T: RbNode<Tag>, Tag>(n: *mut T) -> *mut T {
    unsafe { parent_from_pc(parent_color::<T, Tag>(n)) }
}

unsafe fn is_black<T: RbNode<Tag>, Tag>(n: *mut T) -> bool {
    if n.is_null() {
        return true;
    }
    unsafe { (parent_color::<T, Tag>(n) & COLOR_MASK) == BLACK }
}

unsafe fn is_red<T: RbNode<Tag>, Tag>(n: *mut T) -> bool {
    unsafe { !is_black::<T, Tag>(n) }
}

unsafe fn set_parent<T: RbNode<Tag>, Tag>(n: *mut T, p: *mut T) {
    if n.is_null() {
        return;
    }
    unsafe {
        let link = link_of::<T, Tag>(n);
        (*link).parent_color = ((*link).parent_color & COLOR_MASK) | (p as usize);
    }
}

unsafe fn set_parent_color<T: RbNode<Tag>, Tag>(n: *mut T, p: *mut T, color: usize) {
    if n.is_null() {
        return;
    }
    unsafe {
        (*link_of::<T, Tag>(n)).parent_color = (p as usize) | color;
    }
}

unsafe fn set_black<T: RbNode<Tag>, Tag>(n: *mut T) {
    unsafe {
        (*link_of::<T, Tag>(n)).parent_color |= BLACK;
    }
}

unsafe fn left<T: RbNode<Tag>, Tag>(n: *mut T) -> *mut T {
    unsafe { (*link_of::<T, Tag>(n)).left }
}

unsafe fn right<T: RbNode<Tag>, Tag>(n: *mut T) -> *mut T {
    unsafe { (*link_of::<T, Tag>(n)).right }
}

unsafe fn set_left<T: RbNode<Tag>, Tag>(n: *mut T, v: *mut T) {
    unsafe {
        (*link_of::<T, Tag>(n)).left = v;
    }
}

unsafe fn set_right<T: RbNode<Tag>, Tag>(n: *mut T, v: *mut T) {
    unsafe {
        (*link_of::<T, Tag>(n)).right = v;
    }
}

/// An ordered intrusive red-black tree, keyed by `K` via `C`, carrying
/// nodes of type `T` threaded through tree `Tag`.
pub struct RbTree<T, Tag, K, C> {
    root: *mut T,
    _tag: PhantomData<Tag>,
    _key: PhantomData<K>,
    _cmp: PhantomData<C>,
}

impl<T, Tag, K, C> Default for RbTree<T, Tag, K, C>
where
    T: RbNode<Tag>,
    C: Comparator<T, K>,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<T, Tag, K, C> RbTree<T, Tag, K, C>
where
    T: RbNode<Tag>,
    C: Comparator<T, K>,
{
    pub const fn new() -> Self {
        Self {
            root: ptr::null_mut(),
            _tag: PhantomData,
            _key: PhantomData,
            _cmp: PhantomData,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_null()
    }

    pub fn root(&self) -> *mut T {
        self.root
    }

    fn change_child(&mut self, old: *mut T, new_node: *mut T, parent: *mut T) {
        unsafe {
            if !parent.is_null() {
                if left::<T, Tag>(parent) == old {
                    set_left::<T, Tag>(parent, new_node);
                } else {
                    set_right::<T, Tag>(parent, new_node);
                }
            } else {
                self.root = new_node;
            }
        }
    }

    fn rotate_set_parents(&mut self, old: *mut T, new_node: *mut T, color: usize) {
        unsafe {
            let parent = parent_of::<T, Tag>(old);
            (*link_of::<T, Tag>(new_node)).parent_color = parent_color::<T, Tag>(old);
            set_parent_color::<T, Tag>(old, new_node, color);
            self.change_child(old, new_node, parent);
        }
    }

    /// Least node with key >= `key`.
    pub fn ceil(&self, key: &K) -> *mut T {
        let mut result = ptr::null_mut();
        let mut node = self.root;
        unsafe {
            while !node.is_null() {
                match C::cmp_key(key, node) {
                    Ordering::Less => {
                        result = node;
                        node = left::<T, Tag>(node);
                    }
                    Ordering::Greater => node = right::<T, Tag>(node),
                    Ordering::Equal => return node,
                }
            }
        }
        result
    }

    /// Greatest node with key <= `key`.
    pub fn floor(&self, key: &K) -> *mut T {
        let mut result = ptr::null_mut();
        let mut node = self.root;
        unsafe {
            while !node.is_null() {
                match C::cmp_key(key, node) {
                    Ordering::Less => node = left::<T, Tag>(node),
                    Ordering::Greater => {
                        result = node;
                        node = right::<T, Tag>(node);
                    }
                    Ordering::Equal => return node,
                }
            }
        }
        result
    }

    pub fn search(&self, key: &K) -> *mut T {
        let mut node = self.root;
        unsafe {
            while !node.is_null() {
                match C::cmp_key(key, node) {
                    Ordering::Less => node = left::<T, Tag>(node),
                    Ordering::Greater => node = right::<T, Tag>(node),
                    Ordering::Equal => return node,
                }
            }
        }
        ptr::null_mut()
    }

    pub fn min(&self) -> *mut T {
        let mut n = self.root;
        if n.is_null() {
            return ptr::null_mut();
        }
        unsafe {
            while !left::<T, Tag>(n).is_null() {
                n = left::<T, Tag>(n);
            }
        }
        n
    }

    pub fn max(&self) -> *mut T {
        let mut n = self.root;
        if n.is_null() {
            return ptr::null_mut();
        }
        unsafe {
            while !right::<T, Tag>(n).is_null() {
                n = right::<T, Tag>(n);
            }
        }
        n
    }

    pub fn next(node: *mut T) -> *mut T {
        unsafe {
            if !right::<T, Tag>(node).is_null() {
                let mut n = right::<T, Tag>(node);
                while !left::<T, Tag>(n).is_null() {
                    n = left::<T, Tag>(n);
                }
                return n;
            }
            let mut n = node;
            let mut parent = parent_of::<T, Tag>(n);
            while !parent.is_null() && n == right::<T, Tag>(parent) {
                n = parent;
                parent = parent_of::<T, Tag>(n);
            }
            parent
        }
    }

    pub fn prev(node: *mut T) -> *mut T {
        unsafe {
            if !left::<T, Tag>(node).is_null() {
                let mut n = left::<T, Tag>(node);
                while !right::<T, Tag>(n).is_null() {
                    n = right::<T, Tag>(n);
                }
                return n;
            }
            let mut n = node;
            let mut parent = parent_of::<T, Tag>(n);
            while !parent.is_null() && n == left::<T, Tag>(parent) {
                n = parent;
                parent = parent_of::<T, Tag>(n);
            }
            parent
        }
    }

    fn link_node(node: *mut T, parent: *mut T, slot: *mut *mut T) {
        unsafe {
            (*link_of::<T, Tag>(node)).parent_color = parent as usize;
            set_left::<T, Tag>(node, ptr::null_mut());
            set_right::<T, Tag>(node, ptr::null_mut());
            *slot = node;
        }
    }

    /// Rebalances after a plain BST insert of a freshly-linked red node.
    fn insert_rebalance(&mut self, node: *mut T) {
        unsafe {
            let mut node = node;
            let mut parent = parent_of::<T, Tag>(node);
            loop {
                if parent.is_null() {
                    set_parent_color::<T, Tag>(node, ptr::null_mut(), BLACK);
                    break;
                }
                if is_black::<T, Tag>(parent) {
                    break;
                }

                let gparent = parent_of::<T, Tag>(parent);
                let mut tmp = right::<T, Tag>(gparent);
                if parent != tmp {
                    if !tmp.is_null() && is_red::<T, Tag>(tmp) {
                        set_parent_color::<T, Tag>(tmp, gparent, BLACK);
                        set_parent_color::<T, Tag>(parent, gparent, BLACK);
                        node = gparent;
                        parent = parent_of::<T, Tag>(node);
                        set_parent_color::<T, Tag>(node, parent, RED);
                        continue;
                    }

                    tmp = right::<T, Tag>(parent);
                    if node == tmp {
                        tmp = left::<T, Tag>(node);
                        set_right::<T, Tag>(parent, tmp);
                        set_left::<T, Tag>(node, parent);
                        if !tmp.is_null() {
                            set_parent_color::<T, Tag>(tmp, parent, BLACK);
                        }
                        set_parent_color::<T, Tag>(parent, node, RED);
                        T::rotate(parent, node);
                        parent = node;
                        tmp = right::<T, Tag>(node);
                    }

                    set_left::<T, Tag>(gparent, tmp);
                    set_right::<T, Tag>(parent, gparent);
                    if !tmp.is_null() {
                        set_parent_color::<T, Tag>(tmp, gparent, BLACK);
                    }
                    self.rotate_set_parents(gparent, parent, RED);
                    T::rotate(gparent, parent);
                    break;
                } else {
                    tmp = left::<T, Tag>(gparent);
                    if !tmp.is_null() && is_red::<T, Tag>(tmp) {
                        set_parent_color::<T, Tag>(tmp, gparent, BLACK);
                        set_parent_color::<T, Tag>(parent, gparent, BLACK);
                        node = gparent;
                        parent = parent_of::<T, Tag>(node);
                        set_parent_color::<T, Tag>(node, parent, RED);
                        continue;
                    }

                    tmp = left::<T, Tag>(parent);
                    if node == tmp {
                        tmp = right::<T, Tag>(node);
                        set_left::<T, Tag>(parent, tmp);
                        set_right::<T, Tag>(node, parent);
                        if !tmp.is_null() {
                            set_parent_color::<T, Tag>(tmp, parent, BLACK);
                        }
                        set_parent_color::<T, Tag>(parent, node, RED);
                        T::rotate(parent, node);
                        parent = node;
                        tmp = left::<T, Tag>(node);
                    }

                    set_right::<T, Tag>(gparent, tmp);
                    set_left::<T, Tag>(parent, gparent);
                    if !tmp.is_null() {
                        set_parent_color::<T, Tag>(tmp, gparent, BLACK);
                    }
                    self.rotate_set_parents(gparent, parent, RED);
                    T::rotate(gparent, parent);
                    break;
                }
            }
        }
    }

    /// Inserts `node`. Returns `node` on success, or the existing node
    /// with an equal key (unmodified tree) if one is already present.
    pub fn insert(&mut self, node: *mut T) -> *mut T {
        unsafe {
            let mut slot = &mut self.root as *mut *mut T;
            let mut parent = ptr::null_mut();

            while !(*slot).is_null() {
                let cur = *slot;
                match C::cmp_nodes(node, cur) {
                    Ordering::Less => {
                        parent = cur;
                        slot = &mut (*link_of::<T, Tag>(cur)).left as *mut *mut T;
                    }
                    Ordering::Greater => {
                        parent = cur;
                        slot = &mut (*link_of::<T, Tag>(cur)).right as *mut *mut T;
                    }
                    Ordering::Equal => return cur,
                }
            }

            Self::link_node(node, parent, slot);
            T::propagate(node, ptr::null_mut());
            self.insert_rebalance(node);
            node
        }
    }

    /// Removes `node`, which must currently be a member of this tree.
    pub fn remove(&mut self, node: *mut T) {
        unsafe {
            let rebalance_from = self.erase_augmented(node);
            if rebalance_from.is_null() {
                return;
            }
            self.erase_rebalance(rebalance_from);
        }
    }

    /// Standard successor-splice erase, augmentation-aware. Returns the
    /// node to rebalance from (black-deficiency point), or null if none.
    unsafe fn erase_augmented(&mut self, node: *mut T) -> *mut T {
        unsafe {
            let child = right::<T, Tag>(node);
            let mut tmp = left::<T, Tag>(node);
            let parent;
            let rebalance;

            if tmp.is_null() {
                let pc = parent_color::<T, Tag>(node);
                parent = parent_from_pc::<T>(pc);
                self.change_child(node, child, parent);
                if !child.is_null() {
                    (*link_of::<T, Tag>(child)).parent_color = pc;
                    rebalance = ptr::null_mut();
                } else {
                    rebalance = if (pc & COLOR_MASK) == BLACK { parent } else { ptr::null_mut() };
                }
                tmp = parent;
            } else if child.is_null() {
                let pc = parent_color::<T, Tag>(node);
                (*link_of::<T, Tag>(tmp)).parent_color = pc;
                parent = parent_from_pc::<T>(pc);
                self.change_child(node, tmp, parent);
                rebalance = ptr::null_mut();
                tmp = parent;
            } else {
                let mut successor = child;
                let child2;
                let inner_parent;

                tmp = left::<T, Tag>(child);
                if tmp.is_null() {
                    inner_parent = successor;
                    child2 = right::<T, Tag>(successor);
                    T::copy(node, successor);
                } else {
                    let mut p;
                    loop {
                        p = successor;
                        successor = tmp;
                        tmp = left::<T, Tag>(tmp);
                        if tmp.is_null() {
                            break;
                        }
                    }
                    inner_parent = p;
                    child2 = right::<T, Tag>(successor);
                    set_left::<T, Tag>(inner_parent, child2);
                    set_right::<T, Tag>(successor, child);
                    set_parent::<T, Tag>(child, successor);
                    T::copy(node, successor);
                    T::propagate(inner_parent, successor);
                }

                tmp = left::<T, Tag>(node);
                set_left::<T, Tag>(successor, tmp);
                set_parent::<T, Tag>(tmp, successor);

                let pc = parent_color::<T, Tag>(node);
                let gp = parent_from_pc::<T>(pc);
                self.change_child(node, successor, gp);

                if !child2.is_null() {
                    (*link_of::<T, Tag>(successor)).parent_color = pc;
                    set_parent_color::<T, Tag>(child2, inner_parent, BLACK);
                    rebalance = ptr::null_mut();
                } else {
                    let pc2 = parent_color::<T, Tag>(successor);
                    (*link_of::<T, Tag>(successor)).parent_color = pc;
                    rebalance = if (pc2 & COLOR_MASK) == BLACK { inner_parent } else { ptr::null_mut() };
                }
                tmp = successor;
            }
            T::propagate(tmp, ptr::null_mut());
            rebalance
        }
    }

    unsafe fn erase_rebalance(&mut self, parent: *mut T) {
        unsafe {
            let mut node: *mut T = ptr::null_mut();
            let mut parent = parent;
            loop {
                let mut sibling = right::<T, Tag>(parent);
                if node != sibling {
                    if is_red::<T, Tag>(sibling) {
                        let tmp1 = left::<T, Tag>(sibling);
                        set_right::<T, Tag>(parent, tmp1);
                        set_left::<T, Tag>(sibling, parent);
                        set_parent_color::<T, Tag>(tmp1, parent, BLACK);
                        self.rotate_set_parents(parent, sibling, RED);
                        T::rotate(parent, sibling);
                        sibling = tmp1;
                    }
                    let mut tmp1 = right::<T, Tag>(sibling);
                    if tmp1.is_null() || is_black::<T, Tag>(tmp1) {
                        let tmp2 = left::<T, Tag>(sibling);
                        if tmp2.is_null() || is_black::<T, Tag>(tmp2) {
                            set_parent_color::<T, Tag>(sibling, parent, RED);
                            if is_red::<T, Tag>(parent) {
                                set_black::<T, Tag>(parent);
                            } else {
                                node = parent;
                                parent = parent_of::<T, Tag>(node);
                                if !parent.is_null() {
                                    continue;
                                }
                            }
                            break;
                        }
                        let tmp1b = right::<T, Tag>(tmp2);
                        set_left::<T, Tag>(sibling, tmp1b);
                        set_right::<T, Tag>(tmp2, sibling);
                        set_right::<T, Tag>(parent, tmp2);
                        if !tmp1b.is_null() {
                            set_parent_color::<T, Tag>(tmp1b, sibling, BLACK);
                        }
                        T::rotate(sibling, tmp2);
                        tmp1 = sibling;
                        sibling = tmp2;
                    }
                    let tmp2 = left::<T, Tag>(sibling);
                    set_right::<T, Tag>(parent, tmp2);
                    set_left::<T, Tag>(sibling, parent);
                    set_parent_color::<T, Tag>(tmp1, sibling, BLACK);
                    if !tmp2.is_null() {
                        set_parent::<T, Tag>(tmp2, parent);
                    }
                    self.rotate_set_parents(parent, sibling, BLACK);
                    T::rotate(parent, sibling);
                    break;
                } else {
                    let mut sib = left::<T, Tag>(parent);
                    if is_red::<T, Tag>(sib) {
                        let tmp1 = right::<T, Tag>(sib);
                        set_left::<T, Tag>(parent, tmp1);
                        set_right::<T, Tag>(sib, parent);
                        set_parent_color::<T, Tag>(tmp1, parent, BLACK);
                        self.rotate_set_parents(parent, sib, RED);
                        T::rotate(parent, sib);
                        sib = tmp1;
                    }
                    let mut tmp1 = left::<T, Tag>(sib);
                    if tmp1.is_null() || is_black::<T, Tag>(tmp1) {
                        let tmp2 = right::<T, Tag>(sib);
                        if tmp2.is_null() || is_black::<T, Tag>(tmp2) {
                            set_parent_color::<T, Tag>(sib, parent, RED);
                            if is_red::<T, Tag>(parent) {
                                set_black::<T, Tag>(parent);
                            } else {
                                node = parent;
                                parent = parent_of::<T, Tag>(node);
                                if !parent.is_null() {
                                    continue;
                                }
                            }
                            break;
                        }
                        let tmp1b = left::<T, Tag>(tmp2);
                        set_right::<T, Tag>(sib, tmp1b);
                        set_left::<T, Tag>(tmp2, sib);
                        set_left::<T, Tag>(parent, tmp2);
                        if !tmp1b.is_null() {
                            set_parent_color::<T, Tag>(tmp1b, sib, BLACK);
                        }
                        T::rotate(sib, tmp2);
                        tmp1 = sib;
                        sib = tmp2;
                    }
                    let tmp2 = right::<T, Tag>(sib);
                    set_left::<T, Tag>(parent, tmp2);
                    set_right::<T, Tag>(sib, parent);
                    set_parent_color::<T, Tag>(tmp1, sib, BLACK);
                    if !tmp2.is_null() {
                        set_parent::<T, Tag>(tmp2, parent);
                    }
                    self.rotate_set_parents(parent, sib, BLACK);
                    T::rotate(parent, sib);
                    break;
                }
            }
        }
    }

    /// `new_node` assumes `victim`'s position in O(1). Keys must be
    /// equivalent; `victim` is left untouched otherwise (caller-owned).
    pub fn replace(&mut self, victim: *mut T, new_node: *mut T) {
        unsafe {
            let parent = parent_of::<T, Tag>(victim);
            self.change_child(victim, new_node, parent);
            let l = left::<T, Tag>(victim);
            let r = right::<T, Tag>(victim);
            if !l.is_null() {
                set_parent::<T, Tag>(l, new_node);
            }
            if !r.is_null() {
                set_parent::<T, Tag>(r, new_node);
            }
            *link_of::<T, Tag>(new_node) = ptr::read(link_of::<T, Tag>(victim));
        }
    }

    fn black_height(n: *mut T) -> i64 {
        if n.is_null() {
            return 1;
        }
        unsafe {
            let lh = Self::black_height(left::<T, Tag>(n));
            if lh == 0 {
                return 0;
            }
            let rh = Self::black_height(right::<T, Tag>(n));
            if rh == 0 {
                return 0;
            }
            if lh != rh {
                return 0;
            }
            lh + if is_black::<T, Tag>(n) { 1 } else { 0 }
        }
    }

    fn check_red_property(n: *mut T) -> bool {
        if n.is_null() {
            return true;
        }
        unsafe {
            if !Self::check_red_property(left::<T, Tag>(n)) || !Self::check_red_property(right::<T, Tag>(n)) {
                return false;
            }
            if is_red::<T, Tag>(n) {
                let l = left::<T, Tag>(n);
                let r = right::<T, Tag>(n);
                if (!l.is_null() && is_red::<T, Tag>(l)) || (!r.is_null() && is_red::<T, Tag>(r)) {
                    return false;
                }
            }
            true
        }
    }

    fn is_balanced(n: *mut T) -> Option<(i64, i64)> {
        if n.is_null() {
            return Some((0, 0));
        }
        unsafe {
            let (lmax, lmin) = Self::is_balanced(left::<T, Tag>(n))?;
            let (rmax, rmin) = Self::is_balanced(right::<T, Tag>(n))?;
            let maxh = lmax.max(rmax) + 1;
            let minh = lmin.min(rmin) + 1;
            if maxh <= 2 * minh { Some((maxh, minh)) } else { None }
        }
    }

    /// Debug consistency checker: equal black-height on every path, no
    /// red node has a red child, and `max height <= 2 * min height`.
    pub fn check(&self) -> bool {
        Self::black_height(self.root) != 0
            && Self::check_red_property(self.root)
            && Self::is_balanced(self.root).is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct IntNode {
        link: RbLink<IntNode>,
        key: i64,
    }

    unsafe impl RbNode for IntNode {
        fn link(node: *mut Self) -> *mut RbLink<Self> {
            unsafe { &mut (*node).link as *mut _ }
        }
    }

    struct IntCmp;
    impl Comparator<IntNode, i64> for IntCmp {
        fn cmp_key(key: &i64, node: *const IntNode) -> Ordering {
            key.cmp(unsafe { &(*node).key })
        }
        fn cmp_nodes(a: *const IntNode, b: *const IntNode) -> Ordering {
            unsafe { (*a).key.cmp(&(*b).key) }
        }
    }

    fn boxed(key: i64) -> *mut IntNode {
        Box::into_raw(Box::new(IntNode { link: RbLink::new(), key }))
    }

    unsafe fn free(p: *mut IntNode) {
        unsafe {
            drop(Box::from_raw(p));
        }
    }

    fn inorder_keys(tree: &RbTree<IntNode, (), i64, IntCmp>) -> Vec<i64> {
        let mut out = Vec::new();
        let mut n = tree.min();
        while !n.is_null() {
            out.push(unsafe { (*n).key });
            n = RbTree::<IntNode, (), i64, IntCmp>::next(n);
        }
        out
    }

    #[test]
    fn insert_search_inorder() {
        let mut tree: RbTree<IntNode, (), i64, IntCmp> = RbTree::new();
        let keys = [5, 3, 8, 1, 4, 7, 9, 2, 6, 0];
        let mut nodes = Vec::new();
        for &k in &keys {
            let n = boxed(k);
            assert_eq!(tree.insert(n), n);
            nodes.push(n);
        }
        assert!(tree.check());
        assert_eq!(inorder_keys(&tree), vec![0, 1, 2, 3, 4, 5, 6, 7, 8, 9]);
        for &k in &keys {
            let found = tree.search(&k);
            assert!(!found.is_null());
            assert_eq!(unsafe { (*found).key }, k);
        }
        assert!(tree.search(&42).is_null());

        for n in nodes {
            unsafe { free(n) };
        }
    }

    #[test]
    fn duplicate_insert_returns_existing() {
        let mut tree: RbTree<IntNode, (), i64, IntCmp> = RbTree::new();
        let a = boxed(1);
        let b = boxed(1);
        assert_eq!(tree.insert(a), a);
        assert_eq!(tree.insert(b), a);
        assert!(tree.check());
        unsafe {
            free(a);
            free(b);
        }
    }

    #[test]
    fn ceil_and_floor() {
        let mut tree: RbTree<IntNode, (), i64, IntCmp> = RbTree::new();
        let mut nodes = Vec::new();
        for k in [10, 20, 30, 40] {
            nodes.push(boxed(k));
        }
        for &n in &nodes {
            tree.insert(n);
        }

        let c = tree.ceil(&25);
        assert_eq!(unsafe { (*c).key }, 30);
        let f = tree.floor(&25);
        assert_eq!(unsafe { (*f).key }, 20);
        assert_eq!(unsafe { (*tree.ceil(&10)).key }, 10);
        assert!(tree.ceil(&100).is_null());
        assert!(tree.floor(&0).is_null());

        for n in nodes {
            unsafe { free(n) };
        }
    }

    #[test]
    fn remove_maintains_invariants() {
        let mut tree: RbTree<IntNode, (), i64, IntCmp> = RbTree::new();
        let keys: Vec<i64> = (0..200).collect();
        let mut nodes = Vec::new();
        for &k in &keys {
            let n = boxed(k);
            tree.insert(n);
            nodes.push(n);
        }
        assert!(tree.check());

        // remove every third node, verify tree stays consistent throughout
        let mut remaining: Vec<(i64, *mut IntNode)> = keys.iter().copied().zip(nodes.iter().copied()).collect();
        let mut i = 0;
        while i < remaining.len() {
            if i % 3 == 0 {
                let (_, n) = remaining.remove(i);
                tree.remove(n);
                assert!(tree.check());
                unsafe { free(n) };
            } else {
                i += 1;
            }
        }

        let mut expect: Vec<i64> = remaining.iter().map(|(k, _)| *k).collect();
        expect.sort();
        assert_eq!(inorder_keys(&tree), expect);

        for (_, n) in remaining {
            unsafe { free(n) };
        }
    }

    #[test]
    fn replace_keeps_position() {
        let mut tree: RbTree<IntNode, (), i64, IntCmp> = RbTree::new();
        let mut nodes = Vec::new();
        for k in [1, 2, 3, 4, 5] {
            let n = boxed(k);
            tree.insert(n);
            nodes.push(n);
        }
        let victim = tree.search(&3);
        let replacement = boxed(3);
        tree.replace(victim, replacement);
        assert!(tree.check());
        assert_eq!(inorder_keys(&tree), vec![1, 2, 3, 4, 5]);
        assert_eq!(tree.search(&3), replacement);

        unsafe {
            free(victim);
            for n in nodes {
                if n != victim {
                    free(n);
                }
            }
            free(replacement);
        }
    }
}
