use super::arena::{SlotArena, SlotId};

/// Selects which pair of links a [`Deque`] threads through its nodes. A node
/// can be a member of one deque per order at the same time.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Order {
    Access,
    Write,
}

impl Order {
    pub(crate) fn name(self) -> &'static str {
        match self {
            Self::Access => "access order",
            Self::Write => "write order",
        }
    }
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub(crate) struct Links {
    prev: Option<SlotId>,
    next: Option<SlotId>,
}

/// Implemented by arena elements that carry their own deque links.
pub(crate) trait Linked {
    fn links(&self, order: Order) -> &Links;
    fn links_mut(&mut self, order: Order) -> &mut Links;
}

/// A doubly-linked deque whose nodes live in a [`SlotArena`]. The deque only
/// stores the head, the tail and the length; the links are stored in the
/// nodes themselves.
///
/// Callers must pass the same arena to every method. Linking a node that is
/// already a member, or unlinking a node that is not, corrupts the deque;
/// both are checked in debug builds.
#[derive(Debug)]
pub(crate) struct Deque {
    order: Order,
    len: usize,
    head: Option<SlotId>,
    tail: Option<SlotId>,
}

impl Deque {
    pub(crate) fn new(order: Order) -> Self {
        Self {
            order,
            len: 0,
            head: None,
            tail: None,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn peek_front(&self) -> Option<SlotId> {
        self.head
    }

    pub(crate) fn peek_back(&self) -> Option<SlotId> {
        self.tail
    }

    /// The member after `id`, toward the back.
    pub(crate) fn next_of<T: Linked>(&self, arena: &SlotArena<T>, id: SlotId) -> Option<SlotId> {
        arena.get(id).and_then(|node| node.links(self.order).next)
    }

    pub(crate) fn contains<T: Linked>(&self, arena: &SlotArena<T>, id: SlotId) -> bool {
        arena
            .get(id)
            .map(|node| node.links(self.order).prev.is_some() || self.head == Some(id))
            .unwrap_or(false)
    }

    /// Adds the node to the back (the most recent end) of the deque.
    pub(crate) fn push_back<T: Linked>(&mut self, arena: &mut SlotArena<T>, id: SlotId) {
        debug_assert!(
            !self.contains(arena, id),
            "the node is already in the {}",
            self.order.name()
        );
        let order = self.order;
        let tail = self.tail;
        match arena.get_mut(id) {
            Some(node) => {
                let links = node.links_mut(order);
                links.prev = tail;
                links.next = None;
            }
            None => {
                debug_assert!(false, "pushing a vacant slot to the {}", order.name());
                return;
            }
        }

        match tail.and_then(|t| arena.get_mut(t)) {
            Some(tail_node) => tail_node.links_mut(order).next = Some(id),
            None => self.head = Some(id),
        }
        self.tail = Some(id);
        self.len += 1;
    }

    /// Detaches the node from the deque. The node itself stays in the arena.
    pub(crate) fn unlink<T: Linked>(&mut self, arena: &mut SlotArena<T>, id: SlotId) {
        debug_assert!(
            self.contains(arena, id),
            "the node is not in the {}",
            self.order.name()
        );
        let order = self.order;
        let Links { prev, next } = match arena.get_mut(id) {
            Some(node) => std::mem::take(node.links_mut(order)),
            None => return,
        };

        match prev.and_then(|p| arena.get_mut(p)) {
            Some(prev_node) => prev_node.links_mut(order).next = next,
            None => self.head = next,
        }
        match next.and_then(|n| arena.get_mut(n)) {
            Some(next_node) => next_node.links_mut(order).prev = prev,
            None => self.tail = prev,
        }
        self.len -= 1;
    }

    pub(crate) fn move_to_back<T: Linked>(&mut self, arena: &mut SlotArena<T>, id: SlotId) {
        if self.tail == Some(id) {
            return;
        }
        self.unlink(arena, id);
        self.push_back(arena, id);
    }

    /// Iterates from the front (the least recent end) to the back.
    pub(crate) fn iter<'a, T: Linked>(&self, arena: &'a SlotArena<T>) -> DequeIter<'a, T> {
        DequeIter {
            arena,
            order: self.order,
            next: self.head,
        }
    }
}

#[cfg(test)]
impl Deque {
    pub(crate) fn order(&self) -> Order {
        self.order
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.len == 0
    }
}

pub(crate) struct DequeIter<'a, T> {
    arena: &'a SlotArena<T>,
    order: Order,
    next: Option<SlotId>,
}

impl<'a, T: Linked> Iterator for DequeIter<'a, T> {
    type Item = (SlotId, &'a T);

    fn next(&mut self) -> Option<Self::Item> {
        let id = self.next?;
        let node = self.arena.get(id)?;
        self.next = node.links(self.order).next;
        Some((id, node))
    }
}
