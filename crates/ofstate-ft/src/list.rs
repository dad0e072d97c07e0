//! Doubly linked lists threaded through slab slots.
//!
//! A slot can sit on several lists at once (the master list and one cookie
//! bucket); [`ListKind`] selects which set of links an operation uses.
//! Unlinking is O(1) and never moves other slots.

use slab::Slab;

/// Which list a set of links belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ListKind {
    /// The insertion-ordered list of every entry.
    All,
    /// The entry's cookie bucket.
    Cookie,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct Links {
    pub(crate) prev: Option<usize>,
    pub(crate) next: Option<usize>,
}

/// Slab values that carry list links.
pub(crate) trait Linked {
    fn links(&self, kind: ListKind) -> &Links;
    fn links_mut(&mut self, kind: ListKind) -> &mut Links;
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct ListHead {
    head: Option<usize>,
    tail: Option<usize>,
    len: usize,
}

impl ListHead {
    pub(crate) fn len(&self) -> usize {
        self.len
    }

    pub(crate) fn head(&self) -> Option<usize> {
        self.head
    }

    /// Appends `key`, which must not be on this kind of list.
    pub(crate) fn push_back<T: Linked>(&mut self, slab: &mut Slab<T>, key: usize, kind: ListKind) {
        let tail = self.tail;
        *slab[key].links_mut(kind) = Links {
            prev: tail,
            next: None,
        };
        match tail {
            Some(tail) => slab[tail].links_mut(kind).next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
        self.len += 1;
    }

    /// Removes `key`, which must be on this list.
    pub(crate) fn unlink<T: Linked>(&mut self, slab: &mut Slab<T>, key: usize, kind: ListKind) {
        let Links { prev, next } = *slab[key].links(kind);
        match prev {
            Some(prev) => slab[prev].links_mut(kind).next = next,
            None => self.head = next,
        }
        match next {
            Some(next) => slab[next].links_mut(kind).prev = prev,
            None => self.tail = prev,
        }
        *slab[key].links_mut(kind) = Links::default();
        self.len -= 1;
    }

    pub(crate) fn keys<'a, T: Linked>(&self, slab: &'a Slab<T>, kind: ListKind) -> ListKeys<'a, T> {
        ListKeys {
            slab,
            cursor: self.head,
            kind,
        }
    }

    pub(crate) fn clear(&mut self) {
        *self = ListHead::default();
    }
}

/// Iterator over the slot keys of a list, head to tail.
pub(crate) struct ListKeys<'a, T> {
    slab: &'a Slab<T>,
    cursor: Option<usize>,
    kind: ListKind,
}

impl<T: Linked> Iterator for ListKeys<'_, T> {
    type Item = usize;

    fn next(&mut self) -> Option<usize> {
        let key = self.cursor?;
        self.cursor = self.slab[key].links(self.kind).next;
        Some(key)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct Node {
        all: Links,
        cookie: Links,
    }

    impl Linked for Node {
        fn links(&self, kind: ListKind) -> &Links {
            match kind {
                ListKind::All => &self.all,
                ListKind::Cookie => &self.cookie,
            }
        }

        fn links_mut(&mut self, kind: ListKind) -> &mut Links {
            match kind {
                ListKind::All => &mut self.all,
                ListKind::Cookie => &mut self.cookie,
            }
        }
    }

    fn setup(n: usize) -> (Slab<Node>, ListHead, Vec<usize>) {
        let mut slab = Slab::new();
        let mut list = ListHead::default();
        let keys: Vec<usize> = (0..n).map(|_| slab.insert(Node::default())).collect();
        for &key in &keys {
            list.push_back(&mut slab, key, ListKind::All);
        }
        (slab, list, keys)
    }

    #[test]
    fn test_push_preserves_order() {
        let (slab, list, keys) = setup(4);
        assert_eq!(list.len(), 4);
        assert_eq!(list.keys(&slab, ListKind::All).collect::<Vec<_>>(), keys);
    }

    #[test]
    fn test_unlink_head_middle_tail() {
        let (mut slab, mut list, keys) = setup(5);

        list.unlink(&mut slab, keys[2], ListKind::All);
        list.unlink(&mut slab, keys[0], ListKind::All);
        list.unlink(&mut slab, keys[4], ListKind::All);

        assert_eq!(list.len(), 2);
        assert_eq!(
            list.keys(&slab, ListKind::All).collect::<Vec<_>>(),
            vec![keys[1], keys[3]]
        );
        assert_eq!(slab[keys[2]].all, Links::default());
    }

    #[test]
    fn test_unlink_last_empties_list() {
        let (mut slab, mut list, keys) = setup(1);
        list.unlink(&mut slab, keys[0], ListKind::All);
        assert_eq!(list.len(), 0);
        assert_eq!(list.head(), None);

        list.push_back(&mut slab, keys[0], ListKind::All);
        assert_eq!(list.head(), Some(keys[0]));
    }

    #[test]
    fn test_lists_are_independent() {
        let (mut slab, all, keys) = setup(3);
        let mut bucket = ListHead::default();
        bucket.push_back(&mut slab, keys[2], ListKind::Cookie);
        bucket.push_back(&mut slab, keys[0], ListKind::Cookie);

        assert_eq!(
            bucket.keys(&slab, ListKind::Cookie).collect::<Vec<_>>(),
            vec![keys[2], keys[0]]
        );
        assert_eq!(all.keys(&slab, ListKind::All).collect::<Vec<_>>(), keys);
    }
}
