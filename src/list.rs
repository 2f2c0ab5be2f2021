//! An immutable singly-linked list used as the transformation stack.
//!
//! Composing a combinator onto a computation must never mutate the
//! computation it was composed onto, so the stack is a persistent cons
//! list with structural sharing: prepending is O(1) and clones share
//! their tail. The list drops its nodes iteratively, which keeps very
//! deep stacks (hundreds of thousands of entries) from overflowing the
//! call stack during drop.

use std::rc::Rc;

/// A persistent cons list with O(1) prepend and structural sharing.
pub(crate) struct List<T> {
    head: Option<Rc<Node<T>>>,
}

struct Node<T> {
    element: T,
    next: Option<Rc<Node<T>>>,
}

impl<T> List<T> {
    /// Creates an empty list.
    pub(crate) const fn empty() -> Self {
        Self { head: None }
    }

    /// Creates a list holding a single element.
    pub(crate) fn singleton(element: T) -> Self {
        Self {
            head: Some(Rc::new(Node {
                element,
                next: None,
            })),
        }
    }

    /// Returns a new list with `element` prepended; `self` is untouched.
    pub(crate) fn cons(&self, element: T) -> Self {
        Self {
            head: Some(Rc::new(Node {
                element,
                next: self.head.clone(),
            })),
        }
    }

    /// Iterates the elements front to back.
    pub(crate) fn iter(&self) -> Iter<'_, T> {
        Iter {
            cursor: self.head.as_deref(),
        }
    }

    /// Counts the elements by walking the list.
    pub(crate) fn len(&self) -> usize {
        self.iter().count()
    }
}

impl<T> Clone for List<T> {
    fn clone(&self) -> Self {
        Self {
            head: self.head.clone(),
        }
    }
}

impl<T> Default for List<T> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<T> Drop for List<T> {
    fn drop(&mut self) {
        // Unlink nodes one at a time instead of letting the default
        // recursive drop walk the whole spine.
        let mut next = self.head.take();
        while let Some(node) = next {
            match Rc::try_unwrap(node) {
                Ok(mut owned) => next = owned.next.take(),
                Err(_shared) => break,
            }
        }
    }
}

pub(crate) struct Iter<'a, T> {
    cursor: Option<&'a Node<T>>,
}

impl<'a, T> Iterator for Iter<'a, T> {
    type Item = &'a T;

    fn next(&mut self) -> Option<Self::Item> {
        let node = self.cursor?;
        self.cursor = node.next.as_deref();
        Some(&node.element)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn test_empty_list_has_no_elements() {
        let list: List<u32> = List::empty();
        assert_eq!(list.len(), 0);
        assert_eq!(list.iter().next(), None);
    }

    #[rstest]
    fn test_cons_prepends_without_mutating() {
        let base = List::singleton(1);
        let extended = base.cons(2);

        assert_eq!(base.iter().copied().collect::<Vec<_>>(), vec![1]);
        assert_eq!(extended.iter().copied().collect::<Vec<_>>(), vec![2, 1]);
    }

    #[rstest]
    fn test_clones_share_structure() {
        let original = List::empty().cons(1).cons(2).cons(3);
        let cloned = original.clone();

        assert_eq!(
            original.iter().copied().collect::<Vec<_>>(),
            cloned.iter().copied().collect::<Vec<_>>()
        );
    }

    #[rstest]
    fn test_deep_list_drops_without_overflow() {
        let mut list = List::empty();
        for index in 0..100_000 {
            list = list.cons(index);
        }
        assert_eq!(list.len(), 100_000);
        drop(list);
    }

    #[rstest]
    fn test_shared_tail_survives_drop_of_head() {
        let shared = List::empty().cons(1).cons(2);
        let longer = shared.cons(3);
        drop(longer);
        assert_eq!(shared.iter().copied().collect::<Vec<_>>(), vec![2, 1]);
    }
}
