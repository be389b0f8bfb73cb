//! List editing operations.
//!
//! A [`ListOp`] either replaces a weaker list outright (explicit mode) or
//! edits it: delete items, then prepend and append. Composition applies
//! list-ops from weakest to strongest.

/// A list edit over items of type `T`.
#[derive(Clone, Debug, PartialEq)]
pub struct ListOp<T> {
    explicit: Option<Vec<T>>,
    prepended: Vec<T>,
    appended: Vec<T>,
    deleted: Vec<T>,
}

impl<T> Default for ListOp<T> {
    fn default() -> Self {
        Self {
            explicit: None,
            prepended: Vec::new(),
            appended: Vec::new(),
            deleted: Vec::new(),
        }
    }
}

impl<T: Clone + PartialEq> ListOp<T> {
    /// Empty (no-op) list edit.
    pub fn new() -> Self {
        Self::default()
    }

    /// Explicit list replacing anything weaker.
    pub fn explicit(items: Vec<T>) -> Self {
        Self {
            explicit: Some(items),
            ..Self::default()
        }
    }

    /// Prepend-only edit.
    pub fn prepended(items: Vec<T>) -> Self {
        Self {
            prepended: items,
            ..Self::default()
        }
    }

    /// Append-only edit.
    pub fn appended(items: Vec<T>) -> Self {
        Self {
            appended: items,
            ..Self::default()
        }
    }

    /// Check if this list-op is in explicit mode.
    #[inline]
    pub fn is_explicit(&self) -> bool {
        self.explicit.is_some()
    }

    /// Check if this list-op edits nothing.
    pub fn is_empty(&self) -> bool {
        self.explicit.is_none()
            && self.prepended.is_empty()
            && self.appended.is_empty()
            && self.deleted.is_empty()
    }

    pub fn explicit_items(&self) -> &[T] {
        self.explicit.as_deref().unwrap_or(&[])
    }

    pub fn prepended_items(&self) -> &[T] {
        &self.prepended
    }

    pub fn appended_items(&self) -> &[T] {
        &self.appended
    }

    pub fn deleted_items(&self) -> &[T] {
        &self.deleted
    }

    /// Set explicit items, switching to explicit mode.
    pub fn set_explicit_items(&mut self, items: Vec<T>) {
        self.explicit = Some(items);
        self.prepended.clear();
        self.appended.clear();
        self.deleted.clear();
    }

    pub fn set_prepended_items(&mut self, items: Vec<T>) {
        self.explicit = None;
        self.prepended = items;
    }

    pub fn set_appended_items(&mut self, items: Vec<T>) {
        self.explicit = None;
        self.appended = items;
    }

    pub fn set_deleted_items(&mut self, items: Vec<T>) {
        self.explicit = None;
        self.deleted = items;
    }

    /// Prepend an item if not already prepended.
    pub fn add_prepended(&mut self, item: T) {
        if let Some(explicit) = &mut self.explicit {
            if !explicit.contains(&item) {
                explicit.insert(0, item);
            }
        } else if !self.prepended.contains(&item) {
            self.prepended.push(item);
        }
    }

    /// Every item mentioned by any list, in list order.
    pub fn items(&self) -> impl Iterator<Item = &T> {
        self.explicit
            .iter()
            .flatten()
            .chain(self.prepended.iter())
            .chain(self.appended.iter())
            .chain(self.deleted.iter())
    }

    /// Apply this edit over a weaker list.
    pub fn apply(&self, weaker: &[T]) -> Vec<T> {
        let mut result: Vec<T> = Vec::new();
        if let Some(explicit) = &self.explicit {
            for item in explicit {
                if !result.contains(item) {
                    result.push(item.clone());
                }
            }
            return result;
        }
        let keep = |item: &T| {
            !self.deleted.contains(item) && !self.prepended.contains(item) && !self.appended.contains(item)
        };
        for item in &self.prepended {
            if !result.contains(item) {
                result.push(item.clone());
            }
        }
        for item in weaker.iter().filter(|i| keep(i)) {
            if !result.contains(item) {
                result.push(item.clone());
            }
        }
        for item in &self.appended {
            if let Some(pos) = result.iter().position(|x| x == item) {
                result.remove(pos);
            }
            result.push(item.clone());
        }
        result
    }

    /// Compose list-ops given strongest first into the final item list.
    pub fn compose_strongest_first<'a>(ops: impl IntoIterator<Item = &'a ListOp<T>>) -> Vec<T>
    where
        T: 'a,
    {
        let ops: Vec<&ListOp<T>> = ops.into_iter().collect();
        ops.iter().rev().fold(Vec::new(), |acc, op| op.apply(&acc))
    }

    /// Rewrite or remove items in every list.
    ///
    /// `f` returns the replacement item, or `None` to remove the item.
    /// Returns whether anything changed.
    pub fn modify_items(&mut self, mut f: impl FnMut(&T) -> Option<T>) -> bool {
        let mut changed = false;
        let mut edit = |list: &mut Vec<T>| {
            let mut out: Vec<T> = Vec::with_capacity(list.len());
            for item in list.iter() {
                match f(item) {
                    Some(new_item) => {
                        if new_item != *item {
                            changed = true;
                        }
                        if !out.contains(&new_item) {
                            out.push(new_item);
                        } else {
                            changed = true;
                        }
                    }
                    None => changed = true,
                }
            }
            *list = out;
        };
        if let Some(explicit) = &mut self.explicit {
            edit(explicit);
        }
        edit(&mut self.prepended);
        edit(&mut self.appended);
        edit(&mut self.deleted);
        changed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_prepend_append_delete() {
        let mut op = ListOp::prepended(vec!["a"]);
        op.set_appended_items(vec!["z"]);
        op.set_deleted_items(vec!["m"]);
        assert_eq!(op.apply(&["m", "b", "z", "a"]), vec!["a", "b", "z"]);
    }

    #[test]
    fn test_explicit_replaces_weaker() {
        let op = ListOp::explicit(vec![1, 2, 2, 3]);
        assert_eq!(op.apply(&[9, 8]), vec![1, 2, 3]);
        assert!(op.is_explicit());
    }

    #[test]
    fn test_compose_strongest_first() {
        let strong = ListOp::prepended(vec!["strong"]);
        let weak = ListOp::prepended(vec!["weak"]);
        let composed = ListOp::compose_strongest_first([&strong, &weak]);
        assert_eq!(composed, vec!["strong", "weak"]);
    }

    #[test]
    fn test_modify_items_rewrites_and_removes() {
        let mut op = ListOp::prepended(vec!["/A", "/B", "/C"]);
        op.set_deleted_items(vec!["/B"]);
        let changed = op.modify_items(|item| match *item {
            "/A" => Some("/A2"),
            "/B" => None,
            other => Some(other),
        });
        assert!(changed);
        assert_eq!(op.prepended_items(), &["/A2", "/C"]);
        assert!(op.deleted_items().is_empty());
        assert!(!op.modify_items(|item| Some(*item)));
    }
}
