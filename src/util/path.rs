//! Hierarchical scene paths.
//!
//! A [`Path`] names a prim (`/World/Ref`), a property (`/World/Ref.size`) or a
//! prim inside a variant (`/World{shape=round}Child`). Paths are immutable
//! values; every operation returns a new path.

use smallvec::SmallVec;
use std::fmt;
use std::str::FromStr;

use super::error::{Error, Result};

/// One element of a [`Path`].
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum PathElement {
    /// Prim name.
    Prim(String),
    /// Variant selection `{set=variant}`.
    VariantSelection { set: String, variant: String },
    /// Property name, always the last element.
    Property(String),
}

impl PathElement {
    /// Check if this is a prim name element.
    #[inline]
    pub fn is_prim(&self) -> bool {
        matches!(self, Self::Prim(_))
    }

    /// Check if this is a variant selection element.
    #[inline]
    pub fn is_variant_selection(&self) -> bool {
        matches!(self, Self::VariantSelection { .. })
    }
}

/// An absolute scene path, or the empty path.
///
/// Ordering is lexicographic over elements, so every descendant of a path
/// sorts directly after it. Layers rely on this for subtree range scans.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Path {
    absolute: bool,
    elements: SmallVec<[PathElement; 4]>,
}

// ============================================================================
// Identifier rules
// ============================================================================

/// Check that `name` is a valid prim name.
pub fn is_valid_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c == '_' || c.is_ascii_alphabetic() => {}
        _ => return false,
    }
    chars.all(|c| c == '_' || c.is_ascii_alphanumeric())
}

/// Check that `name` is a valid (possibly namespaced) property name.
pub fn is_valid_property_name(name: &str) -> bool {
    !name.is_empty() && name.split(':').all(is_valid_identifier)
}

fn is_valid_variant_name(name: &str) -> bool {
    name.chars()
        .all(|c| c == '_' || c == '-' || c == '|' || c.is_ascii_alphanumeric())
}

// ============================================================================
// Construction
// ============================================================================

impl Path {
    /// The absolute root path `/`.
    pub fn root() -> Self {
        Self {
            absolute: true,
            elements: SmallVec::new(),
        }
    }

    /// The empty path.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Parse a path from text.
    ///
    /// Accepts the empty string, `/`, and absolute paths such as
    /// `/A/B{set=variant}C.prop`.
    pub fn parse(text: &str) -> Result<Self> {
        if text.is_empty() {
            return Ok(Self::empty());
        }
        let Some(rest) = text.strip_prefix('/') else {
            return Err(Error::invalid_path(format!("{text} (paths must be absolute)")));
        };
        let mut path = Self::root();
        if rest.is_empty() {
            return Ok(path);
        }

        let bad = || Error::invalid_path(text.to_string());
        let mut cursor = rest;
        // true when the next token must be a prim name
        let mut expect_name = true;
        while !cursor.is_empty() {
            if expect_name {
                let end = cursor.find(['/', '{', '.']).unwrap_or(cursor.len());
                let name = &cursor[..end];
                if !is_valid_identifier(name) {
                    return Err(bad());
                }
                path.elements.push(PathElement::Prim(name.to_string()));
                cursor = &cursor[end..];
                expect_name = false;
                continue;
            }
            match cursor.as_bytes()[0] {
                b'/' => {
                    if matches!(path.elements.last(), Some(PathElement::VariantSelection { .. })) {
                        return Err(bad());
                    }
                    cursor = &cursor[1..];
                    expect_name = true;
                    if cursor.is_empty() {
                        return Err(bad());
                    }
                }
                b'{' => {
                    let close = cursor.find('}').ok_or_else(bad)?;
                    let body = &cursor[1..close];
                    let (set, variant) = body.split_once('=').ok_or_else(bad)?;
                    let (set, variant) = (set.trim(), variant.trim());
                    if !is_valid_identifier(set) || !is_valid_variant_name(variant) {
                        return Err(bad());
                    }
                    path.elements.push(PathElement::VariantSelection {
                        set: set.to_string(),
                        variant: variant.to_string(),
                    });
                    cursor = &cursor[close + 1..];
                    // a prim name may directly follow a variant selection
                    if !cursor.is_empty() && !cursor.starts_with(['{', '.']) {
                        expect_name = true;
                    }
                }
                b'.' => {
                    let name = &cursor[1..];
                    if !is_valid_property_name(name) {
                        return Err(bad());
                    }
                    path.elements.push(PathElement::Property(name.to_string()));
                    cursor = "";
                }
                _ => return Err(bad()),
            }
        }
        Ok(path)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Check if this is the empty path.
    #[inline]
    pub fn is_empty(&self) -> bool {
        !self.absolute && self.elements.is_empty()
    }

    /// Check if this is the absolute root `/`.
    #[inline]
    pub fn is_absolute_root(&self) -> bool {
        self.absolute && self.elements.is_empty()
    }

    /// Check if this path is absolute.
    #[inline]
    pub fn is_absolute(&self) -> bool {
        self.absolute
    }

    /// Check if this path names a prim (no trailing property or selection).
    #[inline]
    pub fn is_prim_path(&self) -> bool {
        matches!(self.elements.last(), Some(PathElement::Prim(_)))
    }

    /// Check if this is `/` or a prim path.
    #[inline]
    pub fn is_absolute_root_or_prim_path(&self) -> bool {
        self.is_absolute_root() || self.is_prim_path()
    }

    /// Check if this names a root prim such as `/World`.
    #[inline]
    pub fn is_root_prim_path(&self) -> bool {
        self.elements.len() == 1 && self.is_prim_path()
    }

    /// Check if this names a property.
    #[inline]
    pub fn is_property_path(&self) -> bool {
        matches!(self.elements.last(), Some(PathElement::Property(_)))
    }

    /// Check if this path ends in a variant selection.
    #[inline]
    pub fn is_prim_variant_selection_path(&self) -> bool {
        matches!(self.elements.last(), Some(PathElement::VariantSelection { .. }))
    }

    /// Check if any element is a variant selection.
    pub fn contains_variant_selection(&self) -> bool {
        self.elements.iter().any(PathElement::is_variant_selection)
    }

    /// Path elements, root first.
    #[inline]
    pub fn elements(&self) -> &[PathElement] {
        &self.elements
    }

    /// Number of prim name elements (namespace depth).
    pub fn depth(&self) -> usize {
        self.elements.iter().filter(|e| e.is_prim()).count()
    }

    /// Last element's name: prim name, property name or selected variant.
    pub fn name(&self) -> &str {
        match self.elements.last() {
            Some(PathElement::Prim(name)) | Some(PathElement::Property(name)) => name,
            Some(PathElement::VariantSelection { variant, .. }) => variant,
            None => "",
        }
    }

    /// The variant selection named by the last element, if any.
    pub fn variant_selection(&self) -> Option<(&str, &str)> {
        match self.elements.last() {
            Some(PathElement::VariantSelection { set, variant }) => Some((set, variant)),
            _ => None,
        }
    }

    /// Parent path. The parent of `/` is the empty path.
    pub fn parent(&self) -> Self {
        if self.elements.is_empty() {
            return Self::empty();
        }
        let mut elements = self.elements.clone();
        elements.pop();
        Self {
            absolute: self.absolute,
            elements,
        }
    }

    /// The owning prim path for a property path, `self` otherwise.
    pub fn prim_path(&self) -> Self {
        if self.is_property_path() {
            self.parent()
        } else {
            self.clone()
        }
    }

    /// Path with all variant selections removed.
    pub fn strip_all_variant_selections(&self) -> Self {
        if !self.contains_variant_selection() {
            return self.clone();
        }
        Self {
            absolute: self.absolute,
            elements: self
                .elements
                .iter()
                .filter(|e| !e.is_variant_selection())
                .cloned()
                .collect(),
        }
    }

    /// All prefixes from the first element down to `self` (excludes `/`).
    pub fn prefixes(&self) -> Vec<Self> {
        (1..=self.elements.len())
            .map(|n| Self {
                absolute: self.absolute,
                elements: self.elements[..n].iter().cloned().collect(),
            })
            .collect()
    }

    /// Prim ancestors from `self` up to (but excluding) `/`.
    pub fn ancestors(&self) -> impl Iterator<Item = Path> {
        let mut next = Some(self.clone());
        std::iter::from_fn(move || {
            let current = next.take()?;
            if current.elements.is_empty() {
                return None;
            }
            next = Some(current.parent());
            Some(current)
        })
    }

    /// Longest common prefix of two paths.
    pub fn common_prefix(&self, other: &Path) -> Self {
        if self.absolute != other.absolute {
            return Self::empty();
        }
        let shared = self
            .elements
            .iter()
            .zip(other.elements.iter())
            .take_while(|(a, b)| a == b)
            .count();
        Self {
            absolute: self.absolute,
            elements: self.elements[..shared].iter().cloned().collect(),
        }
    }

    // ========================================================================
    // Building
    // ========================================================================

    /// Append an arbitrary element.
    pub fn append_element(&self, element: PathElement) -> Self {
        let mut elements = self.elements.clone();
        elements.push(element);
        Self {
            absolute: true,
            elements,
        }
    }

    /// Append a child prim name.
    pub fn append_child(&self, name: &str) -> Self {
        self.append_element(PathElement::Prim(name.to_string()))
    }

    /// Append a property name.
    pub fn append_property(&self, name: &str) -> Self {
        self.append_element(PathElement::Property(name.to_string()))
    }

    /// Append a variant selection.
    pub fn append_variant_selection(&self, set: &str, variant: &str) -> Self {
        self.append_element(PathElement::VariantSelection {
            set: set.to_string(),
            variant: variant.to_string(),
        })
    }

    // ========================================================================
    // Prefix algebra
    // ========================================================================

    /// Check if `prefix` is a prefix of (or equal to) `self`.
    pub fn has_prefix(&self, prefix: &Path) -> bool {
        if prefix.is_empty() || prefix.absolute != self.absolute {
            return false;
        }
        self.elements.len() >= prefix.elements.len()
            && self.elements[..prefix.elements.len()] == prefix.elements[..]
    }

    /// Check if `self` is a prefix of (or equal to) `other`.
    #[inline]
    pub fn is_prefix_of(&self, other: &Path) -> bool {
        other.has_prefix(self)
    }

    /// Elements of `self` after `prefix`, if `prefix` applies.
    pub fn suffix_after(&self, prefix: &Path) -> Option<&[PathElement]> {
        if self.has_prefix(prefix) {
            Some(&self.elements[prefix.elements.len()..])
        } else {
            None
        }
    }

    /// Replace `old_prefix` with `new_prefix`.
    ///
    /// Returns `None` when `old_prefix` is not a prefix of `self`.
    pub fn replace_prefix(&self, old_prefix: &Path, new_prefix: &Path) -> Option<Self> {
        let suffix = self.suffix_after(old_prefix)?;
        let mut elements = new_prefix.elements.clone();
        elements.extend(suffix.iter().cloned());
        Some(Self {
            absolute: new_prefix.absolute,
            elements,
        })
    }

    /// Replace a variant-free `old_prefix` in a path that may contain
    /// variant selections.
    ///
    /// Selections inside the matched prefix are kept where `new_prefix`
    /// still shares the namespace they were authored under, so
    /// `/A{v=x}B` with `/A/B -> /A/C` becomes `/A{v=x}C`, while
    /// `/A/B -> /D` yields `/D`.
    pub fn replace_prefix_with_variants(&self, old_prefix: &Path, new_prefix: &Path) -> Option<Self> {
        if old_prefix.is_empty() || old_prefix.absolute != self.absolute {
            return None;
        }
        let mut matched = 0;
        let mut consumed = 0;
        let mut selections: Vec<(usize, PathElement)> = Vec::new();
        for element in self.elements.iter() {
            if matched == old_prefix.elements.len() {
                break;
            }
            consumed += 1;
            if element.is_variant_selection() && !old_prefix.elements[matched].is_variant_selection() {
                selections.push((matched, element.clone()));
                continue;
            }
            if *element != old_prefix.elements[matched] {
                return None;
            }
            matched += 1;
        }
        if matched != old_prefix.elements.len() {
            return None;
        }

        let shared = old_prefix.common_prefix(new_prefix).elements.len();
        let mut kept = selections
            .into_iter()
            .filter(|(after, _)| *after >= 1 && *after <= shared)
            .peekable();
        let mut elements: SmallVec<[PathElement; 4]> = SmallVec::new();
        for (i, element) in new_prefix.elements.iter().enumerate() {
            elements.push(element.clone());
            while let Some((_, selection)) = kept.next_if(|(after, _)| *after == i + 1) {
                elements.push(selection);
            }
        }
        elements.extend(self.elements[consumed..].iter().cloned());
        Some(Self {
            absolute: true,
            elements,
        })
    }

    /// The prefix of `self` whose variant-stripped form equals `stripped`.
    pub fn prefix_matching_stripped(&self, stripped: &Path) -> Option<Self> {
        if stripped.is_absolute_root() {
            return Some(Self::root());
        }
        let target = stripped.elements.len();
        let mut matched = 0;
        for (i, element) in self.elements.iter().enumerate() {
            if element.is_variant_selection() {
                continue;
            }
            if stripped.elements.get(matched) != Some(element) {
                return None;
            }
            matched += 1;
            if matched == target {
                return Some(Self {
                    absolute: true,
                    elements: self.elements[..=i].iter().cloned().collect(),
                });
            }
        }
        None
    }
}

// ============================================================================
// Formatting
// ============================================================================

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_absolute_root() {
            return f.write_str("/");
        }
        let mut previous_was_selection = false;
        for element in &self.elements {
            match element {
                PathElement::Prim(name) => {
                    if !previous_was_selection {
                        f.write_str("/")?;
                    }
                    f.write_str(name)?;
                    previous_was_selection = false;
                }
                PathElement::VariantSelection { set, variant } => {
                    write!(f, "{{{set}={variant}}}")?;
                    previous_was_selection = true;
                }
                PathElement::Property(name) => {
                    write!(f, ".{name}")?;
                    previous_was_selection = false;
                }
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Path({self})")
    }
}

impl FromStr for Path {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}
