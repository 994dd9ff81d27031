//! Argument Trees
//!
//! Call arguments as nested tuples and lists of tensor and non-tensor
//! leaves, plus the walker that pairs every leaf with one entry of a
//! flattened per-leaf info list.
//!
//! Leaves are numbered depth-first, left to right. The walker threads a
//! single cursor through the whole recursion so sibling subtrees continue
//! numbering where the previous one stopped.
//!
//! @version 0.1.0
//! @author AutomataNexus Development Team

use tracing::trace;

use crate::error::{QuantError, QuantResult};

// =============================================================================
// Arg Tree
// =============================================================================

/// Opaque non-tensor leaf value.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    /// Absent value.
    None,
    /// Boolean.
    Bool(bool),
    /// Integer.
    Int(i64),
    /// Float.
    Float(f64),
    /// String.
    Str(String),
}

/// A nested call-argument structure.
#[derive(Debug, Clone, PartialEq)]
pub enum Arg<T> {
    /// Tensor leaf.
    Tensor(T),
    /// Non-tensor leaf.
    Value(Value),
    /// Immutable sequence; rebuilt on transformation.
    Tuple(Vec<Arg<T>>),
    /// Mutable sequence; transformed in place.
    List(Vec<Arg<T>>),
}

impl<T> Arg<T> {
    /// Integer leaf.
    pub fn int(v: i64) -> Self {
        Arg::Value(Value::Int(v))
    }

    /// Absent leaf.
    pub fn none() -> Self {
        Arg::Value(Value::None)
    }

    /// Returns true for tensor and value leaves.
    pub fn is_leaf(&self) -> bool {
        matches!(self, Arg::Tensor(_) | Arg::Value(_))
    }

    /// Returns the tensor if this is a tensor leaf.
    pub fn as_tensor(&self) -> Option<&T> {
        match self {
            Arg::Tensor(t) => Some(t),
            _ => None,
        }
    }

    /// Total number of leaves.
    pub fn leaf_count(&self) -> usize {
        match self {
            Arg::Tensor(_) | Arg::Value(_) => 1,
            Arg::Tuple(items) | Arg::List(items) => items.iter().map(Arg::leaf_count).sum(),
        }
    }

    /// Leaves in walk order; `None` marks a non-tensor leaf.
    pub fn leaves(&self) -> Vec<Option<&T>> {
        let mut out = Vec::with_capacity(self.leaf_count());
        self.collect_leaves(&mut out);
        out
    }

    fn collect_leaves<'a>(&'a self, out: &mut Vec<Option<&'a T>>) {
        match self {
            Arg::Tensor(t) => out.push(Some(t)),
            Arg::Value(_) => out.push(None),
            Arg::Tuple(items) | Arg::List(items) => {
                for item in items {
                    item.collect_leaves(out);
                }
            }
        }
    }

    /// Positional child of a tuple or list.
    pub fn positional(&self, index: usize) -> Option<&Arg<T>> {
        match self {
            Arg::Tuple(items) | Arg::List(items) => items.get(index),
            _ => None,
        }
    }

    /// Number of positional children; leaves have none.
    pub fn arity(&self) -> usize {
        match self {
            Arg::Tuple(items) | Arg::List(items) => items.len(),
            _ => 0,
        }
    }
}

// =============================================================================
// Walker
// =============================================================================

/// Position of the next unconsumed flat info entry.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct WalkCursor {
    index: usize,
}

impl WalkCursor {
    /// Creates a cursor at leaf 0.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of leaves consumed so far.
    pub fn position(&self) -> usize {
        self.index
    }
}

/// Rebuilds `args` with `transform` applied to every tensor leaf whose
/// flat info entry is present.
///
/// `transform` receives the tensor, its info and the flat leaf index.
/// The number of leaves must equal `flat_infos.len()`; any difference is
/// reported as [`QuantError::ShapeMismatch`] before a leaf is touched.
pub fn walk<T, I, F>(
    args: Arg<T>,
    flat_infos: &[Option<I>],
    mut transform: F,
) -> QuantResult<Arg<T>>
where
    F: FnMut(T, &I, usize) -> QuantResult<T>,
{
    let leaves = args.leaf_count();
    if leaves != flat_infos.len() {
        return Err(QuantError::ShapeMismatch {
            expected: flat_infos.len(),
            actual: leaves,
        });
    }
    let mut cursor = WalkCursor::new();
    walk_with_cursor(args, flat_infos, &mut transform, &mut cursor)
}

/// Walks one subtree, continuing from `cursor`.
pub fn walk_with_cursor<T, I, F>(
    args: Arg<T>,
    flat_infos: &[Option<I>],
    transform: &mut F,
    cursor: &mut WalkCursor,
) -> QuantResult<Arg<T>>
where
    F: FnMut(T, &I, usize) -> QuantResult<T>,
{
    match args {
        Arg::Tuple(items) => {
            let mut rebuilt = Vec::with_capacity(items.len());
            for item in items {
                rebuilt.push(walk_with_cursor(item, flat_infos, transform, cursor)?);
            }
            Ok(Arg::Tuple(rebuilt))
        }
        Arg::List(mut items) => {
            for slot in items.iter_mut() {
                let item = std::mem::replace(slot, Arg::none());
                *slot = walk_with_cursor(item, flat_infos, transform, cursor)?;
            }
            Ok(Arg::List(items))
        }
        leaf => {
            let index = cursor.index;
            let entry = flat_infos.get(index).ok_or(QuantError::ShapeMismatch {
                expected: flat_infos.len(),
                actual: index + 1,
            })?;
            cursor.index += 1;

            match (leaf, entry) {
                (Arg::Tensor(tensor), Some(info)) => {
                    trace!(leaf = index, "transforming tensor leaf");
                    Ok(Arg::Tensor(transform(tensor, info, index)?))
                }
                (leaf, _) => Ok(leaf),
            }
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
