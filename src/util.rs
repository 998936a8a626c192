//! Small utility containers used across the compiler.

/// An insertion-ordered association list from names to values.
///
/// `insert` always appends, so duplicate keys are allowed and a later binding
/// shadows an earlier one; [`NameMap::get`] returns the most recent binding.
/// This is exactly the shadowing behavior scopes need, and iteration order is
/// insertion order, which the emitter relies on for deterministic output.
/// Lookup is linear, which is fine at the scales a single translation unit
/// produces.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NameMap<V>(Vec<(Box<str>, V)>);

impl<V> Default for NameMap<V> {
  fn default() -> Self { Self(vec![]) }
}

impl<V> NameMap<V> {
  /// Create an empty map.
  #[must_use] pub fn new() -> Self { Self::default() }

  /// The number of bindings, shadowed ones included.
  #[must_use] pub fn len(&self) -> usize { self.0.len() }

  /// Returns true if the map has no bindings.
  #[must_use] pub fn is_empty(&self) -> bool { self.0.is_empty() }

  /// Append a binding for `k`, shadowing any earlier binding of the same name.
  pub fn insert(&mut self, k: impl Into<Box<str>>, v: V) { self.0.push((k.into(), v)) }

  /// Get the most recent binding for `k`, if any.
  #[must_use] pub fn get(&self, k: &str) -> Option<&V> {
    self.0.iter().rev().find(|(name, _)| &**name == k).map(|(_, v)| v)
  }

  /// Get the most recent binding for `k` mutably, if any.
  pub fn get_mut(&mut self, k: &str) -> Option<&mut V> {
    self.0.iter_mut().rev().find(|(name, _)| &**name == k).map(|(_, v)| v)
  }

  /// Iterate over all bindings in insertion order.
  pub fn iter(&self) -> impl DoubleEndedIterator<Item = (&str, &V)> {
    self.0.iter().map(|(k, v)| (&**k, v))
  }
}

impl<V> std::iter::FromIterator<(Box<str>, V)> for NameMap<V> {
  fn from_iter<T: IntoIterator<Item = (Box<str>, V)>>(iter: T) -> Self {
    Self(iter.into_iter().collect())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn later_binding_shadows_earlier() {
    let mut m = NameMap::new();
    m.insert("x", 1);
    m.insert("y", 2);
    m.insert("x", 3);
    assert_eq!(m.get("x"), Some(&3));
    assert_eq!(m.get("y"), Some(&2));
    assert_eq!(m.get("z"), None);
    assert_eq!(m.len(), 3);
  }

  #[test]
  fn iteration_is_insertion_order() {
    let mut m = NameMap::new();
    m.insert("a", 1);
    m.insert("b", 2);
    m.insert("a", 3);
    let got: Vec<_> = m.iter().map(|(k, &v)| (k.to_owned(), v)).collect();
    assert_eq!(got, vec![("a".into(), 1), ("b".into(), 2), ("a".into(), 3)]);
  }
}
