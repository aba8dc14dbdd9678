// Iteration order of this alias is **not** relied upon for determinism; anything that goes
// on the wire or into a public map is sorted first.

pub type FastSet<T> = ahash::AHashSet<T>;
