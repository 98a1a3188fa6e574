//! Scope-chain lookup shared by the parser (XPaths) and scripter (templates).

/// Return the first defined value in a most-specific-first scope chain.
pub fn first_defined<T>(scopes: impl IntoIterator<Item = Option<T>>) -> Option<T> {
    scopes.into_iter().flatten().next()
}
