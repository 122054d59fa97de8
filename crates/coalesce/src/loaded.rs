/// # Loaded
///
/// The successful outcome of a load: either the entity, or an explicit marker
/// that the batch function had nothing for the key.
///
/// Both variants are cached for the rest of the loader's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Loaded<V> {
    Found(V),
    NotFound,
}

impl<V> Loaded<V> {
    pub fn is_found(&self) -> bool {
        matches!(self, Loaded::Found(_))
    }

    /// Converts into an `Option`, discarding the not-found marker.
    pub fn found(self) -> Option<V> {
        match self {
            Loaded::Found(value) => Some(value),
            Loaded::NotFound => None,
        }
    }

    pub fn as_ref(&self) -> Loaded<&V> {
        match self {
            Loaded::Found(value) => Loaded::Found(value),
            Loaded::NotFound => Loaded::NotFound,
        }
    }

    pub fn map<U, F: FnOnce(V) -> U>(self, f: F) -> Loaded<U> {
        match self {
            Loaded::Found(value) => Loaded::Found(f(value)),
            Loaded::NotFound => Loaded::NotFound,
        }
    }
}

impl<V> From<Option<V>> for Loaded<V> {
    fn from(value: Option<V>) -> Self {
        match value {
            Some(value) => Loaded::Found(value),
            None => Loaded::NotFound,
        }
    }
}
