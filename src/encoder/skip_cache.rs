use burn::prelude::*;

/// Encoder feature maps kept for the decoder, index 0 = highest resolution.
///
/// Entries are never mutated. Linear decoders take the cache by value and
/// move each entry out once; the nested decoder borrows entries repeatedly.
#[derive(Debug, Clone)]
pub struct SkipCache<B: Backend> {
    levels: Vec<Tensor<B, 4>>,
}

impl<B: Backend> SkipCache<B> {
    pub fn new(levels: Vec<Tensor<B, 4>>) -> Self {
        Self { levels }
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            levels: Vec::with_capacity(capacity),
        }
    }

    pub(crate) fn push(&mut self, feature: Tensor<B, 4>) {
        self.levels.push(feature);
    }

    pub fn len(&self) -> usize {
        self.levels.len()
    }

    pub fn is_empty(&self) -> bool {
        self.levels.is_empty()
    }

    pub fn get(&self, level: usize) -> Option<&Tensor<B, 4>> {
        self.levels.get(level)
    }

    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &Tensor<B, 4>> {
        self.levels.iter()
    }

    /// Moves the entries out, deepest first.
    pub fn into_deepest_first(self) -> impl Iterator<Item = Tensor<B, 4>> {
        self.levels.into_iter().rev()
    }
}
