use crate::error::{IndexError, TutorError};

/// Nearest-neighbor structure over fixed-dimension vectors, addressed by
/// insertion position.
pub trait VectorIndex {
    fn dimension(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn add(&mut self, vectors: &[Vec<f32>]) -> Result<(), IndexError>;

    /// Returns up to `top_k` `(position, distance)` pairs, closest first.
    fn search(&self, query: &[f32], top_k: usize) -> Result<Vec<(usize, f32)>, IndexError>;
}

/// Text-generation collaborator used by the responder.
pub trait Generator {
    fn generate(&self, prompt: &str) -> Result<String, TutorError>;
}

impl<G: Generator + ?Sized> Generator for Box<G> {
    fn generate(&self, prompt: &str) -> Result<String, TutorError> {
        (**self).generate(prompt)
    }
}
