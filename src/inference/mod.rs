//! Inference dispatch.
//!
//! Models are external collaborators: a [`ModelLoader`] produces a [`Model`]
//! per user, and the [`InferenceDispatcher`] keeps them in an explicit cache
//! owned by the pipeline.

pub mod dispatcher;
pub mod model;

pub use dispatcher::{InferenceDispatcher, ModelCache};
pub use model::{Contribution, FileModelLoader, LinearModel, Model, ModelError, ModelLoader, Prediction};
