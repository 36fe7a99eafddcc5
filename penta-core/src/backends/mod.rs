//! One [`GenerationBackend`](crate::GenerationBackend) per upstream.

mod http;

pub mod craiyon;
pub mod huggingface;
pub mod mock;
pub mod pipeline;
pub mod replicate;

pub use craiyon::CraiyonBackend;
pub use huggingface::HuggingFaceBackend;
pub use mock::MockBackend;
pub use pipeline::PipelineBackend;
pub use replicate::ReplicateBackend;
