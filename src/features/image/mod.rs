pub mod dimensions;
mod engine;
pub mod handler;
mod key;
mod pipeline;
mod resolver;
mod types;

pub use dimensions::{DimensionMode, RequestedSize};
pub use engine::{FitPolicy, RasterEngine, ResizeEngine, ResizeSpec, fit_to_box};
pub use handler::create_image_router;
pub use key::DerivativeKey;
pub use pipeline::{Derivative, ImagePipeline, PipelineConfig};
pub use resolver::{ImageName, PathResolver, SourcePath};
pub use types::{ALLOWED_EXTENSIONS, ImageKind, RawQuery, ResizeQuery};
