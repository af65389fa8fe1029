pub mod changelog;
pub mod error;
pub mod landing;
mod macros;
pub mod merger;
pub mod pipeline;
pub mod schema;
pub mod source;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
pub mod types;
pub mod watermark;
