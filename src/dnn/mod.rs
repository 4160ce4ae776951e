pub mod conv;
pub mod dense;
pub mod dnn;
pub mod layer;
pub mod pool;
pub mod relu;

pub use conv::Conv;
pub use dense::Dense;
pub use dnn::DNN;
pub use layer::{Layer, PhysicalLayer};
pub use pool::GlobalAvgPool;
pub use relu::ReLU;
