pub mod types;
pub mod error;
pub mod logging;

// カタログ・モデル・推論
pub mod catalogue_loader;
pub mod model;
pub mod ml;

// 分類パイプラインとHTTP
pub mod pipeline;
pub mod server;

pub use catalogue_loader::Catalogue;
pub use error::{CatalogueError, ClassifyError};
pub use pipeline::{AppContext, Classification};
pub use types::{CatalogueEntry, PredictionResult, RankedLabel};
