pub mod backend;
pub mod inference;
pub mod ml_model;
pub mod postprocess;
pub mod preprocess;
pub mod training;

pub use backend::{load_scorer, run_training, CpuBackend};
pub use inference::{ImageScorer, InferenceEngine};
pub use ml_model::{ModelConfig, PokemonClassifier};
pub use postprocess::{postprocess, rank_top_k};
pub use preprocess::{preprocess, Normalization};
pub use training::{train_model, EpochStats, ImageFolderDataset, TrainingReport};
