pub mod class_labels;
pub mod model_metadata;
pub mod model_storage;
pub mod config;

pub use class_labels::ClassLabelSet;
pub use model_metadata::ModelMetadata;
pub use model_storage::{
    load_class_indices, load_model_with_metadata, log_metadata_info, save_class_indices,
    save_model_with_metadata,
};
pub use config::{
    AppConfig, CatalogueSettings, DeviceType, InferenceSettings, ModelSettings, ServerSettings,
    TrainingSettings,
};
