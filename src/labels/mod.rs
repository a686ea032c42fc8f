//! Training label schemas for reduced classification data.

pub mod galaxy_zoo;

pub use galaxy_zoo::{
    question_answers_schema, GalaxyZooLabels, DEFAULT_DATA_RELEASE_SUFFIX,
    TASK_KEY_DATA_LABELS, TASK_KEY_LABEL_PREFIXES,
};
