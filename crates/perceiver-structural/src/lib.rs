pub mod builder;
pub mod differ;
pub mod errors;
pub mod events;
pub mod graph;
pub mod metrics;
pub mod model;
pub mod ports;
pub mod question;
pub mod scope;

pub use builder::{SnapshotBuilder, SnapshotConfig};
pub use differ::{diff, ElementChange, SnapshotDiff};
pub use errors::PerceiverError;
pub use graph::{FieldNode, FormGraph};
pub use model::{
    normalize_text, normalize_value, signature_for, ElementWeight, RawNode, RawPage, SemanticElement,
    SemanticSnapshot,
};
pub use ports::PerceptionPort;
pub use question::{extract_questions, OptionNode, QuestionBlock};
pub use scope::{stable_page_scope, PageScope};
