mod extract;
mod store;
mod view;

pub use extract::{extract_artifact, ArtifactSource, ExtractedArtifact};
pub use store::{TaskPatch, TaskPhase, VisualizationTask, VizStore};
pub use view::{current_view, ViewState};
