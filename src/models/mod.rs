pub mod archive;
pub mod mark;
pub mod problem_id;
pub mod schema;
pub mod submission;
pub mod tree;
pub mod warning;

pub use archive::{recognized_sources, ArchiveEntry, RawArchive};
pub use mark::{MarkResult, RoundTrace, SubFeedback, Verdict};
pub use problem_id::ProblemId;
pub use schema::{ChapterSchema, ProblemSchema, ProblemShape, SchemaExpectation};
pub use submission::{
    Dialect, ProcessedSubmission, ReferenceMaterial, SubmissionManifest, SubmissionTitle,
};
pub use tree::{Chapter, ContentBlock, FormulaStyle, Marker, Node, NodeBody, ProblemTree};
pub use warning::{Warning, WarningCategory, WarningSink};
