pub mod chapter;
pub mod intake;
pub mod loaders;
pub mod outcome;
pub mod subject;

pub use chapter::{ChapterTemplate, CHAPTERS};
pub use intake::{IntakeRecord, IntakeRow};
pub use loaders::{load_intake, IntakeEntry};
pub use outcome::{Resolution, Stage, StageOutcome, StageStatus, SubjectState};
pub use subject::{SubjectId, SubjectRecord};
