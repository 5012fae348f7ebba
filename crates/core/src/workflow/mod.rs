//! Orchestrators that drive the generator over a session's document.
//! Every run processes its units strictly one after another.

pub mod correction;
pub mod enhancement;
pub mod regenerate;
pub mod style;

pub use correction::CorrectionOutcome;
pub use enhancement::EnhancementReport;
pub use regenerate::{regenerate, RegenerateOutcome};
pub use style::StyleOutcome;
