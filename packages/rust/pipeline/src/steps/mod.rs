//! The four concrete steps of the outreach pipeline, in execution order.

pub mod parse;
pub mod gather;
pub mod cite;
pub mod compose;

pub use cite::CitationEnrichStep;
pub use compose::MessageComposeStep;
pub use gather::FactGatherStep;
pub use parse::TemplateParseStep;
