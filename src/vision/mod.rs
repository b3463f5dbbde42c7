pub mod matcher;
pub mod probe;

pub use matcher::{closest, Match, MatchBox, TemplateMatcher, DEFAULT_THRESHOLD, LOOSE_THRESHOLD};
pub use probe::{crop_evidence, EvidencePadding, ProbeConfig, ProbeResult, VisualProbe};
