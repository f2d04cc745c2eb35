/// Diagnosis context extraction and merging.
pub mod context;
/// Session controller: turn log, in-flight exchange, failure handling.
pub mod controller;
pub mod decoder;
/// Exchange lifecycle state machine.
pub mod session;

pub use context::{
    ContextMap, ContextSource, CurveDirection, CurveLocation, CurveSummary, DiagnosisContext,
    FileContextSource, PhotoContext, RiskLevel, Severity, StaticContextSource, XrayContext,
    extract_context, extract_context_from_str, load_context, merge_context, merge_context_maps,
};
pub use controller::{APOLOGY_TEXT, ChatController, SubmitOutcome};
pub use decoder::Utf8StreamDecoder;
pub use session::{SessionState, SessionTransition, TransitionRejection, TransitionResult};
