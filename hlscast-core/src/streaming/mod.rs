//! Media-side decisions for a relay run.
//!
//! A run starts from a validated [`StreamSource`]. The prober asks the media
//! inspection tool which codecs the source carries, and the planner turns two
//! probe results into the stream-mapping tokens handed to the encoder.

pub mod plan;
pub mod probe;
pub mod source;

pub use plan::{PlanError, PlanShape, TrackStatus, TranscodePlan, plan, plan_for_source};
pub use probe::{
    CodecProbeResult, CodecProber, FfprobeProber, ProbeError, StreamType, parse_probe_output,
};
pub use source::{SourceKind, StreamSource};
