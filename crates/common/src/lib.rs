//! Shared building blocks for the index build workspace: byte intervals,
//! the tuple key codec, retry backoff, knobs, and the runtime abstraction.

pub mod backoff;
pub mod interval;
pub mod knobs;
pub mod runtime;
pub mod tuple;

pub use crate::tuple::{
    EndpointType,
    Subspace,
    Tuple,
    TupleElement,
    TupleRange,
};
