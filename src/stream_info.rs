//! StreamInfo: the post-negotiation contract between one output slot and the
//! input slots it feeds (spec.md §3, §4.4).

use std::sync::Arc;

use crate::data::Datatype;
use crate::error::{AxonError, Result};

/// Carries the typed datatype descriptor and stream rate that an output
/// slot commits to during `CompleteStreamInfo`. Mutable only until
/// `finalize` is called; read-only (and must be finalized) once the first
/// item is published.
pub struct StreamInfo<D: Datatype> {
    datatype: Option<Arc<D>>,
    stream_rate: f64,
    finalized: bool,
}

impl<D: Datatype> Default for StreamInfo<D> {
    fn default() -> Self {
        Self {
            datatype: None,
            stream_rate: 0.0,
            finalized: false,
        }
    }
}

impl<D: Datatype> StreamInfo<D> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn datatype(&self) -> Option<&D> {
        self.datatype.as_deref()
    }

    /// A cheap-clone handle to the datatype, for callers that need to hand it
    /// across a type-erasure boundary (e.g. coercing to `Arc<dyn Datatype>`).
    pub fn datatype_arc(&self) -> Option<Arc<D>> {
        self.datatype.clone()
    }

    pub fn stream_rate(&self) -> f64 {
        self.stream_rate
    }

    /// Commits the downstream contract. Only legal during
    /// `CompleteStreamInfo`; subsequent calls fail once finalized.
    pub fn finalize(&mut self, datatype: D, stream_rate: f64) -> Result<()> {
        if self.finalized {
            return Err(AxonError::invalid_graph("StreamInfo already finalized"));
        }
        self.datatype = Some(Arc::new(datatype));
        self.stream_rate = stream_rate;
        self.finalized = true;
        Ok(())
    }
}

/// Object-safe, type-erased view of a `StreamInfo<D>`, handed from an output
/// slot to every input slot connected to it so a consumer-side
/// `complete_stream_info` can inspect what its upstream committed to without
/// knowing the upstream's concrete datatype generic (spec.md §4.4: "inspects
/// `input_port.slot(i).stream_info()`").
pub trait UpstreamStreamInfo: Send + Sync {
    fn is_finalized(&self) -> bool;
    fn datatype(&self) -> Option<Arc<dyn Datatype>>;
    fn stream_rate(&self) -> f64;
}
