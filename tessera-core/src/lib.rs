#![cfg_attr(coverage_nightly, feature(coverage_attribute))]

pub mod invocation;

mod accumulator;
pub mod encoding;
mod invocation_stream;
mod invoker;
pub mod observability;
pub mod pricing;
pub mod retry;

#[cfg(feature = "metrics")]
pub mod metrics;

/// All types and traits are available from the root
pub use crate::accumulator::StreamAccumulator;
pub use crate::encoding::ContentEncoder;
pub use crate::invocation::errors::{
    BackendError, BoxedError, ConstructionError, FetchError, InvocationError,
};
pub use crate::invocation::*;
pub use crate::invocation_stream::InvocationStream;
pub use crate::invoker::{INVOKE_LABEL, INVOKE_STREAM_LABEL, ModelInvoker, ModelInvokerBuilder};
pub use crate::observability::ObservabilityRecorder;
pub use crate::pricing::{ModelPrice, PriceOverride, Pricing, PricingCatalog};
pub use crate::retry::{ExhaustionPolicy, RetryConfig};

/// Re-export of commonly used dependencies.
pub mod prelude;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub mod util;
