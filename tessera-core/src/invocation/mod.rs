//! Types shared by everything that talks to a model endpoint
//!
//! An `InvocationRequest` is an ordered list of `PromptFragment`s plus inference parameters. The
//! `ContentEncoder` turns it into an `EncodedRequest`, which a `ModelBackend` sends to the
//! endpoint. Whatever path the call takes, the caller ends up with an `InvocationResult`.
mod fragment;
mod request;
mod result;
mod stream;
mod wire;

pub mod errors;

// Re-exported in the root per convention
pub mod traits;

pub use fragment::*;
pub use request::*;
pub use result::*;
pub use stream::*;
pub use traits::*;
pub use wire::*;
