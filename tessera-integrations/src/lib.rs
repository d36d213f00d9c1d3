// show feature flags in the generated documentation
// https://doc.rust-lang.org/rustdoc/unstable-features.html#extensions-to-the-doc-attribute
#![cfg_attr(docsrs, feature(doc_cfg))]
#![cfg_attr(docsrs, feature(doc_auto_cfg))]

//! Model backends and content fetchers for external services.

#[cfg(feature = "anthropic")]
pub mod anthropic;
#[cfg(feature = "aws-bedrock")]
pub mod aws_bedrock;
#[cfg(feature = "s3")]
pub mod s3;
