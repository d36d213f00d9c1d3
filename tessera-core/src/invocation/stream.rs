/// Incremental pieces of a streamed response, in arrival order
#[derive(Clone, Debug, PartialEq, Eq, strum_macros::EnumIs)]
pub enum StreamChunk {
    TextDelta(String),
    /// A content block finished; the last one marks the last token
    ContentBlockStop,
    /// Usage, sent once at or near the end of the stream
    Metadata(StreamMetadata),
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct StreamMetadata {
    pub input_tokens: u64,
    pub output_tokens: u64,
    /// The model a prompt router actually dispatched to, if any
    pub invoked_model_id: Option<String>,
}

impl StreamChunk {
    pub fn text(delta: impl Into<String>) -> Self {
        StreamChunk::TextDelta(delta.into())
    }

    pub fn metadata(input_tokens: u64, output_tokens: u64) -> Self {
        StreamChunk::Metadata(StreamMetadata {
            input_tokens,
            output_tokens,
            invoked_model_id: None,
        })
    }
}
