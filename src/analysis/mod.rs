pub mod client;
pub mod prompts;

pub use client::{
    parse_json_response, validate_brief, AnalysisResult, Analyzer, BriefResult, ChatCompletion,
    ChatError, OpenAiChat,
};
