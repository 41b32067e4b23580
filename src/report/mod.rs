//! Report synthesis: prompt formatting, templates, and the LLM call.

pub mod format;
pub mod synthesizer;
pub mod template;

pub use synthesizer::ReportSynthesizer;
pub use template::PromptTemplates;
