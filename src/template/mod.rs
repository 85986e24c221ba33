mod engine;

pub use engine::{TemplateEngine, TemplateEngineError, TemplateEngineResult};
