pub mod engine;

pub use engine::{from_template_value, to_template_value, TemplateEngine};
