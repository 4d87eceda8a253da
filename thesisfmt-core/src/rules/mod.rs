// Paragraph group rules - the resolver chain and its tiers:
// - engine.rs: GroupResolver trait, DocumentContext and ResolverChain
// - style_name.rs: style vocabulary and outline levels
// - pattern_detection.rs: text patterns and TOC fields
// - position.rs: cover and front matter ahead of the first chapter
// - typography.rs: size ranking and emphasis

pub mod engine;
pub mod pattern_detection;
pub mod position;
pub mod style_name;
pub mod typography;

pub use engine::*;
