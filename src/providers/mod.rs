pub mod meta_graph;
pub mod meta_insights;
pub mod openai;
