//! Ready-made LLM applications built from [prompt templates](crate::prompt), the [endpoint traits](crate::utils::llm)
//! and [post-processing](crate::utils::postprocess).

pub mod customer_service;
pub mod emotions;
