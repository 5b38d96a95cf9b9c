//! Low-level HTTP plumbing shared by the LLM gateway and the finance data-source clients.

pub mod http_pool;
