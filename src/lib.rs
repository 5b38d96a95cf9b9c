//! finagent-core: a multi-agent orchestration engine for financial research queries.
//!
//! A natural-language query ("Compare AAPL and MSFT") is validated by [`finagent::guardrails`],
//! turned into a [`finagent::state::SharedContext`], and threaded through a fixed four-node
//! pipeline (`Research -> Analyst -> Comparison -> Reporting`) run by
//! [`finagent::orchestrator::Orchestrator`]. Each node fans work out across external data
//! sources and an LLM gateway under bounded worker pools, then merges its results back into the
//! shared context before handing off to the next node.
//!
//! # Example
//!
//! ```rust,no_run
//! use finagent_core::orchestrator::Orchestrator;
//! use finagent_core::config::CoreConfig;
//! use std::sync::Arc;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = CoreConfig::from_env();
//! let orchestrator = Orchestrator::from_config(Arc::new(config))?;
//! let report = orchestrator.process_query("Analyze Apple Inc. (AAPL) stock", None).await?;
//! println!("{}", report.final_report.unwrap_or_default());
//! # Ok(())
//! # }
//! ```

pub mod finagent;

pub use finagent::agents;
pub use finagent::cache;
pub use finagent::config;
pub use finagent::error;
pub use finagent::guardrails;
pub use finagent::integration_config;
pub use finagent::llm_gateway;
pub use finagent::orchestrator;
pub use finagent::progress;
pub use finagent::session_store;
pub use finagent::sources;
pub use finagent::state;
pub use finagent::tracking;
pub use finagent::vector_store;
