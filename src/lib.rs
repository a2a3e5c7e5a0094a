//! # datamap-runtime
//!
//! 声明式 DataMap 工具运行时：把纯数据的工具定义编译为描述符并安全执行。
//!
//! Declarative tool runtime for voice and chat agents. A tool is described by a
//! data-only definition (parameters, regex expressions, HTTP webhooks, foreach
//! projection, output templates); the runtime compiles it into a validated,
//! immutable descriptor and executes invocations against it without running any
//! user-supplied code.
//!
//! ## Core Philosophy
//!
//! - **Data, not code**: templates only look paths up and substitute literal defaults
//! - **Fail at build time**: bad regexes, templates or parameters reject the tool
//! - **Never fail at call time**: every invocation yields a presentable response
//! - **Stateless invocations**: scopes live for one call; compiled tools are shared
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use datamap_runtime::definition::{DataMap, Output, ParamType};
//! use datamap_runtime::{DataMapEngine, Invocation};
//! use serde_json::json;
//!
//! #[tokio::main]
//! async fn main() -> datamap_runtime::Result<()> {
//!     let trivia = DataMap::new("get_trivia")
//!         .purpose("Get a trivia question")
//!         .parameter("category", ParamType::String, "Question category", true)
//!         .webhook("GET", "https://api.example/v1/trivia?category=${args.category}")
//!         .output(Output::new(
//!             "Category ${response[0].category}: ${response[0].question}",
//!         ))
//!         .fallback_output(Output::new("Trivia is unavailable right now"))
//!         .build()?;
//!
//!     let engine = DataMapEngine::builder().tool(trivia).build()?;
//!     let result = engine
//!         .invoke(&Invocation::new("get_trivia", json!({"category": "math"})))
//!         .await;
//!     println!("{}", result.to_host_json());
//!     Ok(())
//! }
//! ```
//!
//! ## Module Organization
//!
//! | Module | Description |
//! |--------|-------------|
//! | [`template`] | `${scope.path}` expansion over layered scopes |
//! | [`matcher`] | Ordered regex rules, first match wins |
//! | [`webhook`] | Request expansion and bounded-retry HTTP calls |
//! | [`projector`] | Error keys, foreach aggregation, output rendering |
//! | [`definition`] | Document types, validation, compilation, loading, builder |
//! | [`engine`] | Invocation orchestration and the tool registry |
//! | [`telemetry`] | Invocation event sinks |
//! | [`config`] | Engine configuration with env overrides |

pub mod config;
pub mod definition;
pub mod engine;
pub mod matcher;
pub mod projector;
pub mod telemetry;
pub mod template;
pub mod transport;
pub mod utils;
pub mod webhook;

pub use config::EngineConfig;
pub use definition::{CompiledTool, DefinitionError, ToolCompiler, ToolDocument};
pub use engine::{
    CallContext, DataMapEngine, DataMapEngineBuilder, FailureKind, Invocation, InvocationResult,
    InvocationState, Outcome,
};
pub use telemetry::{EventSink, InvocationEvent};

/// Result type alias for the library
pub type Result<T> = std::result::Result<T, Error>;

/// Error type for the library
pub mod error;
pub use error::{Error, ErrorContext};
