//! 工具定义：文档格式、编译、加载与构建。
//!
//! # Tool Definitions
//!
//! A tool definition is a data-only document describing a tool's parameters and how
//! it executes: either a `data_map` (expressions and/or webhooks, projected into an
//! output) or a locally hosted `web_hook_url`.
//!
//! | Stage | Type |
//! |-------|------|
//! | Raw document (JSON/YAML) | [`ToolDocument`] |
//! | Structural check | [`DefinitionValidator`] |
//! | Semantic check + regex compilation | [`ToolCompiler`] |
//! | Immutable result | [`CompiledTool`] |
//!
//! Compilation either yields a complete [`CompiledTool`] or a [`DefinitionError`];
//! a tool that fails to compile must not be registered.

pub mod builder;
pub mod compiler;
pub mod error;
pub mod loader;
pub mod types;
pub mod validator;

pub use builder::{expression_tool, simple_api_tool, DataMap, Output};
pub use compiler::{
    CompiledDataMap, CompiledTool, ParameterSpec, ToolCompiler, ToolDefinition, ToolRuntime,
};
pub use error::DefinitionError;
pub use loader::{DocumentFormat, ToolLoader};
pub use types::{
    DataMapDocument, ExpressionRule, ForeachSpec, OrderedMap, OutputSpec, ParamType,
    ParametersSchema, PropertySchema, ToolDocument, WebhookSpec,
};
pub use validator::DefinitionValidator;
