//! # Reelcraft Testing
//!
//! Test doubles for the Reelcraft engines: capabilities with scripted
//! behaviour and reasoning engines that replay prepared answers.
//!
//! ## Usage
//!
//! ```rust
//! use reelcraft_testing::{MockCapability, ScriptedPlanner, plan};
//! use reelcraft_core::{CapabilityRegistry, PlannedStep};
//! use std::sync::Arc;
//!
//! let script = MockCapability::succeeding("generate_script").slot("script");
//! let calls = script.call_counter();
//!
//! let registry = CapabilityRegistry::new().with(Arc::new(script));
//! let planner = ScriptedPlanner::new(plan(vec![PlannedStep::new("s1", "generate_script")]));
//!
//! assert!(registry.contains("generate_script"));
//! assert_eq!(calls.get(), 0);
//! # let _ = planner;
//! ```

/// Mock capabilities for predictable testing
pub mod mock_capabilities;
/// Scripted planner and reasoner
pub mod scripted;

pub use mock_capabilities::{CallCounter, MockCapability};
pub use scripted::{ScriptedPlanner, ScriptedReasoner, invocation, plan};
