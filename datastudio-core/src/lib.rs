//!
//! # Datastudio Core
//!
//! Datastudio core defines the essential components of a research
//! orchestration engine for tabular data.
//!
//! ## Glossary
//!
//! **Research** - a named, potentially nested, tabular result computable on demand.
//! A research is represented as a [ResearchNode](crate::research::ResearchNode):
//! either a single frame or a group of named child nodes with frames on the leaves.
//! The nesting depth of a research is its *level*, with a bare frame at level 0.
//!
//! **Student** - a component able to produce zero or more named researches
//! (see [Student](crate::student::Student)). A student declares its researches,
//! their prerequisites and their output filters in a
//! [StudentConfiguration](crate::config::StudentConfiguration).
//! [BasicStudent](crate::student::BasicStudent) resolves a research name to a
//! handler through an explicit registry keyed by the normalized method name
//! (see [research_method_name](crate::research::research_method_name)).
//!
//! **Studio** - the coordinator owning the knowledge cache, the student
//! registry and the listener registry (see [Studio](crate::studio::Studio)).
//! A request for a research name is answered from the knowledge cache when
//! possible; otherwise the first registered student claiming to provide the
//! name produces it, the result is cached and listeners are notified.
//!
//! **Knowledge** - the memoized name-to-result cache owned by the studio.
//! An entry, once present, is returned as-is until a caller explicitly
//! requests recomputation.
//!
//! **Filter specification** - a declarative, recursively defined predicate
//! over table rows (see [FilterSpec](crate::filter::FilterSpec)): a mapping
//! of column to predicate means AND, a list of specifications means OR.
//!
//! **Listener** - an object notified after a research completes, for
//! side-effecting postprocessing such as persistence
//! (see [ResearchListener](crate::studio::ResearchListener)).
extern crate serde;
#[macro_use]
extern crate serde_derive;

pub mod config;
pub mod error;
pub mod filter;
pub mod research;
pub mod student;
pub mod studio;
