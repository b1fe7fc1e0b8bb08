//! Students produce researches on request.
//!
//! A [Student] is registered in a [Studio] and asked for the researches it
//! claims to provide. [BasicStudent] is the standard implementation: it is
//! driven by a [StudentConfiguration] and dispatches research names to
//! handlers registered under the normalized method name.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info};

use crate::config::StudentConfiguration;
use crate::error::Error;
use crate::research::{research_method_name, Attrs, ResearchNode};
use crate::studio::Studio;

/// A producer of researches. The studio is passed by reference into each
/// call; students do not hold a reference back to it.
pub trait Student: Send + Sync {
    fn name(&self) -> &str;

    /// Called once, right after the student was registered in the studio.
    fn join_studio(&self, studio: &Studio, attrs: &Attrs) -> Result<(), Error>;

    /// Produces the named research. Prerequisites are resolved through the
    /// studio before the student's own work starts.
    fn research(&self, studio: &Studio, name: &str, attrs: &Attrs)
        -> Result<ResearchNode, Error>;

    fn is_research_provided(&self, name: &str) -> bool;
}

/// A research handler: receives the owning student, the studio, the research
/// name and the request attributes, and returns the produced research node
/// (conventionally a `{name: frame}` group).
pub type ResearchHandler = Arc<
    dyn Fn(&BasicStudent, &Studio, &str, &Attrs) -> Result<ResearchNode, Error> + Send + Sync,
>;

/// Configuration-driven student with an explicit handler registry.
pub struct BasicStudent {
    configuration: StudentConfiguration,
    handlers: HashMap<String, ResearchHandler>,
}

impl BasicStudent {
    pub fn new(configuration: StudentConfiguration) -> Self {
        BasicStudent {
            configuration,
            handlers: HashMap::new(),
        }
    }

    /// Registers the handler for a research name. The registry is keyed by
    /// the normalized method name, so "Research.Test 1" and
    /// "research.test 1" share a handler slot.
    pub fn with_handler<F>(mut self, research_name: &str, handler: F) -> Self
    where
        F: Fn(&BasicStudent, &Studio, &str, &Attrs) -> Result<ResearchNode, Error>
            + Send
            + Sync
            + 'static,
    {
        self.handlers
            .insert(research_method_name(research_name), Arc::new(handler));
        self
    }

    pub fn configuration(&self) -> &StudentConfiguration {
        &self.configuration
    }

    /// Researches from the configuration that actually have a handler.
    pub fn provided_researches(&self) -> Vec<String> {
        self.configuration
            .research_names()
            .into_iter()
            .filter(|name| self.is_research_provided(name))
            .collect()
    }

    fn resolve_prerequisites(
        &self,
        studio: &Studio,
        name: &str,
        attrs: &Attrs,
    ) -> Result<(), Error> {
        let required = self.configuration.required_researches(false);
        if let Some(Some(prerequisites)) = required.get(name) {
            for prerequisite in prerequisites {
                if !studio.check_research_ready(prerequisite) {
                    debug!(
                        student = %self.name(),
                        research = %name,
                        prerequisite = %prerequisite,
                        "resolving prerequisite"
                    );
                    studio.research(prerequisite, attrs)?;
                }
            }
        }
        Ok(())
    }

    fn apply_output_filter(&self, name: &str, research: &mut ResearchNode) -> Result<(), Error> {
        let filter = match self.configuration.output_filter(name) {
            Some(filter) if !filter.is_empty() => filter,
            _ => return Ok(()),
        };
        // The filter only applies when the result carries a frame under the
        // research name; groups and absent entries pass through untouched.
        let frame = research.get(name).and_then(ResearchNode::as_frame).cloned();
        if let Some(frame) = frame {
            let filtered = filter
                .filter(frame.as_ref())
                .map_err(|e| e.with_research(name).with_student(self.name()))?;
            research.insert(name, ResearchNode::frame(filtered))?;
        }
        Ok(())
    }
}

impl Student for BasicStudent {
    fn name(&self) -> &str {
        &self.configuration.student
    }

    fn join_studio(&self, studio: &Studio, attrs: &Attrs) -> Result<(), Error> {
        for research_name in self.configuration.initial_researches() {
            info!(
                student = %self.name(),
                research = %research_name,
                "producing initial research on join"
            );
            studio.research(research_name, attrs)?;
        }
        Ok(())
    }

    fn research(
        &self,
        studio: &Studio,
        name: &str,
        attrs: &Attrs,
    ) -> Result<ResearchNode, Error> {
        self.resolve_prerequisites(studio, name, attrs)?;
        let handler = self
            .handlers
            .get(&research_method_name(name))
            .cloned()
            .ok_or_else(|| {
                Error::research_not_available(name, self.name(), &self.provided_researches())
            })?;
        info!(student = %self.name(), research = %name, "research started");
        let mut research = handler(self, studio, name, attrs)?;
        info!(student = %self.name(), research = %name, "research finished");
        self.apply_output_filter(name, &mut research)?;
        Ok(research)
    }

    fn is_research_provided(&self, name: &str) -> bool {
        self.handlers.contains_key(&research_method_name(name))
    }
}
