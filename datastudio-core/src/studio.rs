//! The studio coordinates students, the knowledge cache and listeners.
//!
//! A research request is answered from the knowledge cache when possible.
//! Otherwise the first registered student claiming to provide the name
//! produces it, the result is stored and the research listeners are
//! notified. Registration order is significant: it decides which student
//! produces a research offered by several.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{debug, error, info, warn};

use crate::error::Error;
use crate::research::{Attrs, ResearchNode};
use crate::student::Student;

/// Notified after a research completes (produced by a student or inserted
/// directly). Listener failures propagate to the research caller.
pub trait ResearchListener: Send + Sync {
    fn research_finished(&self, studio: &Studio, name: &str, attrs: &Attrs) -> Result<(), Error>;
}

#[derive(Default)]
pub struct Studio {
    knowledge: RwLock<HashMap<String, ResearchNode>>,
    students: RwLock<Vec<(String, Arc<dyn Student>)>>,
    listeners: RwLock<HashMap<String, Vec<Arc<dyn ResearchListener>>>>,
}

impl Studio {
    pub fn new() -> Self {
        Studio::default()
    }

    /// Registers a student and lets it join the studio. Joining happens
    /// outside the registry lock, so initial researches can re-enter the
    /// studio freely.
    pub fn add_student(&self, student: Arc<dyn Student>, attrs: &Attrs) -> Result<(), Error> {
        let name = student.name().to_string();
        {
            let mut students = self
                .students
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if students.iter().any(|(n, _)| *n == name) {
                return Err(Error::duplicate_student(&name));
            }
            students.push((name.clone(), student.clone()));
        }
        info!(student = %name, "student joined studio");
        student.join_studio(self, attrs)
    }

    pub fn add_students(
        &self,
        students: Vec<Arc<dyn Student>>,
        attrs: &Attrs,
    ) -> Result<(), Error> {
        for student in students {
            self.add_student(student, attrs)?;
        }
        Ok(())
    }

    pub fn student(&self, name: &str) -> Option<Arc<dyn Student>> {
        self.students
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, student)| student.clone())
    }

    pub fn student_names(&self) -> Vec<String> {
        self.students
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }

    fn students_snapshot(&self) -> Vec<(String, Arc<dyn Student>)> {
        self.students
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// True when the research is already in the knowledge cache.
    pub fn check_research_ready(&self, name: &str) -> bool {
        self.knowledge
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(name)
    }

    /// True when the research is cached or some registered student claims
    /// to provide it.
    pub fn check_research_provided(&self, name: &str) -> bool {
        if self.check_research_ready(name) {
            return true;
        }
        self.students_snapshot()
            .iter()
            .any(|(_, student)| student.is_research_provided(name))
    }

    /// The cached research, if present.
    pub fn knowledge(&self, name: &str) -> Option<ResearchNode> {
        self.knowledge
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
    }

    pub fn knowledge_names(&self) -> Vec<String> {
        self.knowledge
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect()
    }

    /// Requests a research by name: cached result, or production by the
    /// first student providing it.
    pub fn research(&self, name: &str, attrs: &Attrs) -> Result<ResearchNode, Error> {
        self.research_opt(name, None, false, attrs)
    }

    /// The full research entry point. `student_name` forces production by a
    /// specific student; `update` bypasses the cache and recomputes.
    pub fn research_opt(
        &self,
        name: &str,
        student_name: Option<&str>,
        update: bool,
        attrs: &Attrs,
    ) -> Result<ResearchNode, Error> {
        if !update {
            if let Some(cached) = self.knowledge(name) {
                debug!(research = %name, "research served from knowledge");
                return Ok(cached);
            }
        }
        let (producer_name, producer) = match student_name {
            Some(student_name) => {
                let student = self
                    .student(student_name)
                    .ok_or_else(|| Error::student_not_found(student_name).with_research(name))?;
                (student_name.to_string(), student)
            }
            None => self
                .students_snapshot()
                .into_iter()
                .find(|(_, student)| student.is_research_provided(name))
                .ok_or_else(|| Error::no_student_provides(name))?,
        };
        info!(research = %name, student = %producer_name, "producing research");
        let research = producer.research(self, name, attrs).map_err(|e| {
            error!(research = %name, student = %producer_name, "research production failed: {}", e);
            Error::research_failed(name, &producer_name, e)
        })?;
        self.store(name, research.clone());
        self.research_finished(name, attrs)?;
        Ok(research)
    }

    /// Inserts a research directly and notifies the listeners.
    pub fn add_research(
        &self,
        name: &str,
        research: ResearchNode,
        attrs: &Attrs,
    ) -> Result<(), Error> {
        self.store(name, research);
        self.research_finished(name, attrs)
    }

    /// Inserts a research directly without notification.
    pub fn add_studio_research(&self, name: &str, research: ResearchNode) {
        self.store(name, research);
    }

    fn store(&self, name: &str, research: ResearchNode) {
        self.knowledge
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(name.to_string(), research);
    }

    /// Registers a listener for a research name. Registering the same
    /// listener twice is a warning, not an error; it stays registered once.
    pub fn add_research_listener(&self, name: &str, listener: Arc<dyn ResearchListener>) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let entry = listeners.entry(name.to_string()).or_default();
        if entry.iter().any(|l| Arc::ptr_eq(l, &listener)) {
            warn!(research = %name, "listener already registered, ignoring");
            return;
        }
        entry.push(listener);
    }

    pub fn remove_research_listener(&self, name: &str, listener: &Arc<dyn ResearchListener>) {
        let mut listeners = self
            .listeners
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let removed = match listeners.get_mut(name) {
            Some(entry) => {
                let before = entry.len();
                entry.retain(|l| !Arc::ptr_eq(l, listener));
                entry.len() < before
            }
            None => false,
        };
        if !removed {
            warn!(research = %name, "listener to remove was not registered");
        }
    }

    /// Notifies the listeners registered for the research. A failing
    /// listener is logged and its error propagates.
    pub fn research_finished(&self, name: &str, attrs: &Attrs) -> Result<(), Error> {
        let listeners: Vec<Arc<dyn ResearchListener>> = self
            .listeners
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(name)
            .cloned()
            .unwrap_or_default();
        for listener in listeners {
            listener.research_finished(self, name, attrs).map_err(|e| {
                error!(research = %name, "research listener failed: {}", e);
                e.with_research(name)
            })?;
        }
        Ok(())
    }
}
