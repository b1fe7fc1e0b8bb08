//! Student configuration: which researches a student offers, their
//! prerequisites, output filters and free-form attributes.
//!
//! Configurations are usually loaded from a YAML document:
//!
//! ```yaml
//! student: tutor
//! researches:
//!   "research.test 1":
//!     initial: true
//!     input:
//!       researches: [source]
//!     filter:
//!       data: { kind: "good" }
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::{OnceLock, PoisonError, RwLock};

use serde::de::{MapAccess, Visitor};
use serde::Deserializer;

use crate::error::Error;
use crate::filter::FilterSpec;

/// Prerequisite research names, either a plain list or a mapping of
/// handler-local alias to research name.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ResearchNames {
    List(Vec<String>),
    Named(HashMap<String, String>),
}

impl ResearchNames {
    /// The research names to request, regardless of shape. For a mapping
    /// only the values count; the aliases are for the handler's use.
    pub fn names(&self) -> Vec<String> {
        match self {
            ResearchNames::List(names) => names.clone(),
            ResearchNames::Named(map) => map.values().cloned().collect(),
        }
    }
}

/// The `input` block of a research specification. Keys other than
/// `researches` are retained verbatim for the handler.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResearchInput {
    #[serde(default)]
    pub researches: Option<ResearchNames>,
    #[serde(flatten)]
    pub extra: HashMap<String, serde_json::Value>,
}

/// The `filter` block of a research specification.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FilterConfig {
    /// Output filter applied to the research frame after production.
    #[serde(default)]
    pub data: Option<FilterSpec>,
}

/// Specification of a single research offered by a student.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResearchSpec {
    /// Produce this research as soon as the student joins a studio.
    #[serde(default)]
    pub initial: bool,
    #[serde(default)]
    pub input: Option<ResearchInput>,
    #[serde(default)]
    pub filter: Option<FilterConfig>,
    /// Declared filters over the research inputs, keyed by name. These are
    /// not applied automatically; handlers look them up as needed.
    #[serde(default, rename = "input filters")]
    pub input_filters: HashMap<String, FilterSpec>,
    #[serde(default)]
    pub attrs: HashMap<String, serde_json::Value>,
}

impl ResearchSpec {
    pub fn new() -> Self {
        ResearchSpec::default()
    }

    pub fn with_initial(mut self, initial: bool) -> Self {
        self.initial = initial;
        self
    }

    pub fn with_input_researches(mut self, researches: Vec<String>) -> Self {
        self.input
            .get_or_insert_with(ResearchInput::default)
            .researches = Some(ResearchNames::List(researches));
        self
    }

    pub fn with_output_filter(mut self, filter: FilterSpec) -> Self {
        self.filter.get_or_insert_with(FilterConfig::default).data = Some(filter);
        self
    }

    pub fn with_input_filter(mut self, name: impl Into<String>, filter: FilterSpec) -> Self {
        self.input_filters.insert(name.into(), filter);
        self
    }

    pub fn with_attr(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.attrs.insert(key.into(), value);
        self
    }

    /// Prerequisite research names, if any were declared.
    pub fn required_researches(&self) -> Option<Vec<String>> {
        self.input
            .as_ref()
            .and_then(|input| input.researches.as_ref())
            .map(ResearchNames::names)
    }

    pub fn output_filter(&self) -> Option<&FilterSpec> {
        self.filter.as_ref().and_then(|filter| filter.data.as_ref())
    }
}

/// Configuration of a student: its name and the researches it offers,
/// in document order. Derived views (initial and required researches)
/// are computed lazily and cached.
#[derive(Debug, Deserialize)]
pub struct StudentConfiguration {
    pub student: String,
    #[serde(default, deserialize_with = "ordered_researches")]
    pub researches: Vec<(String, ResearchSpec)>,
    #[serde(skip)]
    initial: OnceLock<Vec<String>>,
    #[serde(skip)]
    required: RwLock<Option<HashMap<String, Option<Vec<String>>>>>,
}

impl Clone for StudentConfiguration {
    fn clone(&self) -> Self {
        StudentConfiguration {
            student: self.student.clone(),
            researches: self.researches.clone(),
            initial: OnceLock::new(),
            required: RwLock::new(None),
        }
    }
}

impl StudentConfiguration {
    pub fn new(student: impl Into<String>) -> Self {
        StudentConfiguration {
            student: student.into(),
            researches: Vec::new(),
            initial: OnceLock::new(),
            required: RwLock::new(None),
        }
    }

    /// Adds or replaces a research specification, keeping document order.
    pub fn with_research(mut self, name: impl Into<String>, spec: ResearchSpec) -> Self {
        let name = name.into();
        if let Some(entry) = self.researches.iter_mut().find(|(n, _)| *n == name) {
            entry.1 = spec;
        } else {
            self.researches.push((name, spec));
        }
        self
    }

    pub fn from_yaml(text: &str) -> Result<Self, Error> {
        serde_yaml::from_str(text).map_err(Error::serialization_error)
    }

    pub fn research(&self, name: &str) -> Option<&ResearchSpec> {
        self.researches
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, spec)| spec)
    }

    pub fn research_names(&self) -> Vec<String> {
        self.researches.iter().map(|(name, _)| name.clone()).collect()
    }

    /// Names of the researches marked `initial: true`, in document order.
    /// Computed once and cached.
    pub fn initial_researches(&self) -> &[String] {
        self.initial.get_or_init(|| {
            self.researches
                .iter()
                .filter(|(_, spec)| spec.initial)
                .map(|(name, _)| name.clone())
                .collect()
        })
    }

    /// Mapping of research name to its declared prerequisites (`None` when
    /// the research declares no input block). Cached; pass `update = true`
    /// to recompute after the configuration changed.
    pub fn required_researches(&self, update: bool) -> HashMap<String, Option<Vec<String>>> {
        let mut cache = self
            .required
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        if update || cache.is_none() {
            let computed = self
                .researches
                .iter()
                .map(|(name, spec)| (name.clone(), spec.required_researches()))
                .collect();
            *cache = Some(computed);
        }
        cache.clone().unwrap_or_default()
    }

    pub fn output_filter(&self, name: &str) -> Option<&FilterSpec> {
        self.research(name).and_then(ResearchSpec::output_filter)
    }
}

fn ordered_researches<'de, D>(deserializer: D) -> Result<Vec<(String, ResearchSpec)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct OrderedVisitor;

    impl<'de> Visitor<'de> for OrderedVisitor {
        type Value = Vec<(String, ResearchSpec)>;

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "a mapping of research name to research specification")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((name, spec)) = map.next_entry::<String, ResearchSpec>()? {
                entries.push((name, spec));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(OrderedVisitor)
}
