use itertools::Itertools;

use std::error;
use std::fmt;
use std::fmt::Display;
use std::path::Path;

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash, Copy)]
pub enum ErrorType {
    ResearchNotFound,
    InvalidStudent,
    FilterEvaluation,
    InvalidFilter,
    SerializationError,
    ReportWrite,
    General,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Error {
    pub error_type: ErrorType,
    pub message: String,
    pub research: Option<String>,
    pub student: Option<String>,
}

impl Error {
    pub fn new(error_type: ErrorType, message: String) -> Self {
        Error {
            error_type,
            message,
            research: None,
            student: None,
        }
    }

    pub fn with_research(mut self, research_name: &str) -> Self {
        self.research = Some(research_name.to_string());
        self
    }

    pub fn with_student(mut self, student_name: &str) -> Self {
        self.student = Some(student_name.to_string());
        self
    }

    /// No registered student claims to provide the requested research.
    pub fn no_student_provides(research_name: &str) -> Self {
        Error {
            error_type: ErrorType::ResearchNotFound,
            message: format!(
                "Research '{}' could not be generated by any student",
                research_name
            ),
            research: Some(research_name.to_string()),
            student: None,
        }
    }

    /// A specific student was asked for a research it has no handler for.
    pub fn research_not_available(
        research_name: &str,
        student_name: &str,
        provided: &[String],
    ) -> Self {
        Error {
            error_type: ErrorType::ResearchNotFound,
            message: format!(
                "Research '{}' not available in student '{}' (handlers: {})",
                research_name,
                student_name,
                provided.iter().map(|name| format!("'{}'", name)).join(", ")
            ),
            research: Some(research_name.to_string()),
            student: Some(student_name.to_string()),
        }
    }

    /// A producer failed while computing a research. The original cause is
    /// embedded in the message so the top-level caller sees the whole chain.
    pub fn research_failed<E: Display>(research_name: &str, student_name: &str, cause: E) -> Self {
        Error {
            error_type: ErrorType::ResearchNotFound,
            message: format!(
                "Research '{}' failed in student '{}': {}",
                research_name, student_name, cause
            ),
            research: Some(research_name.to_string()),
            student: Some(student_name.to_string()),
        }
    }

    pub fn student_not_found(student_name: &str) -> Self {
        Error {
            error_type: ErrorType::ResearchNotFound,
            message: format!("Student '{}' not registered in studio", student_name),
            research: None,
            student: Some(student_name.to_string()),
        }
    }

    pub fn duplicate_student(student_name: &str) -> Self {
        Error {
            error_type: ErrorType::InvalidStudent,
            message: format!("Student '{}' already registered in studio", student_name),
            research: None,
            student: Some(student_name.to_string()),
        }
    }

    /// A filter key could not be applied to the table (missing column,
    /// incompatible dtype, failed expression).
    pub fn filter_key<E: Display>(key: &str, cause: E) -> Self {
        Error {
            error_type: ErrorType::FilterEvaluation,
            message: format!("Key '{}' not valid for filter: {}", key, cause),
            research: None,
            student: None,
        }
    }

    pub fn filter_evaluation(message: String) -> Self {
        Error {
            error_type: ErrorType::FilterEvaluation,
            message,
            research: None,
            student: None,
        }
    }

    pub fn invalid_filter(message: String) -> Self {
        Error {
            error_type: ErrorType::InvalidFilter,
            message,
            research: None,
            student: None,
        }
    }

    pub fn empty_filter_list() -> Self {
        Error {
            error_type: ErrorType::InvalidFilter,
            message: "Empty filter list - an OR filter needs at least one element".to_string(),
            research: None,
            student: None,
        }
    }

    pub fn serialization_error<E: Display>(error: E) -> Self {
        Error {
            error_type: ErrorType::SerializationError,
            message: error.to_string(),
            research: None,
            student: None,
        }
    }

    pub fn report_write<E: Display>(path: &Path, cause: E) -> Self {
        Error {
            error_type: ErrorType::ReportWrite,
            message: format!("Can't write report '{}': {}", path.display(), cause),
            research: None,
            student: None,
        }
    }

    pub fn general_error(message: String) -> Self {
        Error {
            error_type: ErrorType::General,
            message,
            research: None,
            student: None,
        }
    }

    pub fn is_research_not_found(&self) -> bool {
        self.error_type == ErrorType::ResearchNotFound
    }

    pub fn is_invalid_filter(&self) -> bool {
        self.error_type == ErrorType::InvalidFilter
    }

    pub fn is_filter_evaluation(&self) -> bool {
        self.error_type == ErrorType::FilterEvaluation
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(research) = &self.research {
            write!(f, " [research: '{}']", research)?;
        }
        if let Some(student) = &self.student {
            write!(f, " [student: '{}']", student)?;
        }
        Ok(())
    }
}

impl error::Error for Error {
    fn description(&self) -> &str {
        &self.message
    }
}
