use thiserror::Error;

/// Malformed or incomplete scene description.
///
/// Every variant names the offending node or attribute so a failed load can
/// be reported with a single descriptive message.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("XML parse error: {0}")]
    Xml(String),

    #[error("cannot read scene file {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("missing mandatory attribute '{attribute}' in node <{element}>")]
    MissingAttribute {
        attribute: &'static str,
        element: String,
    },

    #[error("missing required element <{element}> in {context}")]
    MissingElement {
        element: &'static str,
        context: String,
    },

    #[error("invalid value for '{param}' in <{element}>: {message}")]
    InvalidValue {
        param: String,
        element: String,
        message: String,
    },

    #[error("XML node is <{found}> (<{expected}> expected)")]
    WrongNode { expected: &'static str, found: String },

    #[error("unknown {kind} type '{type_name}'")]
    UnknownType { kind: String, type_name: String },

    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl ConfigError {
    pub fn missing_attribute(attribute: &'static str, element: impl Into<String>) -> Self {
        Self::MissingAttribute {
            attribute,
            element: element.into(),
        }
    }

    pub fn missing_element(element: &'static str, context: impl Into<String>) -> Self {
        Self::MissingElement {
            element,
            context: context.into(),
        }
    }

    pub fn invalid_value(
        param: impl Into<String>,
        element: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::InvalidValue {
            param: param.into(),
            element: element.into(),
            message: message.into(),
        }
    }

    pub fn unknown_type(kind: impl Into<String>, type_name: impl Into<String>) -> Self {
        Self::UnknownType {
            kind: kind.into(),
            type_name: type_name.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ConfigError>;
