//! Non-fatal findings about the analyzed program.
//!
//! The engine never aborts on these: it records a [`Diagnostic`] against the
//! current source location, substitutes `untyped` (or nothing) for the offending
//! value, and keeps going.

use serde::Serialize;
use std::collections::BTreeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Error,
    Warning,
}

/// What went wrong. `Display` yields the message text.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum DiagnosticReason {
    UndefinedMethod { recv: String, mid: String },
    UninitializedConstant(String),
    /// `wrong number of arguments (given N, expected M)`; `expected` is preformatted
    /// (`2`, `1+`, `1..3`).
    WrongArity { given: usize, expected: String },
    MissingKeywords,
    UnknownKeyword(String),
    NonHashKeywordSplat,
    FailedToResolveOverload,
    /// Receiver is the return value of a `void` method.
    VoidReceiver,
    /// A block argument that is neither a Proc, a Symbol nor nil.
    InvalidBlockArgument(String),
    NoSuperMethod(String),
    SuperclassIsAny,
    SuperclassIsInstance(String),
    SuperclassNotClass(String),
    NonModuleMixin(String),
    ConstantRedefined(String),
    DynamicSymbol,
    SingletonOfNonClass(String),
    /// Free-form message for rarely hit paths.
    Other(String),
}

impl std::fmt::Display for DiagnosticReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            DiagnosticReason::UndefinedMethod { recv, mid } => {
                write!(f, "undefined method: {}#{}", recv, mid)
            }
            DiagnosticReason::UninitializedConstant(name) => {
                write!(f, "uninitialized constant {}", name)
            }
            DiagnosticReason::WrongArity { given, expected } => {
                write!(
                    f,
                    "wrong number of arguments (given {}, expected {})",
                    given, expected
                )
            }
            DiagnosticReason::MissingKeywords => write!(f, "no argument for required keywords"),
            DiagnosticReason::UnknownKeyword(k) => write!(f, "unknown keyword: {}", k),
            DiagnosticReason::NonHashKeywordSplat => write!(f, "non hash is passed to **kwarg?"),
            DiagnosticReason::FailedToResolveOverload => write!(f, "failed to resolve overload"),
            DiagnosticReason::VoidReceiver => write!(f, "void's method is called"),
            DiagnosticReason::InvalidBlockArgument(ty) => {
                write!(f, "block argument is not a Proc: {}", ty)
            }
            DiagnosticReason::NoSuperMethod(mid) => {
                write!(f, "super: no superclass method `{}'", mid)
            }
            DiagnosticReason::SuperclassIsAny => write!(f, "superclass is any"),
            DiagnosticReason::SuperclassIsInstance(ty) => {
                write!(f, "superclass is an instance; {}", ty)
            }
            DiagnosticReason::SuperclassNotClass(ty) => {
                write!(f, "superclass is not a class; {}", ty)
            }
            DiagnosticReason::NonModuleMixin(ty) => {
                write!(f, "attempted to mix in a non-module: {}", ty)
            }
            DiagnosticReason::ConstantRedefined(name) => {
                write!(f, "already initialized constant {}", name)
            }
            DiagnosticReason::DynamicSymbol => write!(f, "dynamic symbol is not supported"),
            DiagnosticReason::SingletonOfNonClass(ty) => {
                write!(f, "singleton class of a non-class is not supported: {}", ty)
            }
            DiagnosticReason::Other(msg) => write!(f, "{}", msg),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub struct SourceLocation {
    pub path: String,
    pub line: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.path, self.line)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Diagnostic {
    pub severity: Severity,
    pub reason: DiagnosticReason,
    pub location: Option<SourceLocation>,
    /// Enclosing method, e.g. `Foo#bar`.
    pub context: Option<String>,
}

impl Diagnostic {
    pub fn error(reason: DiagnosticReason) -> Self {
        Self {
            severity: Severity::Error,
            reason,
            location: None,
            context: None,
        }
    }

    pub fn warning(reason: DiagnosticReason) -> Self {
        Self {
            severity: Severity::Warning,
            reason,
            location: None,
            context: None,
        }
    }

    pub fn with_location(mut self, location: Option<SourceLocation>) -> Self {
        self.location = location;
        self
    }

    pub fn with_context(mut self, context: impl Into<String>) -> Self {
        self.context = Some(context.into());
        self
    }

    pub fn message(&self) -> String {
        self.reason.to_string()
    }
}

impl std::fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(loc) = &self.location {
            write!(f, "{}: ", loc)?;
        }
        let label = match self.severity {
            Severity::Error => "error",
            Severity::Warning => "warning",
        };
        write!(f, "[{}] {}", label, self.reason)?;
        if let Some(ctx) = &self.context {
            write!(f, " (in {})", ctx)?;
        }
        Ok(())
    }
}

impl Serialize for Diagnostic {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        use serde::ser::SerializeStruct;
        let mut s = serializer.serialize_struct("Diagnostic", 4)?;
        s.serialize_field("severity", &self.severity)?;
        s.serialize_field("message", &self.message())?;
        s.serialize_field("location", &self.location)?;
        s.serialize_field("context", &self.context)?;
        s.end()
    }
}

/// Diagnostics deduplicated by (location, message), kept in emission order.
#[derive(Debug, Default)]
pub struct DiagnosticSink {
    seen: BTreeSet<(Option<SourceLocation>, String)>,
    items: Vec<Diagnostic>,
}

impl DiagnosticSink {
    pub fn emit(&mut self, diagnostic: Diagnostic) {
        let key = (diagnostic.location.clone(), diagnostic.message());
        if self.seen.insert(key) {
            self.items.push(diagnostic);
        }
    }

    pub fn items(&self) -> &[Diagnostic] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reason_display() {
        assert_eq!(
            DiagnosticReason::WrongArity {
                given: 1,
                expected: "2".to_string()
            }
            .to_string(),
            "wrong number of arguments (given 1, expected 2)"
        );
        assert_eq!(
            DiagnosticReason::UndefinedMethod {
                recv: "Integer".to_string(),
                mid: "foo".to_string()
            }
            .to_string(),
            "undefined method: Integer#foo"
        );
        assert_eq!(
            DiagnosticReason::NonHashKeywordSplat.to_string(),
            "non hash is passed to **kwarg?"
        );
    }

    #[test]
    fn test_sink_deduplicates_by_location_and_message() {
        let loc = Some(SourceLocation {
            path: "a.rb".to_string(),
            line: 3,
        });
        let mut sink = DiagnosticSink::default();
        sink.emit(Diagnostic::error(DiagnosticReason::FailedToResolveOverload).with_location(loc.clone()));
        sink.emit(Diagnostic::error(DiagnosticReason::FailedToResolveOverload).with_location(loc));
        sink.emit(Diagnostic::warning(DiagnosticReason::DynamicSymbol));
        assert_eq!(sink.len(), 2);
    }

    #[test]
    fn test_diagnostic_display() {
        let diag = Diagnostic::warning(DiagnosticReason::SuperclassIsAny)
            .with_location(Some(SourceLocation {
                path: "a.rb".to_string(),
                line: 1,
            }))
            .with_context("Foo");
        assert_eq!(diag.to_string(), "a.rb:1: [warning] superclass is any (in Foo)");
    }
}
