//! Serializable summary of an analysis run.
//!
//! Every type is rendered with the same screen names diagnostics use, so the
//! result can be compared textually and dumped as JSON.

use serde::Serialize;

use crate::diagnostics::{Diagnostic, Severity, SourceLocation};

#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct AnalysisResult {
    /// The budget ran out before a fixpoint was reached; types are partial.
    pub terminated: bool,
    pub iterations: u64,
    pub methods: Vec<MethodSummary>,
    pub blocks: Vec<BlockSummary>,
    pub diagnostics: Vec<Diagnostic>,
    pub ivars: Vec<VariableSummary>,
    pub cvars: Vec<VariableSummary>,
    pub gvars: Vec<VariableSummary>,
    pub revealed: Vec<RevealedType>,
}

/// Joined signature of one method over every analyzed activation.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct MethodSummary {
    /// Class path, e.g. `Foo::Bar`.
    pub class: String,
    pub singleton: bool,
    pub name: String,
    /// Positional parameters in declaration order: `Integer`, `?String`, `*Symbol`.
    pub params: Vec<String>,
    /// `k: Integer`, `?opt: String`, `**Hash[Symbol, untyped]`
    pub keywords: Vec<String>,
    /// `{ (Integer) -> String }`, prefixed with `?` when the block is optional.
    pub block: Option<String>,
    pub ret: String,
}

impl MethodSummary {
    /// `(Integer, ?String) { (Integer) -> String } -> Integer`
    pub fn signature(&self) -> String {
        let params: Vec<&str> = self
            .params
            .iter()
            .chain(self.keywords.iter())
            .map(String::as_str)
            .collect();
        let mut out = format!("({})", params.join(", "));
        if let Some(block) = &self.block {
            out.push(' ');
            out.push_str(block);
        }
        out.push_str(" -> ");
        out.push_str(&self.ret);
        out
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct BlockSummary {
    pub name: String,
    pub location: Option<SourceLocation>,
    pub params: Vec<String>,
    pub ret: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct VariableSummary {
    /// Owning class path (`singleton(Foo)` for class-level instance variables);
    /// `None` for globals.
    pub owner: Option<String>,
    pub name: String,
    #[serde(rename = "type")]
    pub ty: String,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct RevealedType {
    pub location: Option<SourceLocation>,
    #[serde(rename = "type")]
    pub ty: String,
}

impl AnalysisResult {
    /// Summary of `class#name` (`class.name` when `singleton`).
    pub fn method(&self, class: &str, singleton: bool, name: &str) -> Option<&MethodSummary> {
        self.methods
            .iter()
            .find(|m| m.class == class && m.singleton == singleton && m.name == name)
    }

    pub fn ivar(&self, owner: &str, name: &str) -> Option<&str> {
        self.ivars
            .iter()
            .find(|v| v.owner.as_deref() == Some(owner) && v.name == name)
            .map(|v| v.ty.as_str())
    }

    pub fn cvar(&self, owner: &str, name: &str) -> Option<&str> {
        self.cvars
            .iter()
            .find(|v| v.owner.as_deref() == Some(owner) && v.name == name)
            .map(|v| v.ty.as_str())
    }

    pub fn gvar(&self, name: &str) -> Option<&str> {
        self.gvars
            .iter()
            .find(|v| v.name == name)
            .map(|v| v.ty.as_str())
    }

    pub fn errors(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Error)
    }

    pub fn warnings(&self) -> impl Iterator<Item = &Diagnostic> {
        self.diagnostics
            .iter()
            .filter(|d| d.severity == Severity::Warning)
    }

    /// Pretty JSON rendering.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signature_rendering() {
        let summary = MethodSummary {
            class: "Foo".to_string(),
            singleton: false,
            name: "bar".to_string(),
            params: vec!["Integer".to_string(), "?String".to_string()],
            keywords: vec!["k: Symbol".to_string()],
            block: Some("{ (Integer) -> nil }".to_string()),
            ret: "Integer".to_string(),
        };
        assert_eq!(
            summary.signature(),
            "(Integer, ?String, k: Symbol) { (Integer) -> nil } -> Integer"
        );
    }

    #[test]
    fn test_lookup_helpers() {
        let result = AnalysisResult {
            gvars: vec![VariableSummary {
                owner: None,
                name: "$x".to_string(),
                ty: "Integer".to_string(),
            }],
            ivars: vec![VariableSummary {
                owner: Some("Foo".to_string()),
                name: "@a".to_string(),
                ty: "String".to_string(),
            }],
            ..AnalysisResult::default()
        };
        assert_eq!(result.gvar("$x"), Some("Integer"));
        assert_eq!(result.gvar("$y"), None);
        assert_eq!(result.ivar("Foo", "@a"), Some("String"));
        assert_eq!(result.errors().count(), 0);
    }
}
