//! Qualifier handling for asset requests
//!
//! Qualifiers annotate an asset request with things like content checksums
//! or resource types. A few well-known combinations translate to a concrete
//! fetch Command, which lets asset lookups share cache keys with equivalent
//! remote-execution actions.

use std::collections::BTreeSet;

use crate::build::bazel::remote::{
    asset::v1::Qualifier,
    execution::v2::{command::EnvironmentVariable, Command},
};

pub const QUALIFIER_RESOURCE_TYPE: &str = "resource_type";
pub const QUALIFIER_VCS_BRANCH: &str = "vcs.branch";
pub const QUALIFIER_VCS_COMMIT: &str = "vcs.commit";
pub const QUALIFIER_CHECKSUM_SRI: &str = "checksum.sri";

pub const RESOURCE_TYPE_GIT: &str = "application/x-git";

/// The set of qualifier names present on a request, used to report which of
/// them a fetcher cannot honour.
pub type QualifierSet = BTreeSet<String>;

pub fn qualifier_names(qualifiers: &[Qualifier]) -> QualifierSet {
    qualifiers.iter().map(|q| q.name.clone()).collect()
}

/// Translator from a well-known qualifier combination to the Command a
/// remote-execution worker would run to produce the asset. A translator only
/// exists when every qualifier in the set is consumed by it; any leftover
/// qualifier means the reference must be encoded via the generic fallback.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandTranslator {
    Git {
        branch: Option<String>,
        commit: Option<String>,
    },
}

impl CommandTranslator {
    pub fn from_qualifiers(qualifiers: &[Qualifier]) -> Option<Self> {
        let mut resource_type = None;
        let mut branch = None;
        let mut commit = None;
        for qualifier in qualifiers {
            match qualifier.name.as_str() {
                QUALIFIER_RESOURCE_TYPE => resource_type = Some(qualifier.value.as_str()),
                QUALIFIER_VCS_BRANCH => branch = Some(qualifier.value.clone()),
                QUALIFIER_VCS_COMMIT => commit = Some(qualifier.value.clone()),
                _ => return None,
            }
        }
        match resource_type {
            Some(RESOURCE_TYPE_GIT) => Some(Self::Git { branch, commit }),
            _ => None,
        }
    }

    /// Build the Command for a single URI. Must be deterministic: the
    /// serialized Command feeds the cache key.
    pub fn command_for_uri(&self, uri: &str) -> Command {
        match self {
            Self::Git { branch, commit } => {
                let mut environment_variables = Vec::new();
                if let Some(branch) = branch {
                    environment_variables.push(EnvironmentVariable {
                        name: "GIT_BRANCH".to_string(),
                        value: branch.clone(),
                    });
                }
                if let Some(commit) = commit {
                    environment_variables.push(EnvironmentVariable {
                        name: "GIT_COMMIT".to_string(),
                        value: commit.clone(),
                    });
                }
                Command {
                    arguments: vec![
                        "git".to_string(),
                        "clone".to_string(),
                        uri.to_string(),
                        "out".to_string(),
                    ],
                    environment_variables,
                    output_paths: vec!["out".to_string()],
                    ..Default::default()
                }
            }
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn qualifier(name: &str, value: &str) -> Qualifier {
        Qualifier {
            name: name.to_string(),
            value: value.to_string(),
        }
    }

    #[test]
    fn git_resource_type_translates() {
        let translator = CommandTranslator::from_qualifiers(&[qualifier(
            QUALIFIER_RESOURCE_TYPE,
            RESOURCE_TYPE_GIT,
        )])
        .unwrap();
        assert_eq!(
            translator,
            CommandTranslator::Git {
                branch: None,
                commit: None
            }
        );
    }

    #[test]
    fn git_with_vcs_qualifiers_translates() {
        let translator = CommandTranslator::from_qualifiers(&[
            qualifier(QUALIFIER_RESOURCE_TYPE, RESOURCE_TYPE_GIT),
            qualifier(QUALIFIER_VCS_COMMIT, "0123abcd"),
        ])
        .unwrap();
        let command = translator.command_for_uri("https://example.com/repo.git");
        assert_eq!(
            command.arguments,
            ["git", "clone", "https://example.com/repo.git", "out"]
        );
        assert_eq!(command.environment_variables.len(), 1);
        assert_eq!(command.environment_variables[0].name, "GIT_COMMIT");
        assert_eq!(command.output_paths, ["out"]);
    }

    #[test]
    fn unknown_qualifier_prevents_translation() {
        assert_eq!(
            CommandTranslator::from_qualifiers(&[
                qualifier(QUALIFIER_RESOURCE_TYPE, RESOURCE_TYPE_GIT),
                qualifier("test", "test"),
            ]),
            None
        );
    }

    #[test]
    fn unknown_resource_type_does_not_translate() {
        assert_eq!(
            CommandTranslator::from_qualifiers(&[qualifier(
                QUALIFIER_RESOURCE_TYPE,
                "application/x-tar"
            )]),
            None
        );
    }

    #[test]
    fn empty_qualifiers_do_not_translate() {
        assert_eq!(CommandTranslator::from_qualifiers(&[]), None);
    }

    #[test]
    fn translated_command_is_deterministic() {
        let qualifiers = [
            qualifier(QUALIFIER_RESOURCE_TYPE, RESOURCE_TYPE_GIT),
            qualifier(QUALIFIER_VCS_BRANCH, "main"),
        ];
        let a = CommandTranslator::from_qualifiers(&qualifiers)
            .unwrap()
            .command_for_uri("https://example.com/repo.git");
        let b = CommandTranslator::from_qualifiers(&qualifiers)
            .unwrap()
            .command_for_uri("https://example.com/repo.git");
        assert_eq!(a, b);
    }

    #[test]
    fn qualifier_names_are_sorted_and_deduplicated() {
        let names = qualifier_names(&[
            qualifier("b", "1"),
            qualifier("a", "2"),
            qualifier("b", "3"),
        ]);
        assert_eq!(names.into_iter().collect::<Vec<_>>(), ["a", "b"]);
    }
}
