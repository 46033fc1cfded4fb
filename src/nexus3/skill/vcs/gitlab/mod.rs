//! GitLab skill family.
//!
//! Registration is best-effort and permission-aware: nothing is registered
//! for sandboxed agents (network blocked) or when no instance is
//! configured. Each skill exposes a single `action` parameter dispatching
//! among its sub-operations.

pub mod base;
pub mod branch;
pub mod client;
pub mod issue;
pub mod label;
pub mod mr;
pub mod repo;

use std::sync::Arc;

use crate::nexus3::skill::services::ServiceContainer;
use crate::nexus3::skill::vcs::gitlab::base::{GitLabAction, GitLabSkill, GitLabSkillBase};
use crate::nexus3::skill::{Skill, SkillFactory};

fn make_skill<A: GitLabAction + 'static>(
    services: &Arc<ServiceContainer>,
    action: A,
) -> Option<Arc<dyn Skill>> {
    // Network skills are blocked at registration for sandboxed agents.
    if !services.permission_level().allows_network() {
        return None;
    }
    let config = services.gitlab_config()?.clone();
    if config.instances.is_empty() {
        return None;
    }
    let base = GitLabSkillBase::new(Arc::clone(services), config);
    Some(Arc::new(GitLabSkill::new(base, action)))
}

fn repo_factory(services: &Arc<ServiceContainer>) -> Option<Arc<dyn Skill>> {
    make_skill(services, repo::RepoAction)
}

fn issue_factory(services: &Arc<ServiceContainer>) -> Option<Arc<dyn Skill>> {
    make_skill(services, issue::IssueAction)
}

fn mr_factory(services: &Arc<ServiceContainer>) -> Option<Arc<dyn Skill>> {
    make_skill(services, mr::MergeRequestAction)
}

fn branch_factory(services: &Arc<ServiceContainer>) -> Option<Arc<dyn Skill>> {
    make_skill(services, branch::BranchAction)
}

fn label_factory(services: &Arc<ServiceContainer>) -> Option<Arc<dyn Skill>> {
    make_skill(services, label::LabelAction)
}

/// The GitLab registration table.
pub fn gitlab_factories() -> Vec<SkillFactory> {
    vec![
        repo_factory,
        issue_factory,
        mr_factory,
        branch_factory,
        label_factory,
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::nexus3::permissions::PermissionLevel;
    use crate::nexus3::skill::vcs::config::{GitLabConfig, GitLabInstance};
    use std::path::PathBuf;

    fn gitlab_config() -> GitLabConfig {
        let mut config = GitLabConfig::default();
        config.instances.insert(
            "main".to_string(),
            GitLabInstance {
                url: "https://gitlab.example.com".to_string(),
                token: Some("tok".to_string()),
                token_env: None,
                username: None,
                email: None,
                user_id: None,
            },
        );
        config.validate().unwrap();
        config
    }

    #[test]
    fn test_factories_skip_sandboxed_agents() {
        let services = Arc::new(ServiceContainer::new(
            PathBuf::from("/tmp"),
            PermissionLevel::Sandboxed,
            Some(gitlab_config()),
            Arc::new(crate::nexus3::skill::services::ApproveAll),
        ));
        for factory in gitlab_factories() {
            assert!(factory(&services).is_none());
        }
    }

    #[test]
    fn test_factories_skip_unconfigured_agents() {
        let services = Arc::new(ServiceContainer::new(
            PathBuf::from("/tmp"),
            PermissionLevel::Yolo,
            None,
            Arc::new(crate::nexus3::skill::services::ApproveAll),
        ));
        for factory in gitlab_factories() {
            assert!(factory(&services).is_none());
        }
    }

    #[test]
    fn test_factories_register_for_configured_trusted_agents() {
        let services = Arc::new(ServiceContainer::new(
            PathBuf::from("/tmp"),
            PermissionLevel::Trusted,
            Some(gitlab_config()),
            Arc::new(crate::nexus3::skill::services::ApproveAll),
        ));
        let skills: Vec<_> = gitlab_factories()
            .into_iter()
            .filter_map(|factory| factory(&services))
            .collect();
        assert_eq!(skills.len(), 5);
        let names: Vec<&str> = skills.iter().map(|s| s.name()).collect();
        assert!(names.contains(&"gitlab_issue"));
        assert!(names.contains(&"gitlab_repo"));
    }
}
