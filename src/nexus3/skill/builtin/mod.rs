//! Builtin skills: file access, shell execution, Python snippets.

pub mod bash;
pub mod env;
pub mod files;
pub mod process;
pub mod python;

use crate::nexus3::skill::SkillFactory;

/// Factory table for the builtin skill set.
///
/// Execution factories yield nothing for sandboxed agents; the file skills
/// are always available (writes are still permission-gated internally).
pub fn builtin_factories() -> Vec<SkillFactory> {
    vec![
        files::read_file_factory,
        files::write_file_factory,
        bash::bash_safe_factory,
        bash::shell_unsafe_factory,
        python::run_python_factory,
    ]
}
