//! `${VAR}` and `${VAR:-default}` expansion for configuration strings.
//!
//! A bare `$VAR` is left alone so it reaches the backend command untouched.

use crate::ConfigError;

/// Expand a single value from the process environment.
pub(crate) fn expand_env(value: &str, field: &str) -> Result<String, ConfigError> {
    expand_with(value, field, |var| std::env::var(var).ok())
}

/// Expand every element of a command line, naming the failing element.
pub(crate) fn expand_args(args: &[String], field: &str) -> Result<Vec<String>, ConfigError> {
    args.iter()
        .enumerate()
        .map(|(i, arg)| expand_env(arg, &format!("{field}[{i}]")))
        .collect()
}

fn expand_with<F>(value: &str, field: &str, lookup: F) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    if !value.contains("${") {
        return Ok(value.to_owned());
    }

    shellexpand::env_with_context(value, |var| lookup(var).map(Some).ok_or(()))
        .map(std::borrow::Cow::into_owned)
        .map_err(|e| ConfigError::EnvVar {
            field: field.to_owned(),
            message: format!("${{{}}} not set", e.var_name),
        })
}
