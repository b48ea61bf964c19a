use serde::Serialize;
use std::ffi::OsString;

/// Where runs execute. Resolved once at startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ExecutionContext {
    Local,
    /// Inside a batch-scheduler job; `variable` is the job-id var that was set.
    ClusterManaged { variable: String },
}

impl ExecutionContext {
    pub fn detect(job_vars: &[String]) -> Self {
        Self::detect_with(job_vars, |name| std::env::var_os(name))
    }

    pub fn detect_with<F>(job_vars: &[String], lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        job_vars
            .iter()
            .find(|name| lookup(name).is_some())
            .map(|name| ExecutionContext::ClusterManaged {
                variable: name.clone(),
            })
            .unwrap_or(ExecutionContext::Local)
    }

    pub fn is_cluster(&self) -> bool {
        matches!(self, ExecutionContext::ClusterManaged { .. })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Identity {
    pub host: String,
    pub user: String,
}

impl Identity {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var_os(name))
    }

    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<OsString>,
    {
        let read = |name: &str| {
            lookup(name)
                .map(|v| v.to_string_lossy().into_owned())
                .filter(|v| !v.is_empty())
                .unwrap_or_else(|| "unknown".to_string())
        };
        Self {
            host: read("HOSTNAME"),
            user: read("USER"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    fn env(pairs: &[(&str, &str)]) -> BTreeMap<String, OsString> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), OsString::from(v)))
            .collect()
    }

    fn default_vars() -> Vec<String> {
        vec!["SLURM_JOB_ID".to_string(), "LSB_JOBID".to_string()]
    }

    #[test]
    fn no_job_var_means_local() {
        let vars = env(&[("HOME", "/home/ned")]);
        let ctx = ExecutionContext::detect_with(&default_vars(), |k| vars.get(k).cloned());
        assert_eq!(ctx, ExecutionContext::Local);
        assert!(!ctx.is_cluster());
    }

    #[test]
    fn presence_alone_selects_cluster() {
        let vars = env(&[("LSB_JOBID", "")]);
        let ctx = ExecutionContext::detect_with(&default_vars(), |k| vars.get(k).cloned());
        assert_eq!(
            ctx,
            ExecutionContext::ClusterManaged {
                variable: "LSB_JOBID".to_string()
            }
        );
    }

    #[test]
    fn identity_defaults_to_unknown() {
        let vars = env(&[("USER", "ned")]);
        let id = Identity::from_lookup(|k| vars.get(k).cloned());
        assert_eq!(id.user, "ned");
        assert_eq!(id.host, "unknown");
    }
}
