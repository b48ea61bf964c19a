use crate::archive::{ArchiveOutcome, Archiver};
use crate::error::{error_chain, ArchiveError, RunError, SetupError};
use crate::expand::{ConfigExpander, ExpandError};
use crate::orchestrate::{check_base_dir, check_config, check_park, Orchestrator, RunSpec};
use crate::process::ExitOutcome;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{info, info_span};

/// Everything needed to process a list of input configurations.
pub struct BatchPlan {
    pub executable: PathBuf,
    pub base_dir: PathBuf,
    pub park: Option<PathBuf>,
    pub inputs: Vec<PathBuf>,
    pub repeat: usize,
    pub name: String,
    pub expander: Box<dyn ConfigExpander>,
    pub options: BTreeMap<String, String>,
    pub detach: bool,
}

/// Progress notifications, delivered as they happen.
#[derive(Debug)]
pub enum BatchEvent<'a> {
    Expanding {
        input: &'a Path,
        expander: &'a str,
    },
    ExpandFailed {
        error: &'a RunError,
    },
    RunCompleted {
        config: &'a Path,
        working_dir: &'a Path,
        status: ExitOutcome,
    },
    RunDetached {
        config: &'a Path,
        working_dir: &'a Path,
        pid: u32,
    },
    RunFailed {
        config: &'a Path,
        error: &'a RunError,
    },
    Parked {
        from: &'a Path,
        to: &'a Path,
    },
    ParkRefused {
        outcome: &'a ArchiveOutcome,
    },
    ParkFailed {
        working_dir: &'a Path,
        error: &'a ArchiveError,
    },
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct BatchReport {
    pub runs: Vec<RunReport>,
    pub expand_failures: Vec<ExpandFailure>,
}

impl BatchReport {
    pub fn failures(&self) -> usize {
        self.runs.iter().filter(|r| !r.succeeded()).count() + self.expand_failures.len()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub input: PathBuf,
    pub config: PathBuf,
    pub working_dir: Option<PathBuf>,
    pub pid: Option<u32>,
    pub status: Option<ExitOutcome>,
    pub parked: Option<PathBuf>,
    pub error: Option<String>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        if self.error.is_some() {
            return false;
        }
        match self.status {
            Some(status) => status.success(),
            None => self.pid.is_some(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ExpandFailure {
    pub input: PathBuf,
    pub error: String,
}

impl BatchPlan {
    fn validate(&self) -> Result<(RunSpec, Option<PathBuf>), SetupError> {
        let base_dir = check_base_dir(&self.base_dir)?;
        let park = self.park.as_deref().map(check_park).transpose()?;
        let mut first = None;
        for input in &self.inputs {
            let config = check_config(input)?;
            first.get_or_insert(config);
        }
        let Some(first) = first else {
            return Err(SetupError::NoInputs);
        };
        let spec = RunSpec::new(&self.executable, &base_dir, &first, self.name.clone())?;
        Ok((spec, park))
    }

    /// A user-supplied name is kept for every input and the allocator numbers
    /// the collisions. Only the default name switches to `run%04d` per input.
    fn name_for(&self, index: usize, default_name: &str) -> String {
        if index == 0 || self.name != default_name {
            self.name.clone()
        } else {
            format!("run{:04}", index)
        }
    }
}

/// Runs every configuration in `plan`, one at a time.
///
/// Only setup problems are returned as errors, and they are detected before
/// anything runs. Failures of single runs, expansions or parkings are reported
/// through `observer` and the report, and the batch continues.
pub fn run_batch(
    orchestrator: &Orchestrator,
    plan: &BatchPlan,
    observer: &mut dyn FnMut(&BatchEvent<'_>),
) -> Result<BatchReport, SetupError> {
    let (template, park) = plan.validate()?;
    let settings = orchestrator.settings();
    let archiver = Archiver::new(orchestrator.recorder().clone());
    let template = template.with_args(settings.default_args.clone());
    let mut report = BatchReport::default();

    for (index, input) in plan.inputs.iter().enumerate() {
        let name = plan.name_for(index, &settings.default_name);
        let _span = info_span!("input", input = %input.display(), name = %name).entered();
        let input_spec = template.for_config(input, &name);

        let configs = match expand_input(plan, &input_spec, observer) {
            Ok(configs) => configs,
            Err(error) => {
                observer(&BatchEvent::ExpandFailed { error: &error });
                report.expand_failures.push(ExpandFailure {
                    input: input.clone(),
                    error: error_chain(&error),
                });
                continue;
            }
        };

        for config in configs {
            let spec = input_spec.for_config(&config, &name);
            let entry = if plan.detach {
                start_one(orchestrator, &spec, input, observer)
            } else {
                run_one(orchestrator, &archiver, &spec, input, park.as_deref(), observer)
            };
            report.runs.push(entry);
        }
    }

    info!(
        runs = report.runs.len(),
        failures = report.failures(),
        "batch finished"
    );
    Ok(report)
}

fn expand_input(
    plan: &BatchPlan,
    input_spec: &RunSpec,
    observer: &mut dyn FnMut(&BatchEvent<'_>),
) -> Result<Vec<PathBuf>, RunError> {
    let input = &input_spec.config;
    let wrap = |source: ExpandError| RunError::Expand {
        input: input.clone(),
        source,
    };
    let dest_dir = if plan.expander.needs_dest_dir() {
        let description = plan.expander.describe();
        observer(&BatchEvent::Expanding {
            input,
            expander: &description,
        });
        tempfile::Builder::new()
            .prefix("go-")
            .tempdir_in(&input_spec.base_dir)
            .map(|dir| dir.keep())
            .map_err(|source| {
                wrap(ExpandError::DestDir {
                    base: input_spec.base_dir.clone(),
                    source,
                })
            })?
    } else {
        input_spec.base_dir.clone()
    };
    let configs = plan
        .expander
        .expand(input, &plan.options, plan.repeat, &dest_dir)
        .map_err(wrap)?;
    if configs.is_empty() {
        return Err(wrap(ExpandError::Empty));
    }
    Ok(configs)
}

fn run_one(
    orchestrator: &Orchestrator,
    archiver: &Archiver,
    spec: &RunSpec,
    input: &Path,
    park: Option<&Path>,
    observer: &mut dyn FnMut(&BatchEvent<'_>),
) -> RunReport {
    let mut entry = RunReport {
        input: input.to_path_buf(),
        config: spec.config.clone(),
        working_dir: None,
        pid: None,
        status: None,
        parked: None,
        error: None,
    };
    let done = match orchestrator.run(spec) {
        Ok(done) => done,
        Err(error) => {
            observer(&BatchEvent::RunFailed {
                config: &spec.config,
                error: &error,
            });
            entry.working_dir = error.working_dir().map(Path::to_path_buf);
            entry.error = Some(error_chain(&error));
            return entry;
        }
    };
    observer(&BatchEvent::RunCompleted {
        config: &spec.config,
        working_dir: &done.working_dir,
        status: done.status,
    });
    entry.working_dir = Some(done.working_dir.clone());
    entry.status = Some(done.status);

    if let Some(park) = park {
        match archiver.archive(&done.working_dir, park, &spec.name_hint) {
            Ok(ArchiveOutcome::Parked { path }) => {
                observer(&BatchEvent::Parked {
                    from: &done.working_dir,
                    to: &path,
                });
                entry.working_dir = Some(path.clone());
                entry.parked = Some(path);
            }
            Ok(ArchiveOutcome::SameLocation { .. }) => {}
            Ok(outcome) => observer(&BatchEvent::ParkRefused { outcome: &outcome }),
            Err(error) => observer(&BatchEvent::ParkFailed {
                working_dir: &done.working_dir,
                error: &error,
            }),
        }
    }
    entry
}

fn start_one(
    orchestrator: &Orchestrator,
    spec: &RunSpec,
    input: &Path,
    observer: &mut dyn FnMut(&BatchEvent<'_>),
) -> RunReport {
    let mut entry = RunReport {
        input: input.to_path_buf(),
        config: spec.config.clone(),
        working_dir: None,
        pid: None,
        status: None,
        parked: None,
        error: None,
    };
    match orchestrator.start(spec) {
        Ok(started) => {
            observer(&BatchEvent::RunDetached {
                config: &spec.config,
                working_dir: &started.working_dir,
                pid: started.pid,
            });
            entry.working_dir = Some(started.working_dir);
            entry.pid = Some(started.pid);
        }
        Err(error) => {
            observer(&BatchEvent::RunFailed {
                config: &spec.config,
                error: &error,
            });
            entry.working_dir = error.working_dir().map(Path::to_path_buf);
            entry.error = Some(error_chain(&error));
        }
    }
    entry
}
