use std::collections::BTreeSet;
use std::ffi::OsString;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use kiln::bootstrap::cc_rebuild_command;
use kiln::RuntimeConfig;
use serde::Deserialize;

pub const DEFAULT_PLAN: &str = "kiln.json";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildPlan {
    #[serde(default)]
    pub dirs: Vec<PathBuf>,
    #[serde(default)]
    pub self_rebuild: Option<SelfRebuild>,
    #[serde(default)]
    pub batches: Vec<Batch>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct SelfRebuild {
    pub sources: Vec<PathBuf>,
    /// Rebuild argv; `{out}` names the staged binary. Defaults to compiling
    /// the first source with `$KILN_CC`.
    #[serde(default)]
    pub command: Option<Vec<String>>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Batch {
    pub name: String,
    #[serde(default)]
    pub jobs: Vec<Target>,
    #[serde(default)]
    pub then: Option<Target>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct Target {
    pub output: PathBuf,
    #[serde(default)]
    pub inputs: Vec<PathBuf>,
    pub argv: Vec<String>,
}

impl BuildPlan {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes =
            std::fs::read(path).with_context(|| format!("read plan {}", path.display()))?;
        Self::from_slice(&bytes).with_context(|| format!("plan {}", path.display()))
    }

    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let plan: BuildPlan = serde_json::from_slice(bytes).context("parse plan JSON")?;
        plan.validate()?;
        Ok(plan)
    }

    fn validate(&self) -> Result<()> {
        if let Some(sr) = &self.self_rebuild {
            if sr.sources.is_empty() {
                bail!("self_rebuild.sources must not be empty");
            }
            if matches!(&sr.command, Some(argv) if argv.is_empty()) {
                bail!("self_rebuild.command must not be empty");
            }
        }
        let mut names = BTreeSet::new();
        for batch in &self.batches {
            if !names.insert(batch.name.as_str()) {
                bail!("duplicate batch name {:?}", batch.name);
            }
            for target in batch.targets() {
                if target.argv.is_empty() {
                    bail!(
                        "batch {:?}: target {} has an empty argv",
                        batch.name,
                        target.output.display()
                    );
                }
            }
        }
        Ok(())
    }
}

impl SelfRebuild {
    pub fn rebuild_argv(&self, cfg: &RuntimeConfig) -> Vec<OsString> {
        match &self.command {
            Some(argv) => argv.iter().map(OsString::from).collect(),
            None => cc_rebuild_command(cfg, &self.sources[0]),
        }
    }
}

impl Batch {
    pub fn targets(&self) -> impl Iterator<Item = &Target> {
        self.jobs.iter().chain(self.then.as_ref())
    }
}
