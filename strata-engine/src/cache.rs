#![forbid(unsafe_code)]

//! Optional cross-build memoization.
//!
//! Entries are keyed by a content hash covering a function's own model, the
//! models of every transitively reachable callee, and the record table:
//! exactly the inputs its verdicts depend on. A key miss is simply absence;
//! corrupt or unreadable cache files degrade to an empty cache rather than
//! failing the build. Entries are only ever written complete.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use sha2::Digest;
use strata_ast::Program;
use strata_invert::{InverseModel, NonInvertibleReason};
use strata_sym::{ConstraintKind, FunctionSymbolicModel};
use strata_verify::{
    CallSiteReport, ConstraintVerdict, FunctionVerifyReport, GuardExpr, ProofResult,
};

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedVerdict {
    pub text: String,
    pub result: ProofResult,
    pub guard: Option<GuardExpr>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedSite {
    pub callee: String,
    pub assumptions: Vec<CachedVerdict>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum CachedInversion {
    Inverted(InverseModel),
    Failed {
        node: String,
        reason: NonInvertibleReason,
    },
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CachedFunction {
    pub guarantees: Vec<CachedVerdict>,
    pub call_sites: Vec<CachedSite>,
    pub stabilized: bool,
    pub inversion: Option<CachedInversion>,
}

#[derive(Debug, Default, Deserialize)]
struct CacheFile {
    entries: BTreeMap<String, CachedFunction>,
}

#[derive(Serialize)]
struct CacheFileRef<'a> {
    entries: &'a BTreeMap<String, CachedFunction>,
}

#[derive(Debug)]
pub struct IncrementalCache {
    path: PathBuf,
    entries: BTreeMap<String, CachedFunction>,
    dirty: bool,
}

impl IncrementalCache {
    pub fn load(path: &Path) -> Self {
        let entries = fs::read_to_string(path)
            .ok()
            .and_then(|text| serde_json::from_str::<CacheFile>(&text).ok())
            .map(|file| file.entries)
            .unwrap_or_default();
        Self {
            path: path.to_path_buf(),
            entries,
            dirty: false,
        }
    }

    pub fn get(&self, key: &str) -> Option<&CachedFunction> {
        self.entries.get(key)
    }

    pub fn insert(&mut self, key: String, entry: CachedFunction) {
        self.entries.insert(key, entry);
        self.dirty = true;
    }

    /// Best-effort write-back; the error message is surfaced as a build
    /// warning, never a failure.
    pub fn save(&mut self) -> Result<(), String> {
        if !self.dirty {
            return Ok(());
        }
        let text = serde_json::to_string_pretty(&CacheFileRef {
            entries: &self.entries,
        })
        .map_err(|e| e.to_string())?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| e.to_string())?;
        }
        fs::write(&self.path, text).map_err(|e| e.to_string())?;
        self.dirty = false;
        Ok(())
    }
}

/// Cache key: the function's own structural hash, every transitively
/// reachable callee's hash, and the record table. A change to any of them
/// changes the key, which is the invalidation rule.
pub fn cache_key(
    name: &str,
    models: &BTreeMap<String, FunctionSymbolicModel>,
    records_hash: &str,
) -> String {
    let mut reachable: Vec<&str> = Vec::new();
    let mut stack = vec![name];
    while let Some(current) = stack.pop() {
        let Some(model) = models.get(current) else {
            continue;
        };
        for site in &model.call_sites {
            let callee = site.callee.as_str();
            if callee != name && !reachable.contains(&callee) && models.contains_key(callee) {
                reachable.push(callee);
                stack.push(callee);
            }
        }
    }
    reachable.sort_unstable();

    let mut hasher = sha2::Sha256::new();
    hasher.update(models[name].content_hash.as_bytes());
    for callee in reachable {
        hasher.update(callee.as_bytes());
        hasher.update(models[callee].content_hash.as_bytes());
    }
    hasher.update(records_hash.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn records_hash(program: &Program) -> String {
    let mut hasher = sha2::Sha256::new();
    for record in &program.records {
        hasher.update(record.name.node.as_bytes());
        for field in &record.fields {
            hasher.update(field.name.node.as_bytes());
            hasher.update(field.ty.display().as_bytes());
        }
    }
    hex::encode(hasher.finalize())
}

/// Snapshot a finished report for storage.
pub fn entry_from_report(
    report: &FunctionVerifyReport,
    inversion: Option<CachedInversion>,
) -> CachedFunction {
    CachedFunction {
        guarantees: report.guarantees.iter().map(verdict_to_cached).collect(),
        call_sites: report
            .call_sites
            .iter()
            .map(|site| CachedSite {
                callee: site.callee.clone(),
                assumptions: site.assumptions.iter().map(verdict_to_cached).collect(),
            })
            .collect(),
        stabilized: report.stabilized,
        inversion,
    }
}

fn verdict_to_cached(v: &ConstraintVerdict) -> CachedVerdict {
    CachedVerdict {
        text: v.text.clone(),
        result: v.result.clone(),
        guard: v.guard.clone(),
    }
}

/// Rehydrate a report from a cached entry, taking spans from the fresh
/// model. Returns `None` when the entry's shape no longer matches the model
/// (treated as a miss).
pub fn report_from_entry(
    model: &FunctionSymbolicModel,
    entry: &CachedFunction,
) -> Option<FunctionVerifyReport> {
    if entry.guarantees.len() != model.guarantees.len()
        || entry.call_sites.len() != model.call_sites.len()
    {
        return None;
    }
    for (cached, site) in entry.call_sites.iter().zip(model.call_sites.iter()) {
        if cached.callee != site.callee {
            return None;
        }
    }

    let guarantees = entry
        .guarantees
        .iter()
        .zip(model.guarantees.iter())
        .map(|(cached, decl)| ConstraintVerdict {
            kind: ConstraintKind::Guarantee,
            span: decl.span,
            text: cached.text.clone(),
            result: cached.result.clone(),
            guard: cached.guard.clone(),
        })
        .collect();
    let call_sites = entry
        .call_sites
        .iter()
        .zip(model.call_sites.iter())
        .map(|(cached, site)| CallSiteReport {
            span: site.span,
            callee: site.callee.clone(),
            assumptions: cached
                .assumptions
                .iter()
                .map(|v| ConstraintVerdict {
                    kind: ConstraintKind::Assumption,
                    span: site.span,
                    text: v.text.clone(),
                    result: v.result.clone(),
                    guard: v.guard.clone(),
                })
                .collect(),
        })
        .collect();

    Some(FunctionVerifyReport {
        function: model.name.clone(),
        span: model.span,
        guarantees,
        call_sites,
        stabilized: entry.stabilized,
    })
}
