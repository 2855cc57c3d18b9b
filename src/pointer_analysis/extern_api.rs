//! Library functions the analysis knows the pointer effect of.

use std::collections::HashMap;

use once_cell::sync::Lazy;
use regex::Regex;

use crate::ir::{Callee, Function, SiteId, Statement};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExternApi {
    /// Returns a fresh heap object: `malloc`, `calloc`, `realloc`, ...
    Alloc,
    /// Copies memory from the second argument into the first and returns
    /// the first: `memcpy`, `memmove`.
    Copy,
    /// `free`. No effect on points-to sets.
    Free,
}

impl ExternApi {
    pub fn new(name: &str) -> Option<Self> {
        for (api, regex) in EXTERN_API_REGEX.iter() {
            if regex.is_match(name) {
                return Some(*api);
            }
        }
        None
    }
}

static EXTERN_API_REGEX: Lazy<HashMap<ExternApi, Regex>> = Lazy::new(|| {
    let mut m = HashMap::new();
    m.insert(
        ExternApi::Alloc,
        Regex::new(r"^(malloc|calloc|realloc|reallocarray|aligned_alloc|strdup|strndup)$")
            .unwrap(),
    );
    m.insert(ExternApi::Copy, Regex::new(r"^(memcpy|memmove)$").unwrap());
    m.insert(ExternApi::Free, Regex::new(r"^free$").unwrap());
    m
});

/// Heap allocation sites appearing in the body of `func`.
pub fn allocation_sites(func: &Function) -> Vec<SiteId> {
    let mut sites = Vec::new();
    for block in func.blocks.iter() {
        for statement in block.statements.iter() {
            match statement {
                Statement::Alloc { site, .. } => sites.push(*site),
                Statement::Call {
                    callee: Callee::External(name),
                    site,
                    ..
                } if ExternApi::new(name) == Some(ExternApi::Alloc) => sites.push(*site),
                _ => {}
            }
        }
    }
    sites
}
