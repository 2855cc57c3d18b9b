//! # query
//!
//! The public face of the analyses. `Analysis::new` runs the points-to
//! fixpoint and the escape pass once; every query afterwards is a read of
//! the stored results and never changes them.
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use log::info;

use crate::config::AnalysisConfig;
use crate::error::{AnalysisError, Result};
use crate::escape_analysis::{EscapeAnalysis, EscapeRecord};
use crate::ir::{FuncId, Location, Program, ProgramPoint, SiteId, VarId};
use crate::location::{LocId, PointsToSet};
use crate::pointer_analysis::{PointerAnalysis, PointsToResult, PtsState};


/// A pointer-valued access path: a variable or a chain of struct fields
/// inside it, e.g. `lst.head`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Lvalue {
    pub var: VarId,
    pub fields: Vec<String>,
}

impl Lvalue {
    pub fn var(var: VarId) -> Self {
        Self {
            var,
            fields: Vec::new(),
        }
    }

    pub fn field(mut self, name: &str) -> Self {
        self.fields.push(name.to_owned());
        self
    }

    pub fn display<'a>(&'a self, program: &'a Program) -> DisplayLvalue<'a> {
        DisplayLvalue {
            lvalue: self,
            program,
        }
    }
}

pub struct DisplayLvalue<'a> {
    lvalue: &'a Lvalue,
    program: &'a Program,
}

impl<'a> fmt::Display for DisplayLvalue<'a> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.program.var(self.lvalue.var).name)?;
        for field in self.lvalue.fields.iter() {
            write!(f, ".{}", field)?;
        }
        Ok(())
    }
}

pub struct Analysis<'p> {
    program: &'p Program,
    points_to: PointsToResult,
    escapes: EscapeAnalysis,
}

impl<'p> Analysis<'p> {
    pub fn new(program: &'p Program) -> Result<Self> {
        Self::with_config(program, AnalysisConfig::default())
    }

    pub fn with_config(program: &'p Program, config: AnalysisConfig) -> Result<Self> {
        let points_to = PointerAnalysis::new(program, config).analyze()?;
        let escapes = EscapeAnalysis::new(program, &points_to);
        info!(
            "analysis finished: {} functions, {} abstract locations",
            program.functions().len(),
            points_to.arena.len()
        );
        Ok(Self {
            program,
            points_to,
            escapes,
        })
    }

    pub fn program(&self) -> &'p Program {
        self.program
    }

    pub fn points_to_result(&self) -> &PointsToResult {
        &self.points_to
    }

    pub fn function_id(&self, name: &str) -> Result<FuncId> {
        self.program
            .function_by_name(name)
            .map(|func| func.id)
            .ok_or_else(|| AnalysisError::UnknownFunction(name.to_owned()))
    }

    /// The point before `statement_index` of `block` in `function`.
    pub fn point(&self, function: &str, location: Location) -> Result<ProgramPoint> {
        let point = ProgramPoint::At(self.function_id(function)?, location);
        if !self.program.contains_point(point) {
            return Err(AnalysisError::UnknownProgramPoint(point));
        }
        Ok(point)
    }

    pub fn exit(&self, function: &str) -> Result<ProgramPoint> {
        Ok(ProgramPoint::Exit(self.function_id(function)?))
    }

    /// State at a valid point. `None` if the point is never reached.
    fn state(&self, point: ProgramPoint) -> Result<Option<&PtsState>> {
        if !self.program.contains_point(point) {
            return Err(AnalysisError::UnknownProgramPoint(point));
        }
        Ok(self.points_to.state_at(point))
    }

    /// Pointer lvalues visible in `func`: its parameters and locals, then
    /// the globals no local or parameter shadows.
    pub fn candidates(&self, func: FuncId) -> Vec<Lvalue> {
        let function = self.program.function(func);
        let mut vars: Vec<VarId> = function.variables().collect();
        let shadowed: BTreeSet<&str> = vars
            .iter()
            .map(|var| self.program.var(*var).name.as_str())
            .collect();
        vars.extend(
            self.program
                .globals()
                .iter()
                .copied()
                .filter(|global| !shadowed.contains(self.program.var(*global).name.as_str())),
        );
        let mut lvalues = Vec::new();
        for var in vars {
            for fields in self.program.pointer_paths(&self.program.var(var).ty) {
                lvalues.push(Lvalue { var, fields });
            }
        }
        lvalues
    }

    fn check_in_scope(&self, point: ProgramPoint, lvalue: &Lvalue) -> Result<()> {
        let Some(decl) = self.program.get_var(lvalue.var) else {
            return Err(AnalysisError::MalformedIr(format!(
                "variable #{} is not part of this program",
                lvalue.var.index()
            )));
        };
        match decl.owner() {
            Some(owner) if owner != point.function() => Err(AnalysisError::MalformedIr(format!(
                "`{}` is not visible in `{}`",
                lvalue.display(self.program),
                self.program.function(point.function()).name
            ))),
            _ => Ok(()),
        }
    }

    fn lvalue_points_to(&self, state: &PtsState, lvalue: &Lvalue) -> PointsToSet {
        self.points_to
            .lvalue_points_to(self.program, state, lvalue.var, &lvalue.fields)
    }

    /// Groups of lvalues that definitely hold the same address at `point`.
    /// Only groups of two or more are returned; null never aliases.
    pub fn must_alias_groups(&self, point: ProgramPoint) -> Result<Vec<BTreeSet<Lvalue>>> {
        let Some(state) = self.state(point)? else {
            return Ok(Vec::new());
        };
        let mut groups: BTreeMap<LocId, BTreeSet<Lvalue>> = BTreeMap::new();
        for lvalue in self.candidates(point.function()) {
            let pointees = self.lvalue_points_to(state, &lvalue);
            if let Some(target) = pointees.as_singleton() {
                if target != LocId::NULL {
                    groups.entry(target).or_default().insert(lvalue);
                }
            }
        }
        let mut groups: Vec<BTreeSet<Lvalue>> = groups
            .into_values()
            .filter(|group| group.len() >= 2)
            .collect();
        groups.sort();
        Ok(groups)
    }

    /// `must_alias_groups` rendered as sorted names.
    pub fn must_alias_names(&self, point: ProgramPoint) -> Result<Vec<Vec<String>>> {
        let mut groups: Vec<Vec<String>> = self
            .must_alias_groups(point)?
            .iter()
            .map(|group| {
                let mut names: Vec<String> = group
                    .iter()
                    .map(|lvalue| lvalue.display(self.program).to_string())
                    .collect();
                names.sort();
                names
            })
            .collect();
        groups.sort();
        Ok(groups)
    }

    pub fn may_alias(&self, point: ProgramPoint, a: &Lvalue, b: &Lvalue) -> Result<bool> {
        let state = self.state(point)?;
        self.check_in_scope(point, a)?;
        self.check_in_scope(point, b)?;
        let Some(state) = state else {
            return Ok(false);
        };
        Ok(self
            .lvalue_points_to(state, a)
            .may_alias(&self.lvalue_points_to(state, b)))
    }

    /// Rendered targets of `lvalue` at `point`.
    pub fn points_to(&self, point: ProgramPoint, lvalue: &Lvalue) -> Result<Vec<String>> {
        let state = self.state(point)?;
        self.check_in_scope(point, lvalue)?;
        let Some(state) = state else {
            return Ok(Vec::new());
        };
        let mut targets: Vec<String> = self
            .lvalue_points_to(state, lvalue)
            .iter()
            .map(|loc| self.points_to.arena.display(loc, self.program).to_string())
            .collect();
        targets.sort();
        Ok(targets)
    }

    /// Allocation sites of `function` whose objects outlive it.
    pub fn escaping_allocations(&self, function: &str) -> Result<BTreeSet<SiteId>> {
        Ok(self.escapes.escaping_sites(self.function_id(function)?))
    }

    /// Names of the variables of `function` bound to escaping objects.
    pub fn escaping_variables(&self, function: &str) -> Result<BTreeSet<String>> {
        let func = self.function_id(function)?;
        Ok(self
            .escapes
            .escaping_variables(func)
            .into_iter()
            .map(|var| self.program.var(var).name.clone())
            .collect())
    }

    pub fn escape_record(&self, site: SiteId) -> Option<&EscapeRecord> {
        self.escapes.record(site)
    }
}
