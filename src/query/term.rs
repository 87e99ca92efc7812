// Copyright 2024 Saptak Santra
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Declarative query terms
//!
//! A query is an ordered list of terms over positional *targets*; each match
//! binds every target to one entity. Terms request component access, filter
//! with `with`/`without`, or bridge two targets through a relation.

use smallvec::SmallVec;

use crate::archetype::ColumnId;
use crate::error::{EcsError, Result};
use crate::types::{DataTypeId, RelationFlags, TypeKind, Types};

/// Positional slots a query can bind
pub const MAX_TARGETS: usize = 4;

/// How a component term touches its data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Access {
    Read,
    Write,
}

/// One term of a query
#[derive(Debug, Clone)]
pub enum QueryTerm {
    /// Access a component on a target
    Component {
        data_type: DataTypeId,
        target: usize,
        access: Access,
        /// Optional terms never reject a match, they only yield `None`.
        optional: bool,
        /// Restrict to rows whose column version advanced since the
        /// query's last update.
        changed: bool,
    },
    /// Require a column without accessing it
    With { column: ColumnId, target: usize },
    /// Reject archetypes holding a column
    Without { column: ColumnId, target: usize },
    /// Bridge two targets through a relation, within a depth-bucket range
    Related {
        data_type: DataTypeId,
        from_target: usize,
        to_target: usize,
        min_depth: u32,
        max_depth: u32,
    },
}

/// Ordered term list
#[derive(Debug, Clone, Default)]
pub struct QueryTerms {
    pub terms: SmallVec<[QueryTerm; 8]>,
}

impl QueryTerms {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, term: QueryTerm) -> &mut Self {
        self.terms.push(term);
        self
    }

    pub fn read(&mut self, data_type: DataTypeId, target: usize) -> &mut Self {
        self.push(QueryTerm::Component {
            data_type,
            target,
            access: Access::Read,
            optional: false,
            changed: false,
        })
    }

    pub fn write(&mut self, data_type: DataTypeId, target: usize) -> &mut Self {
        self.push(QueryTerm::Component {
            data_type,
            target,
            access: Access::Write,
            optional: false,
            changed: false,
        })
    }

    pub fn with(&mut self, data_type: DataTypeId, target: usize) -> &mut Self {
        self.push(QueryTerm::With {
            column: ColumnId::base(data_type),
            target,
        })
    }

    pub fn without(&mut self, data_type: DataTypeId, target: usize) -> &mut Self {
        self.push(QueryTerm::Without {
            column: ColumnId::base(data_type),
            target,
        })
    }

    pub fn related(
        &mut self,
        data_type: DataTypeId,
        from_target: usize,
        to_target: usize,
        min_depth: u32,
        max_depth: u32,
    ) -> &mut Self {
        self.push(QueryTerm::Related {
            data_type,
            from_target,
            to_target,
            min_depth,
            max_depth,
        })
    }

    /// Number of targets the terms reference (at least one)
    pub fn target_count(&self) -> usize {
        let mut max = 0;
        for term in &self.terms {
            let highest = match *term {
                QueryTerm::Component { target, .. }
                | QueryTerm::With { target, .. }
                | QueryTerm::Without { target, .. } => target,
                QueryTerm::Related {
                    from_target,
                    to_target,
                    ..
                } => from_target.max(to_target),
            };
            max = max.max(highest);
        }
        max + 1
    }

    /// Check target ranges and type kinds against a registry
    pub fn validate(&self, types: &Types) -> Result<()> {
        for term in &self.terms {
            match *term {
                QueryTerm::Component {
                    data_type, target, ..
                } => {
                    check_target(target)?;
                    types.expect_kind(data_type, TypeKind::Component)?;
                }
                QueryTerm::With { column, target } | QueryTerm::Without { column, target } => {
                    check_target(target)?;
                    types.expect_kind(column.data_type(), TypeKind::Component)?;
                }
                QueryTerm::Related {
                    data_type,
                    from_target,
                    to_target,
                    min_depth,
                    max_depth,
                } => {
                    check_target(from_target)?;
                    check_target(to_target)?;
                    types.expect_kind(data_type, TypeKind::Relation(RelationFlags::default()))?;
                    if min_depth > max_depth {
                        return Err(EcsError::InvalidRelation(
                            types.name(data_type).to_string(),
                            "query depth range is inverted",
                        ));
                    }
                }
            }
        }
        Ok(())
    }

    /// Data types read and written by the terms, for access analysis
    pub fn collect_access(&self, reads: &mut Vec<DataTypeId>, writes: &mut Vec<DataTypeId>) {
        for term in &self.terms {
            match *term {
                QueryTerm::Component {
                    data_type, access, ..
                } => match access {
                    Access::Read => reads.push(data_type),
                    Access::Write => writes.push(data_type),
                },
                QueryTerm::Related { data_type, .. } => reads.push(data_type),
                QueryTerm::With { .. } | QueryTerm::Without { .. } => {}
            }
        }
    }
}

fn check_target(target: usize) -> Result<()> {
    if target >= MAX_TARGETS {
        return Err(EcsError::TargetOutOfRange(target, MAX_TARGETS - 1));
    }
    Ok(())
}
